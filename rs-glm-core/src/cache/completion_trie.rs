use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::io::BufRead;
use std::path::PathBuf;

use crate::counter::Counter;
use crate::error::GlmError;
use crate::io;

/// One ranked result of a prefix completion query.
#[derive(Clone, Debug)]
pub struct Completion {
	pub sequence: String,
	pub counter: Counter,
	pub score: f64,
}

#[derive(Debug)]
struct TrieNode {
	/// Child edges, sorted by byte.
	children: Vec<(u8, usize)>,
	/// The record of the sequence ending here, if any.
	counter: Option<Counter>,
	/// Largest count of any record in this subtree, the upper bound used to
	/// prune completion search.
	max_count: u64,
}

impl TrieNode {
	fn new() -> Self {
		Self { children: Vec::new(), counter: None, max_count: 0 }
	}
}

/// A byte-keyed trie over the sequences of one pattern store.
///
/// Leaves hold the count record. Every node carries the maximum record
/// count of its subtree, so a completion query can search best-first: a
/// subtree whose bound cannot beat the current k-th result is never
/// descended into. The score function supplied by an estimator must be
/// non-decreasing in the record count for a fixed query, which makes the
/// bound sound.
///
/// Nodes live in an index-addressed arena; the root is node 0.
#[derive(Debug)]
pub struct CompletionTrie {
	nodes: Vec<TrieNode>,
}

impl CompletionTrie {
	pub fn new() -> Self {
		Self { nodes: vec![TrieNode::new()] }
	}

	/// Builds the trie by streaming over the sorted chunks of one pattern
	/// store.
	///
	/// Chunks are merged on the fly; the trie never sees an unsorted key.
	/// Buckets partition the key space, so a key appearing twice would be a
	/// store corruption; records are still merged additively rather than
	/// silently dropped.
	pub fn from_sorted_chunks(chunks: &[PathBuf]) -> Result<Self, GlmError> {
		let mut trie = Self::new();

		let mut readers = Vec::with_capacity(chunks.len());
		for chunk in chunks {
			readers.push(io::open_reader(chunk)?.lines());
		}

		let mut heap: BinaryHeap<Reverse<(String, Counter, usize)>> = BinaryHeap::new();
		for chunk_idx in 0..readers.len() {
			if let Some((key, counter)) = pull_entry(&mut readers, chunks, chunk_idx)? {
				heap.push(Reverse((key, counter, chunk_idx)));
			}
		}
		while let Some(Reverse((key, counter, chunk_idx))) = heap.pop() {
			trie.insert(&key, counter);
			if let Some((key, counter)) = pull_entry(&mut readers, chunks, chunk_idx)? {
				heap.push(Reverse((key, counter, chunk_idx)));
			}
		}
		Ok(trie)
	}

	/// Inserts one sequence. Existing records for the same sequence are
	/// merged additively.
	pub fn insert(&mut self, key: &str, counter: Counter) {
		let count = counter.count();
		let mut node = 0;
		self.nodes[0].max_count = self.nodes[0].max_count.max(count);
		for &byte in key.as_bytes() {
			node = match self.nodes[node].children.binary_search_by_key(&byte, |c| c.0) {
				Ok(pos) => self.nodes[node].children[pos].1,
				Err(pos) => {
					let child = self.nodes.len();
					self.nodes.push(TrieNode::new());
					self.nodes[node].children.insert(pos, (byte, child));
					child
				}
			};
			self.nodes[node].max_count = self.nodes[node].max_count.max(count);
		}
		match self.nodes[node].counter.as_mut() {
			Some(existing) => existing.add(&counter),
			None => self.nodes[node].counter = Some(counter),
		}
	}

	/// Point lookup of one full sequence.
	pub fn get(&self, key: &str) -> Option<&Counter> {
		let node = self.walk(key.as_bytes())?;
		self.nodes[node].counter.as_ref()
	}

	/// Every stored sequence, in ascending byte order.
	pub fn keys(&self) -> Vec<String> {
		let mut keys = Vec::new();
		let mut buffer = Vec::new();
		self.collect_keys(0, &mut buffer, &mut keys);
		keys
	}

	/// Up to `k` completions of `prefix`, ranked by non-increasing score
	/// with ties broken by ascending sequence order.
	///
	/// `score` is evaluated on full sequences; for pruning it is also
	/// evaluated on the subtree count bound, hence the monotonicity
	/// requirement.
	pub fn completions(
		&self,
		prefix: &str,
		k: usize,
		score: &dyn Fn(&str, &Counter) -> f64,
	) -> Vec<Completion> {
		if k == 0 {
			return Vec::new();
		}
		let Some(start) = self.walk(prefix.as_bytes()) else {
			return Vec::new();
		};

		let mut best: BinaryHeap<Reverse<Ranked>> = BinaryHeap::new();
		let mut buffer = prefix.as_bytes().to_vec();
		self.search(start, &mut buffer, k, score, &mut best);

		best.into_sorted_vec()
			.into_iter()
			.map(|Reverse(ranked)| Completion {
				sequence: ranked.sequence,
				counter: ranked.counter,
				score: ranked.score,
			})
			.collect()
	}

	fn walk(&self, bytes: &[u8]) -> Option<usize> {
		let mut node = 0;
		for &byte in bytes {
			let pos = self.nodes[node]
				.children
				.binary_search_by_key(&byte, |c| c.0)
				.ok()?;
			node = self.nodes[node].children[pos].1;
		}
		Some(node)
	}

	fn collect_keys(&self, node: usize, buffer: &mut Vec<u8>, keys: &mut Vec<String>) {
		if self.nodes[node].counter.is_some() {
			keys.push(String::from_utf8_lossy(buffer).into_owned());
		}
		for &(byte, child) in &self.nodes[node].children {
			buffer.push(byte);
			self.collect_keys(child, buffer, keys);
			buffer.pop();
		}
	}

	/// Depth-first search in ascending byte order, keeping the k best
	/// results in a min-heap whose top is the current worst.
	///
	/// Sequences are visited in ascending order, so any later candidate
	/// loses a score tie against a kept one; subtrees bounded at or below
	/// the worst kept score can be pruned outright.
	fn search(
		&self,
		node: usize,
		buffer: &mut Vec<u8>,
		k: usize,
		score: &dyn Fn(&str, &Counter) -> f64,
		best: &mut BinaryHeap<Reverse<Ranked>>,
	) {
		if best.len() == k {
			let bound_counter = Counter::absolute(self.nodes[node].max_count);
			let sequence = String::from_utf8_lossy(buffer).into_owned();
			let bound = score(&sequence, &bound_counter);
			let worst = &best.peek().expect("heap holds k entries").0;
			if bound <= worst.score {
				return;
			}
		}

		if let Some(counter) = &self.nodes[node].counter {
			let sequence = String::from_utf8_lossy(buffer).into_owned();
			let ranked = Ranked {
				score: score(&sequence, counter),
				sequence,
				counter: *counter,
			};
			if best.len() < k {
				best.push(Reverse(ranked));
			} else if ranked > best.peek().expect("heap holds k entries").0 {
				best.pop();
				best.push(Reverse(ranked));
			}
		}

		for &(byte, child) in &self.nodes[node].children {
			buffer.push(byte);
			self.search(child, buffer, k, score, best);
			buffer.pop();
		}
	}
}

impl Default for CompletionTrie {
	fn default() -> Self {
		Self::new()
	}
}

/// Reads the next entry of one chunk during the streaming merge.
fn pull_entry(
	readers: &mut [std::io::Lines<std::io::BufReader<std::fs::File>>],
	chunks: &[PathBuf],
	chunk_idx: usize,
) -> Result<Option<(String, Counter)>, GlmError> {
	match readers[chunk_idx].next() {
		None => Ok(None),
		Some(Err(e)) => Err(GlmError::io("read", &chunks[chunk_idx], e)),
		Some(Ok(line)) => {
			let (key, counter) = Counter::parse_line(&line)
				.map_err(|cause| GlmError::file_format(&chunks[chunk_idx], 0, cause))?;
			Ok(Some((key.to_owned(), counter)))
		}
	}
}

/// Ranking wrapper: greater means better. Equal scores rank the smaller
/// sequence higher.
struct Ranked {
	score: f64,
	sequence: String,
	counter: Counter,
}

impl PartialEq for Ranked {
	fn eq(&self, other: &Self) -> bool {
		self.cmp(other) == std::cmp::Ordering::Equal
	}
}

impl Eq for Ranked {}

impl PartialOrd for Ranked {
	fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
		Some(self.cmp(other))
	}
}

impl Ord for Ranked {
	fn cmp(&self, other: &Self) -> std::cmp::Ordering {
		self.score
			.total_cmp(&other.score)
			.then_with(|| other.sequence.cmp(&self.sequence))
	}
}
