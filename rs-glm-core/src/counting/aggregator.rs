use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::fs::File;
use std::io::{BufRead, BufReader, Lines, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, trace};

use crate::counter::Counter;
use crate::error::GlmError;
use crate::io;

/// What a split file's lines mean and which chunk format to produce.
///
/// Absolute split lines are bare keys, one occurrence each. Continuation
/// split lines carry the witness's absolute count after a tab; every line is
/// one distinct witness.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum AggregateMode {
	Absolute,
	Continuation,
}

/// Aggregates one split file into one sorted chunk file.
///
/// Keys are accumulated in memory up to `spill_threshold` distinct entries;
/// beyond that, sorted runs are spilled next to the split file and merged at
/// the end. The resulting chunk holds unique keys in strictly ascending byte
/// order. A missing split file yields an empty chunk, keeping the bucket
/// partition complete.
///
/// # Errors
/// Any I/O fault or malformed split line aborts this chunk; the partially
/// written chunk and all spill runs are deleted before the error surfaces.
pub fn aggregate(
	split_file: &Path,
	chunk_file: &Path,
	mode: AggregateMode,
	spill_threshold: usize,
) -> Result<(), GlmError> {
	let mut runs = SpillRuns::new(split_file);
	let result = aggregate_inner(split_file, chunk_file, mode, spill_threshold.max(1), &mut runs);
	runs.cleanup();
	if result.is_err() {
		io::remove_file(chunk_file);
	}
	result
}

fn aggregate_inner(
	split_file: &Path,
	chunk_file: &Path,
	mode: AggregateMode,
	spill_threshold: usize,
	runs: &mut SpillRuns,
) -> Result<(), GlmError> {
	let mut counts: HashMap<String, Counter> = HashMap::new();

	if split_file.exists() {
		let reader = io::open_reader(split_file)?;
		for (line_no, line) in reader.lines().enumerate() {
			let line = line.map_err(|e| GlmError::io("read", split_file, e))?;
			match mode {
				AggregateMode::Absolute => {
					counts.entry(line).or_default().add_count(1);
				}
				AggregateMode::Continuation => {
					let (key, count) = line.split_once('\t').ok_or_else(|| {
						GlmError::file_format(
							split_file,
							line_no + 1,
							"Expected '<sequence>\\t<count>'.",
						)
					})?;
					let count = count.parse::<u64>().map_err(|_| {
						GlmError::file_format(
							split_file,
							line_no + 1,
							format!("Unable to parse '{}' as a count.", count),
						)
					})?;
					counts.entry(key.to_owned()).or_default().add_one(count);
				}
			}
			if counts.len() >= spill_threshold {
				runs.spill(&mut counts)?;
			}
		}
	}

	let mut writer = io::create_writer(chunk_file)?;
	if runs.is_empty() {
		// Everything fit in memory; sort once and write.
		let mut entries: Vec<(String, Counter)> = counts.drain().collect();
		entries.sort_unstable_by(|a, b| a.0.cmp(&b.0));
		for (key, counter) in entries {
			write_entry(&mut writer, chunk_file, &key, &counter, mode)?;
		}
	} else {
		runs.spill(&mut counts)?;
		debug!(runs = runs.len(), chunk = %chunk_file.display(), "merging spill runs");
		merge_runs(runs, &mut writer, chunk_file, mode)?;
	}
	writer.flush().map_err(|e| GlmError::io("write", chunk_file, e))
}

fn write_entry(
	writer: &mut impl Write,
	chunk_file: &Path,
	key: &str,
	counter: &Counter,
	mode: AggregateMode,
) -> Result<(), GlmError> {
	counter.check(key)?;
	let formatted = match mode {
		AggregateMode::Absolute => counter.format_absolute(),
		AggregateMode::Continuation => counter.format_continuation(),
	};
	writeln!(writer, "{}\t{}", key, formatted).map_err(|e| GlmError::io("write", chunk_file, e))
}

/// Sorted temporary runs spilled during one aggregation.
struct SpillRuns {
	split_file: PathBuf,
	paths: Vec<PathBuf>,
}

impl SpillRuns {
	fn new(split_file: &Path) -> Self {
		Self { split_file: split_file.to_path_buf(), paths: Vec::new() }
	}

	fn is_empty(&self) -> bool {
		self.paths.is_empty()
	}

	fn len(&self) -> usize {
		self.paths.len()
	}

	/// Writes the current in-memory counts as one sorted run and clears
	/// them. Runs always use the 5-column record form.
	fn spill(&mut self, counts: &mut HashMap<String, Counter>) -> Result<(), GlmError> {
		if counts.is_empty() {
			return Ok(());
		}
		let name = match self.split_file.file_name() {
			Some(name) => name.to_string_lossy().into_owned(),
			None => "split".to_owned(),
		};
		let path = self
			.split_file
			.with_file_name(format!("{}.run{}", name, self.paths.len()));

		let mut entries: Vec<(String, Counter)> = counts.drain().collect();
		entries.sort_unstable_by(|a, b| a.0.cmp(&b.0));
		trace!(entries = entries.len(), run = %path.display(), "spilling sorted run");

		let mut writer = io::create_writer(&path)?;
		for (key, counter) in entries {
			writeln!(writer, "{}\t{}", key, counter.format_continuation())
				.map_err(|e| GlmError::io("write", &path, e))?;
		}
		writer.flush().map_err(|e| GlmError::io("write", &path, e))?;
		self.paths.push(path);
		Ok(())
	}

	fn cleanup(&self) {
		for path in &self.paths {
			io::remove_file(path);
		}
	}
}

/// One pending line of a spill run inside the merge heap.
struct MergeHead {
	key: String,
	counter: Counter,
	run: usize,
}

impl PartialEq for MergeHead {
	fn eq(&self, other: &Self) -> bool {
		self.key == other.key && self.run == other.run
	}
}

impl Eq for MergeHead {}

impl PartialOrd for MergeHead {
	fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
		Some(self.cmp(other))
	}
}

impl Ord for MergeHead {
	fn cmp(&self, other: &Self) -> std::cmp::Ordering {
		self.key.cmp(&other.key).then(self.run.cmp(&other.run))
	}
}

/// K-way merges the sorted runs, summing records of equal keys.
fn merge_runs(
	runs: &SpillRuns,
	writer: &mut impl Write,
	chunk_file: &Path,
	mode: AggregateMode,
) -> Result<(), GlmError> {
	let mut readers: Vec<Lines<BufReader<File>>> = Vec::with_capacity(runs.paths.len());
	for path in &runs.paths {
		readers.push(io::open_reader(path)?.lines());
	}

	let mut heap: BinaryHeap<Reverse<MergeHead>> = BinaryHeap::new();
	for run in 0..readers.len() {
		if let Some(head) = next_head(&mut readers, runs, run)? {
			heap.push(Reverse(head));
		}
	}

	while let Some(Reverse(head)) = heap.pop() {
		let MergeHead { key, mut counter, run } = head;
		if let Some(next) = next_head(&mut readers, runs, run)? {
			heap.push(Reverse(next));
		}
		// Drain every run's record for this key.
		while let Some(Reverse(peek)) = heap.peek() {
			if peek.key != key {
				break;
			}
			let Reverse(same) = heap.pop().expect("peeked entry present");
			counter.add(&same.counter);
			if let Some(next) = next_head(&mut readers, runs, same.run)? {
				heap.push(Reverse(next));
			}
		}
		write_entry(writer, chunk_file, &key, &counter, mode)?;
	}
	Ok(())
}

fn next_head(
	readers: &mut [Lines<BufReader<File>>],
	runs: &SpillRuns,
	run: usize,
) -> Result<Option<MergeHead>, GlmError> {
	let path = &runs.paths[run];
	match readers[run].next() {
		None => Ok(None),
		Some(Err(e)) => Err(GlmError::io("read", path, e)),
		Some(Ok(line)) => {
			let (key, counter) = Counter::parse_line(&line)
				.map_err(|cause| GlmError::file_format(path, 0, cause))?;
			Ok(Some(MergeHead { key: key.to_owned(), counter, run }))
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::fs;
	use tempfile::TempDir;

	fn write_split(dir: &TempDir, name: &str, lines: &[&str]) -> PathBuf {
		let path = dir.path().join(name);
		fs::write(&path, lines.join("\n") + "\n").unwrap();
		path
	}

	fn read_chunk(path: &Path) -> Vec<String> {
		fs::read_to_string(path)
			.unwrap()
			.lines()
			.map(str::to_owned)
			.collect()
	}

	#[test]
	fn absolute_counts_and_ordering() {
		let dir = TempDir::new().unwrap();
		let split = write_split(&dir, "0", &["b a", "a b", "a b"]);
		let chunk = dir.path().join("chunk");
		aggregate(&split, &chunk, AggregateMode::Absolute, 1 << 20).unwrap();
		assert_eq!(read_chunk(&chunk), ["a b\t2", "b a\t1"]);
	}

	#[test]
	fn continuation_counts_follow_witness_rule() {
		// Witnesses of "% b": context "a" with absolute count 2.
		// Witnesses of "% c" and "% d": one context each, count 1.
		let dir = TempDir::new().unwrap();
		let split = write_split(&dir, "0", &["% b\t2", "% c\t1", "% d\t1"]);
		let chunk = dir.path().join("chunk");
		aggregate(&split, &chunk, AggregateMode::Continuation, 1 << 20).unwrap();
		assert_eq!(
			read_chunk(&chunk),
			["% b\t1\t0\t1\t0", "% c\t1\t1\t0\t0", "% d\t1\t1\t0\t0"]
		);
	}

	#[test]
	fn spilling_matches_in_memory_result() {
		let dir = TempDir::new().unwrap();
		let lines = ["c", "a", "b", "a", "c", "a", "d", "b"];
		let split = write_split(&dir, "0", &lines);
		let in_memory = dir.path().join("in_memory");
		let spilled = dir.path().join("spilled");
		aggregate(&split, &in_memory, AggregateMode::Absolute, 1 << 20).unwrap();
		aggregate(&split, &spilled, AggregateMode::Absolute, 2).unwrap();
		assert_eq!(read_chunk(&in_memory), read_chunk(&spilled));
		assert_eq!(read_chunk(&spilled), ["a\t3", "b\t2", "c\t2", "d\t1"]);
	}

	#[test]
	fn spill_runs_are_removed() {
		let dir = TempDir::new().unwrap();
		let split = write_split(&dir, "0", &["a", "b", "c", "d"]);
		let chunk = dir.path().join("chunk");
		aggregate(&split, &chunk, AggregateMode::Absolute, 2).unwrap();
		let leftovers: Vec<_> = fs::read_dir(dir.path())
			.unwrap()
			.map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
			.filter(|name| name.contains("run"))
			.collect();
		assert!(leftovers.is_empty(), "leftover runs: {:?}", leftovers);
	}

	#[test]
	fn missing_split_yields_empty_chunk() {
		let dir = TempDir::new().unwrap();
		let chunk = dir.path().join("chunk");
		aggregate(&dir.path().join("absent"), &chunk, AggregateMode::Absolute, 16).unwrap();
		assert!(read_chunk(&chunk).is_empty());
	}

	#[test]
	fn malformed_continuation_line_deletes_partial_chunk() {
		let dir = TempDir::new().unwrap();
		let split = write_split(&dir, "0", &["% b\tnot-a-number"]);
		let chunk = dir.path().join("chunk");
		let err = aggregate(&split, &chunk, AggregateMode::Continuation, 16).unwrap_err();
		assert!(matches!(err, GlmError::FileFormat { .. }));
		assert!(!chunk.exists());
	}

	#[test]
	fn keys_strictly_ascending_in_byte_order() {
		let dir = TempDir::new().unwrap();
		let split = write_split(&dir, "0", &["b", "a c", "a", "ab"]);
		let chunk = dir.path().join("chunk");
		aggregate(&split, &chunk, AggregateMode::Absolute, 2).unwrap();
		let keys: Vec<String> = read_chunk(&chunk)
			.iter()
			.map(|l| l.split('\t').next().unwrap().to_owned())
			.collect();
		let mut sorted = keys.clone();
		sorted.sort();
		sorted.dedup();
		assert_eq!(keys, sorted);
	}
}
