//! In-memory views of pattern stores.
//!
//! A [`CacheSpecification`] names what to load (words, counts per pattern)
//! and which backing to use. The two backings are sealed variants of one
//! [`Cache`] type sharing a uniform contract: point lookup of a count
//! record, and the optional word list. The completion-trie backing
//! additionally serves ranked prefix completion, which the
//! [`argmax`] executor builds upon.
//!
//! A cache is immutable after build and safe to share across readers.
//! Estimators receive it per call and keep no pointer to it.

pub mod argmax;
pub mod completion_trie;

use std::collections::{BTreeSet, HashMap};
use std::io::BufRead;

use tracing::debug;

use crate::counter::Counter;
use crate::error::GlmError;
use crate::io;
use crate::paths::GlmPaths;
use crate::pattern::Pattern;

use completion_trie::{Completion, CompletionTrie};

/// Which data structure backs a cache.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CacheBacking {
	/// Point lookup only.
	HashMap,
	/// Point lookup plus ranked prefix completion.
	CompletionTrie,
}

/// Declares the artefacts a cache must load.
///
/// Built by the estimators (each declares the patterns it needs) and by the
/// front-ends, then turned into a [`Cache`] against a store location.
#[derive(Clone, Debug)]
pub struct CacheSpecification {
	words: bool,
	counts: BTreeSet<Pattern>,
	backing: CacheBacking,
}

impl CacheSpecification {
	pub fn new() -> Self {
		Self { words: false, counts: BTreeSet::new(), backing: CacheBacking::HashMap }
	}

	/// Requests the vocabulary. Implies loading unigram counts, as the word
	/// list is their key set.
	pub fn with_words(mut self) -> Self {
		self.words = true;
		self
	}

	pub fn with_counts<I: IntoIterator<Item = Pattern>>(mut self, patterns: I) -> Self {
		self.counts.extend(patterns);
		self
	}

	pub fn with_backing(mut self, backing: CacheBacking) -> Self {
		self.backing = backing;
		self
	}

	pub fn backing(&self) -> CacheBacking {
		self.backing
	}

	/// Every pattern whose store the build will read.
	pub fn required_patterns(&self) -> Result<BTreeSet<Pattern>, GlmError> {
		let mut patterns = self.counts.clone();
		if self.words {
			patterns.insert(Pattern::cnt(1)?);
		}
		Ok(patterns)
	}

	/// Loads exactly the requested artefacts from a store location.
	///
	/// # Errors
	/// Fails when a requested pattern store is missing; counting must run
	/// first.
	pub fn build(&self, paths: &GlmPaths) -> Result<Cache, GlmError> {
		let patterns = self.required_patterns()?;
		debug!(patterns = patterns.len(), backing = ?self.backing, "building cache");

		let chunk_files = |pattern: &Pattern| -> Result<Vec<std::path::PathBuf>, GlmError> {
			let dir = paths.pattern_dir(pattern);
			if !dir.is_dir() {
				return Err(GlmError::CliArgument(format!(
					"Pattern store '{}' is missing under '{}'; run counting first.",
					pattern,
					paths.working_dir().display()
				)));
			}
			io::list_files(&dir)
		};

		match self.backing {
			CacheBacking::HashMap => {
				let mut counts = HashMap::new();
				for pattern in &patterns {
					let mut entries: HashMap<String, Counter> = HashMap::new();
					for chunk in chunk_files(pattern)? {
						let reader = io::open_reader(&chunk)?;
						for (line_no, line) in reader.lines().enumerate() {
							let line = line.map_err(|e| GlmError::io("read", &chunk, e))?;
							let (key, counter) = Counter::parse_line(&line).map_err(|cause| {
								GlmError::file_format(&chunk, line_no + 1, cause)
							})?;
							entries.insert(key.to_owned(), counter);
						}
					}
					counts.insert(pattern.clone(), entries);
				}

				let words = if self.words {
					let unigram = Pattern::cnt(1)?;
					let mut words: Vec<String> = counts
						.get(&unigram)
						.map(|entries| entries.keys().cloned().collect())
						.unwrap_or_default();
					words.sort();
					Some(words)
				} else {
					None
				};
				Ok(Cache::Hash(HashCache { counts, words }))
			}
			CacheBacking::CompletionTrie => {
				let mut tries = HashMap::new();
				for pattern in &patterns {
					let files = chunk_files(pattern)?;
					tries.insert(pattern.clone(), CompletionTrie::from_sorted_chunks(&files)?);
				}
				let words = if self.words {
					let unigram = Pattern::cnt(1)?;
					Some(tries.get(&unigram).map(CompletionTrie::keys).unwrap_or_default())
				} else {
					None
				};
				Ok(Cache::Trie(TrieCache { tries, words }))
			}
		}
	}
}

impl Default for CacheSpecification {
	fn default() -> Self {
		Self::new()
	}
}

/// A read-only view of selected pattern stores.
///
/// The two variants share the point-lookup contract; only the trie variant
/// answers completion queries.
#[derive(Debug)]
pub enum Cache {
	Hash(HashCache),
	Trie(TrieCache),
}

#[derive(Debug)]
pub struct HashCache {
	counts: HashMap<Pattern, HashMap<String, Counter>>,
	words: Option<Vec<String>>,
}

#[derive(Debug)]
pub struct TrieCache {
	tries: HashMap<Pattern, CompletionTrie>,
	words: Option<Vec<String>>,
}

impl Cache {
	/// The full count record for a sequence, or `None` when the sequence is
	/// unseen or the pattern was not loaded.
	pub fn counter(&self, pattern: &Pattern, sequence: &str) -> Option<Counter> {
		match self {
			Self::Hash(cache) => cache
				.counts
				.get(pattern)
				.and_then(|entries| entries.get(sequence))
				.copied(),
			Self::Trie(cache) => cache
				.tries
				.get(pattern)
				.and_then(|trie| trie.get(sequence))
				.copied(),
		}
	}

	/// The count of a sequence under a pattern.
	pub fn count(&self, pattern: &Pattern, sequence: &str) -> Option<u64> {
		self.counter(pattern, sequence).map(|c| c.count())
	}

	/// The vocabulary, if the specification requested it.
	pub fn words(&self) -> Option<&[String]> {
		match self {
			Self::Hash(cache) => cache.words.as_deref(),
			Self::Trie(cache) => cache.words.as_deref(),
		}
	}

	/// Whether this cache answers completion queries.
	pub fn has_completions(&self) -> bool {
		matches!(self, Self::Trie(_))
	}

	/// Up to `k` ranked completions of a prefix under a pattern.
	///
	/// `None` on the hash backing. A loaded trie with no match yields an
	/// empty list.
	pub fn completions(
		&self,
		pattern: &Pattern,
		prefix: &str,
		k: usize,
		score: &dyn Fn(&str, &Counter) -> f64,
	) -> Option<Vec<Completion>> {
		match self {
			Self::Hash(_) => None,
			Self::Trie(cache) => Some(
				cache
					.tries
					.get(pattern)
					.map(|trie| trie.completions(prefix, k, score))
					.unwrap_or_default(),
			),
		}
	}
}
