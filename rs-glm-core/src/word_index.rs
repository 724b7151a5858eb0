use std::collections::HashSet;
use std::hash::Hasher;
use std::io::{BufRead, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;
use twox_hash::XxHash64;

use crate::error::GlmError;
use crate::io;
use crate::pattern::{POS_SEPARATOR, SKIP_WORD, WSKIP_WORD};

/// Seed of the bucket hash. Part of the on-disk contract: stores are only
/// portable between builds agreeing on hash function and seed.
const HASH_SEED: u64 = 0;

/// Corpus statistics gathered while building the index, persisted as
/// `stats.txt`.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub struct CorpusStats {
	pub vocab_size: u64,
	pub token_count: u64,
	pub line_count: u64,
}

/// A fixed partition of the vocabulary into buckets.
///
/// The bucket of a word is `xxhash64(word) mod n` over the word's UTF-8
/// bytes with seed 0. The function is total and deterministic across
/// processes and insensitive to the order words are first seen in, so
/// repeated builds over shuffled input agree.
///
/// The persisted form (`index.txt`) lists one bucket per line as
/// `<bucket-id>\t<lexicographically lowest word in the bucket>`; the bucket
/// function itself is recovered from the line count alone.
#[derive(Clone, Debug)]
pub struct WordIndex {
	bucket_count: usize,
	first_words: Vec<String>,
}

impl WordIndex {
	pub fn bucket_count(&self) -> usize {
		self.bucket_count
	}

	/// The bucket of a word. Total and pure; with an empty index every word
	/// maps to bucket 0.
	pub fn bucket_of(&self, word: &str) -> usize {
		if self.bucket_count == 0 {
			return 0;
		}
		(hash_word(word) % self.bucket_count as u64) as usize
	}

	/// Builds the index from the training corpus.
	///
	/// Scans every token, validates it against the reserved symbols and
	/// gathers the corpus statistics. The bucket count is `requested` when
	/// given, otherwise the square root of the vocabulary size, rounded up.
	///
	/// # Errors
	/// A token containing a reserved symbol fails the build with a file
	/// format error citing the offending line.
	pub fn build(corpus: &Path, requested: Option<usize>) -> Result<(Self, CorpusStats), GlmError> {
		let reader = io::open_reader(corpus)?;
		let mut stats = CorpusStats::default();
		let mut vocabulary: HashSet<String> = HashSet::new();

		for (line_no, line) in reader.lines().enumerate() {
			let line = line.map_err(|e| GlmError::io("read", corpus, e))?;
			stats.line_count += 1;
			check_reserved_symbols(&line, corpus, line_no + 1)?;
			for token in line.split_whitespace() {
				stats.token_count += 1;
				if !vocabulary.contains(token) {
					vocabulary.insert(token.to_owned());
				}
			}
		}
		stats.vocab_size = vocabulary.len() as u64;

		let bucket_count = match requested {
			Some(n) => n,
			None => (stats.vocab_size as f64).sqrt().ceil() as usize,
		};

		// Lowest word per bucket, purely informational in the persisted file.
		let mut first_words = vec![String::new(); bucket_count];
		if bucket_count > 0 {
			for word in &vocabulary {
				let bucket = (hash_word(word) % bucket_count as u64) as usize;
				let slot = &mut first_words[bucket];
				if slot.is_empty() || word.as_str() < slot.as_str() {
					slot.clone_from(word);
				}
			}
		}

		debug!(
			vocab = stats.vocab_size,
			tokens = stats.token_count,
			buckets = bucket_count,
			"word index built"
		);
		Ok((Self { bucket_count, first_words }, stats))
	}

	/// Writes the persisted representation, one bucket per line.
	pub fn write(&self, path: &Path) -> Result<(), GlmError> {
		let mut writer = io::create_writer(path)?;
		for (bucket, word) in self.first_words.iter().enumerate() {
			writeln!(writer, "{}\t{}", bucket, word).map_err(|e| GlmError::io("write", path, e))?;
		}
		writer.flush().map_err(|e| GlmError::io("write", path, e))
	}

	/// Loads a persisted index.
	///
	/// # Errors
	/// Fails on lines without a bucket id or with ids out of order.
	pub fn load(path: &Path) -> Result<Self, GlmError> {
		let reader = io::open_reader(path)?;
		let mut first_words = Vec::new();
		for (line_no, line) in reader.lines().enumerate() {
			let line = line.map_err(|e| GlmError::io("read", path, e))?;
			let (bucket, word) = line.split_once('\t').ok_or_else(|| {
				GlmError::file_format(path, line_no + 1, "Expected '<bucket-id>\\t<word>'.")
			})?;
			if bucket.parse::<usize>() != Ok(line_no) {
				return Err(GlmError::file_format(
					path,
					line_no + 1,
					format!("Expected bucket id {}, got '{}'.", line_no, bucket),
				));
			}
			first_words.push(word.to_owned());
		}
		Ok(Self { bucket_count: first_words.len(), first_words })
	}
}

/// Writes `stats.txt` as a small JSON object.
pub fn write_stats(stats: &CorpusStats, path: &Path) -> Result<(), GlmError> {
	let mut writer = io::create_writer(path)?;
	let json = serde_json::to_string_pretty(stats)
		.map_err(|e| GlmError::Invariant(format!("Could not serialize stats: {}", e)))?;
	writeln!(writer, "{}", json).map_err(|e| GlmError::io("write", path, e))?;
	writer.flush().map_err(|e| GlmError::io("write", path, e))
}

pub fn read_stats(path: &Path) -> Result<CorpusStats, GlmError> {
	let reader = io::open_reader(path)?;
	serde_json::from_reader(reader)
		.map_err(|e| GlmError::file_format(path, e.line(), e.to_string()))
}

/// The stable word hash. xxhash64 with a fixed seed over UTF-8 bytes.
fn hash_word(word: &str) -> u64 {
	let mut hasher = XxHash64::with_seed(HASH_SEED);
	hasher.write(word.as_bytes());
	hasher.finish()
}

fn check_reserved_symbols(line: &str, path: &Path, line_no: usize) -> Result<(), GlmError> {
	for symbol in [SKIP_WORD, WSKIP_WORD] {
		if line.contains(symbol) {
			return Err(GlmError::file_format(
				path,
				line_no,
				format!("Training file contains reserved symbol '{}'.", symbol),
			));
		}
	}
	if line.contains(POS_SEPARATOR) {
		return Err(GlmError::file_format(
			path,
			line_no,
			format!("Training file contains reserved symbol '{}'.", POS_SEPARATOR),
		));
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::NamedTempFile;

	fn corpus_file(contents: &str) -> NamedTempFile {
		let mut file = NamedTempFile::new().unwrap();
		file.write_all(contents.as_bytes()).unwrap();
		file
	}

	#[test]
	fn build_reports_stats() {
		let file = corpus_file("a b c\na b d\n");
		let (index, stats) = WordIndex::build(file.path(), Some(2)).unwrap();
		assert_eq!(stats.vocab_size, 4);
		assert_eq!(stats.token_count, 6);
		assert_eq!(stats.line_count, 2);
		assert_eq!(index.bucket_count(), 2);
	}

	#[test]
	fn buckets_are_stable_across_input_order() {
		let forward = corpus_file("a b c d\n");
		let shuffled = corpus_file("d a\nc b\n");
		let (first, _) = WordIndex::build(forward.path(), Some(2)).unwrap();
		let (second, _) = WordIndex::build(shuffled.path(), Some(2)).unwrap();
		for word in ["a", "b", "c", "d"] {
			assert!(first.bucket_of(word) < 2);
			assert_eq!(first.bucket_of(word), second.bucket_of(word));
		}
	}

	#[test]
	fn reserved_symbol_cites_line_number() {
		let file = corpus_file("a b\nc d_e\n");
		let err = WordIndex::build(file.path(), Some(2)).unwrap_err();
		match err {
			GlmError::FileFormat { line, .. } => assert_eq!(line, 2),
			other => panic!("expected file format error, got {:?}", other),
		}
	}

	#[test]
	fn empty_corpus_builds_empty_index() {
		let file = corpus_file("");
		let (index, stats) = WordIndex::build(file.path(), None).unwrap();
		assert_eq!(index.bucket_count(), 0);
		assert_eq!(stats, CorpusStats::default());
		assert_eq!(index.bucket_of("anything"), 0);
	}

	#[test]
	fn write_load_round_trip() {
		let file = corpus_file("a b c d e f\n");
		let (index, _) = WordIndex::build(file.path(), Some(3)).unwrap();
		let persisted = NamedTempFile::new().unwrap();
		index.write(persisted.path()).unwrap();

		let loaded = WordIndex::load(persisted.path()).unwrap();
		assert_eq!(loaded.bucket_count(), 3);
		for word in ["a", "b", "c", "d", "e", "f"] {
			assert_eq!(loaded.bucket_of(word), index.bucket_of(word));
		}
	}

	#[test]
	fn stats_round_trip() {
		let stats = CorpusStats { vocab_size: 4, token_count: 6, line_count: 2 };
		let file = NamedTempFile::new().unwrap();
		write_stats(&stats, file.path()).unwrap();
		assert_eq!(read_stats(file.path()).unwrap(), stats);
	}
}
