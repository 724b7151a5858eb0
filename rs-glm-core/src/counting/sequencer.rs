use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::Config;
use crate::error::GlmError;
use crate::io;
use crate::paths::GlmPaths;
use crate::pattern::Pattern;
use crate::word_index::WordIndex;

/// Streams the training corpus and projects it into per-bucket split files.
///
/// One pass serves every requested pattern of a common length: each line is
/// tokenised once, a window of that length slides over the tokens and every
/// pattern's key is appended to the split file of the bucket owning the
/// window's first counted word. Keys are written raw, one per line, in input
/// order; aggregation happens later.
///
/// # Responsibilities
/// - Apply the optional sentence boundary markers
/// - Emit each (pattern, n-gram) exactly once per input occurrence
/// - Keep the number of simultaneously open writers bounded
pub struct Sequencer<'a> {
	index: &'a WordIndex,
	paths: &'a GlmPaths,
	config: &'a Config,
}

impl<'a> Sequencer<'a> {
	pub fn new(index: &'a WordIndex, paths: &'a GlmPaths, config: &'a Config) -> Self {
		Self { index, paths, config }
	}

	/// Runs one pass over `input` for a set of patterns of equal length.
	///
	/// Split directories of the patterns must exist and be empty; the
	/// driver prepares them.
	///
	/// # Errors
	/// Fails if the patterns disagree on length or on any I/O fault.
	pub fn sequence<R: BufRead>(&self, input: R, input_path: &Path, patterns: &[Pattern]) -> Result<(), GlmError> {
		let Some(first) = patterns.first() else {
			return Ok(());
		};
		let length = first.len();
		if patterns.iter().any(|p| p.len() != length) {
			return Err(GlmError::Invariant(
				"Sequencer pass requires patterns of a common length.".to_owned(),
			));
		}

		debug!(length, patterns = patterns.len(), "sequencer pass");

		let mut pool = WriterPool::new(self.config.open_writer_budget);
		for line in input.lines() {
			let line = line.map_err(|e| GlmError::io("read", input_path, e))?;
			let mut tokens: Vec<&str> = Vec::new();
			if !self.config.before_line.is_empty() {
				tokens.push(&self.config.before_line);
			}
			tokens.extend(line.split_whitespace());
			if !self.config.after_line.is_empty() {
				tokens.push(&self.config.after_line);
			}

			if tokens.len() < length {
				continue;
			}
			for window in tokens.windows(length) {
				for pattern in patterns {
					let key = pattern.apply(window);
					let bucket = match pattern.first_cnt() {
						Some(slot) => self.index.bucket_of(word_of(window[slot])),
						None => 0,
					};
					pool.append_line(&self.paths.split_file(pattern, bucket), &key)?;
				}
			}
		}
		pool.finish()
	}
}

/// The word part of a token, with any part-of-speech tag stripped. Bucketing
/// must agree with what `Pattern::apply` emits for counted slots.
fn word_of(token: &str) -> &str {
	match token.rsplit_once(crate::pattern::POS_SEPARATOR) {
		Some((word, _)) => word,
		None => token,
	}
}

/// A bounded pool of append-mode writers with least-recently-used eviction.
///
/// Closing and reopening a split file is safe at any point because split
/// files are append-only until aggregation.
pub(crate) struct WriterPool {
	budget: usize,
	tick: u64,
	writers: HashMap<PathBuf, PoolEntry>,
}

struct PoolEntry {
	writer: BufWriter<File>,
	last_used: u64,
}

impl WriterPool {
	pub(crate) fn new(budget: usize) -> Self {
		Self { budget: budget.max(1), tick: 0, writers: HashMap::new() }
	}

	/// Appends `line` plus a newline to `path`, opening or reusing a writer.
	pub(crate) fn append_line(&mut self, path: &Path, line: &str) -> Result<(), GlmError> {
		self.tick += 1;
		if !self.writers.contains_key(path) {
			if self.writers.len() >= self.budget {
				self.evict_lru()?;
			}
			let file = io::open_append(path)?;
			self.writers.insert(
				path.to_path_buf(),
				PoolEntry { writer: BufWriter::new(file), last_used: 0 },
			);
		}
		let entry = self.writers.get_mut(path).expect("writer just inserted");
		entry.last_used = self.tick;
		writeln!(entry.writer, "{}", line).map_err(|e| GlmError::io("write", path, e))
	}

	fn evict_lru(&mut self) -> Result<(), GlmError> {
		let oldest = self
			.writers
			.iter()
			.min_by_key(|(_, entry)| entry.last_used)
			.map(|(path, _)| path.clone());
		if let Some(path) = oldest {
			let mut entry = self.writers.remove(&path).expect("entry present");
			entry.writer.flush().map_err(|e| GlmError::io("write", &path, e))?;
		}
		Ok(())
	}

	/// Flushes and closes every writer.
	pub(crate) fn finish(mut self) -> Result<(), GlmError> {
		for (path, entry) in self.writers.iter_mut() {
			entry.writer.flush().map_err(|e| GlmError::io("write", path, e))?;
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::fs;
	use std::io::Cursor;
	use tempfile::TempDir;

	fn read_lines(path: &Path) -> Vec<String> {
		if !path.exists() {
			return Vec::new();
		}
		fs::read_to_string(path)
			.unwrap()
			.lines()
			.map(str::to_owned)
			.collect()
	}

	fn run_pass(corpus: &str, labels: &[&str], buckets: usize) -> (TempDir, GlmPaths, WordIndex) {
		let dir = TempDir::new().unwrap();
		let corpus_path = dir.path().join("training.txt");
		fs::write(&corpus_path, corpus).unwrap();

		let (index, _) = WordIndex::build(&corpus_path, Some(buckets)).unwrap();
		let paths = GlmPaths::new(dir.path());
		let config = Config::default();
		let patterns: Vec<Pattern> = labels.iter().map(|l| Pattern::parse(l).unwrap()).collect();
		for pattern in &patterns {
			fs::create_dir_all(paths.split_dir(pattern)).unwrap();
		}

		let sequencer = Sequencer::new(&index, &paths, &config);
		let input = fs::File::open(&corpus_path).unwrap();
		sequencer
			.sequence(std::io::BufReader::new(input), &corpus_path, &patterns)
			.unwrap();
		(dir, paths, index)
	}

	#[test]
	fn emits_every_window_in_input_order() {
		let (_dir, paths, index) = run_pass("a b a b a\n", &["cc"], 1);
		let cc = Pattern::parse("cc").unwrap();
		let bucket = index.bucket_of("a");
		assert_eq!(bucket, 0);
		let lines = read_lines(&paths.split_file(&cc, 0));
		assert_eq!(lines, ["a b", "b a", "a b", "b a"]);
	}

	#[test]
	fn unigrams_cover_every_token() {
		let (_dir, paths, index) = run_pass("a b a b a\n", &["c"], 2);
		let c = Pattern::parse("c").unwrap();
		let mut all = Vec::new();
		for bucket in 0..index.bucket_count() {
			all.extend(read_lines(&paths.split_file(&c, bucket)));
		}
		all.sort();
		assert_eq!(all, ["a", "a", "a", "b", "b"]);
	}

	#[test]
	fn short_lines_produce_no_windows() {
		let (_dir, paths, _) = run_pass("a\n", &["cc"], 1);
		let cc = Pattern::parse("cc").unwrap();
		assert!(read_lines(&paths.split_file(&cc, 0)).is_empty());
	}

	#[test]
	fn patterns_without_counted_slot_land_in_bucket_zero() {
		let (_dir, paths, _) = run_pass("a b a\n", &["x"], 2);
		let x = Pattern::parse("x").unwrap();
		let lines = read_lines(&paths.split_file(&x, 0));
		assert_eq!(lines, ["_", "_", "_"]);
		assert!(read_lines(&paths.split_file(&x, 1)).is_empty());
	}

	#[test]
	fn boundary_markers_extend_windows() {
		let dir = TempDir::new().unwrap();
		let corpus_path = dir.path().join("training.txt");
		fs::write(&corpus_path, "a\n").unwrap();
		let (index, _) = WordIndex::build(&corpus_path, Some(1)).unwrap();
		let paths = GlmPaths::new(dir.path());
		let config = Config {
			before_line: "<s>".to_owned(),
			after_line: "<e>".to_owned(),
			..Config::default()
		};
		let cc = Pattern::parse("cc").unwrap();
		fs::create_dir_all(paths.split_dir(&cc)).unwrap();

		let sequencer = Sequencer::new(&index, &paths, &config);
		sequencer
			.sequence(Cursor::new("a\n"), &corpus_path, &[cc.clone()])
			.unwrap();
		let lines = read_lines(&paths.split_file(&cc, 0));
		assert_eq!(lines, ["<s> a", "a <e>"]);
	}

	#[test]
	fn writer_pool_eviction_appends_safely() {
		let dir = TempDir::new().unwrap();
		let mut pool = WriterPool::new(2);
		let a = dir.path().join("a");
		let b = dir.path().join("b");
		let c = dir.path().join("c");
		pool.append_line(&a, "1").unwrap();
		pool.append_line(&b, "2").unwrap();
		pool.append_line(&c, "3").unwrap();
		pool.append_line(&a, "4").unwrap();
		pool.finish().unwrap();
		assert_eq!(read_lines(&a), ["1", "4"]);
		assert_eq!(read_lines(&b), ["2"]);
		assert_eq!(read_lines(&c), ["3"]);
	}
}
