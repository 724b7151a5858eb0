use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant, SystemTime};

use tracing::{debug, info};

use crate::config::Config;
use crate::counter::Counter;
use crate::counting::aggregator::{self, AggregateMode};
use crate::counting::sequencer::{Sequencer, WriterPool};
use crate::error::GlmError;
use crate::io;
use crate::paths::GlmPaths;
use crate::pattern::{Pattern, PatternElem, SKIP_WORD, WSKIP_WORD};
use crate::query;
use crate::word_index::{self, WordIndex};

/// Outcome of one counting run, for the one-line user summary.
#[derive(Clone, Copy, Debug)]
pub struct CountSummary {
	pub patterns_built: usize,
	pub patterns_skipped: usize,
	pub elapsed: Duration,
}

/// The pipeline driver.
///
/// Owns the corpus location, the working directory layout and the
/// configuration, and schedules the counting stages:
///
/// 1. build the word index unless one is persisted,
/// 2. one sequencer pass per pattern length over the absolute patterns,
/// 3. aggregation of every (pattern, bucket) split on a worker pool,
/// 4. continuation stores derived from their absolute sources, strictly
///    after those are complete.
///
/// A pattern whose store already exists and is newer than the corpus is
/// skipped; deleting the store directory forces a rebuild. Workers cancel
/// cooperatively on the first failure and the failing pattern's partial
/// store is removed before the error is surfaced.
pub struct Glm {
	config: Config,
	corpus: PathBuf,
	paths: GlmPaths,
}

impl Glm {
	/// Creates a driver, making sure the working directory exists.
	pub fn new<C, W>(config: Config, corpus: C, working_dir: W) -> Result<Self, GlmError>
	where
		C: Into<PathBuf>,
		W: Into<PathBuf>,
	{
		let paths = GlmPaths::new(working_dir);
		io::create_dir_all(paths.working_dir())?;
		Ok(Self { config, corpus: corpus.into(), paths })
	}

	pub fn paths(&self) -> &GlmPaths {
		&self.paths
	}

	pub fn config(&self) -> &Config {
		&self.config
	}

	/// Builds every requested pattern store.
	///
	/// The set is first closed under continuation sourcing: the absolute
	/// pattern a continuation store is derived from is always counted too.
	pub fn count(&self, required: &BTreeSet<Pattern>) -> Result<CountSummary, GlmError> {
		let start = Instant::now();
		let index = self.ensure_index()?;
		let corpus_mtime = io::modified(&self.corpus);

		let closure = Self::closure(required);
		let (absolute, continuation): (Vec<Pattern>, Vec<Pattern>) =
			closure.into_iter().partition(Pattern::is_absolute);

		let mut skipped = 0;
		let mut built = 0;

		// Absolute stores first; continuation derivation reads them.
		let absolute_todo: Vec<Pattern> = absolute
			.into_iter()
			.filter(|p| {
				let fresh = self.up_to_date(p, index.bucket_count(), corpus_mtime);
				if fresh {
					skipped += 1;
				}
				!fresh
			})
			.collect();

		let mut by_length: BTreeMap<usize, Vec<Pattern>> = BTreeMap::new();
		for pattern in &absolute_todo {
			by_length.entry(pattern.len()).or_default().push(pattern.clone());
		}
		for (length, patterns) in &by_length {
			debug!(length, patterns = patterns.len(), "sequencing corpus");
			for pattern in patterns {
				self.prepare_split_dir(pattern)?;
			}
			let reader = io::open_reader(&self.corpus)?;
			Sequencer::new(&index, &self.paths, &self.config)
				.sequence(reader, &self.corpus, patterns)?;
		}
		self.aggregate_patterns(&absolute_todo, AggregateMode::Absolute, index.bucket_count())?;
		self.cleanup_split_dirs(&absolute_todo)?;
		built += absolute_todo.len();

		let continuation_todo: Vec<Pattern> = continuation
			.into_iter()
			.filter(|p| {
				let fresh = self.up_to_date(p, index.bucket_count(), corpus_mtime);
				if fresh {
					skipped += 1;
				}
				!fresh
			})
			.collect();

		for pattern in &continuation_todo {
			self.project_continuation(pattern, &index)?;
		}
		self.aggregate_patterns(
			&continuation_todo,
			AggregateMode::Continuation,
			index.bucket_count(),
		)?;
		self.cleanup_split_dirs(&continuation_todo)?;
		built += continuation_todo.len();

		let summary = CountSummary {
			patterns_built: built,
			patterns_skipped: skipped,
			elapsed: start.elapsed(),
		};
		info!(
			built = summary.patterns_built,
			skipped = summary.patterns_skipped,
			"counting finished"
		);
		Ok(summary)
	}

	/// Builds a filtered sub-store for one query file.
	///
	/// Every pattern's chunks are narrowed to the keys that any query
	/// n-gram projects to, preserving layout and bucket assignment, under
	/// `queryCache/<hash-of-query-file>`.
	pub fn provide_query_cache(
		&self,
		query_file: &Path,
		patterns: &BTreeSet<Pattern>,
	) -> Result<GlmPaths, GlmError> {
		let queries = query::parse_query_file(query_file)?;
		let hash = query::content_hash(query_file)?;
		let sub = self.paths.query_cache(&hash);
		debug!(queries = queries.len(), sub = %sub.working_dir().display(), "building query cache");

		for pattern in patterns {
			let mut needed: HashSet<String> = HashSet::new();
			for tokens in &queries {
				if tokens.len() < pattern.len() {
					continue;
				}
				let words: Vec<&str> = tokens.iter().map(String::as_str).collect();
				for window in words.windows(pattern.len()) {
					needed.insert(pattern.apply(window));
				}
			}

			io::remove_dir_all(&sub.pattern_dir(pattern))?;
			io::create_dir_all(&sub.pattern_dir(pattern))?;
			for chunk in io::list_files(&self.paths.pattern_dir(pattern))? {
				let name = chunk.file_name().expect("chunk files are named");
				let target = sub.pattern_dir(pattern).join(name);
				let mut writer = io::create_writer(&target)?;
				let reader = io::open_reader(&chunk)?;
				for (line_no, line) in reader.lines().enumerate() {
					let line = line.map_err(|e| GlmError::io("read", &chunk, e))?;
					let (key, _) = Counter::parse_line(&line)
						.map_err(|cause| GlmError::file_format(&chunk, line_no + 1, cause))?;
					if needed.contains(key) {
						writeln!(writer, "{}", line)
							.map_err(|e| GlmError::io("write", &target, e))?;
					}
				}
				writer.flush().map_err(|e| GlmError::io("write", &target, e))?;
			}
		}
		Ok(sub)
	}

	/// Loads the persisted word index, building and persisting it together
	/// with the corpus statistics when absent.
	fn ensure_index(&self) -> Result<WordIndex, GlmError> {
		let index_file = self.paths.index_file();
		if index_file.exists() {
			return WordIndex::load(&index_file);
		}
		let (index, stats) = WordIndex::build(&self.corpus, self.config.bucket_count)?;
		index.write(&index_file)?;
		word_index::write_stats(&stats, &self.paths.stats_file())?;
		Ok(index)
	}

	/// A required set closed under continuation sourcing.
	fn closure(required: &BTreeSet<Pattern>) -> BTreeSet<Pattern> {
		let mut all = required.clone();
		for pattern in required {
			if pattern.is_continuation() {
				all.insert(pattern.continuation_source());
			}
		}
		all
	}

	/// A store is up to date when every expected chunk exists and is at
	/// least as new as the corpus.
	fn up_to_date(&self, pattern: &Pattern, buckets: usize, corpus_mtime: Option<SystemTime>) -> bool {
		if !self.paths.pattern_dir(pattern).is_dir() {
			return false;
		}
		let Some(corpus_mtime) = corpus_mtime else {
			return false;
		};
		(0..buckets).all(|bucket| {
			match io::modified(&self.paths.chunk_file(pattern, bucket)) {
				Some(chunk_mtime) => chunk_mtime >= corpus_mtime,
				None => false,
			}
		})
	}

	fn prepare_split_dir(&self, pattern: &Pattern) -> Result<(), GlmError> {
		let dir = self.paths.split_dir(pattern);
		io::remove_dir_all(&dir)?;
		io::create_dir_all(&dir)
	}

	fn cleanup_split_dirs(&self, patterns: &[Pattern]) -> Result<(), GlmError> {
		if self.config.keep_temp_files {
			return Ok(());
		}
		for pattern in patterns {
			io::remove_dir_all(&self.paths.split_dir(pattern))?;
		}
		Ok(())
	}

	/// Projects an absolute store into the split files of a continuation
	/// pattern.
	///
	/// Each absolute entry is one witness. Its key is re-projected under the
	/// continuation pattern and re-bucketed by the pattern's first counted
	/// word, carrying the witness's absolute count for the frequency
	/// classes.
	fn project_continuation(&self, pattern: &Pattern, index: &WordIndex) -> Result<(), GlmError> {
		let source = pattern.continuation_source();
		debug!(pattern = %pattern, source = %source, "projecting continuation counts");
		self.prepare_split_dir(pattern)?;

		let mut pool = WriterPool::new(self.config.open_writer_budget);
		for chunk in io::list_files(&self.paths.pattern_dir(&source))? {
			let reader = io::open_reader(&chunk)?;
			for (line_no, line) in reader.lines().enumerate() {
				let line = line.map_err(|e| GlmError::io("read", &chunk, e))?;
				let (key, counter) = Counter::parse_line(&line)
					.map_err(|cause| GlmError::file_format(&chunk, line_no + 1, cause))?;
				let words: Vec<&str> = key.split(' ').collect();
				let (projected, bucket_word) = project_source_key(pattern, &words)?;
				let bucket = match bucket_word {
					Some(word) => index.bucket_of(word),
					None => 0,
				};
				pool.append_line(
					&self.paths.split_file(pattern, bucket),
					&format!("{}\t{}", projected, counter.count()),
				)?;
			}
		}
		pool.finish()
	}

	/// Runs one aggregation per (pattern, bucket) on the worker pool.
	///
	/// Workers share nothing but the filesystem. The first failure flips a
	/// cancellation flag checked between tasks, the failing pattern's store
	/// is removed and the first error is surfaced.
	fn aggregate_patterns(
		&self,
		patterns: &[Pattern],
		mode: AggregateMode,
		buckets: usize,
	) -> Result<(), GlmError> {
		let mut tasks: Vec<(Pattern, PathBuf, PathBuf)> = Vec::new();
		for pattern in patterns {
			io::remove_dir_all(&self.paths.pattern_dir(pattern))?;
			io::create_dir_all(&self.paths.pattern_dir(pattern))?;
			for bucket in 0..buckets {
				tasks.push((
					pattern.clone(),
					self.paths.split_file(pattern, bucket),
					self.paths.chunk_file(pattern, bucket),
				));
			}
		}
		if tasks.is_empty() {
			return Ok(());
		}

		let workers = self.config.worker_count.clamp(1, tasks.len());
		let per_worker = (tasks.len() + workers - 1) / workers;
		let spill_threshold = self.config.spill_threshold;
		let cancelled = AtomicBool::new(false);
		debug!(tasks = tasks.len(), workers, "aggregating chunks");

		let (tx, rx) = mpsc::channel::<(Pattern, Result<(), GlmError>)>();
		thread::scope(|scope| {
			for task_chunk in tasks.chunks(per_worker) {
				let tx = tx.clone();
				let cancelled = &cancelled;
				scope.spawn(move || {
					for (pattern, split, chunk) in task_chunk {
						if cancelled.load(Ordering::Relaxed) {
							break;
						}
						let result = aggregator::aggregate(split, chunk, mode, spill_threshold);
						if result.is_err() {
							cancelled.store(true, Ordering::Relaxed);
						}
						if tx.send((pattern.clone(), result)).is_err() {
							break;
						}
					}
				});
			}
			drop(tx);

			let mut first_error = None;
			for (pattern, result) in rx {
				if let Err(error) = result {
					if first_error.is_none() {
						io::remove_dir_all(&self.paths.pattern_dir(&pattern))?;
						first_error = Some(error);
					}
				}
			}
			match first_error {
				Some(error) => Err(error),
				None => Ok(()),
			}
		})
	}
}

/// Re-projects a key of the continuation source store under the
/// continuation pattern itself.
///
/// Both patterns delete the same positions, so the source key is walked
/// element by element, skipping deleted slots. Returns the projected key and
/// the word owning the target bucket.
fn project_source_key<'a>(
	pattern: &Pattern,
	words: &[&'a str],
) -> Result<(String, Option<&'a str>), GlmError> {
	let mut parts: Vec<&str> = Vec::with_capacity(pattern.len());
	let mut bucket_word = None;
	let mut next = 0;
	for i in 0..pattern.len() {
		let elem = pattern.elem_at(i);
		if elem == PatternElem::Del {
			continue;
		}
		let word = *words.get(next).ok_or_else(|| {
			GlmError::Invariant(format!(
				"Source key '{}' is too short for pattern '{}'.",
				words.join(" "),
				pattern
			))
		})?;
		next += 1;
		match elem {
			PatternElem::Cnt => {
				if bucket_word.is_none() {
					bucket_word = Some(word);
				}
				parts.push(word);
			}
			PatternElem::Skp | PatternElem::Wildcard => parts.push(SKIP_WORD),
			PatternElem::Wskp => parts.push(WSKIP_WORD),
			PatternElem::Pos => parts.push(word),
			PatternElem::Del => unreachable!(),
		}
	}
	Ok((parts.join(" "), bucket_word))
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::collections::BTreeMap;
	use std::fs;
	use tempfile::TempDir;

	fn patterns(labels: &[&str]) -> BTreeSet<Pattern> {
		labels.iter().map(|l| Pattern::parse(l).unwrap()).collect()
	}

	fn driver(corpus: &str) -> (TempDir, Glm) {
		let dir = TempDir::new().unwrap();
		let corpus_path = dir.path().join("training.txt");
		fs::write(&corpus_path, corpus).unwrap();
		let working_dir = dir.path().join("work");
		let config = Config { worker_count: 2, ..Config::default() };
		let glm = Glm::new(config, corpus_path, working_dir).unwrap();
		(dir, glm)
	}

	fn load_store(paths: &GlmPaths, label: &str) -> BTreeMap<String, Counter> {
		let pattern = Pattern::parse(label).unwrap();
		let mut store = BTreeMap::new();
		let dir = paths.pattern_dir(&pattern);
		if !dir.is_dir() {
			return store;
		}
		for chunk in io::list_files(&dir).unwrap() {
			for line in fs::read_to_string(&chunk).unwrap().lines() {
				let (key, counter) = Counter::parse_line(line).unwrap();
				assert!(
					store.insert(key.to_owned(), counter).is_none(),
					"key '{}' appears in more than one bucket",
					key
				);
			}
		}
		store
	}

	#[test]
	fn absolute_counts_match_naive_counting() {
		let (_dir, glm) = driver("a b a b a\n");
		glm.count(&patterns(&["c", "cc", "x"])).unwrap();

		let unigrams = load_store(glm.paths(), "c");
		assert_eq!(unigrams["a"].count(), 3);
		assert_eq!(unigrams["b"].count(), 2);

		let bigrams = load_store(glm.paths(), "cc");
		assert_eq!(bigrams["a b"].count(), 2);
		assert_eq!(bigrams["b a"].count(), 2);
		assert_eq!(bigrams.len(), 2);

		// The wildcard store aggregates every token into the skip key.
		let wildcard = load_store(glm.paths(), "x");
		assert_eq!(wildcard["_"].count(), 5);

		// Unigram total equals the corpus token count.
		let stats = word_index::read_stats(&glm.paths().stats_file()).unwrap();
		let total: u64 = unigrams.values().map(Counter::count).sum();
		assert_eq!(total, stats.token_count);
	}

	#[test]
	fn continuation_counts_follow_distinct_witnesses() {
		let (_dir, glm) = driver("a b c\na b d\n");
		glm.count(&patterns(&["wc"])).unwrap();

		// The source store is added by the closure.
		let bigrams = load_store(glm.paths(), "cc");
		assert_eq!(bigrams["a b"].count(), 2);

		let continuation = load_store(glm.paths(), "wc");
		let b = continuation["% b"];
		assert_eq!((b.count(), b.one(), b.two(), b.three_plus()), (1, 0, 1, 0));
		let c = continuation["% c"];
		assert_eq!((c.count(), c.one()), (1, 1));
		let d = continuation["% d"];
		assert_eq!((d.count(), d.one()), (1, 1));
	}

	#[test]
	fn second_run_skips_everything_and_changes_nothing() {
		let (_dir, glm) = driver("a b c\na b d\n");
		let requested = patterns(&["c", "cc", "wc"]);
		let first = glm.count(&requested).unwrap();
		assert_eq!(first.patterns_built, 3);

		let before = load_store(glm.paths(), "cc");
		let second = glm.count(&requested).unwrap();
		assert_eq!(second.patterns_built, 0);
		assert_eq!(second.patterns_skipped, 3);
		assert_eq!(load_store(glm.paths(), "cc"), before);
	}

	#[test]
	fn rebuild_is_byte_identical() {
		let (_dir, glm) = driver("e d c b a\na b c d e\n");
		let requested = patterns(&["c", "cc", "wc"]);
		glm.count(&requested).unwrap();

		let read_all = |paths: &GlmPaths, label: &str| -> Vec<(PathBuf, String)> {
			let dir = paths.pattern_dir(&Pattern::parse(label).unwrap());
			io::list_files(&dir)
				.unwrap()
				.into_iter()
				.map(|p| (p.clone(), fs::read_to_string(&p).unwrap()))
				.collect()
		};
		let before: Vec<_> = ["c", "cc", "wc"]
			.iter()
			.map(|l| read_all(glm.paths(), l))
			.collect();

		for label in ["c", "cc", "wc"] {
			fs::remove_dir_all(glm.paths().pattern_dir(&Pattern::parse(label).unwrap())).unwrap();
		}
		glm.count(&requested).unwrap();
		let after: Vec<_> = ["c", "cc", "wc"]
			.iter()
			.map(|l| read_all(glm.paths(), l))
			.collect();
		assert_eq!(before, after);
	}

	#[test]
	fn empty_corpus_produces_empty_artefacts() {
		let (_dir, glm) = driver("");
		let summary = glm.count(&patterns(&["c", "cc"])).unwrap();
		assert_eq!(summary.patterns_built, 2);

		assert!(load_store(glm.paths(), "c").is_empty());
		assert!(load_store(glm.paths(), "cc").is_empty());
		let stats = word_index::read_stats(&glm.paths().stats_file()).unwrap();
		assert_eq!(stats.token_count, 0);
		assert_eq!(fs::read_to_string(glm.paths().index_file()).unwrap(), "");
	}

	#[test]
	fn wildcard_layout_counts_inner_ngrams_in_any_context() {
		let (_dir, glm) = driver("p b c d e q\nr b c d e s\n");
		let mut requested = patterns(&["c"]);
		requested.insert(Pattern::wildcard_layout());
		glm.count(&requested).unwrap();

		// Both lines share the inner 4-gram; the differing outer words are
		// projected away.
		let store = load_store(glm.paths(), "xccccx");
		assert_eq!(store.len(), 1);
		assert_eq!(store["_ b c d e _"].count(), 2);
	}

	#[test]
	fn short_lines_yield_no_ngrams_of_that_length() {
		let (_dir, glm) = driver("a\n");
		glm.count(&patterns(&["cc"])).unwrap();
		assert!(load_store(glm.paths(), "cc").is_empty());
	}

	#[test]
	fn reserved_symbol_fails_with_line_number() {
		let (_dir, glm) = driver("a b\nc_d e\n");
		let err = glm.count(&patterns(&["c"])).unwrap_err();
		match err {
			GlmError::FileFormat { line, .. } => assert_eq!(line, 2),
			other => panic!("expected file format error, got {:?}", other),
		}
	}

	#[test]
	fn query_cache_filters_to_query_sequences() {
		let (dir, glm) = driver("a b c\na b d\nx y z\n");
		let requested = patterns(&["c", "cc"]);
		glm.count(&requested).unwrap();

		let query_file = dir.path().join("queries.txt");
		fs::write(&query_file, "# head comment\n\na b\n").unwrap();
		let sub = glm.provide_query_cache(&query_file, &requested).unwrap();

		let bigrams = load_store(&sub, "cc");
		assert_eq!(bigrams.len(), 1);
		assert_eq!(bigrams["a b"].count(), 2);

		let unigrams = load_store(&sub, "c");
		let keys: Vec<&str> = unigrams.keys().map(String::as_str).collect();
		assert_eq!(keys, ["a", "b"]);
	}
}
