use std::path::{Path, PathBuf};

use crate::pattern::Pattern;

/// Locator for the working directory layout.
///
/// Every artefact of a trained model lives under one working directory:
///
/// - `index.txt`, `stats.txt` and the append-only `log`
/// - `<label>/<bucket>` aggregated chunk files per pattern
/// - `<label>-split/<bucket>` raw split files, removed after aggregation
/// - `queryCache/<hash>/…` filtered sub-stores with the same layout
///
/// A query sub-store is itself addressed by a `GlmPaths` rooted inside
/// `queryCache`, so caches load from either location through one interface.
#[derive(Clone, Debug)]
pub struct GlmPaths {
	working_dir: PathBuf,
}

impl GlmPaths {
	pub fn new<P: Into<PathBuf>>(working_dir: P) -> Self {
		Self { working_dir: working_dir.into() }
	}

	pub fn working_dir(&self) -> &Path {
		&self.working_dir
	}

	pub fn index_file(&self) -> PathBuf {
		self.working_dir.join("index.txt")
	}

	pub fn stats_file(&self) -> PathBuf {
		self.working_dir.join("stats.txt")
	}

	pub fn log_file(&self) -> PathBuf {
		self.working_dir.join("log")
	}

	/// Directory holding the aggregated chunks of a pattern.
	pub fn pattern_dir(&self, pattern: &Pattern) -> PathBuf {
		self.working_dir.join(pattern.label())
	}

	pub fn chunk_file(&self, pattern: &Pattern, bucket: usize) -> PathBuf {
		self.pattern_dir(pattern).join(bucket.to_string())
	}

	/// Directory holding the raw, unaggregated split files of a pattern.
	pub fn split_dir(&self, pattern: &Pattern) -> PathBuf {
		self.working_dir.join(format!("{}-split", pattern.label()))
	}

	pub fn split_file(&self, pattern: &Pattern, bucket: usize) -> PathBuf {
		self.split_dir(pattern).join(bucket.to_string())
	}

	/// The sub-store for one query file, identified by the hash of its
	/// contents.
	pub fn query_cache(&self, hash: &str) -> GlmPaths {
		Self { working_dir: self.working_dir.join("queryCache").join(hash) }
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn layout() {
		let paths = GlmPaths::new("/work");
		let cc = Pattern::parse("cc").unwrap();
		assert_eq!(paths.index_file(), Path::new("/work/index.txt"));
		assert_eq!(paths.chunk_file(&cc, 3), Path::new("/work/cc/3"));
		assert_eq!(paths.split_file(&cc, 0), Path::new("/work/cc-split/0"));
		let sub = paths.query_cache("abc123");
		assert_eq!(sub.chunk_file(&cc, 1), Path::new("/work/queryCache/abc123/cc/1"));
	}
}
