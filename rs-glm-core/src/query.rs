use std::hash::Hasher;
use std::io::BufRead;
use std::path::{Path, PathBuf};

use twox_hash::XxHash64;

use crate::error::GlmError;
use crate::io;

/// Reads a query file into token sequences.
///
/// Blank lines and lines starting with `#` carry no query. A file holding
/// only such lines yields no queries, which is not an error.
pub fn parse_query_file(path: &Path) -> Result<Vec<Vec<String>>, GlmError> {
	let reader = io::open_reader(path)?;
	let mut queries = Vec::new();
	for line in reader.lines() {
		let line = line.map_err(|e| GlmError::io("read", path, e))?;
		let trimmed = line.trim();
		if trimmed.is_empty() || trimmed.starts_with('#') {
			continue;
		}
		queries.push(trimmed.split_whitespace().map(str::to_owned).collect());
	}
	Ok(queries)
}

/// The longest query, in tokens, over a set of query files. Used to infer
/// the training order when none is given. Returns 0 when no file holds a
/// query.
pub fn max_order(files: &[PathBuf]) -> Result<usize, GlmError> {
	let mut max = 0;
	for file in files {
		for query in parse_query_file(file)? {
			max = max.max(query.len());
		}
	}
	Ok(max)
}

/// Stable hash of a query file's contents, naming its sub-store under
/// `queryCache`.
pub fn content_hash(path: &Path) -> Result<String, GlmError> {
	let bytes = std::fs::read(path).map_err(|e| GlmError::io("read", path, e))?;
	let mut hasher = XxHash64::with_seed(0);
	hasher.write(&bytes);
	Ok(format!("{:016x}", hasher.finish()))
}
