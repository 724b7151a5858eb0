use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::error::GlmError;

/// Opens a buffered reader, attaching the path to any failure.
pub(crate) fn open_reader(path: &Path) -> Result<BufReader<File>, GlmError> {
	let file = File::open(path).map_err(|e| GlmError::io("open", path, e))?;
	Ok(BufReader::new(file))
}

/// Creates (or truncates) a file behind a buffered writer.
pub(crate) fn create_writer(path: &Path) -> Result<BufWriter<File>, GlmError> {
	let file = File::create(path).map_err(|e| GlmError::io("create", path, e))?;
	Ok(BufWriter::new(file))
}

/// Opens a file for appending, creating it if absent.
pub(crate) fn open_append(path: &Path) -> Result<File, GlmError> {
	OpenOptions::new()
		.create(true)
		.append(true)
		.open(path)
		.map_err(|e| GlmError::io("append to", path, e))
}

pub(crate) fn create_dir_all(path: &Path) -> Result<(), GlmError> {
	fs::create_dir_all(path).map_err(|e| GlmError::io("create directory", path, e))
}

/// Removes a directory tree if it exists. Missing directories are fine.
pub(crate) fn remove_dir_all(path: &Path) -> Result<(), GlmError> {
	if path.exists() {
		fs::remove_dir_all(path).map_err(|e| GlmError::io("remove directory", path, e))?;
	}
	Ok(())
}

/// Removes a file, ignoring it when already absent.
pub(crate) fn remove_file(path: &Path) {
	let _ = fs::remove_file(path);
}

/// Lists the files directly contained in a directory, sorted by name.
///
/// Subdirectories are ignored.
pub(crate) fn list_files(dir: &Path) -> Result<Vec<PathBuf>, GlmError> {
	let mut files = Vec::new();
	let entries = fs::read_dir(dir).map_err(|e| GlmError::io("list", dir, e))?;
	for entry in entries {
		let entry = entry.map_err(|e| GlmError::io("list", dir, e))?;
		let path = entry.path();
		if path.is_file() {
			files.push(path);
		}
	}
	files.sort();
	Ok(files)
}

/// Modification time of a path, if it exists and the filesystem reports one.
pub(crate) fn modified(path: &Path) -> Option<SystemTime> {
	fs::metadata(path).and_then(|m| m.modified()).ok()
}
