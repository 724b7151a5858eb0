use std::fmt;
use std::io;
use std::path::PathBuf;

/// Error taxonomy of the toolkit.
///
/// Every fallible operation surfaces one of these four kinds. Context (path,
/// line number, operation) is attached at the boundary where it is known, so
/// callers never have to unwrap a chain of nested causes.
///
/// # Variants
/// - `CliArgument`: invalid user input at the command boundary.
/// - `FileFormat`: an input file violates the corpus or query grammar.
/// - `Io`: a filesystem fault, with the path and operation that failed.
/// - `Invariant`: a broken counting invariant. Always indicates a bug.
#[derive(Debug)]
pub enum GlmError {
	CliArgument(String),
	FileFormat {
		path: PathBuf,
		line: usize,
		cause: String,
	},
	Io {
		path: PathBuf,
		operation: &'static str,
		source: io::Error,
	},
	Invariant(String),
}

impl GlmError {
	/// Wraps an `io::Error` with the path and operation it occurred on.
	pub fn io<P: Into<PathBuf>>(operation: &'static str, path: P, source: io::Error) -> Self {
		Self::Io { path: path.into(), operation, source }
	}

	/// A file format violation at a 1-based line number.
	pub fn file_format<P: Into<PathBuf>, S: Into<String>>(path: P, line: usize, cause: S) -> Self {
		Self::FileFormat { path: path.into(), line, cause: cause.into() }
	}

	/// Process exit code for this error kind.
	///
	/// 0 is reserved for success; each kind maps to its own non-zero code so
	/// callers of the executables can distinguish failure categories.
	pub fn exit_code(&self) -> i32 {
		match self {
			Self::CliArgument(_) => 1,
			Self::FileFormat { .. } => 2,
			Self::Io { .. } => 3,
			Self::Invariant(_) => 4,
		}
	}
}

impl fmt::Display for GlmError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::CliArgument(msg) => write!(f, "{}", msg),
			Self::FileFormat { path, line, cause } => {
				write!(f, "{}:{}: {}", path.display(), line, cause)
			}
			Self::Io { path, operation, source } => {
				write!(f, "Failed to {} '{}': {}", operation, path.display(), source)
			}
			Self::Invariant(msg) => write!(f, "Internal invariant violated: {}", msg),
		}
	}
}

impl std::error::Error for GlmError {
	fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
		match self {
			Self::Io { source, .. } => Some(source),
			_ => None,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn exit_codes_are_distinct() {
		let errors = [
			GlmError::CliArgument("bad".to_owned()),
			GlmError::file_format("corpus.txt", 3, "reserved symbol"),
			GlmError::io("read", "x", io::Error::new(io::ErrorKind::NotFound, "gone")),
			GlmError::Invariant("broken".to_owned()),
		];
		let codes: Vec<i32> = errors.iter().map(GlmError::exit_code).collect();
		let mut unique = codes.clone();
		unique.sort_unstable();
		unique.dedup();
		assert_eq!(codes.len(), unique.len());
		assert!(!codes.contains(&0));
	}

	#[test]
	fn file_format_names_path_and_line() {
		let e = GlmError::file_format("corpus.txt", 42, "token contains '_'");
		let text = e.to_string();
		assert!(text.contains("corpus.txt"));
		assert!(text.contains("42"));
	}
}
