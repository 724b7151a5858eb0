use serde::{Deserialize, Serialize};

/// Tuning knobs of the pipeline, threaded explicitly through the driver.
///
/// All limits have conservative defaults; the zero-configuration path is
/// `Config::default()`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
	/// Number of word index buckets. `None` picks the square root of the
	/// vocabulary size.
	pub bucket_count: Option<usize>,

	/// Worker threads aggregating chunks in parallel.
	pub worker_count: usize,

	/// Distinct keys an aggregation holds in memory before spilling a
	/// sorted run to disk.
	pub spill_threshold: usize,

	/// Open split-file writers a sequencer keeps at once. The least
	/// recently written one is closed when the budget is exceeded.
	pub open_writer_budget: usize,

	/// Marker prepended to every corpus line before windowing, empty to
	/// disable. Must not contain a reserved symbol and must match between
	/// training and query cache projection.
	pub before_line: String,

	/// Marker appended to every corpus line, empty to disable.
	pub after_line: String,

	/// Keeps the `<label>-split` directories after aggregation.
	pub keep_temp_files: bool,
}

impl Default for Config {
	fn default() -> Self {
		Self {
			bucket_count: None,
			worker_count: num_cpus::get(),
			spill_threshold: 1 << 20,
			open_writer_budget: 256,
			before_line: String::new(),
			after_line: String::new(),
			keep_temp_files: false,
		}
	}
}
