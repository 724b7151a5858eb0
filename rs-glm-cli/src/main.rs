//! Command line front-end of the toolkit.
//!
//! Drives the counting pipeline over a training corpus, then answers
//! queries: per-file scoring through filtered query caches, or interactive
//! scoring from standard input. Errors map to distinct exit codes per kind;
//! the log goes to the working directory's `log` file and optionally the
//! console.

use std::collections::BTreeSet;
use std::fs::OpenOptions;
use std::io::BufRead;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use clap::Parser;
use tracing::Level;
use tracing_subscriber::fmt::writer::MakeWriterExt;

use rs_glm_core::cache::CacheSpecification;
use rs_glm_core::config::Config;
use rs_glm_core::counting::pipeline::Glm;
use rs_glm_core::error::GlmError;
use rs_glm_core::estimate::{self, Estimator};
use rs_glm_core::pattern::Pattern;
use rs_glm_core::query;

#[derive(Parser)]
#[command(name = "rs-glm", about = "Invokes the generalized language modeling toolkit.")]
struct Args {
	/// Training corpus, one sentence per line, whitespace-separated tokens.
	corpus: PathBuf,

	/// Working directory for the count stores. Defaults to '<corpus>.glm'.
	#[arg(long)]
	workingdir: Option<PathBuf>,

	/// Order to learn for training. Inferred from query files when omitted,
	/// falling back to 5.
	#[arg(short = 'n', long)]
	training_order: Option<usize>,

	/// Estimators to learn for and query with.
	#[arg(short, long, default_values = ["mle"])]
	estimator: Vec<String>,

	/// Score the sequences in the given files.
	#[arg(short, long)]
	query: Vec<PathBuf>,

	/// Score sequences from standard input.
	#[arg(long)]
	io: bool,

	/// Mirror the log to the console.
	#[arg(long)]
	log_console: bool,

	/// Log at debug level.
	#[arg(long)]
	debug: bool,
}

fn main() {
	let args = Args::parse();
	if let Err(error) = run(&args) {
		eprintln!("{}", error);
		process::exit(error.exit_code());
	}
}

fn run(args: &Args) -> Result<(), GlmError> {
	let working_dir = match &args.workingdir {
		Some(dir) => dir.clone(),
		None => {
			let mut name = args.corpus.clone().into_os_string();
			name.push(".glm");
			PathBuf::from(name)
		}
	};
	let glm = Glm::new(Config::default(), &args.corpus, &working_dir)?;
	init_logging(&glm, args)?;

	let training_order = resolve_training_order(args)?;

	let estimators: Vec<Box<dyn Estimator>> = args
		.estimator
		.iter()
		.map(|name| estimate::parse_estimator(name))
		.collect::<Result<_, _>>()?;
	if args.io && estimators.len() > 1 {
		return Err(GlmError::CliArgument(
			"At most one estimator can be used with --io.".to_owned(),
		));
	}

	// Union of everything the configured estimators declare, plus the
	// wildcard-wrapped layout, which is counted on every run.
	let mut specs: Vec<CacheSpecification> = Vec::with_capacity(estimators.len());
	let mut required: BTreeSet<Pattern> = BTreeSet::new();
	for estimator in &estimators {
		let spec = estimator.required_cache(training_order)?;
		required.extend(spec.required_patterns()?);
		specs.push(spec);
	}
	required.insert(Pattern::wildcard_layout());

	let summary = glm.count(&required)?;
	println!(
		"Built {} pattern stores ({} up to date) in {:.2?}.",
		summary.patterns_built, summary.patterns_skipped, summary.elapsed
	);

	for query_file in &args.query {
		let sub = glm.provide_query_cache(query_file, &required)?;
		let queries = query::parse_query_file(query_file)?;
		for (estimator, spec) in estimators.iter().zip(&specs) {
			println!("# {} {}", estimator.name(), query_file.display());
			let cache = spec.build(&sub)?;
			for tokens in &queries {
				let words: Vec<&str> = tokens.iter().map(String::as_str).collect();
				let probability = estimator.probability(&cache, &words);
				println!("{}\t{}", tokens.join(" "), probability);
			}
		}
	}

	if args.io {
		let estimator = &estimators[0];
		let cache = specs[0].build(glm.paths())?;
		let stdin = std::io::stdin();
		for line in stdin.lock().lines() {
			let line = line.map_err(|e| GlmError::io("read", "stdin", e))?;
			let trimmed = line.trim();
			if trimmed.is_empty() || trimmed.starts_with('#') {
				continue;
			}
			let words: Vec<&str> = trimmed.split_whitespace().collect();
			if words.len() > training_order {
				return Err(GlmError::CliArgument(format!(
					"Query '{}' is longer than the training order {}.",
					trimmed, training_order
				)));
			}
			println!("{}\t{}", trimmed, estimator.probability(&cache, &words));
		}
	}

	Ok(())
}

/// The explicit order, or the longest query found in the query files, or 5.
fn resolve_training_order(args: &Args) -> Result<usize, GlmError> {
	let order = match args.training_order {
		Some(0) => {
			return Err(GlmError::CliArgument(
				"Training order must be positive.".to_owned(),
			))
		}
		Some(order) => order,
		None => match query::max_order(&args.query)? {
			0 => 5,
			inferred => inferred,
		},
	};
	let longest = query::max_order(&args.query)?;
	if longest > order {
		return Err(GlmError::CliArgument(format!(
			"A query of {} tokens exceeds the training order {}.",
			longest, order
		)));
	}
	Ok(order)
}

/// Appends to the working directory's `log`, mirroring to stderr on demand.
fn init_logging(glm: &Glm, args: &Args) -> Result<(), GlmError> {
	let path = glm.paths().log_file();
	let file = OpenOptions::new()
		.create(true)
		.append(true)
		.open(&path)
		.map_err(|e| GlmError::io("append to", &path, e))?;
	let writer = Arc::new(file);
	let level = if args.debug { Level::DEBUG } else { Level::INFO };

	if args.log_console {
		tracing_subscriber::fmt()
			.with_max_level(level)
			.with_ansi(false)
			.with_writer(writer.and(std::io::stderr))
			.init();
	} else {
		tracing_subscriber::fmt()
			.with_max_level(level)
			.with_ansi(false)
			.with_writer(writer)
			.init();
	}
	Ok(())
}
