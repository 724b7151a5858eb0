use std::sync::Mutex;

use actix_web::{get, web, App, HttpResponse, HttpServer, Responder};

use serde::{Deserialize, Serialize};

use rs_glm_core::cache::argmax::ArgmaxQueryExecutor;
use rs_glm_core::cache::{Cache, CacheBacking};
use rs_glm_core::config::Config;
use rs_glm_core::counting::pipeline::Glm;
use rs_glm_core::error::GlmError;
use rs_glm_core::estimate::{Estimator, MaximumLikelihood};
use rs_glm_core::pattern::Pattern;

/// Struct representing query parameters for the `/v1/complete` endpoint
#[derive(Deserialize)]
struct CompleteParams {
	history: Option<String>,
	prefix: Option<String>,
	num_results: Option<usize>,
}

#[derive(Serialize)]
struct CompletionEntry {
	completion: String,
	probability: f64,
}

#[derive(Serialize)]
struct CompleteResponse {
	history: String,
	prefix: String,
	num_results: usize,
	completions: Option<Vec<CompletionEntry>>,
}

struct SharedData {
	cache: Cache,
	estimator: MaximumLikelihood,
}

/// HTTP GET endpoint `/v1/complete`
///
/// Completes the given history with the most probable next words, optionally
/// restricted to words starting with `prefix`. Returns the ranked
/// completions as JSON.
#[get("/v1/complete")]
async fn get_complete(data: web::Data<Mutex<SharedData>>, query: web::Query<CompleteParams>) -> impl Responder {
	let history = query.history.clone().unwrap_or_default();
	let prefix = query.prefix.clone().unwrap_or_default();
	let num_results = query.num_results.unwrap_or(5);

	let shared_data = match data.lock() {
		Ok(m) => m,
		Err(_) => return HttpResponse::InternalServerError().body("Cache lock failed"),
	};

	let completions = if history.trim().is_empty() {
		None
	} else {
		let executor = match ArgmaxQueryExecutor::new(&shared_data.estimator, &shared_data.cache) {
			Ok(executor) => executor,
			Err(e) => return HttpResponse::InternalServerError().body(e.to_string()),
		};
		let word_prefix = if prefix.is_empty() { None } else { Some(prefix.as_str()) };
		match executor.query_argmax(&history, word_prefix, num_results) {
			Ok(results) => Some(
				results
					.into_iter()
					.map(|r| CompletionEntry { completion: r.sequence, probability: r.probability })
					.collect(),
			),
			Err(e) => return HttpResponse::BadRequest().body(e.to_string()),
		}
	};

	HttpResponse::Ok().json(CompleteResponse { history, prefix, num_results, completions })
}

/// Counts the corpus (skipped when the stores are up to date) and loads the
/// completion-trie cache the demo serves from.
fn load(corpus: &str, working_dir: &str, order: usize) -> Result<SharedData, GlmError> {
	let glm = Glm::new(Config::default(), corpus, working_dir)?;
	let estimator = MaximumLikelihood::new();
	let spec = estimator
		.required_cache(order)?
		.with_backing(CacheBacking::CompletionTrie);

	// Count the estimator's patterns plus the wildcard-wrapped layout,
	// which every run carries.
	let mut required = spec.required_patterns()?;
	required.insert(Pattern::wildcard_layout());
	glm.count(&required)?;

	let cache = spec.build(glm.paths())?;
	Ok(SharedData { cache, estimator })
}

/// Main entry point for the autocompletion demo server.
///
/// Trains on the given corpus if needed, loads the completion-trie cache and
/// serves ranked completions over HTTP.
///
/// # Notes
/// - The server binds to 127.0.0.1:5000.
/// - The cache is read-only; the `Mutex` only guards the shared handle.
#[actix_web::main]
async fn main() -> std::io::Result<()> {
	tracing_subscriber::fmt().with_ansi(false).init();

	let mut args = std::env::args().skip(1);
	let corpus = match args.next() {
		Some(corpus) => corpus,
		None => {
			eprintln!("Usage: rs-glm-server <corpus> [working-dir] [order]");
			std::process::exit(1);
		}
	};
	let working_dir = args.next().unwrap_or_else(|| format!("{}.glm", corpus));
	let order = args.next().and_then(|s| s.parse().ok()).unwrap_or(3);

	let shared_data = match load(&corpus, &working_dir, order) {
		Ok(data) => web::Data::new(Mutex::new(data)),
		Err(e) => {
			eprintln!("{}", e);
			std::process::exit(e.exit_code());
		}
	};

	println!("Running on http://127.0.0.1:5000/");
	HttpServer::new(move || {
		App::new()
			.app_data(shared_data.clone())
			.service(get_complete)
	})
		.bind(("127.0.0.1", 5000))?
		.run()
		.await
}
