use rs_glm_core::cache::argmax::ArgmaxQueryExecutor;
use rs_glm_core::cache::CacheBacking;
use rs_glm_core::config::Config;
use rs_glm_core::counting::pipeline::Glm;
use rs_glm_core::estimate::{Estimator, MaximumLikelihood};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Training corpus, one sentence per line of whitespace-separated tokens
    let corpus = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "./data/training.txt".to_owned());

    // The working directory holds every count store; by convention it sits
    // next to the corpus
    let working_dir = format!("{}.glm", corpus);

    // Default configuration: worker count, spill threshold and bucket count
    // are all derived automatically
    let glm = Glm::new(Config::default(), corpus.as_str(), working_dir.as_str())?;

    // The estimator declares which pattern stores it needs for a given order
    let estimator = MaximumLikelihood::new();
    let spec = estimator
        .required_cache(3)?
        .with_backing(CacheBacking::CompletionTrie);

    // Counting is idempotent: stores newer than the corpus are skipped, so
    // running this twice does the work only once
    let summary = glm.count(&spec.required_patterns()?)?;
    println!(
        "Built {} pattern stores ({} up to date)",
        summary.patterns_built, summary.patterns_skipped
    );

    // Load the stores into a completion-trie cache
    let cache = spec.build(glm.paths())?;

    // Score a single word...
    println!("P(the) = {}", estimator.probability(&cache, &["the"]));

    // ...and ask for the most probable continuations of a history
    let executor = ArgmaxQueryExecutor::new(&estimator, &cache)?;
    for result in executor.query_argmax("the", None, 5)? {
        println!("the {} ({:.4})", result.sequence, result.probability);
    }

    Ok(())
}
