use crate::cache::{Cache, CacheSpecification};
use crate::counter::Counter;
use crate::error::GlmError;
use crate::pattern::{Pattern, SKIP_WORD};

/// The scoring seam between the core and the estimator family.
///
/// Estimators are deterministic pure functions of the cache contents. They
/// declare what a cache must hold, and are handed the cache with every call
/// rather than holding on to one.
pub trait Estimator {
	fn name(&self) -> &'static str;

	/// The cache contents needed to score sequences of up to `order` tokens.
	fn required_cache(&self, order: usize) -> Result<CacheSpecification, GlmError>;

	/// Probability of the last token of `sequence` given the preceding
	/// tokens. Unseen sequences score zero.
	fn probability(&self, cache: &Cache, sequence: &[&str]) -> f64;

	/// Score of one candidate during completion search.
	///
	/// For a fixed history this must be non-decreasing in the record count,
	/// which lets the completion trie prune on subtree bounds.
	fn completion_score(
		&self,
		cache: &Cache,
		history: &[&str],
		sequence: &str,
		counter: &Counter,
	) -> f64;
}

/// The reference maximum-likelihood estimator.
///
/// `P(w | h) = count(h w) / count(h)`, with the unigram denominator taken
/// from the wildcard store, whose single key aggregates every token
/// position.
pub struct MaximumLikelihood;

impl MaximumLikelihood {
	pub fn new() -> Self {
		Self
	}

	/// The denominator for a history, zero when the history is unseen.
	fn history_count(&self, cache: &Cache, history: &[&str]) -> u64 {
		let denominator = if history.is_empty() {
			Pattern::parse("x")
				.ok()
				.and_then(|x| cache.count(&x, SKIP_WORD))
		} else {
			Pattern::cnt(history.len())
				.ok()
				.and_then(|p| cache.count(&p, &history.join(" ")))
		};
		denominator.unwrap_or(0)
	}
}

impl Default for MaximumLikelihood {
	fn default() -> Self {
		Self::new()
	}
}

impl Estimator for MaximumLikelihood {
	fn name(&self) -> &'static str {
		"mle"
	}

	fn required_cache(&self, order: usize) -> Result<CacheSpecification, GlmError> {
		if order == 0 {
			return Err(GlmError::CliArgument(
				"Training order must be positive.".to_owned(),
			));
		}
		let mut patterns = Vec::with_capacity(order + 1);
		for length in 1..=order {
			patterns.push(Pattern::cnt(length)?);
		}
		patterns.push(Pattern::parse("x")?);
		Ok(CacheSpecification::new().with_counts(patterns))
	}

	fn probability(&self, cache: &Cache, sequence: &[&str]) -> f64 {
		let Some(pattern) = Pattern::cnt(sequence.len()).ok() else {
			return 0.0;
		};
		let numerator = cache.count(&pattern, &sequence.join(" ")).unwrap_or(0);
		let denominator = self.history_count(cache, &sequence[..sequence.len() - 1]);
		if denominator == 0 {
			return 0.0;
		}
		numerator as f64 / denominator as f64
	}

	fn completion_score(
		&self,
		cache: &Cache,
		history: &[&str],
		_sequence: &str,
		counter: &Counter,
	) -> f64 {
		let denominator = self.history_count(cache, history);
		if denominator == 0 {
			return 0.0;
		}
		counter.count() as f64 / denominator as f64
	}
}

/// Resolves an estimator name from the command line.
///
/// # Errors
/// Unknown names are command line errors listing the available estimators.
pub fn parse_estimator(name: &str) -> Result<Box<dyn Estimator>, GlmError> {
	match name.to_ascii_lowercase().as_str() {
		"mle" | "fast-mle" | "maximum-likelihood" => Ok(Box::new(MaximumLikelihood::new())),
		_ => Err(GlmError::CliArgument(format!(
			"Unknown estimator '{}'. Available: mle.",
			name
		))),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::config::Config;
	use crate::counting::pipeline::Glm;
	use std::collections::BTreeSet;
	use std::fs;
	use tempfile::TempDir;

	fn trained_cache(corpus: &str, order: usize) -> (TempDir, Cache) {
		let dir = TempDir::new().unwrap();
		let corpus_path = dir.path().join("training.txt");
		fs::write(&corpus_path, corpus).unwrap();
		let glm = Glm::new(Config::default(), corpus_path, dir.path().join("work")).unwrap();

		let estimator = MaximumLikelihood::new();
		let spec = estimator.required_cache(order).unwrap();
		let required: BTreeSet<Pattern> = spec.required_patterns().unwrap();
		glm.count(&required).unwrap();
		let cache = spec.build(glm.paths()).unwrap();
		(dir, cache)
	}

	#[test]
	fn required_cache_covers_all_orders_and_the_wildcard() {
		let estimator = MaximumLikelihood::new();
		let spec = estimator.required_cache(3).unwrap();
		let labels: Vec<String> = spec
			.required_patterns()
			.unwrap()
			.iter()
			.map(Pattern::label)
			.collect();
		assert_eq!(labels, ["c", "cc", "ccc", "x"]);
	}

	#[test]
	fn conditional_probability_is_a_count_ratio() {
		let (_dir, cache) = trained_cache("a b a b a\n", 2);
		let estimator = MaximumLikelihood::new();
		// count(a b) = 2, count(a) = 3
		let p = estimator.probability(&cache, &["a", "b"]);
		assert!((p - 2.0 / 3.0).abs() < 1e-12);
		assert_eq!(estimator.probability(&cache, &["b", "b"]), 0.0);
	}

	#[test]
	fn unigram_probability_normalises_by_token_count() {
		let (_dir, cache) = trained_cache("a b a b a\n", 2);
		let estimator = MaximumLikelihood::new();
		let p = estimator.probability(&cache, &["a"]);
		assert!((p - 3.0 / 5.0).abs() < 1e-12);
	}

	#[test]
	fn unknown_estimator_is_a_cli_error() {
		assert!(parse_estimator("mle").is_ok());
		assert!(matches!(
			parse_estimator("nonesuch"),
			Err(GlmError::CliArgument(_))
		));
	}
}
