use crate::cache::Cache;
use crate::error::GlmError;
use crate::estimate::Estimator;
use crate::pattern::Pattern;

/// One completion of an argmax query.
#[derive(Clone, Debug)]
pub struct ArgmaxResult {
	pub sequence: String,
	pub probability: f64,
}

/// Answers top-k completion queries over a completion-trie cache.
///
/// Given a history `h` of m tokens, the executor searches the trie of the
/// all-counted pattern of length m+1 under the prefix `h ` (extended by an
/// optional word prefix) and ranks candidates by the estimator's completion
/// score.
pub struct ArgmaxQueryExecutor<'a> {
	estimator: &'a dyn Estimator,
	cache: &'a Cache,
}

impl<'a> ArgmaxQueryExecutor<'a> {
	/// # Errors
	/// The cache must use the completion-trie backing.
	pub fn new(estimator: &'a dyn Estimator, cache: &'a Cache) -> Result<Self, GlmError> {
		if !cache.has_completions() {
			return Err(GlmError::CliArgument(
				"Argmax queries require the completion-trie cache backing.".to_owned(),
			));
		}
		Ok(Self { estimator, cache })
	}

	/// The top `k` completions of `history`, restricted to words starting
	/// with `prefix` when given.
	///
	/// Results are ordered by non-increasing probability, ties broken by
	/// word order. An unseen history yields no completions.
	///
	/// # Errors
	/// The history must hold at least one token.
	pub fn query_argmax(
		&self,
		history: &str,
		prefix: Option<&str>,
		k: usize,
	) -> Result<Vec<ArgmaxResult>, GlmError> {
		let history_tokens: Vec<&str> = history.split_whitespace().collect();
		if history_tokens.is_empty() {
			return Err(GlmError::CliArgument("History must not be empty.".to_owned()));
		}

		let pattern = Pattern::cnt(history_tokens.len() + 1)?;
		let mut trie_prefix = history_tokens.join(" ");
		trie_prefix.push(' ');
		if let Some(word_prefix) = prefix {
			trie_prefix.push_str(word_prefix);
		}

		let score = |sequence: &str, counter: &crate::counter::Counter| {
			self.estimator
				.completion_score(self.cache, &history_tokens, sequence, counter)
		};
		let completions = self
			.cache
			.completions(&pattern, &trie_prefix, k, &score)
			.unwrap_or_default();

		Ok(completions
			.into_iter()
			.map(|completion| {
				let word = completion
					.sequence
					.rsplit(' ')
					.next()
					.unwrap_or(&completion.sequence)
					.to_owned();
				ArgmaxResult { sequence: word, probability: completion.score }
			})
			.collect())
	}
}
