use std::fmt;

use crate::error::GlmError;

/// Marker emitted for unconditional skips. Forbidden in input tokens.
pub const SKIP_WORD: &str = "_";

/// Marker emitted for weighted skips. Forbidden in input tokens.
pub const WSKIP_WORD: &str = "%";

/// Separator between a token and its part-of-speech tag. Forbidden in
/// untagged input tokens.
pub const POS_SEPARATOR: char = '/';

/// One slot of a [`Pattern`] template.
///
/// # Variants
/// - `Cnt`: counted slot, copies the word into the key.
/// - `Skp`: unconditional skip, emits the skip marker.
/// - `Wskp`: weighted skip, emits the weighted-skip marker. A pattern holding
///   at least one of these is a continuation pattern.
/// - `Pos`: emits the token's part-of-speech tag.
/// - `Del`: drops the position from the key entirely.
/// - `Wildcard`: projects like a skip but marks a full-vocabulary request.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub enum PatternElem {
	Cnt,
	Skp,
	Wskp,
	Pos,
	Del,
	Wildcard,
}

impl PatternElem {
	/// The single label character of this element.
	pub fn to_char(self) -> char {
		match self {
			Self::Cnt => 'c',
			Self::Skp => 's',
			Self::Wskp => 'w',
			Self::Pos => 'p',
			Self::Del => 'd',
			Self::Wildcard => 'x',
		}
	}

	/// Parses a label character. Returns `None` for unknown characters.
	pub fn from_char(c: char) -> Option<Self> {
		match c {
			'c' => Some(Self::Cnt),
			's' => Some(Self::Skp),
			'w' => Some(Self::Wskp),
			'p' => Some(Self::Pos),
			'd' => Some(Self::Del),
			'x' => Some(Self::Wildcard),
			_ => None,
		}
	}
}

/// A fixed-length template projecting an n-gram into a counted key.
///
/// Patterns are plain values. They serialise as fixed-length label strings
/// (for example `cc`, `wc`, `csc`) which double as directory names in the
/// working directory layout.
///
/// # Invariants
/// - A pattern is never empty.
/// - A pattern is either absolute (no weighted skip) or continuation
///   (at least one weighted skip).
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct Pattern {
	elems: Vec<PatternElem>,
}

impl Pattern {
	/// Creates a pattern from its elements.
	///
	/// # Errors
	/// The empty pattern is forbidden.
	pub fn new(elems: Vec<PatternElem>) -> Result<Self, GlmError> {
		if elems.is_empty() {
			return Err(GlmError::CliArgument("Pattern must not be empty.".to_owned()));
		}
		Ok(Self { elems })
	}

	/// Parses a label string such as `cc` or `wsc`.
	///
	/// # Errors
	/// Fails on the empty label and on characters outside `{c,s,w,p,d,x}`.
	pub fn parse(label: &str) -> Result<Self, GlmError> {
		let mut elems = Vec::with_capacity(label.len());
		for c in label.chars() {
			match PatternElem::from_char(c) {
				Some(elem) => elems.push(elem),
				None => {
					return Err(GlmError::CliArgument(format!(
						"Unknown pattern character '{}' in label '{}'.",
						c, label
					)))
				}
			}
		}
		Self::new(elems)
	}

	/// The all-`Cnt` pattern of the given length, the shape of plain n-gram
	/// counts.
	pub fn cnt(len: usize) -> Result<Self, GlmError> {
		Self::new(vec![PatternElem::Cnt; len])
	}

	/// The wildcard-wrapped layout `xccccx`: four counted slots inside a
	/// skipped context, counting every inner 4-gram regardless of what
	/// surrounds it.
	///
	/// The front-ends add this to the counted set on every run; estimators
	/// read it for skipped-context totals.
	pub fn wildcard_layout() -> Self {
		Self {
			elems: vec![
				PatternElem::Wildcard,
				PatternElem::Cnt,
				PatternElem::Cnt,
				PatternElem::Cnt,
				PatternElem::Cnt,
				PatternElem::Wildcard,
			],
		}
	}

	pub fn len(&self) -> usize {
		self.elems.len()
	}

	pub fn elem_at(&self, i: usize) -> PatternElem {
		self.elems[i]
	}

	/// The label string, also used as the pattern's directory name.
	pub fn label(&self) -> String {
		self.elems.iter().map(|e| e.to_char()).collect()
	}

	/// An absolute pattern carries no weighted skip.
	pub fn is_absolute(&self) -> bool {
		!self.is_continuation()
	}

	/// A continuation pattern carries at least one weighted skip.
	pub fn is_continuation(&self) -> bool {
		self.elems.contains(&PatternElem::Wskp)
	}

	/// Index of the first counted slot, used for bucketing. Patterns without
	/// a counted slot land in bucket 0.
	pub fn first_cnt(&self) -> Option<usize> {
		self.elems.iter().position(|e| *e == PatternElem::Cnt)
	}

	/// Projects a window of tokens into this pattern's key.
	///
	/// Counted slots copy the word (the part before a part-of-speech
	/// separator, if any), skips and wildcards emit the skip marker, weighted
	/// skips emit the weighted-skip marker, `Pos` emits the tag part and
	/// `Del` drops the position. Positions beyond the pattern length are
	/// ignored.
	///
	/// # Panics
	/// The window must hold at least `len()` tokens.
	pub fn apply(&self, words: &[&str]) -> String {
		assert!(words.len() >= self.elems.len());
		let mut parts: Vec<&str> = Vec::with_capacity(self.elems.len());
		for (elem, word) in self.elems.iter().zip(words) {
			match elem {
				PatternElem::Cnt => parts.push(word_part(word)),
				PatternElem::Skp | PatternElem::Wildcard => parts.push(SKIP_WORD),
				PatternElem::Wskp => parts.push(WSKIP_WORD),
				PatternElem::Pos => parts.push(pos_part(word)),
				PatternElem::Del => (),
			}
		}
		parts.join(" ")
	}

	/// Replaces every weighted skip by an unconditional skip.
	///
	/// This is the absolute view of a continuation pattern that estimators
	/// use for denominators.
	pub fn to_absolute(&self) -> Self {
		self.replace(PatternElem::Wskp, PatternElem::Skp)
	}

	/// Replaces every weighted skip by a counted slot.
	///
	/// The result is the absolute pattern whose store the continuation
	/// counts of `self` are derived from.
	pub fn continuation_source(&self) -> Self {
		self.replace(PatternElem::Wskp, PatternElem::Cnt)
	}

	/// The continuation patterns needed to smooth this pattern, obtained by
	/// turning the first k counted slots into weighted skips for every
	/// possible k.
	///
	/// The all-weighted member is included; its single-key store is the
	/// normalization total of the lowest order distribution.
	pub fn continuation_family(&self) -> Vec<Self> {
		let cnt_slots: Vec<usize> = self
			.elems
			.iter()
			.enumerate()
			.filter(|(_, e)| **e == PatternElem::Cnt)
			.map(|(i, _)| i)
			.collect();

		let mut family = Vec::new();
		let mut elems = self.elems.clone();
		for slot in &cnt_slots {
			elems[*slot] = PatternElem::Wskp;
			family.push(Self { elems: elems.clone() });
		}
		family
	}

	fn replace(&self, from: PatternElem, to: PatternElem) -> Self {
		let elems = self
			.elems
			.iter()
			.map(|e| if *e == from { to } else { *e })
			.collect();
		Self { elems }
	}
}

impl fmt::Display for Pattern {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.label())
	}
}

/// The word part of a possibly tagged token.
fn word_part(token: &str) -> &str {
	match token.rsplit_once(POS_SEPARATOR) {
		Some((word, _)) => word,
		None => token,
	}
}

/// The tag part of a possibly tagged token. Untagged tokens are returned
/// as-is.
fn pos_part(token: &str) -> &str {
	match token.rsplit_once(POS_SEPARATOR) {
		Some((_, pos)) => pos,
		None => token,
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn label_round_trip() {
		for label in ["c", "cc", "wc", "csc", "pd", "x", "xccccx"] {
			let pattern = Pattern::parse(label).unwrap();
			assert_eq!(pattern.label(), label);
		}
	}

	#[test]
	fn empty_and_unknown_labels_rejected() {
		assert!(Pattern::parse("").is_err());
		assert!(Pattern::parse("cq").is_err());
	}

	#[test]
	fn apply_absolute() {
		let pattern = Pattern::parse("cc").unwrap();
		assert_eq!(pattern.apply(&["a", "b"]), "a b");

		let pattern = Pattern::parse("csc").unwrap();
		assert_eq!(pattern.apply(&["a", "b", "c"]), "a _ c");
	}

	#[test]
	fn apply_continuation_and_delete() {
		let pattern = Pattern::parse("wc").unwrap();
		assert_eq!(pattern.apply(&["a", "b"]), "% b");

		let pattern = Pattern::parse("dc").unwrap();
		assert_eq!(pattern.apply(&["a", "b"]), "b");
	}

	#[test]
	fn apply_wildcard_projects_like_skip() {
		let pattern = Pattern::parse("x").unwrap();
		assert_eq!(pattern.apply(&["anything"]), "_");
		assert_eq!(pattern.first_cnt(), None);
	}

	#[test]
	fn apply_pos_uses_tag_part() {
		let pattern = Pattern::parse("cp").unwrap();
		assert_eq!(pattern.apply(&["house/NN", "runs/VB"]), "house VB");
	}

	#[test]
	fn derivations() {
		let pattern = Pattern::parse("wc").unwrap();
		assert_eq!(pattern.to_absolute().label(), "sc");
		assert_eq!(pattern.continuation_source().label(), "cc");
		assert!(pattern.is_continuation());
		assert!(pattern.continuation_source().is_absolute());
	}

	#[test]
	fn continuation_family_turns_counted_slots() {
		let pattern = Pattern::parse("ccc").unwrap();
		let labels: Vec<String> = pattern
			.continuation_family()
			.iter()
			.map(Pattern::label)
			.collect();
		assert_eq!(labels, ["wcc", "wwc", "www"]);
	}

	#[test]
	fn bucketing_follows_first_counted_slot() {
		assert_eq!(Pattern::parse("scc").unwrap().first_cnt(), Some(1));
		assert_eq!(Pattern::parse("ss").unwrap().first_cnt(), None);
	}

	#[test]
	fn wildcard_layout_shape() {
		let pattern = Pattern::wildcard_layout();
		assert_eq!(pattern.label(), "xccccx");
		assert!(pattern.is_absolute());
		assert_eq!(pattern.first_cnt(), Some(1));
		assert_eq!(pattern.apply(&["p", "b", "c", "d", "e", "q"]), "_ b c d e _");
	}
}
