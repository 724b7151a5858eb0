use crate::error::GlmError;

/// Count record attached to a sequence in a pattern store.
///
/// The same record backs both kinds of store. For absolute patterns only the
/// first component is meaningful and holds the raw occurrence count. For
/// continuation patterns the record is the full witness distribution: how
/// many distinct contexts witness the sequence (`one_plus`), split by how
/// often each witness itself occurred (`one`, `two`, `three_plus`).
///
/// # Invariants
/// - `one_plus >= one + two + three_plus`
///
/// # Responsibilities
/// - Accumulate counts during aggregation (`add`, `add_count`, `add_one`)
/// - Parse and format the tab-separated chunk line formats
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, Default)]
pub struct Counter {
	one_plus: u64,
	one: u64,
	two: u64,
	three_plus: u64,
}

impl Counter {
	/// An absolute record holding a plain occurrence count.
	pub fn absolute(count: u64) -> Self {
		Self { one_plus: count, one: 0, two: 0, three_plus: 0 }
	}

	pub fn new(one_plus: u64, one: u64, two: u64, three_plus: u64) -> Self {
		Self { one_plus, one, two, three_plus }
	}

	/// The absolute count, or the number of distinct witnesses for
	/// continuation records.
	pub fn count(&self) -> u64 {
		self.one_plus
	}

	pub fn one(&self) -> u64 {
		self.one
	}

	pub fn two(&self) -> u64 {
		self.two
	}

	pub fn three_plus(&self) -> u64 {
		self.three_plus
	}

	/// Merges another record into this one. Component-wise sum, used when
	/// combining spill runs covering disjoint input portions.
	pub fn add(&mut self, other: &Self) {
		self.one_plus += other.one_plus;
		self.one += other.one;
		self.two += other.two;
		self.three_plus += other.three_plus;
	}

	/// Adds plain occurrences to an absolute record.
	pub fn add_count(&mut self, count: u64) {
		self.one_plus += count;
	}

	/// Records one witness whose own absolute count is `count`.
	///
	/// This is the continuation rule: every witness raises `one_plus` by one
	/// and falls into exactly one frequency class.
	pub fn add_one(&mut self, count: u64) {
		self.one_plus += 1;
		if count == 1 {
			self.one += 1;
		} else if count == 2 {
			self.two += 1;
		} else if count >= 3 {
			self.three_plus += 1;
		}
	}

	/// Checks the witness distribution invariant.
	///
	/// # Errors
	/// Violations are internal invariant errors; they indicate a counting
	/// bug, never bad input.
	pub fn check(&self, sequence: &str) -> Result<(), GlmError> {
		if self.one + self.two + self.three_plus > self.one_plus {
			return Err(GlmError::Invariant(format!(
				"Counter for '{}' has n1+n2+n3+ = {} exceeding n1+ = {}.",
				sequence,
				self.one + self.two + self.three_plus,
				self.one_plus
			)));
		}
		Ok(())
	}

	/// Splits a chunk line into its sequence and count record.
	///
	/// Accepts the 2-column absolute form `seq\tcount` and the 5-column
	/// continuation form `seq\tn1+\tn1\tn2\tn3+`.
	///
	/// # Errors
	/// Returns a plain message; callers attach the path and line number.
	pub fn parse_line(line: &str) -> Result<(&str, Self), String> {
		let columns: Vec<&str> = line.split('\t').collect();
		match columns.len() {
			2 => Ok((columns[0], Self::absolute(parse_count(columns[1])?))),
			5 => Ok((
				columns[0],
				Self::new(
					parse_count(columns[1])?,
					parse_count(columns[2])?,
					parse_count(columns[3])?,
					parse_count(columns[4])?,
				),
			)),
			_ => Err("Expected line to have format '<sequence>(\\t<count>){1,4}'.".to_owned()),
		}
	}

	/// The 2-column absolute chunk representation, without the sequence.
	pub fn format_absolute(&self) -> String {
		self.one_plus.to_string()
	}

	/// The 5-column continuation chunk representation, without the sequence.
	pub fn format_continuation(&self) -> String {
		format!("{}\t{}\t{}\t{}", self.one_plus, self.one, self.two, self.three_plus)
	}
}

fn parse_count(value: &str) -> Result<u64, String> {
	value
		.parse::<u64>()
		.map_err(|_| format!("Unable to parse '{}' as a count.", value))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn add_one_classifies_witnesses() {
		let mut counter = Counter::default();
		counter.add_one(1);
		counter.add_one(2);
		counter.add_one(2);
		counter.add_one(7);
		assert_eq!(counter.count(), 4);
		assert_eq!(counter.one(), 1);
		assert_eq!(counter.two(), 2);
		assert_eq!(counter.three_plus(), 1);
		counter.check("w").unwrap();
	}

	#[test]
	fn parse_absolute_line() {
		let (seq, counter) = Counter::parse_line("a b\t42").unwrap();
		assert_eq!(seq, "a b");
		assert_eq!(counter, Counter::absolute(42));
	}

	#[test]
	fn parse_continuation_line() {
		let (seq, counter) = Counter::parse_line("% b\t3\t1\t2\t0").unwrap();
		assert_eq!(seq, "% b");
		assert_eq!(counter, Counter::new(3, 1, 2, 0));
	}

	#[test]
	fn parse_rejects_malformed_lines() {
		assert!(Counter::parse_line("just a sequence").is_err());
		assert!(Counter::parse_line("a\t1\t2").is_err());
		assert!(Counter::parse_line("a\tnot-a-number").is_err());
	}

	#[test]
	fn format_round_trip() {
		let counter = Counter::new(5, 1, 1, 2);
		let line = format!("k\t{}", counter.format_continuation());
		assert_eq!(Counter::parse_line(&line).unwrap(), ("k", counter));
	}

	#[test]
	fn check_rejects_overfull_distribution() {
		let counter = Counter::new(1, 1, 1, 0);
		assert!(counter.check("k").is_err());
	}
}
