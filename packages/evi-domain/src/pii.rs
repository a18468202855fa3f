use std::collections::HashMap;

use regex::Regex;

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum PiiKind {
	Email,
	Ssn,
	Phone,
}
impl PiiKind {
	pub fn label(self) -> &'static str {
		match self {
			PiiKind::Email => "EMAIL",
			PiiKind::Ssn => "SSN",
			PiiKind::Phone => "PHONE",
		}
	}
}

struct PiiRule {
	kind: PiiKind,
	pattern: Regex,
}

/// Pattern-based PII detector.
///
/// Rules run in order (email, SSN, phone) so that broader numeric patterns never see digits that
/// an earlier rule already replaced.
pub struct PiiRedactor {
	rules: Vec<PiiRule>,
}
impl PiiRedactor {
	pub fn new() -> Result<Self, regex::Error> {
		let rules = vec![
			PiiRule {
				kind: PiiKind::Email,
				pattern: Regex::new(r"(?i)\b[a-z0-9._%+-]+@[a-z0-9.-]+\.[a-z]{2,}\b")?,
			},
			PiiRule { kind: PiiKind::Ssn, pattern: Regex::new(r"\b\d{3}-\d{2}-\d{4}\b")? },
			PiiRule {
				kind: PiiKind::Phone,
				pattern: Regex::new(
					r"(?:\+\d{1,2}[\s.-]?)?(?:\(\d{3}\)|\b\d{3})[\s.-]?\d{3}[\s.-]?\d{4}\b",
				)?,
			},
		];

		Ok(Self { rules })
	}

	/// Starts a redaction pass. Tokens are numbered per kind and the same literal value keeps the
	/// same token for the lifetime of the session.
	pub fn session(&self) -> RedactionSession<'_> {
		RedactionSession { redactor: self, assigned: HashMap::new(), counters: HashMap::new() }
	}

	pub fn contains_pii(&self, text: &str) -> bool {
		self.rules.iter().any(|rule| rule.pattern.is_match(text))
	}
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Redaction {
	pub text: String,
	pub replaced: u32,
}
impl Redaction {
	pub fn touched(&self) -> bool {
		self.replaced > 0
	}
}

pub struct RedactionSession<'a> {
	redactor: &'a PiiRedactor,
	assigned: HashMap<(PiiKind, String), String>,
	counters: HashMap<PiiKind, u32>,
}
impl RedactionSession<'_> {
	pub fn redact(&mut self, text: &str) -> Redaction {
		let mut current = text.to_string();
		let mut replaced = 0_u32;
		let redactor = self.redactor;

		for rule in &redactor.rules {
			let mut out = String::with_capacity(current.len());
			let mut last = 0_usize;

			for found in rule.pattern.find_iter(&current) {
				let key = (rule.kind, found.as_str().to_ascii_lowercase());
				let token = match self.assigned.get(&key) {
					Some(token) => token.clone(),
					None => {
						let counter = self.counters.entry(rule.kind).or_insert(0);

						*counter += 1;

						let token = format!("[{}_{}]", rule.kind.label(), counter);

						self.assigned.insert(key, token.clone());

						token
					},
				};

				out.push_str(&current[last..found.start()]);
				out.push_str(&token);

				last = found.end();
				replaced += 1;
			}

			out.push_str(&current[last..]);

			current = out;
		}

		Redaction { text: current, replaced }
	}
}
