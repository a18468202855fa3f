use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalMethod {
	Lexical,
	Vector,
	Hybrid,
}
impl RetrievalMethod {
	pub fn as_str(self) -> &'static str {
		match self {
			RetrievalMethod::Lexical => "lexical",
			RetrievalMethod::Vector => "vector",
			RetrievalMethod::Hybrid => "hybrid",
		}
	}
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
	Low,
	Medium,
	High,
}
impl Confidence {
	pub fn as_str(self) -> &'static str {
		match self {
			Confidence::Low => "low",
			Confidence::Medium => "medium",
			Confidence::High => "high",
		}
	}
}

/// Buckets the top surviving score. Both thresholds are inclusive lower bounds.
pub fn confidence_for_score(top_score: Option<f32>, high: f32, medium: f32) -> Confidence {
	match top_score {
		Some(score) if score >= high => Confidence::High,
		Some(score) if score >= medium => Confidence::Medium,
		_ => Confidence::Low,
	}
}

/// Age of a source for freshness checks: the older of time since the last content update and
/// time since the last successful indexing. A source that was never indexed is infinitely stale.
pub fn staleness(
	updated_at: OffsetDateTime,
	indexed_at: Option<OffsetDateTime>,
	now: OffsetDateTime,
) -> Option<Duration> {
	let indexed_at = indexed_at?;
	let since_update = now - updated_at;
	let since_index = now - indexed_at;

	Some(since_update.max(since_index))
}

pub fn is_stale(
	updated_at: OffsetDateTime,
	indexed_at: Option<OffsetDateTime>,
	now: OffsetDateTime,
	stale_after: Duration,
) -> bool {
	match staleness(updated_at, indexed_at, now) {
		Some(age) => age > stale_after,
		None => true,
	}
}
