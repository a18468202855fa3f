//! Reciprocal rank fusion over per-record leg results.

use std::collections::HashMap;

use uuid::Uuid;

use evi_domain::evidence::RetrievalMethod;

/// One record as ranked by a single retrieval leg, best first.
#[derive(Clone, Debug, PartialEq)]
pub struct LegHit {
	pub record_id: Uuid,
	pub score: f32,
	pub chunk_ids: Vec<Uuid>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FusedHit {
	pub record_id: Uuid,
	pub rrf_score: f32,
	/// `rrf_score` divided by the best attainable score (rank one in both legs), in `0.0..=1.0`.
	pub normalized_score: f32,
	pub method: RetrievalMethod,
	pub lexical_rank: Option<u32>,
	pub vector_rank: Option<u32>,
	pub chunk_ids: Vec<Uuid>,
}
impl FusedHit {
	fn best_rank(&self) -> u32 {
		match (self.lexical_rank, self.vector_rank) {
			(Some(l), Some(v)) => l.min(v),
			(Some(rank), None) | (None, Some(rank)) => rank,
			(None, None) => u32::MAX,
		}
	}
}

pub fn rrf_contribution(k: u32, rank: u32) -> f32 {
	1.0 / (k as f32 + rank as f32)
}

pub fn max_rrf_score(k: u32) -> f32 {
	2.0 * rrf_contribution(k, 1)
}

/// Fuses the two legs with 1-based ranks. Records in both lists are `hybrid`; ties break on the
/// better single-leg rank, then on record id.
pub fn fuse(lexical: &[LegHit], vector: &[LegHit], k: u32) -> Vec<FusedHit> {
	let mut fused: HashMap<Uuid, FusedHit> = HashMap::new();

	for (idx, hit) in lexical.iter().enumerate() {
		let rank = idx as u32 + 1;
		let entry = fused.entry(hit.record_id).or_insert_with(|| empty_hit(hit.record_id));

		entry.rrf_score += rrf_contribution(k, rank);
		entry.lexical_rank = Some(rank);

		push_unique(&mut entry.chunk_ids, &hit.chunk_ids);
	}
	for (idx, hit) in vector.iter().enumerate() {
		let rank = idx as u32 + 1;
		let entry = fused.entry(hit.record_id).or_insert_with(|| empty_hit(hit.record_id));

		entry.rrf_score += rrf_contribution(k, rank);
		entry.vector_rank = Some(rank);

		push_unique(&mut entry.chunk_ids, &hit.chunk_ids);
	}

	let max_score = max_rrf_score(k);
	let mut hits: Vec<FusedHit> = fused
		.into_values()
		.map(|mut hit| {
			hit.method = match (hit.lexical_rank, hit.vector_rank) {
				(Some(_), Some(_)) => RetrievalMethod::Hybrid,
				(None, Some(_)) => RetrievalMethod::Vector,
				_ => RetrievalMethod::Lexical,
			};
			hit.normalized_score = (hit.rrf_score / max_score).clamp(0.0, 1.0);

			hit
		})
		.collect();

	hits.sort_by(|a, b| {
		b.rrf_score
			.total_cmp(&a.rrf_score)
			.then_with(|| a.best_rank().cmp(&b.best_rank()))
			.then_with(|| a.record_id.cmp(&b.record_id))
	});

	hits
}

fn empty_hit(record_id: Uuid) -> FusedHit {
	FusedHit {
		record_id,
		rrf_score: 0.0,
		normalized_score: 0.0,
		method: RetrievalMethod::Lexical,
		lexical_rank: None,
		vector_rank: None,
		chunk_ids: Vec::new(),
	}
}

fn push_unique(target: &mut Vec<Uuid>, ids: &[Uuid]) {
	for id in ids {
		if !target.contains(id) {
			target.push(*id);
		}
	}
}
