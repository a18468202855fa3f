//! In-memory cosine projection over stored chunk vectors.
//!
//! The index is keyed by chunk id only and knows nothing about tenants. Callers must resolve every
//! hit against the store before trusting it.

use std::{collections::HashMap, sync::RwLock};

use uuid::Uuid;

use crate::{Error, Result};

#[derive(Clone, Debug, PartialEq)]
pub struct VectorHit {
	pub chunk_id: Uuid,
	pub similarity: f32,
}

pub struct VectorIndex {
	dim: usize,
	vectors: RwLock<HashMap<Uuid, Vec<f32>>>,
}
impl VectorIndex {
	pub fn new(dim: u32) -> Self {
		Self { dim: dim as usize, vectors: RwLock::new(HashMap::new()) }
	}

	pub fn dim(&self) -> usize {
		self.dim
	}

	pub fn upsert(&self, chunk_id: Uuid, vec: Vec<f32>) -> Result<()> {
		if vec.len() != self.dim {
			return Err(Error::Index(format!(
				"Vector dimension {} does not match index dimension {}.",
				vec.len(),
				self.dim
			)));
		}

		self.vectors.write().unwrap_or_else(|err| err.into_inner()).insert(chunk_id, vec);

		Ok(())
	}

	pub fn remove(&self, chunk_ids: &[Uuid]) {
		let mut vectors = self.vectors.write().unwrap_or_else(|err| err.into_inner());

		for chunk_id in chunk_ids {
			vectors.remove(chunk_id);
		}
	}

	pub fn clear(&self) {
		self.vectors.write().unwrap_or_else(|err| err.into_inner()).clear();
	}

	pub fn len(&self) -> usize {
		self.vectors.read().unwrap_or_else(|err| err.into_inner()).len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Every indexed chunk ranked by cosine similarity to `query`, best first.
	pub fn rank(&self, query: &[f32]) -> Result<Vec<VectorHit>> {
		if query.len() != self.dim {
			return Err(Error::Index(format!(
				"Query dimension {} does not match index dimension {}.",
				query.len(),
				self.dim
			)));
		}

		let vectors = self.vectors.read().unwrap_or_else(|err| err.into_inner());
		let mut hits: Vec<VectorHit> = vectors
			.iter()
			.filter_map(|(chunk_id, vec)| {
				cosine_similarity(query, vec)
					.map(|similarity| VectorHit { chunk_id: *chunk_id, similarity })
			})
			.collect();

		hits.sort_by(|a, b| {
			b.similarity.total_cmp(&a.similarity).then_with(|| a.chunk_id.cmp(&b.chunk_id))
		});

		Ok(hits)
	}
}

pub fn cosine_similarity(lhs: &[f32], rhs: &[f32]) -> Option<f32> {
	if lhs.is_empty() || lhs.len() != rhs.len() {
		return None;
	}

	let mut dot = 0.0_f32;
	let mut lhs_norm = 0.0_f32;
	let mut rhs_norm = 0.0_f32;

	for (l, r) in lhs.iter().zip(rhs.iter()) {
		dot += l * r;
		lhs_norm += l * l;
		rhs_norm += r * r;
	}

	if lhs_norm <= f32::EPSILON || rhs_norm <= f32::EPSILON {
		return None;
	}

	Some((dot / (lhs_norm.sqrt() * rhs_norm.sqrt())).clamp(-1.0, 1.0))
}
