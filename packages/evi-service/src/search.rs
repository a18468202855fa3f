pub mod fusion;

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{EviService, Result};
use evi_domain::evidence::RetrievalMethod;
use evi_storage::chunks;
use fusion::{FusedHit, LegHit};

const VECTOR_JOIN_PAGE: usize = 256;
const DEFAULT_LIMIT: u32 = 10;

#[derive(Clone, Debug, Deserialize)]
pub struct SearchRequest {
	pub tenant_id: String,
	pub query: String,
	#[serde(default)]
	pub limit: Option<u32>,
}

#[derive(Clone, Debug, Serialize)]
pub struct SearchHit {
	pub record_id: Uuid,
	pub score: f32,
	pub normalized_score: f32,
	pub method: RetrievalMethod,
	pub lexical_rank: Option<u32>,
	pub vector_rank: Option<u32>,
	pub chunk_ids: Vec<Uuid>,
}
impl From<FusedHit> for SearchHit {
	fn from(hit: FusedHit) -> Self {
		Self {
			record_id: hit.record_id,
			score: hit.rrf_score,
			normalized_score: hit.normalized_score,
			method: hit.method,
			lexical_rank: hit.lexical_rank,
			vector_rank: hit.vector_rank,
			chunk_ids: hit.chunk_ids,
		}
	}
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct SearchResponse {
	pub hits: Vec<SearchHit>,
	/// The vector leg was unavailable and results come from the lexical leg alone.
	pub degraded: bool,
}

impl EviService {
	pub async fn search(&self, req: SearchRequest) -> Result<SearchResponse> {
		self.hybrid_search(&req.tenant_id, &req.query, req.limit.unwrap_or(DEFAULT_LIMIT)).await
	}

	/// Lexical and vector retrieval run concurrently and are fused with reciprocal rank fusion.
	///
	/// A failure to embed the query degrades to lexical-only results instead of failing.
	pub async fn hybrid_search(
		&self,
		tenant_id: &str,
		query: &str,
		limit: u32,
	) -> Result<SearchResponse> {
		if limit == 0 || query.trim().is_empty() {
			return Ok(SearchResponse::default());
		}

		let (lexical, vector) =
			tokio::join!(self.lexical_leg(tenant_id, query), self.vector_leg(tenant_id, query));
		let vector = vector?;
		let degraded = vector.is_none();
		let vector_hits = vector.as_deref().unwrap_or(&[]);
		let mut fused = fusion::fuse(&lexical, vector_hits, self.cfg.search.rrf_k);

		fused.truncate(limit as usize);

		tracing::debug!(
			tenant_id,
			lexical = lexical.len(),
			vector = vector_hits.len(),
			fused = fused.len(),
			degraded,
			"Hybrid search finished."
		);

		Ok(SearchResponse { hits: fused.into_iter().map(SearchHit::from).collect(), degraded })
	}

	async fn lexical_leg(&self, tenant_id: &str, query: &str) -> Vec<LegHit> {
		let hits = self.lexical.search(tenant_id, query);

		group_by_record(
			hits.into_iter().map(|hit| (hit.record_id, hit.chunk_id, hit.score)),
			self.cfg.search.lexical_k as usize,
			self.cfg.search.max_chunks_per_hit as usize,
		)
	}

	/// Returns `Ok(None)` when the query cannot be embedded or compared. Store failures while
	/// resolving hits are real errors.
	async fn vector_leg(&self, tenant_id: &str, query: &str) -> Result<Option<Vec<LegHit>>> {
		let texts = [query.to_string()];
		let call = self.providers.embedding.embed(&self.cfg.providers.embedding, &texts);
		let embedded = match call.await {
			Ok(vectors) => vectors.into_iter().next(),
			Err(err) => {
				tracing::warn!(tenant_id, error = %err, "Query embedding failed; lexical only.");

				return Ok(None);
			},
		};
		let Some(query_vec) = embedded else {
			tracing::warn!(tenant_id, "Embedding provider returned no query vector; lexical only.");

			return Ok(None);
		};

		// Vectors may have been committed by another process since the last query.
		self.sync_vector_index().await?;

		let ranked = match self.vectors.rank(&query_vec) {
			Ok(ranked) => ranked,
			Err(err) => {
				tracing::warn!(tenant_id, error = %err, "Vector ranking failed; lexical only.");

				return Ok(None);
			},
		};
		let record_limit = self.cfg.search.vector_k as usize;
		let chunk_limit = self.cfg.search.max_chunks_per_hit as usize;
		let mut resolved: Vec<(Uuid, Uuid, f32)> = Vec::new();
		let mut records_seen: HashSet<Uuid> = HashSet::new();
		let mut conn = self.db.pool.acquire().await?;

		// The index has no tenant; only ids that resolve to a live chunk of this tenant count.
		for page in ranked.chunks(VECTOR_JOIN_PAGE) {
			let ids: Vec<Uuid> = page.iter().map(|hit| hit.chunk_id).collect();
			let contexts = chunks::load_chunk_contexts(&mut conn, tenant_id, &ids).await?;
			let owners: HashMap<Uuid, Uuid> =
				contexts.into_iter().map(|ctx| (ctx.chunk_id, ctx.record_id)).collect();

			for hit in page {
				if let Some(record_id) = owners.get(&hit.chunk_id) {
					records_seen.insert(*record_id);
					resolved.push((*record_id, hit.chunk_id, hit.similarity));
				}
			}

			if records_seen.len() >= record_limit {
				break;
			}
		}

		Ok(Some(group_by_record(resolved.into_iter(), record_limit, chunk_limit)))
	}
}

/// Groups chunk hits (best first) into at most `record_limit` records, keeping the first
/// `chunk_limit` chunks of each. A record's score is its best chunk's score.
fn group_by_record(
	hits: impl Iterator<Item = (Uuid, Uuid, f32)>,
	record_limit: usize,
	chunk_limit: usize,
) -> Vec<LegHit> {
	let mut out: Vec<LegHit> = Vec::new();
	let mut positions: HashMap<Uuid, usize> = HashMap::new();

	for (record_id, chunk_id, score) in hits {
		match positions.get(&record_id) {
			Some(&pos) =>
				if out[pos].chunk_ids.len() < chunk_limit {
					out[pos].chunk_ids.push(chunk_id);
				},
			None =>
				if out.len() < record_limit {
					positions.insert(record_id, out.len());
					out.push(LegHit { record_id, score, chunk_ids: vec![chunk_id] });
				},
		}
	}

	out
}
