//! Evidence pack assembly on top of hybrid search.
//!
//! Order of operations: retrieve candidates, apply the permission filter, redact what survived,
//! flag stale sources, collapse near-duplicates, cap sources per record, then score confidence.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::{
	Error, EviService, Result,
	policy::{Principal, RedactionItem},
};
use evi_domain::evidence::{self as rules, Confidence, RetrievalMethod};
use evi_storage::{
	chunks, evidence,
	models::{AuditEvent, ChunkContext, EvidenceRecord},
	vector_index::cosine_similarity,
	vectors,
};

pub const AUDIT_ACTION: &str = "evidence.pack";

#[derive(Clone, Debug, Deserialize)]
pub struct EvidencePackRequest {
	pub principal: Principal,
	pub query: String,
	#[serde(default)]
	pub limit: Option<u32>,
}

#[derive(Clone, Debug, Serialize)]
pub struct EvidenceSource {
	pub evidence_id: Uuid,
	pub record_id: Uuid,
	pub chunk_id: Uuid,
	pub title: String,
	pub source_kind: String,
	pub snippet: String,
	pub method: RetrievalMethod,
	pub score: f32,
	pub redacted: bool,
	pub stale: bool,
	#[serde(with = "crate::time_serde")]
	pub updated_at: OffsetDateTime,
	#[serde(with = "crate::time_serde::option")]
	pub indexed_at: Option<OffsetDateTime>,
}

#[derive(Clone, Debug, Serialize)]
pub struct EvidencePack {
	pub pack_id: Uuid,
	pub tenant_id: String,
	pub sources: Vec<EvidenceSource>,
	pub confidence: Confidence,
	pub total_candidates: u32,
	pub filtered_count: u32,
	pub warnings: Vec<String>,
	pub degraded: bool,
}

struct Candidate {
	ctx: ChunkContext,
	method: RetrievalMethod,
	score: f32,
	snippet: String,
	redacted: bool,
	stale: bool,
}

#[derive(Default)]
struct DropCounts {
	permission: u32,
	duplicate: u32,
	diversity: u32,
}

impl EviService {
	pub async fn build_evidence_pack(&self, req: EvidencePackRequest) -> Result<EvidencePack> {
		let principal = &req.principal;

		if principal.tenant_id.trim().is_empty() {
			return Err(Error::InvalidRequest {
				message: "principal.tenant_id must be non-empty.".to_string(),
			});
		}

		let cfg = &self.cfg.evidence;
		let limit = req.limit.unwrap_or(cfg.top_k) as usize;
		let pack_id = Uuid::new_v4();
		let now = OffsetDateTime::now_utc();
		let candidate_k = cfg.candidate_k.max(limit as u32);
		let search = self.hybrid_search(&principal.tenant_id, &req.query, candidate_k).await?;
		let mut drops = DropCounts::default();
		let mut conn = self.db.pool.acquire().await?;
		let chunk_ids: Vec<Uuid> =
			search.hits.iter().flat_map(|hit| hit.chunk_ids.iter().copied()).collect();
		let contexts: HashMap<Uuid, ChunkContext> =
			chunks::load_chunk_contexts(&mut conn, &principal.tenant_id, &chunk_ids)
				.await?
				.into_iter()
				.map(|ctx| (ctx.chunk_id, ctx))
				.collect();
		let mut candidates = Vec::new();

		for hit in &search.hits {
			for chunk_id in &hit.chunk_ids {
				let Some(ctx) = contexts.get(chunk_id) else {
					continue;
				};

				candidates.push(Candidate {
					ctx: ctx.clone(),
					method: hit.method,
					score: hit.normalized_score,
					snippet: truncate_chars(&ctx.text, cfg.snippet_max_chars as usize),
					redacted: false,
					stale: false,
				});
			}
		}

		let total_candidates = candidates.len() as u32;
		let filter = self.providers.policy.permission_filter(principal).await?;

		candidates.retain(|candidate| {
			let allowed =
				filter.allows(&candidate.ctx.tenant_id, candidate.ctx.owner_id.as_deref());

			if !allowed {
				drops.permission += 1;
			}

			allowed
		});

		if self.cfg.security.redact_pii && !candidates.is_empty() {
			self.redact_candidates(&mut candidates).await?;
		}

		let stale_after = Duration::days(cfg.stale_after_days);

		for candidate in &mut candidates {
			let ctx = &candidate.ctx;

			candidate.stale = rules::is_stale(ctx.updated_at, ctx.indexed_at, now, stale_after);
		}

		let ids: Vec<Uuid> = candidates.iter().map(|candidate| candidate.ctx.chunk_id).collect();
		let stored_vectors = vectors::load_vectors(&mut conn, &principal.tenant_id, &ids).await?;
		let mut kept = dedup(candidates, &stored_vectors, cfg.dedup_sim_threshold, &mut drops);

		kept = cap_per_record(kept, cfg.max_sources_per_record as usize, &mut drops);
		kept.truncate(limit);

		let sources: Vec<EvidenceSource> = kept.into_iter().map(into_source).collect();
		let confidence = rules::confidence_for_score(
			sources.first().map(|source| source.score),
			cfg.high_confidence,
			cfg.medium_confidence,
		);
		let warnings = build_warnings(&sources, &drops, cfg.stale_after_days, search.degraded);
		let filtered_count = drops.permission + drops.duplicate + drops.diversity;
		let rows: Vec<EvidenceRecord> = sources
			.iter()
			.map(|source| EvidenceRecord {
				evidence_id: source.evidence_id,
				pack_id,
				tenant_id: principal.tenant_id.clone(),
				record_id: source.record_id,
				chunk_id: source.chunk_id,
				method: source.method.as_str().to_string(),
				score: source.score,
				snippet: Some(source.snippet.clone()),
				redacted: source.redacted,
				created_at: now,
			})
			.collect();

		evidence::insert_evidence_records(&mut conn, &rows).await?;

		drop(conn);

		self.providers
			.audit
			.record(AuditEvent {
				event_id: Uuid::new_v4(),
				tenant_id: principal.tenant_id.clone(),
				actor: principal.user_id.clone(),
				action: AUDIT_ACTION.to_string(),
				entity_ref: Some(format!("pack:{pack_id}")),
				outcome: "ok".to_string(),
				details: serde_json::json!({
					"query_chars": req.query.chars().count(),
					"sources": sources.len(),
					"confidence": confidence.as_str(),
					"total_candidates": total_candidates,
					"filtered_count": filtered_count,
					"degraded": search.degraded,
				}),
				created_at: now,
			})
			.await?;

		tracing::info!(
			tenant_id = %principal.tenant_id,
			pack_id = %pack_id,
			sources = sources.len(),
			total_candidates,
			filtered_count,
			confidence = confidence.as_str(),
			"Evidence pack built."
		);

		Ok(EvidencePack {
			pack_id,
			tenant_id: principal.tenant_id.clone(),
			sources,
			confidence,
			total_candidates,
			filtered_count,
			warnings,
			degraded: search.degraded,
		})
	}

	async fn redact_candidates(&self, candidates: &mut [Candidate]) -> Result<()> {
		let items = candidates
			.iter()
			.map(|candidate| RedactionItem {
				key: candidate.ctx.chunk_id,
				text: candidate.snippet.clone(),
			})
			.collect();
		let redacted: HashMap<Uuid, _> = self
			.providers
			.policy
			.redact_pii(items)
			.await?
			.into_iter()
			.map(|item| (item.key, item))
			.collect();

		for candidate in candidates {
			let Some(item) = redacted.get(&candidate.ctx.chunk_id) else {
				return Err(Error::Policy {
					message: "Redaction result is missing an item.".to_string(),
				});
			};

			candidate.snippet = item.text.clone();
			candidate.redacted = item.redacted;
		}

		Ok(())
	}
}

/// Keeps the higher-scoring source of every pair whose chunk vectors are at least `threshold`
/// similar. Sources without a stored vector are never treated as duplicates.
fn dedup(
	mut candidates: Vec<Candidate>,
	stored_vectors: &HashMap<Uuid, Vec<f32>>,
	threshold: f32,
	drops: &mut DropCounts,
) -> Vec<Candidate> {
	candidates.sort_by(|a, b| b.score.total_cmp(&a.score));

	let mut kept: Vec<Candidate> = Vec::with_capacity(candidates.len());

	for candidate in candidates {
		let duplicate = stored_vectors.get(&candidate.ctx.chunk_id).is_some_and(|vec| {
			kept.iter().any(|other| {
				stored_vectors
					.get(&other.ctx.chunk_id)
					.and_then(|other_vec| cosine_similarity(vec, other_vec))
					.is_some_and(|similarity| similarity >= threshold)
			})
		});

		if duplicate {
			drops.duplicate += 1;
		} else {
			kept.push(candidate);
		}
	}

	kept
}

fn cap_per_record(
	candidates: Vec<Candidate>,
	max_per_record: usize,
	drops: &mut DropCounts,
) -> Vec<Candidate> {
	let mut per_record: HashMap<Uuid, usize> = HashMap::new();
	let mut kept = Vec::with_capacity(candidates.len());

	for candidate in candidates {
		let seen = per_record.entry(candidate.ctx.record_id).or_insert(0);

		if *seen >= max_per_record {
			drops.diversity += 1;

			continue;
		}

		*seen += 1;

		kept.push(candidate);
	}

	kept
}

fn into_source(candidate: Candidate) -> EvidenceSource {
	EvidenceSource {
		evidence_id: Uuid::new_v4(),
		record_id: candidate.ctx.record_id,
		chunk_id: candidate.ctx.chunk_id,
		title: candidate.ctx.title,
		source_kind: candidate.ctx.source_kind,
		snippet: candidate.snippet,
		method: candidate.method,
		score: candidate.score,
		redacted: candidate.redacted,
		stale: candidate.stale,
		updated_at: candidate.ctx.updated_at,
		indexed_at: candidate.ctx.indexed_at,
	}
}

fn build_warnings(
	sources: &[EvidenceSource],
	drops: &DropCounts,
	stale_after_days: i64,
	degraded: bool,
) -> Vec<String> {
	let mut warnings = Vec::new();
	let stale = sources.iter().filter(|source| source.stale).count();
	let redacted = sources.iter().filter(|source| source.redacted).count();

	if stale > 0 {
		warnings.push(format!(
			"{stale} source(s) are older than {stale_after_days} days or not yet indexed."
		));
	}
	if redacted > 0 {
		warnings.push(format!("PII was redacted from {redacted} source(s)."));
	}
	if drops.diversity > 0 {
		warnings.push(format!(
			"{} source(s) were dropped by the per-record source cap.",
			drops.diversity
		));
	}
	if degraded {
		warnings.push("Vector retrieval was unavailable; results are lexical only.".to_string());
	}

	warnings
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
	match text.char_indices().nth(max_chars) {
		Some((idx, _)) => text[..idx].to_string(),
		None => text.to_string(),
	}
}
