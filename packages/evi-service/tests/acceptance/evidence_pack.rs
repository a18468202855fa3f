use std::sync::{Arc, atomic::AtomicUsize};

use tokio_util::sync::CancellationToken;

use evi_domain::evidence::{Confidence, RetrievalMethod};
use evi_service::{EvidencePackRequest, IngestRequest, Principal, evidence};
use time::{Duration, OffsetDateTime};

use super::{FailingEmbedding, HashEmbedding};

fn request(tenant_id: &str, user_id: &str, roles: &[&str], query: &str) -> EvidencePackRequest {
	EvidencePackRequest {
		principal: Principal {
			tenant_id: tenant_id.to_string(),
			user_id: user_id.to_string(),
			roles: roles.iter().map(|role| role.to_string()).collect(),
		},
		query: query.to_string(),
		limit: None,
	}
}

fn owned(tenant_id: &str, owner_id: &str, title: &str, content: &str) -> IngestRequest {
	let mut req = super::note(tenant_id, title, content);

	req.owner_id = Some(owner_id.to_string());

	req
}

#[tokio::test]
async fn pack_from_a_long_document() {
	let h = super::harness(Arc::new(HashEmbedding), |_| {}).await;
	let cancel = CancellationToken::new();
	let content = super::words("field", 600);
	let response = h
		.service
		.ingest(super::note("t1", "Field report", &content))
		.await
		.expect("Ingest failed.");

	h.service.embed_record("t1", response.record_id, &cancel).await.expect("Embed failed.");

	let pack = h
		.service
		.build_evidence_pack(request("t1", "u1", &[], "field10 field11 field12"))
		.await
		.expect("Pack failed.");

	assert!(!pack.sources.is_empty());
	assert!(pack.total_candidates >= 1);
	assert_eq!(pack.confidence, Confidence::High);
	assert!(!pack.degraded);
	assert!(pack.sources.iter().all(|source| !source.stale));
	assert_eq!(pack.sources[0].method, RetrievalMethod::Hybrid);

	let rows = evi_storage::evidence::list_evidence_for_pack(
		&h.service.db.pool,
		"t1",
		pack.pack_id,
	)
	.await
	.expect("List failed.");

	assert_eq!(rows.len(), pack.sources.len());

	let audits = h.audit.with_action(evidence::AUDIT_ACTION);

	assert_eq!(audits.len(), 1);
	assert_eq!(audits[0].entity_ref.as_deref(), Some(format!("pack:{}", pack.pack_id).as_str()));

	h.finish().await;
}

#[tokio::test]
async fn near_duplicates_collapse_and_are_counted() {
	let h = super::harness(Arc::new(HashEmbedding), |_| {}).await;
	let cancel = CancellationToken::new();
	let text = "Acme asked for a multi year renewal discount.";

	for title in ["Call notes", "Email summary"] {
		let response =
			h.service.ingest(super::note("t1", title, text)).await.expect("Ingest failed.");

		h.service.embed_record("t1", response.record_id, &cancel).await.expect("Embed failed.");
	}

	let pack = h
		.service
		.build_evidence_pack(request("t1", "u1", &[], "renewal discount"))
		.await
		.expect("Pack failed.");

	assert_eq!(pack.total_candidates, 2);
	assert_eq!(pack.sources.len(), 1);
	assert_eq!(pack.filtered_count, 1);

	h.finish().await;
}

#[tokio::test]
async fn permission_filter_runs_before_redaction() {
	let h = super::harness(Arc::new(HashEmbedding), |cfg| {
		cfg.evidence.dedup_sim_threshold = 1.1;
	})
	.await;
	let mine = h
		.service
		.ingest(owned("t1", "u1", "Mine", "Renewal contact is jane@acme.io for legal."))
		.await
		.expect("Ingest failed.");

	h.service
		.ingest(owned("t1", "u2", "Theirs", "Renewal contact is bob@acme.io for finance."))
		.await
		.expect("Ingest failed.");

	let pack = h
		.service
		.build_evidence_pack(request("t1", "u1", &[], "renewal contact"))
		.await
		.expect("Pack failed.");

	assert_eq!(pack.sources.len(), 1);
	assert_eq!(pack.sources[0].record_id, mine.record_id);
	assert_eq!(pack.filtered_count, 1);
	assert!(pack.sources[0].redacted);
	assert!(pack.sources[0].snippet.contains("[EMAIL_1]"));
	assert!(!pack.sources[0].snippet.contains("jane@acme.io"));
	assert!(pack.warnings.iter().any(|warning| warning.contains("PII")));

	let admin_pack = h
		.service
		.build_evidence_pack(request("t1", "u9", &["admin"], "renewal contact"))
		.await
		.expect("Pack failed.");

	assert_eq!(admin_pack.sources.len(), 2);
	assert_eq!(admin_pack.filtered_count, 0);

	h.finish().await;
}

#[tokio::test]
async fn sources_per_record_are_capped() {
	let h = super::harness(Arc::new(HashEmbedding), |cfg| {
		cfg.chunking.window_tokens = 20;
		cfg.chunking.overlap_tokens = 0;
		cfg.evidence.dedup_sim_threshold = 1.1;
	})
	.await;
	let content = (0..100)
		.map(|idx| if idx % 20 == 0 { "zephyr".to_string() } else { format!("filler{idx}") })
		.collect::<Vec<_>>()
		.join(" ");
	let response =
		h.service.ingest(super::note("t1", "Log", &content)).await.expect("Ingest failed.");

	assert_eq!(response.chunk_count, 5);

	let pack = h
		.service
		.build_evidence_pack(request("t1", "u1", &[], "zephyr"))
		.await
		.expect("Pack failed.");

	assert_eq!(pack.total_candidates, 5);
	assert_eq!(pack.sources.len(), 3);
	assert_eq!(pack.filtered_count, 2);
	assert!(pack.warnings.iter().any(|warning| warning.contains("per-record")));

	h.finish().await;
}

#[tokio::test]
async fn empty_store_yields_an_empty_low_confidence_pack() {
	let h = super::harness(Arc::new(HashEmbedding), |_| {}).await;
	let pack = h
		.service
		.build_evidence_pack(request("t1", "u1", &[], "anything at all"))
		.await
		.expect("Pack failed.");

	assert!(pack.sources.is_empty());
	assert_eq!(pack.total_candidates, 0);
	assert_eq!(pack.filtered_count, 0);
	assert_eq!(pack.confidence, Confidence::Low);

	h.finish().await;
}

#[tokio::test]
async fn unavailable_embeddings_degrade_to_lexical() {
	let calls = Arc::new(AtomicUsize::new(0));
	let h = super::harness(Arc::new(FailingEmbedding { calls }), |_| {}).await;

	h.service
		.ingest(super::note("t1", "Memo", "Renewal pricing memo for Acme."))
		.await
		.expect("Ingest failed.");

	let pack = h
		.service
		.build_evidence_pack(request("t1", "u1", &[], "renewal pricing"))
		.await
		.expect("Pack failed.");

	assert!(pack.degraded);
	assert_eq!(pack.sources.len(), 1);
	assert_eq!(pack.sources[0].method, RetrievalMethod::Lexical);
	assert!(pack.sources[0].stale);
	assert_eq!(pack.confidence, Confidence::Medium);
	assert!(pack.warnings.iter().any(|warning| warning.contains("lexical only")));
	assert!(pack.warnings.iter().any(|warning| warning.contains("not yet indexed")));

	h.finish().await;
}

#[tokio::test]
async fn requested_limit_widens_the_candidate_pool() {
	let calls = Arc::new(AtomicUsize::new(0));
	let h = super::harness(Arc::new(FailingEmbedding { calls }), |cfg| {
		cfg.evidence.candidate_k = 2;
		cfg.evidence.top_k = 2;
	})
	.await;

	for (title, content) in [
		("Acme", "Acme renewal pricing memo"),
		("Globex", "Globex renewal contract terms"),
		("Initech", "Initech renewal kickoff agenda"),
		("Umbrella", "Umbrella renewal risk review"),
	] {
		h.service.ingest(super::note("t1", title, content)).await.expect("Ingest failed.");
	}

	let mut req = request("t1", "u1", &[], "renewal");

	req.limit = Some(4);

	let pack = h.service.build_evidence_pack(req).await.expect("Pack failed.");

	assert_eq!(pack.total_candidates, 4);
	assert_eq!(pack.sources.len(), 4);

	let pack = h
		.service
		.build_evidence_pack(request("t1", "u1", &[], "renewal"))
		.await
		.expect("Pack failed.");

	assert_eq!(pack.sources.len(), 2);

	h.finish().await;
}

#[tokio::test]
async fn indexed_but_old_sources_are_flagged_stale() {
	let h = super::harness(Arc::new(HashEmbedding), |_| {}).await;
	let cancel = CancellationToken::new();
	let response = h
		.service
		.ingest(super::note("t1", "Memo", "Renewal pricing memo for Acme"))
		.await
		.expect("Ingest failed.");

	h.service.embed_record("t1", response.record_id, &cancel).await.expect("Embed failed.");

	sqlx::query("UPDATE knowledge_records SET updated_at = ?1 WHERE record_id = ?2")
		.bind(OffsetDateTime::now_utc() - Duration::days(45))
		.bind(response.record_id)
		.execute(&h.service.db.pool)
		.await
		.expect("Failed to age the record.");

	let pack = h
		.service
		.build_evidence_pack(request("t1", "u1", &[], "renewal pricing"))
		.await
		.expect("Pack failed.");

	assert_eq!(pack.sources.len(), 1);
	assert!(pack.sources[0].indexed_at.is_some());
	assert!(pack.sources[0].stale);
	assert!(pack.warnings.iter().any(|warning| warning.contains("older than 30 days")));

	h.finish().await;
}
