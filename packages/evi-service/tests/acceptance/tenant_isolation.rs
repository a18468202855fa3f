use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use evi_service::{EvidencePackRequest, Principal, SearchRequest};

use super::HashEmbedding;

const SHARED_TEXT: &str = "Acme renewal pricing was approved by procurement last Tuesday.";

#[tokio::test]
async fn identical_documents_never_cross_tenants() {
	let h = super::harness(Arc::new(HashEmbedding), |_| {}).await;
	let cancel = CancellationToken::new();
	let mine = h
		.service
		.ingest(super::note("tenant-a", "Pricing", SHARED_TEXT))
		.await
		.expect("Ingest failed.");
	let theirs = h
		.service
		.ingest(super::note("tenant-b", "Pricing", SHARED_TEXT))
		.await
		.expect("Ingest failed.");

	h.service.embed_record("tenant-a", mine.record_id, &cancel).await.expect("Embed failed.");
	h.service.embed_record("tenant-b", theirs.record_id, &cancel).await.expect("Embed failed.");

	let response = h
		.service
		.search(SearchRequest {
			tenant_id: "tenant-a".to_string(),
			query: SHARED_TEXT.to_string(),
			limit: Some(10),
		})
		.await
		.expect("Search failed.");

	assert!(!response.degraded);
	assert_eq!(response.hits.len(), 1);
	assert_eq!(response.hits[0].record_id, mine.record_id);

	let pack = h
		.service
		.build_evidence_pack(EvidencePackRequest {
			principal: Principal {
				tenant_id: "tenant-a".to_string(),
				user_id: "u1".to_string(),
				roles: vec!["admin".to_string()],
			},
			query: SHARED_TEXT.to_string(),
			limit: None,
		})
		.await
		.expect("Pack failed.");

	assert!(!pack.sources.is_empty());
	assert!(pack.sources.iter().all(|source| source.record_id == mine.record_id));

	h.finish().await;
}

#[tokio::test]
async fn vector_leg_skips_other_tenants_chunks() {
	let h = super::harness(Arc::new(HashEmbedding), |_| {}).await;
	let cancel = CancellationToken::new();
	let mine = h
		.service
		.ingest(super::note("tenant-a", "Unrelated", "Quarterly hiring plan for support."))
		.await
		.expect("Ingest failed.");
	let theirs = h
		.service
		.ingest(super::note("tenant-b", "Pricing", SHARED_TEXT))
		.await
		.expect("Ingest failed.");

	h.service.embed_record("tenant-a", mine.record_id, &cancel).await.expect("Embed failed.");
	h.service.embed_record("tenant-b", theirs.record_id, &cancel).await.expect("Embed failed.");

	let response = h
		.service
		.hybrid_search("tenant-a", SHARED_TEXT, 10)
		.await
		.expect("Search failed.");

	assert!(response.hits.iter().all(|hit| hit.record_id != theirs.record_id));

	h.finish().await;
}
