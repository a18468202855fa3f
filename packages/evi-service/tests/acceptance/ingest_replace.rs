use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use evi_domain::knowledge::EntityLink;
use evi_service::{Error, KnowledgeIngested, Topic, bus};
use evi_storage::chunks;

use super::HashEmbedding;

#[tokio::test]
async fn reingesting_a_linked_entity_replaces_its_chunks() {
	let h = super::harness(Arc::new(HashEmbedding), |_| {}).await;
	let mut req = super::note("t1", "Acme account", &super::words("acme", 600));

	req.entity = Some(EntityLink::new("account", "acc-1"));

	let first = h.service.ingest(req.clone()).await.expect("First ingest failed.");

	assert!(first.created);
	assert!(first.chunk_count >= 2);

	req.raw_content = "three short tokens".to_string();

	let second = h.service.ingest(req).await.expect("Second ingest failed.");

	assert!(!second.created);
	assert_eq!(second.record_id, first.record_id);
	assert_eq!(second.chunk_count, 1);

	let stored =
		chunks::list_chunks(&h.service.db.pool, first.record_id).await.expect("List failed.");
	let live: i64 = sqlx::query_scalar(
		"SELECT COUNT(*) FROM knowledge_records WHERE tenant_id = ?1 AND deleted_at IS NULL",
	)
	.bind("t1")
	.fetch_one(&h.service.db.pool)
	.await
	.expect("Count failed.");

	assert_eq!(stored.len(), 1);
	assert_eq!(stored[0].text, "three short tokens");
	assert_eq!(live, 1);
	assert_eq!(h.service.lexical.len(), 1);

	h.finish().await;
}

#[tokio::test]
async fn unlinked_ingests_create_separate_records() {
	let h = super::harness(Arc::new(HashEmbedding), |_| {}).await;
	let req = super::note("t1", "Call notes", "Discussed the renewal timeline.");
	let first = h.service.ingest(req.clone()).await.expect("First ingest failed.");
	let second = h.service.ingest(req).await.expect("Second ingest failed.");

	assert!(first.created && second.created);
	assert_ne!(first.record_id, second.record_id);

	h.finish().await;
}

#[tokio::test]
async fn whitespace_only_content_ingests_without_chunks() {
	let h = super::harness(Arc::new(HashEmbedding), |_| {}).await;
	let response =
		h.service.ingest(super::note("t1", "Empty", " \n\t ")).await.expect("Ingest failed.");

	assert_eq!(response.chunk_count, 0);
	assert!(h.service.lexical.is_empty());

	h.finish().await;
}

#[tokio::test]
async fn empty_tenant_is_rejected() {
	let h = super::harness(Arc::new(HashEmbedding), |_| {}).await;
	let err = h
		.service
		.ingest(super::note(" ", "Call notes", "text"))
		.await
		.expect_err("Expected validation error.");

	assert!(matches!(err, Error::InvalidRequest { .. }));

	h.finish().await;
}

#[tokio::test]
async fn ingest_publishes_after_commit() {
	let h = super::harness(Arc::new(HashEmbedding), |_| {}).await;
	let mut rx = h.service.bus.subscribe(Topic::KnowledgeIngested);
	let cancel = CancellationToken::new();
	let response = h
		.service
		.ingest(super::note("t1", "Call notes", "Discussed the renewal timeline."))
		.await
		.expect("Ingest failed.");
	let event: KnowledgeIngested = bus::next_payload(&mut rx, Topic::KnowledgeIngested, &cancel)
		.await
		.expect("Expected an ingested event.");

	assert_eq!(event.record_id, response.record_id);
	assert_eq!(event.tenant_id, "t1");
	assert_eq!(event.chunk_count, response.chunk_count);

	let pending = chunks::list_pending_chunks(&h.service.db.pool, "t1", event.record_id)
		.await
		.expect("List failed.");

	assert_eq!(pending.len() as u32, event.chunk_count);

	h.finish().await;
}
