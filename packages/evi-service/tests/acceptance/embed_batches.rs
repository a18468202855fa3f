use std::sync::{
	Arc,
	atomic::{AtomicUsize, Ordering},
};

use tokio_util::sync::CancellationToken;

use evi_domain::pii::PiiRedactor;
use evi_service::{EmbedOutcome, Error, EviService, Providers, Topic, embed, policy::DefaultPolicy};
use evi_storage::{chunks, db::Db, records};

use super::{FailingEmbedding, HashEmbedding, SpyAudit, StaticEntities};

#[tokio::test]
async fn exhausted_retries_mark_every_chunk_failed() {
	let calls = Arc::new(AtomicUsize::new(0));
	let h = super::harness(Arc::new(FailingEmbedding { calls: calls.clone() }), |_| {}).await;
	let response = h
		.service
		.ingest(super::note("t1", "Long memo", &super::words("memo", 600)))
		.await
		.expect("Ingest failed.");
	let cancel = CancellationToken::new();
	let err = h
		.service
		.embed_record("t1", response.record_id, &cancel)
		.await
		.expect_err("Expected embedding failure.");

	assert!(matches!(err, Error::Provider { .. }));
	assert_eq!(calls.load(Ordering::SeqCst), 3);

	let stored =
		chunks::list_chunks(&h.service.db.pool, response.record_id).await.expect("List failed.");

	assert_eq!(stored.len(), response.chunk_count as usize);
	assert!(stored.iter().all(|chunk| chunk.embedding_status == "failed"));
	assert!(stored.iter().all(|chunk| chunk.last_error.is_some()));
	assert!(h.service.vectors.is_empty());

	h.finish().await;
}

#[tokio::test]
async fn cancelled_batches_end_failed_not_pending() {
	let calls = Arc::new(AtomicUsize::new(0));
	let h = super::harness(Arc::new(FailingEmbedding { calls }), |_| {}).await;
	let response = h
		.service
		.ingest(super::note("t1", "Memo", "Renewal pricing memo"))
		.await
		.expect("Ingest failed.");
	let cancel = CancellationToken::new();

	cancel.cancel();

	let err = h
		.service
		.embed_record("t1", response.record_id, &cancel)
		.await
		.expect_err("Expected cancellation.");

	assert!(matches!(err, Error::Cancelled));

	let stored =
		chunks::list_chunks(&h.service.db.pool, response.record_id).await.expect("List failed.");

	assert!(stored.iter().all(|chunk| chunk.embedding_status == "failed"));

	h.finish().await;
}

#[tokio::test]
async fn successful_batches_store_vectors_and_mark_indexed() {
	let h = super::harness(Arc::new(HashEmbedding), |_| {}).await;
	let response = h
		.service
		.ingest(super::note("t1", "Long memo", &super::words("memo", 600)))
		.await
		.expect("Ingest failed.");
	let cancel = CancellationToken::new();
	let outcome =
		h.service.embed_record("t1", response.record_id, &cancel).await.expect("Embed failed.");

	assert_eq!(outcome, EmbedOutcome::Embedded { embedded: response.chunk_count, skipped: 0 });
	assert_eq!(h.service.vectors.len(), response.chunk_count as usize);

	let stored =
		chunks::list_chunks(&h.service.db.pool, response.record_id).await.expect("List failed.");
	let record = records::get_record(&h.service.db.pool, "t1", response.record_id)
		.await
		.expect("Get failed.")
		.expect("Record must exist.");

	assert!(stored.iter().all(|chunk| chunk.embedding_status == "embedded"));
	assert!(record.indexed_at.is_some());

	let again =
		h.service.embed_record("t1", response.record_id, &cancel).await.expect("Embed failed.");

	assert_eq!(again, EmbedOutcome::NothingPending);

	h.finish().await;
}

#[tokio::test]
async fn backlog_requeues_failed_chunks() {
	let h = super::harness(Arc::new(HashEmbedding), |_| {}).await;
	let response = h
		.service
		.ingest(super::note("t1", "Memo", "Renewal pricing memo"))
		.await
		.expect("Ingest failed.");
	let ids = chunks::list_chunk_ids(&h.service.db.pool, response.record_id)
		.await
		.expect("List failed.");
	let mut conn = h.service.db.pool.acquire().await.expect("Acquire failed.");

	chunks::mark_chunks_failed(&mut conn, &ids, "boom").await.expect("Mark failed.");

	drop(conn);

	let report = h.service.embed_backlog(&CancellationToken::new()).await.expect("Backlog failed.");

	assert_eq!(report.requeued_failed, ids.len() as u64);
	assert_eq!(report.records, 1);
	assert_eq!(report.embedded_chunks, ids.len() as u64);
	assert_eq!(report.failed_records, 0);

	h.finish().await;
}

#[tokio::test]
async fn ingested_events_drive_the_embedder() {
	let h = super::harness(Arc::new(HashEmbedding), |_| {}).await;
	let cancel = CancellationToken::new();
	let rx = h.service.bus.subscribe(Topic::KnowledgeIngested);
	let worker = tokio::spawn(embed::run_embedder(h.service.clone(), rx, cancel.clone()));
	let response = h
		.service
		.ingest(super::note("t1", "Memo", "Renewal pricing memo for Acme"))
		.await
		.expect("Ingest failed.");
	let service = h.service.clone();
	let embedded = super::eventually(|| {
		let service = service.clone();

		async move { service.vectors.len() == response.chunk_count as usize }
	})
	.await;

	cancel.cancel();
	worker.await.expect("Embedder task panicked.");

	assert!(embedded);

	h.finish().await;
}

#[tokio::test]
async fn vectors_from_another_process_reach_search() {
	let h = super::harness(Arc::new(HashEmbedding), |_| {}).await;
	let response = h
		.service
		.ingest(super::note("t1", "Memo", "Renewal pricing memo for Acme"))
		.await
		.expect("Ingest failed.");
	let db = Db::connect(&h.service.cfg.storage.sqlite).await.expect("Failed to connect.");
	let policy = DefaultPolicy::new(PiiRedactor::new().expect("PII rules must compile."));
	let providers = Providers::new(
		Arc::new(HashEmbedding),
		Arc::new(policy),
		Arc::new(SpyAudit::default()),
		Arc::new(StaticEntities::default()),
	);
	let worker = EviService::with_providers(h.service.cfg.clone(), db, providers);
	let report = worker.embed_backlog(&CancellationToken::new()).await.expect("Backlog failed.");

	assert_eq!(report.embedded_chunks, response.chunk_count as u64);
	assert!(h.service.vectors.is_empty());

	let search =
		h.service.hybrid_search("t1", "renewal pricing memo", 10).await.expect("Search failed.");
	let hit = search.hits.first().expect("Expected a hit.");

	assert!(!search.degraded);
	assert_eq!(hit.record_id, response.record_id);
	assert!(hit.vector_rank.is_some());
	assert_eq!(h.service.vectors.len(), response.chunk_count as usize);

	worker.db.pool.close().await;
	h.finish().await;
}
