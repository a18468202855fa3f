use std::sync::Arc;

use serde_json::json;
use tokio_util::sync::CancellationToken;

use evi_domain::{
	entity::{RenderedEntity, RendererRegistry},
	knowledge::{EntityLink, SourceKind},
};
use evi_service::{
	ChangeOp, IngestRequest, RecordChanged, ReindexOutcome, Topic, WorkspaceReindexRequest, bus,
	reindex,
};
use evi_storage::{chunks, records, vectors};

use super::HashEmbedding;

fn linked(tenant_id: &str, entity_kind: &str, entity_id: &str, content: &str) -> IngestRequest {
	IngestRequest {
		tenant_id: tenant_id.to_string(),
		source_kind: SourceKind::Entity,
		title: format!("{entity_kind} {entity_id}"),
		raw_content: content.to_string(),
		entity: Some(EntityLink::new(entity_kind, entity_id)),
		metadata: Some(json!({ "origin": "crm" })),
		owner_id: None,
	}
}

fn changed(entity_kind: &str, entity_id: &str, op: ChangeOp) -> RecordChanged {
	RecordChanged {
		tenant_id: "t1".to_string(),
		entity_kind: entity_kind.to_string(),
		entity_id: entity_id.to_string(),
		op,
		snapshot: None,
		actor: Some("crm-sync".to_string()),
	}
}

#[tokio::test]
async fn updated_entity_refreshes_the_linked_record() {
	let h = super::harness(Arc::new(HashEmbedding), |_| {}).await;
	let cancel = CancellationToken::new();
	let original = h
		.service
		.ingest(linked("t1", "deal", "d-1", "Deal: Acme renewal\nDescription: Two year term."))
		.await
		.expect("Ingest failed.");

	h.service.embed_record("t1", original.record_id, &cancel).await.expect("Embed failed.");

	assert!(!h.service.vectors.is_empty());

	h.entities.set(
		"t1",
		"deal",
		"d-1",
		json!({
			"name": "Acme renewal",
			"stage": "negotiation",
			"description": "Customer now wants a three year term."
		}),
	);

	let outcome = h
		.service
		.handle_record_changed(changed("deal", "d-1", ChangeOp::Updated))
		.await
		.expect("Reindex failed.");

	assert!(matches!(
		outcome,
		ReindexOutcome::Refreshed { record_id, .. } if record_id == original.record_id
	));

	let record = records::get_record(&h.service.db.pool, "t1", original.record_id)
		.await
		.expect("Get failed.")
		.expect("Record must exist.");

	assert!(record.raw_content.contains("Customer now wants a three year term."));
	assert_eq!(record.title, "Deal: Acme renewal");
	assert_eq!(record.metadata, json!({ "origin": "crm" }));
	assert!(h.service.vectors.is_empty());

	let audits = h.audit.with_action(reindex::AUDIT_ACTION);

	assert_eq!(audits.len(), 1);
	assert_eq!(audits[0].outcome, "refreshed");
	assert_eq!(audits[0].actor, "crm-sync");
	assert_eq!(audits[0].entity_ref.as_deref(), Some("deal:d-1"));
	assert!(audits[0].details.get("latency_ms").is_some());

	h.finish().await;
}

#[tokio::test]
async fn failed_refresh_keeps_the_embedded_record_intact() {
	let h = super::harness(Arc::new(HashEmbedding), |_| {}).await;
	let cancel = CancellationToken::new();
	let original = h
		.service
		.ingest(linked("t1", "deal", "d-1", "Deal: Acme renewal\nDescription: Two year term."))
		.await
		.expect("Ingest failed.");

	h.service.embed_record("t1", original.record_id, &cancel).await.expect("Embed failed.");

	let indexed = h.service.vectors.len();

	sqlx::query(
		"\
CREATE TRIGGER reject_record_update BEFORE UPDATE ON knowledge_records
BEGIN
	SELECT RAISE(ABORT, 'record update rejected');
END",
	)
	.execute(&h.service.db.pool)
	.await
	.expect("Failed to create trigger.");

	let mut event = changed("deal", "d-1", ChangeOp::Updated);

	event.snapshot = Some(json!({ "name": "Acme renewal", "description": "Three year term." }));

	assert!(h.service.handle_record_changed(event).await.is_err());

	let stored =
		chunks::list_chunks(&h.service.db.pool, original.record_id).await.expect("List failed.");
	let ids: Vec<_> = stored.iter().map(|chunk| chunk.chunk_id).collect();
	let mut conn = h.service.db.pool.acquire().await.expect("Acquire failed.");
	let stored_vectors =
		vectors::load_vectors(&mut conn, "t1", &ids).await.expect("Load failed.");

	drop(conn);

	assert_eq!(stored.len(), original.chunk_count as usize);
	assert!(stored.iter().all(|chunk| chunk.embedding_status == "embedded"));
	assert_eq!(stored_vectors.len(), ids.len());
	assert_eq!(h.service.vectors.len(), indexed);

	let audits = h.audit.with_action(reindex::AUDIT_ACTION);

	assert_eq!(audits.len(), 1);
	assert_eq!(audits[0].outcome, "error");

	h.finish().await;
}

#[tokio::test]
async fn change_events_on_the_bus_are_applied() {
	let h = super::harness(Arc::new(HashEmbedding), |_| {}).await;
	let cancel = CancellationToken::new();
	let rx = h.service.bus.subscribe(Topic::RecordChanged);
	let worker = tokio::spawn(reindex::run_reindexer(h.service.clone(), rx, cancel.clone()));
	let original = h
		.service
		.ingest(linked("t1", "case", "c-7", "Case: Login failure"))
		.await
		.expect("Ingest failed.");
	let mut event = changed("case", "c-7", ChangeOp::Updated);

	event.snapshot = Some(json!({
		"subject": "Login failure",
		"status": "resolved",
		"description": "Reset the SSO certificate."
	}));

	h.service.bus.publish_json(Topic::RecordChanged, &event);

	let audit = h.audit.clone();
	let applied = super::eventually(|| {
		let audit = audit.clone();

		async move { !audit.with_action(reindex::AUDIT_ACTION).is_empty() }
	})
	.await;

	cancel.cancel();
	worker.await.expect("Reindexer task panicked.");

	assert!(applied);

	let record = records::get_record(&h.service.db.pool, "t1", original.record_id)
		.await
		.expect("Get failed.")
		.expect("Record must exist.");

	assert!(record.raw_content.contains("Reset the SSO certificate."));

	h.finish().await;
}

#[tokio::test]
async fn deleted_entity_soft_deletes_the_linked_record() {
	let h = super::harness(Arc::new(HashEmbedding), |_| {}).await;
	let cancel = CancellationToken::new();
	let original = h
		.service
		.ingest(linked("t1", "account", "a-1", "Account: Acme\nIndustry: Manufacturing"))
		.await
		.expect("Ingest failed.");

	h.service.embed_record("t1", original.record_id, &cancel).await.expect("Embed failed.");

	let outcome = h
		.service
		.handle_record_changed(changed("account", "a-1", ChangeOp::Deleted))
		.await
		.expect("Reindex failed.");

	assert_eq!(outcome, ReindexOutcome::Deleted { record_id: original.record_id });

	let record = records::get_record(&h.service.db.pool, "t1", original.record_id)
		.await
		.expect("Get failed.")
		.expect("Record must be kept for audit.");
	let remaining =
		chunks::list_chunks(&h.service.db.pool, original.record_id).await.expect("List failed.");
	let search = h.service.hybrid_search("t1", "Acme manufacturing", 10).await.expect("Search.");

	assert!(record.deleted_at.is_some());
	assert!(remaining.is_empty());
	assert!(h.service.lexical.is_empty());
	assert!(h.service.vectors.is_empty());
	assert!(search.hits.is_empty());

	h.finish().await;
}

#[tokio::test]
async fn unlinked_entities_are_a_noop_but_still_audited() {
	let h = super::harness(Arc::new(HashEmbedding), |_| {}).await;
	let outcome = h
		.service
		.handle_record_changed(changed("deal", "missing", ChangeOp::Updated))
		.await
		.expect("Reindex failed.");

	assert_eq!(outcome, ReindexOutcome::Noop);

	let audits = h.audit.with_action(reindex::AUDIT_ACTION);

	assert_eq!(audits.len(), 1);
	assert_eq!(audits[0].outcome, "noop");

	h.finish().await;
}

#[tokio::test]
async fn render_failures_are_audited_as_errors() {
	let h = super::harness(Arc::new(HashEmbedding), |_| {}).await;

	h.service
		.ingest(linked("t1", "deal", "d-2", "Deal: Globex"))
		.await
		.expect("Ingest failed.");

	let mut event = changed("deal", "d-2", ChangeOp::Updated);

	event.snapshot = Some(json!({ "stage": "closed" }));

	assert!(h.service.handle_record_changed(event).await.is_err());

	let audits = h.audit.with_action(reindex::AUDIT_ACTION);

	assert_eq!(audits.len(), 1);
	assert_eq!(audits[0].outcome, "error");
	assert!(audits[0].details.get("error").is_some());

	h.finish().await;
}

#[tokio::test]
async fn workspace_reindex_pages_through_linked_records() {
	let h = super::harness(Arc::new(HashEmbedding), |cfg| {
		cfg.reindex.batch_size = 2;
	})
	.await;

	for id in ["a-1", "a-2", "a-3"] {
		h.service
			.ingest(linked("t1", "account", id, "Account record"))
			.await
			.expect("Ingest failed.");
	}

	h.service.ingest(linked("t1", "deal", "d-1", "Deal record")).await.expect("Ingest failed.");
	h.service.ingest(linked("t2", "account", "a-9", "Other tenant")).await.expect("Ingest failed.");
	h.service
		.ingest(super::note("t1", "Loose note", "Not linked to anything"))
		.await
		.expect("Ingest failed.");

	let cancel = CancellationToken::new();
	let mut rx = h.service.bus.subscribe(Topic::RecordChanged);
	let queued = h
		.service
		.queue_workspace_reindex(WorkspaceReindexRequest {
			tenant_id: "t1".to_string(),
			entity_kind: Some("account".to_string()),
			actor: Some("admin".to_string()),
		})
		.await
		.expect("Queue failed.");

	assert_eq!(queued, 3);

	let mut seen = Vec::new();

	for _ in 0..queued {
		let event: RecordChanged = bus::next_payload(&mut rx, Topic::RecordChanged, &cancel)
			.await
			.expect("Expected a queued event.");

		assert_eq!(event.op, ChangeOp::Updated);
		assert_eq!(event.tenant_id, "t1");
		assert_eq!(event.entity_kind, "account");

		seen.push(event.entity_id);
	}

	seen.sort();

	assert_eq!(seen, vec!["a-1", "a-2", "a-3"]);

	let all = h
		.service
		.queue_workspace_reindex(WorkspaceReindexRequest {
			tenant_id: "t1".to_string(),
			entity_kind: None,
			actor: None,
		})
		.await
		.expect("Queue failed.");

	assert_eq!(all, 4);

	h.finish().await;
}

#[tokio::test]
async fn registered_renderers_link_new_entity_kinds() {
	let mut renderers = RendererRegistry::with_defaults();

	renderers.register("invoice", |state| {
		let number = state.get("number")?.as_str()?;
		let amount = state.get("amount")?.as_str()?;

		Some(RenderedEntity {
			title: format!("Invoice: {number}"),
			body: format!("Invoice: {number}\nAmount: {amount}"),
		})
	});

	let h = super::harness_with_renderers(Arc::new(HashEmbedding), |_| {}, renderers).await;
	let original = h
		.service
		.ingest(linked("t1", "invoice", "inv-3", "Invoice: INV-3"))
		.await
		.expect("Ingest failed.");
	let mut event = changed("invoice", "inv-3", ChangeOp::Created);

	event.snapshot = Some(json!({ "number": "INV-3", "amount": "1200 EUR" }));

	h.service.handle_record_changed(event).await.expect("Reindex failed.");

	let record = records::get_record(&h.service.db.pool, "t1", original.record_id)
		.await
		.expect("Get failed.")
		.expect("Record must exist.");

	assert_eq!(record.title, "Invoice: INV-3");
	assert!(record.raw_content.contains("Amount: 1200 EUR"));

	h.finish().await;
}
