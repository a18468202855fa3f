//! Change-data-capture refresh of knowledge records linked to upstream entities.

use std::{sync::Arc, time::Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use tokio::sync::broadcast::Receiver;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
	Error, EviService, IngestRequest, Result,
	bus::{self, ChangeOp, RecordChanged, Topic},
};
use evi_domain::knowledge::{EntityLink, SourceKind};
use evi_storage::{
	chunks,
	models::{AuditEvent, KnowledgeRecord},
	records, vectors,
};

pub const AUDIT_ACTION: &str = "knowledge.reindex";

const SYSTEM_ACTOR: &str = "system";

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReindexOutcome {
	/// No live record is linked to the entity.
	Noop,
	Refreshed {
		record_id: Uuid,
		chunk_count: u32,
	},
	Deleted {
		record_id: Uuid,
	},
}
impl ReindexOutcome {
	fn label(&self) -> &'static str {
		match self {
			ReindexOutcome::Noop => "noop",
			ReindexOutcome::Refreshed { .. } => "refreshed",
			ReindexOutcome::Deleted { .. } => "deleted",
		}
	}
}

#[derive(Clone, Debug, Deserialize)]
pub struct WorkspaceReindexRequest {
	pub tenant_id: String,
	#[serde(default)]
	pub entity_kind: Option<String>,
	#[serde(default)]
	pub actor: Option<String>,
}

impl EviService {
	/// Applies one upstream change to the linked record and audits the attempt either way.
	pub async fn handle_record_changed(&self, event: RecordChanged) -> Result<ReindexOutcome> {
		let started = Instant::now();
		let result = self.apply_record_change(&event).await;
		let latency_ms = started.elapsed().as_millis() as u64;
		let mut details = serde_json::json!({
			"op": event.op.as_str(),
			"latency_ms": latency_ms,
		});
		let outcome = match &result {
			Ok(outcome) => {
				if let ReindexOutcome::Refreshed { record_id, .. }
				| ReindexOutcome::Deleted { record_id } = outcome
				{
					details["record_id"] = Value::String(record_id.to_string());
				}

				outcome.label()
			},
			Err(err) => {
				details["error"] = Value::String(err.to_string());

				"error"
			},
		};
		let audit = AuditEvent {
			event_id: Uuid::new_v4(),
			tenant_id: event.tenant_id.clone(),
			actor: event.actor.clone().unwrap_or_else(|| SYSTEM_ACTOR.to_string()),
			action: AUDIT_ACTION.to_string(),
			entity_ref: Some(format!("{}:{}", event.entity_kind, event.entity_id)),
			outcome: outcome.to_string(),
			details,
			created_at: OffsetDateTime::now_utc(),
		};

		match (self.providers.audit.record(audit).await, result) {
			(Ok(()), result) => result,
			(Err(audit_err), Ok(_)) => Err(audit_err),
			(Err(audit_err), Err(err)) => {
				tracing::error!(error = %audit_err, "Failed to audit a failed reindex attempt.");

				Err(err)
			},
		}
	}

	/// Publishes one synthetic `updated` event per live linked record of the tenant.
	pub async fn queue_workspace_reindex(&self, req: WorkspaceReindexRequest) -> Result<u64> {
		if req.tenant_id.trim().is_empty() {
			return Err(Error::InvalidRequest {
				message: "tenant_id must be non-empty.".to_string(),
			});
		}

		let batch_size = self.cfg.reindex.batch_size.max(1);
		let mut after = None;
		let mut queued = 0_u64;

		loop {
			let page = records::list_live_linked_records(
				&self.db.pool,
				&req.tenant_id,
				req.entity_kind.as_deref(),
				after,
				batch_size,
			)
			.await?;

			for linked in &page {
				self.bus.publish_json(
					Topic::RecordChanged,
					&RecordChanged {
						tenant_id: linked.tenant_id.clone(),
						entity_kind: linked.entity_kind.clone(),
						entity_id: linked.entity_id.clone(),
						op: ChangeOp::Updated,
						snapshot: None,
						actor: req.actor.clone(),
					},
				);

				queued += 1;
			}

			match page.last() {
				Some(last) if page.len() as u32 == batch_size => after = Some(last.record_id),
				_ => break,
			}
		}

		tracing::info!(
			tenant_id = %req.tenant_id,
			entity_kind = req.entity_kind.as_deref().unwrap_or("*"),
			queued,
			"Workspace reindex queued."
		);

		Ok(queued)
	}

	async fn apply_record_change(&self, event: &RecordChanged) -> Result<ReindexOutcome> {
		let record = records::find_live_record_by_entity(
			&self.db.pool,
			&event.tenant_id,
			&event.entity_kind,
			&event.entity_id,
		)
		.await?;
		let Some(record) = record else {
			tracing::debug!(
				tenant_id = %event.tenant_id,
				entity_kind = %event.entity_kind,
				entity_id = %event.entity_id,
				"No linked record for change event."
			);

			return Ok(ReindexOutcome::Noop);
		};

		match event.op {
			ChangeOp::Created | ChangeOp::Updated => self.refresh_record(event, record).await,
			ChangeOp::Deleted => self.retire_record(record).await,
		}
	}

	async fn refresh_record(
		&self,
		event: &RecordChanged,
		record: KnowledgeRecord,
	) -> Result<ReindexOutcome> {
		let (title, body) = self.entity_text(event, &record).await?;
		let req = IngestRequest {
			tenant_id: record.tenant_id.clone(),
			source_kind: SourceKind::parse(&record.source_kind).unwrap_or(SourceKind::Entity),
			title,
			raw_content: body,
			entity: Some(EntityLink::new(event.entity_kind.as_str(), event.entity_id.as_str())),
			metadata: Some(record.metadata.clone()),
			owner_id: record.owner_id.clone(),
		};
		// Old vectors, chunks and content are replaced together or not at all.
		let mut tx = self.db.pool.begin().await?;
		let removed = vectors::delete_vectors_for_record(&mut *tx, record.record_id).await?;
		let staged = self.stage_ingest(&mut tx, &req).await?;

		tx.commit().await?;

		let response = self.finish_ingest(staged);

		tracing::info!(
			tenant_id = %record.tenant_id,
			record_id = %response.record_id,
			removed_vectors = removed,
			chunk_count = response.chunk_count,
			"Linked record refreshed."
		);

		Ok(ReindexOutcome::Refreshed {
			record_id: response.record_id,
			chunk_count: response.chunk_count,
		})
	}

	async fn retire_record(&self, record: KnowledgeRecord) -> Result<ReindexOutcome> {
		let now = OffsetDateTime::now_utc();
		let mut tx = self.db.pool.begin().await?;
		let chunk_ids = chunks::list_chunk_ids(&mut *tx, record.record_id).await?;

		vectors::delete_vectors_for_record(&mut *tx, record.record_id).await?;
		chunks::delete_chunks(&mut *tx, record.record_id).await?;
		records::soft_delete_record(&mut *tx, &record.tenant_id, record.record_id, now).await?;

		tx.commit().await?;

		self.lexical.remove(&chunk_ids);
		self.vectors.remove(&chunk_ids);

		tracing::info!(
			tenant_id = %record.tenant_id,
			record_id = %record.record_id,
			chunks = chunk_ids.len(),
			"Linked record soft-deleted."
		);

		Ok(ReindexOutcome::Deleted { record_id: record.record_id })
	}

	/// Event snapshot first, then the entity source, then the record as it stands.
	async fn entity_text(
		&self,
		event: &RecordChanged,
		record: &KnowledgeRecord,
	) -> Result<(String, String)> {
		let state = match event.snapshot.clone() {
			Some(snapshot) => Some(snapshot),
			None =>
				self.providers
					.entities
					.fetch(&event.tenant_id, &event.entity_kind, &event.entity_id)
					.await?,
		};
		let Some(state) = state else {
			return Ok((record.title.clone(), record.raw_content.clone()));
		};
		let rendered = self.renderers.render(&event.entity_kind, &state)?;

		Ok((rendered.title, rendered.body))
	}
}

/// Consumes `record.changed` events until the token is cancelled or the bus closes.
pub async fn run_reindexer(
	service: Arc<EviService>,
	mut rx: Receiver<Value>,
	cancel: CancellationToken,
) {
	tracing::info!("Reindexer started.");

	while let Some(event) =
		bus::next_payload::<RecordChanged>(&mut rx, Topic::RecordChanged, &cancel).await
	{
		let (tenant_id, entity_kind, entity_id) =
			(event.tenant_id.clone(), event.entity_kind.clone(), event.entity_id.clone());

		if let Err(err) = service.handle_record_changed(event).await {
			tracing::warn!(
				tenant_id = %tenant_id,
				entity_kind = %entity_kind,
				entity_id = %entity_id,
				error = %err,
				"Failed to apply record change."
			);
		}
	}

	tracing::info!("Reindexer stopped.");
}
