use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::SqliteConnection;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
	Error, EviService, Result,
	bus::{KnowledgeIngested, Topic},
};
use evi_chunking::ChunkingConfig;
use evi_domain::{
	knowledge::{EmbeddingStatus, EntityLink, SourceKind},
	normalize,
};
use evi_storage::{
	chunks,
	models::{KnowledgeChunk, KnowledgeRecord},
	records,
};

#[derive(Clone, Debug, Deserialize)]
pub struct IngestRequest {
	pub tenant_id: String,
	pub source_kind: SourceKind,
	pub title: String,
	pub raw_content: String,
	#[serde(default)]
	pub entity: Option<EntityLink>,
	#[serde(default)]
	pub metadata: Option<Value>,
	#[serde(default)]
	pub owner_id: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct IngestResponse {
	pub record_id: Uuid,
	pub chunk_count: u32,
	/// False when an existing record for the linked entity was updated in place.
	pub created: bool,
}

/// Store writes of one ingest, applied to the side indexes once the transaction commits.
pub(crate) struct StagedIngest {
	tenant_id: String,
	record_id: Uuid,
	rows: Vec<KnowledgeChunk>,
	replaced_chunk_ids: Vec<Uuid>,
	created: bool,
}

impl EviService {
	pub async fn ingest(&self, req: IngestRequest) -> Result<IngestResponse> {
		let mut tx = self.db.pool.begin().await?;
		let staged = self.stage_ingest(&mut tx, &req).await?;

		tx.commit().await?;

		Ok(self.finish_ingest(staged))
	}

	/// Writes the record and its fresh chunks on `conn` without committing.
	pub(crate) async fn stage_ingest(
		&self,
		conn: &mut SqliteConnection,
		req: &IngestRequest,
	) -> Result<StagedIngest> {
		validate_request(req)?;

		let now = OffsetDateTime::now_utc();
		let normalized = normalize::normalize_content(&req.raw_content);
		let content_hash = blake3::hash(req.raw_content.as_bytes()).to_hex().to_string();
		let chunking = ChunkingConfig {
			window_tokens: self.cfg.chunking.window_tokens,
			overlap_tokens: self.cfg.chunking.overlap_tokens,
		};
		let pieces = evi_chunking::split_tokens(&req.raw_content, &chunking);
		let metadata = req.metadata.clone().unwrap_or_else(|| Value::Object(Default::default()));
		let existing = match req.entity.as_ref() {
			Some(link) =>
				records::find_live_record_by_entity(
					&mut *conn,
					&req.tenant_id,
					&link.entity_kind,
					&link.entity_id,
				)
				.await?,
			None => None,
		};
		let (record_id, replaced_chunk_ids, created) = match existing {
			Some(mut record) => {
				let old_ids = chunks::list_chunk_ids(&mut *conn, record.record_id).await?;

				chunks::delete_chunks(&mut *conn, record.record_id).await?;

				record.source_kind = req.source_kind.as_str().to_string();
				record.title = req.title.clone();
				record.raw_content = req.raw_content.clone();
				record.normalized_content = normalized;
				record.content_hash = content_hash;
				record.owner_id = req.owner_id.clone();
				record.metadata = metadata;
				record.updated_at = now;

				records::update_record_content(&mut *conn, &record).await?;

				(record.record_id, old_ids, false)
			},
			None => {
				let record = KnowledgeRecord {
					record_id: Uuid::new_v4(),
					tenant_id: req.tenant_id.clone(),
					source_kind: req.source_kind.as_str().to_string(),
					title: req.title.clone(),
					raw_content: req.raw_content.clone(),
					normalized_content: normalized,
					content_hash,
					entity_kind: req.entity.as_ref().map(|link| link.entity_kind.clone()),
					entity_id: req.entity.as_ref().map(|link| link.entity_id.clone()),
					owner_id: req.owner_id.clone(),
					metadata,
					deleted_at: None,
					created_at: now,
					updated_at: now,
					indexed_at: None,
				};

				records::insert_record(&mut *conn, &record).await?;

				(record.record_id, Vec::new(), true)
			},
		};
		let rows = build_chunk_rows(record_id, &pieces, now)?;

		chunks::insert_chunks(conn, &rows).await?;

		Ok(StagedIngest {
			tenant_id: req.tenant_id.clone(),
			record_id,
			rows,
			replaced_chunk_ids,
			created,
		})
	}

	/// Call only after the staging transaction has committed.
	pub(crate) fn finish_ingest(&self, staged: StagedIngest) -> IngestResponse {
		let StagedIngest { tenant_id, record_id, rows, replaced_chunk_ids, created } = staged;

		self.lexical.remove(&replaced_chunk_ids);
		self.vectors.remove(&replaced_chunk_ids);

		for row in &rows {
			self.lexical.add(row.chunk_id, record_id, &tenant_id, &row.text);
		}

		let chunk_count = rows.len() as u32;

		self.bus.publish_json(
			Topic::KnowledgeIngested,
			&KnowledgeIngested { record_id, tenant_id: tenant_id.clone(), chunk_count },
		);

		tracing::info!(
			tenant_id = %tenant_id,
			record_id = %record_id,
			chunk_count,
			replaced = replaced_chunk_ids.len(),
			created,
			"Knowledge ingested."
		);

		IngestResponse { record_id, chunk_count, created }
	}
}

fn validate_request(req: &IngestRequest) -> Result<()> {
	if req.tenant_id.trim().is_empty() {
		return Err(Error::InvalidRequest { message: "tenant_id must be non-empty.".to_string() });
	}
	if let Some(link) = req.entity.as_ref()
		&& (link.entity_kind.trim().is_empty() || link.entity_id.trim().is_empty())
	{
		return Err(Error::InvalidRequest {
			message: "entity.entity_kind and entity.entity_id must be non-empty.".to_string(),
		});
	}
	if let Some(metadata) = req.metadata.as_ref()
		&& !metadata.is_object()
	{
		return Err(Error::InvalidRequest {
			message: "metadata must be a JSON object.".to_string(),
		});
	}

	Ok(())
}

fn build_chunk_rows(
	record_id: Uuid,
	pieces: &[evi_chunking::Chunk],
	now: OffsetDateTime,
) -> Result<Vec<KnowledgeChunk>> {
	pieces
		.iter()
		.map(|piece| {
			Ok(KnowledgeChunk {
				chunk_id: Uuid::new_v4(),
				record_id,
				chunk_index: piece.chunk_index,
				start_offset: to_i32(piece.start_offset, "start_offset")?,
				end_offset: to_i32(piece.end_offset, "end_offset")?,
				text: piece.text.clone(),
				token_count: to_i32(piece.token_count, "token_count")?,
				embedding_status: EmbeddingStatus::Pending.as_str().to_string(),
				last_error: None,
				created_at: now,
			})
		})
		.collect()
}

fn to_i32(value: usize, label: &str) -> Result<i32> {
	i32::try_from(value).map_err(|_| Error::InvalidRequest {
		message: format!("Chunk {label} is out of range."),
	})
}
