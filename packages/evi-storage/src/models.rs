use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct KnowledgeRecord {
	pub record_id: Uuid,
	pub tenant_id: String,
	pub source_kind: String,
	pub title: String,
	pub raw_content: String,
	pub normalized_content: String,
	pub content_hash: String,
	pub entity_kind: Option<String>,
	pub entity_id: Option<String>,
	pub owner_id: Option<String>,
	pub metadata: Value,
	pub deleted_at: Option<OffsetDateTime>,
	pub created_at: OffsetDateTime,
	pub updated_at: OffsetDateTime,
	pub indexed_at: Option<OffsetDateTime>,
}

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct KnowledgeChunk {
	pub chunk_id: Uuid,
	pub record_id: Uuid,
	pub chunk_index: i32,
	pub start_offset: i32,
	pub end_offset: i32,
	pub text: String,
	pub token_count: i32,
	pub embedding_status: String,
	pub last_error: Option<String>,
	pub created_at: OffsetDateTime,
}

/// A live chunk joined with the record fields retrieval needs.
#[derive(Clone, Debug, sqlx::FromRow)]
pub struct ChunkContext {
	pub chunk_id: Uuid,
	pub record_id: Uuid,
	pub tenant_id: String,
	pub chunk_index: i32,
	pub text: String,
	pub title: String,
	pub source_kind: String,
	pub owner_id: Option<String>,
	pub updated_at: OffsetDateTime,
	pub indexed_at: Option<OffsetDateTime>,
}

/// Minimal projection used to rebuild the lexical index.
#[derive(Clone, Debug, sqlx::FromRow)]
pub struct LexicalSource {
	pub chunk_id: Uuid,
	pub record_id: Uuid,
	pub tenant_id: String,
	pub text: String,
}

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct LinkedRecordRef {
	pub record_id: Uuid,
	pub tenant_id: String,
	pub entity_kind: String,
	pub entity_id: String,
}

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct EvidenceRecord {
	pub evidence_id: Uuid,
	pub pack_id: Uuid,
	pub tenant_id: String,
	pub record_id: Uuid,
	pub chunk_id: Uuid,
	pub method: String,
	pub score: f32,
	pub snippet: Option<String>,
	pub redacted: bool,
	pub created_at: OffsetDateTime,
}

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct AuditEvent {
	pub event_id: Uuid,
	pub tenant_id: String,
	pub actor: String,
	pub action: String,
	pub entity_ref: Option<String>,
	pub outcome: String,
	pub details: Value,
	pub created_at: OffsetDateTime,
}
