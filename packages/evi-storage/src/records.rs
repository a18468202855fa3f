use sqlx::SqliteExecutor;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
	Result,
	models::{KnowledgeRecord, LinkedRecordRef},
};

const RECORD_COLUMNS: &str = "\
record_id,
\ttenant_id,
\tsource_kind,
\ttitle,
\traw_content,
\tnormalized_content,
\tcontent_hash,
\tentity_kind,
\tentity_id,
\towner_id,
\tmetadata,
\tdeleted_at,
\tcreated_at,
\tupdated_at,
\tindexed_at";

pub async fn insert_record<'e, E>(executor: E, record: &KnowledgeRecord) -> Result<()>
where
	E: SqliteExecutor<'e>,
{
	sqlx::query(
		"\
INSERT INTO knowledge_records (
\trecord_id,
\ttenant_id,
\tsource_kind,
\ttitle,
\traw_content,
\tnormalized_content,
\tcontent_hash,
\tentity_kind,
\tentity_id,
\towner_id,
\tmetadata,
\tdeleted_at,
\tcreated_at,
\tupdated_at,
\tindexed_at
)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
	)
	.bind(record.record_id)
	.bind(record.tenant_id.as_str())
	.bind(record.source_kind.as_str())
	.bind(record.title.as_str())
	.bind(record.raw_content.as_str())
	.bind(record.normalized_content.as_str())
	.bind(record.content_hash.as_str())
	.bind(record.entity_kind.as_deref())
	.bind(record.entity_id.as_deref())
	.bind(record.owner_id.as_deref())
	.bind(&record.metadata)
	.bind(record.deleted_at)
	.bind(record.created_at)
	.bind(record.updated_at)
	.bind(record.indexed_at)
	.execute(executor)
	.await?;

	Ok(())
}

/// Rewrites the content of an existing record in place. Identity columns are never touched.
pub async fn update_record_content<'e, E>(executor: E, record: &KnowledgeRecord) -> Result<()>
where
	E: SqliteExecutor<'e>,
{
	sqlx::query(
		"\
UPDATE knowledge_records
SET
\tsource_kind = ?1,
\ttitle = ?2,
\traw_content = ?3,
\tnormalized_content = ?4,
\tcontent_hash = ?5,
\towner_id = ?6,
\tmetadata = ?7,
\tupdated_at = ?8
WHERE record_id = ?9 AND tenant_id = ?10",
	)
	.bind(record.source_kind.as_str())
	.bind(record.title.as_str())
	.bind(record.raw_content.as_str())
	.bind(record.normalized_content.as_str())
	.bind(record.content_hash.as_str())
	.bind(record.owner_id.as_deref())
	.bind(&record.metadata)
	.bind(record.updated_at)
	.bind(record.record_id)
	.bind(record.tenant_id.as_str())
	.execute(executor)
	.await?;

	Ok(())
}

pub async fn get_record<'e, E>(
	executor: E,
	tenant_id: &str,
	record_id: Uuid,
) -> Result<Option<KnowledgeRecord>>
where
	E: SqliteExecutor<'e>,
{
	let sql = format!(
		"\
SELECT
\t{RECORD_COLUMNS}
FROM knowledge_records
WHERE tenant_id = ?1 AND record_id = ?2
LIMIT 1"
	);
	let row = sqlx::query_as::<_, KnowledgeRecord>(&sql)
		.bind(tenant_id)
		.bind(record_id)
		.fetch_optional(executor)
		.await?;

	Ok(row)
}

pub async fn find_live_record_by_entity<'e, E>(
	executor: E,
	tenant_id: &str,
	entity_kind: &str,
	entity_id: &str,
) -> Result<Option<KnowledgeRecord>>
where
	E: SqliteExecutor<'e>,
{
	let sql = format!(
		"\
SELECT
\t{RECORD_COLUMNS}
FROM knowledge_records
WHERE tenant_id = ?1
\tAND entity_kind = ?2
\tAND entity_id = ?3
\tAND deleted_at IS NULL
LIMIT 1"
	);
	let row = sqlx::query_as::<_, KnowledgeRecord>(&sql)
		.bind(tenant_id)
		.bind(entity_kind)
		.bind(entity_id)
		.fetch_optional(executor)
		.await?;

	Ok(row)
}

pub async fn mark_record_indexed<'e, E>(
	executor: E,
	record_id: Uuid,
	now: OffsetDateTime,
) -> Result<()>
where
	E: SqliteExecutor<'e>,
{
	sqlx::query("UPDATE knowledge_records SET indexed_at = ?1 WHERE record_id = ?2")
		.bind(now)
		.bind(record_id)
		.execute(executor)
		.await?;

	Ok(())
}

pub async fn soft_delete_record<'e, E>(
	executor: E,
	tenant_id: &str,
	record_id: Uuid,
	now: OffsetDateTime,
) -> Result<u64>
where
	E: SqliteExecutor<'e>,
{
	let result = sqlx::query(
		"\
UPDATE knowledge_records
SET deleted_at = ?1, updated_at = ?1
WHERE tenant_id = ?2 AND record_id = ?3 AND deleted_at IS NULL",
	)
	.bind(now)
	.bind(tenant_id)
	.bind(record_id)
	.execute(executor)
	.await?;

	Ok(result.rows_affected())
}

/// One keyset page of live records linked to an upstream entity, ordered by record id.
pub async fn list_live_linked_records<'e, E>(
	executor: E,
	tenant_id: &str,
	entity_kind: Option<&str>,
	after: Option<Uuid>,
	limit: u32,
) -> Result<Vec<LinkedRecordRef>>
where
	E: SqliteExecutor<'e>,
{
	let rows = sqlx::query_as::<_, LinkedRecordRef>(
		"\
SELECT record_id, tenant_id, entity_kind, entity_id
FROM knowledge_records
WHERE tenant_id = ?1
\tAND deleted_at IS NULL
\tAND entity_kind IS NOT NULL
\tAND entity_id IS NOT NULL
\tAND (?2 IS NULL OR entity_kind = ?2)
\tAND (?3 IS NULL OR record_id > ?3)
ORDER BY record_id ASC
LIMIT ?4",
	)
	.bind(tenant_id)
	.bind(entity_kind)
	.bind(after)
	.bind(i64::from(limit))
	.fetch_all(executor)
	.await?;

	Ok(rows)
}

/// Live records that still have chunks waiting for an embedding.
pub async fn list_records_with_pending_chunks<'e, E>(executor: E) -> Result<Vec<(String, Uuid)>>
where
	E: SqliteExecutor<'e>,
{
	let rows = sqlx::query_as::<_, (String, Uuid)>(
		"\
SELECT DISTINCT r.tenant_id, r.record_id
FROM knowledge_records r
JOIN knowledge_chunks c ON c.record_id = r.record_id
WHERE r.deleted_at IS NULL AND c.embedding_status = 'pending'
ORDER BY r.record_id ASC",
	)
	.fetch_all(executor)
	.await?;

	Ok(rows)
}
