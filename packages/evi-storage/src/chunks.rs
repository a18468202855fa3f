use sqlx::{QueryBuilder, Sqlite, SqliteExecutor};
use uuid::Uuid;

use crate::{
	Result,
	models::{ChunkContext, KnowledgeChunk, LexicalSource},
};

// SQLite caps the number of bound parameters per statement.
const INSERT_BATCH_ROWS: usize = 500;
const LOOKUP_BATCH_IDS: usize = 500;

pub async fn insert_chunks(
	conn: &mut sqlx::SqliteConnection,
	chunks: &[KnowledgeChunk],
) -> Result<()> {
	for batch in chunks.chunks(INSERT_BATCH_ROWS) {
		let mut builder: QueryBuilder<'_, Sqlite> = QueryBuilder::new(
			"\
INSERT INTO knowledge_chunks (
\tchunk_id,
\trecord_id,
\tchunk_index,
\tstart_offset,
\tend_offset,
\ttext,
\ttoken_count,
\tembedding_status,
\tlast_error,
\tcreated_at
) ",
		);

		builder.push_values(batch, |mut row, chunk| {
			row.push_bind(chunk.chunk_id)
				.push_bind(chunk.record_id)
				.push_bind(chunk.chunk_index)
				.push_bind(chunk.start_offset)
				.push_bind(chunk.end_offset)
				.push_bind(chunk.text.as_str())
				.push_bind(chunk.token_count)
				.push_bind(chunk.embedding_status.as_str())
				.push_bind(chunk.last_error.as_deref())
				.push_bind(chunk.created_at);
		});
		builder.build().execute(&mut *conn).await?;
	}

	Ok(())
}

pub async fn list_chunk_ids<'e, E>(executor: E, record_id: Uuid) -> Result<Vec<Uuid>>
where
	E: SqliteExecutor<'e>,
{
	let rows: Vec<(Uuid,)> = sqlx::query_as(
		"SELECT chunk_id FROM knowledge_chunks WHERE record_id = ?1 ORDER BY chunk_index ASC",
	)
	.bind(record_id)
	.fetch_all(executor)
	.await?;

	Ok(rows.into_iter().map(|(chunk_id,)| chunk_id).collect())
}

pub async fn list_chunks<'e, E>(executor: E, record_id: Uuid) -> Result<Vec<KnowledgeChunk>>
where
	E: SqliteExecutor<'e>,
{
	let rows = sqlx::query_as::<_, KnowledgeChunk>(
		"\
SELECT
\tchunk_id,
\trecord_id,
\tchunk_index,
\tstart_offset,
\tend_offset,
\ttext,
\ttoken_count,
\tembedding_status,
\tlast_error,
\tcreated_at
FROM knowledge_chunks
WHERE record_id = ?1
ORDER BY chunk_index ASC",
	)
	.bind(record_id)
	.fetch_all(executor)
	.await?;

	Ok(rows)
}

/// Pending chunks of a live record, scoped to the tenant that owns it.
pub async fn list_pending_chunks<'e, E>(
	executor: E,
	tenant_id: &str,
	record_id: Uuid,
) -> Result<Vec<KnowledgeChunk>>
where
	E: SqliteExecutor<'e>,
{
	let rows = sqlx::query_as::<_, KnowledgeChunk>(
		"\
SELECT
\tc.chunk_id,
\tc.record_id,
\tc.chunk_index,
\tc.start_offset,
\tc.end_offset,
\tc.text,
\tc.token_count,
\tc.embedding_status,
\tc.last_error,
\tc.created_at
FROM knowledge_chunks c
JOIN knowledge_records r ON r.record_id = c.record_id
WHERE c.record_id = ?1
\tAND r.tenant_id = ?2
\tAND r.deleted_at IS NULL
\tAND c.embedding_status = 'pending'
ORDER BY c.chunk_index ASC",
	)
	.bind(record_id)
	.bind(tenant_id)
	.fetch_all(executor)
	.await?;

	Ok(rows)
}

pub async fn delete_chunks<'e, E>(executor: E, record_id: Uuid) -> Result<u64>
where
	E: SqliteExecutor<'e>,
{
	let result = sqlx::query("DELETE FROM knowledge_chunks WHERE record_id = ?1")
		.bind(record_id)
		.execute(executor)
		.await?;

	Ok(result.rows_affected())
}

/// Flips a chunk to `embedded` only while it is still pending. Returns whether the row changed.
pub async fn mark_chunk_embedded<'e, E>(executor: E, chunk_id: Uuid) -> Result<bool>
where
	E: SqliteExecutor<'e>,
{
	let result = sqlx::query(
		"\
UPDATE knowledge_chunks
SET embedding_status = 'embedded', last_error = NULL
WHERE chunk_id = ?1 AND embedding_status = 'pending'",
	)
	.bind(chunk_id)
	.execute(executor)
	.await?;

	Ok(result.rows_affected() > 0)
}

pub async fn mark_chunks_failed(
	conn: &mut sqlx::SqliteConnection,
	chunk_ids: &[Uuid],
	last_error: &str,
) -> Result<u64> {
	let mut affected = 0;

	for batch in chunk_ids.chunks(LOOKUP_BATCH_IDS) {
		let mut builder: QueryBuilder<'_, Sqlite> = QueryBuilder::new(
			"UPDATE knowledge_chunks SET embedding_status = 'failed', last_error = ",
		);

		builder.push_bind(last_error);
		builder.push(" WHERE embedding_status = 'pending' AND chunk_id IN (");

		let mut separated = builder.separated(", ");

		for chunk_id in batch {
			separated.push_bind(*chunk_id);
		}

		separated.push_unseparated(")");

		affected += builder.build().execute(&mut *conn).await?.rows_affected();
	}

	Ok(affected)
}

/// Moves failed chunks of live records back to pending so a backlog sweep can retry them.
pub async fn requeue_failed_chunks<'e, E>(executor: E) -> Result<u64>
where
	E: SqliteExecutor<'e>,
{
	let result = sqlx::query(
		"\
UPDATE knowledge_chunks
SET embedding_status = 'pending'
WHERE embedding_status = 'failed'
\tAND record_id IN (SELECT record_id FROM knowledge_records WHERE deleted_at IS NULL)",
	)
	.execute(executor)
	.await?;

	Ok(result.rows_affected())
}

/// Resolves chunk ids to live chunk rows owned by `tenant_id`.
///
/// Ids that belong to another tenant, to a soft-deleted record or to nothing at all are silently
/// absent from the result.
pub async fn load_chunk_contexts(
	conn: &mut sqlx::SqliteConnection,
	tenant_id: &str,
	chunk_ids: &[Uuid],
) -> Result<Vec<ChunkContext>> {
	let mut out = Vec::with_capacity(chunk_ids.len());

	for batch in chunk_ids.chunks(LOOKUP_BATCH_IDS) {
		let mut builder: QueryBuilder<'_, Sqlite> = QueryBuilder::new(
			"\
SELECT
\tc.chunk_id,
\tc.record_id,
\tr.tenant_id,
\tc.chunk_index,
\tc.text,
\tr.title,
\tr.source_kind,
\tr.owner_id,
\tr.updated_at,
\tr.indexed_at
FROM knowledge_chunks c
JOIN knowledge_records r ON r.record_id = c.record_id
WHERE r.deleted_at IS NULL AND r.tenant_id = ",
		);

		builder.push_bind(tenant_id);
		builder.push(" AND c.chunk_id IN (");

		let mut separated = builder.separated(", ");

		for chunk_id in batch {
			separated.push_bind(*chunk_id);
		}

		separated.push_unseparated(")");

		let rows = builder.build_query_as::<ChunkContext>().fetch_all(&mut *conn).await?;

		out.extend(rows);
	}

	Ok(out)
}

pub async fn list_live_lexical_sources<'e, E>(executor: E) -> Result<Vec<LexicalSource>>
where
	E: SqliteExecutor<'e>,
{
	let rows = sqlx::query_as::<_, LexicalSource>(
		"\
SELECT c.chunk_id, c.record_id, r.tenant_id, c.text
FROM knowledge_chunks c
JOIN knowledge_records r ON r.record_id = c.record_id
WHERE r.deleted_at IS NULL
ORDER BY c.record_id ASC, c.chunk_index ASC",
	)
	.fetch_all(executor)
	.await?;

	Ok(rows)
}
