use std::collections::HashMap;

use sqlx::{QueryBuilder, Sqlite, SqliteExecutor};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{Error, Result};

const LOOKUP_BATCH_IDS: usize = 500;

#[derive(Clone, Debug, PartialEq)]
pub struct StoredVector {
	pub seq: i64,
	pub chunk_id: Uuid,
	pub vec: Vec<f32>,
}

pub fn format_vector_text(vec: &[f32]) -> String {
	let mut out = String::from("[");

	for (idx, value) in vec.iter().enumerate() {
		if idx > 0 {
			out.push(',');
		}

		out.push_str(&value.to_string());
	}

	out.push(']');

	out
}

pub fn parse_vector_text(raw: &str) -> Result<Vec<f32>> {
	let trimmed = raw.trim();
	let inner = trimmed
		.strip_prefix('[')
		.and_then(|rest| rest.strip_suffix(']'))
		.ok_or_else(|| Error::InvalidArgument(format!("Malformed vector text: {trimmed}.")))?;

	if inner.trim().is_empty() {
		return Ok(Vec::new());
	}

	inner
		.split(',')
		.map(|part| {
			part.trim()
				.parse::<f32>()
				.map_err(|err| Error::InvalidArgument(format!("Malformed vector value: {err}.")))
		})
		.collect()
}

pub async fn upsert_vector<'e, E>(
	executor: E,
	chunk_id: Uuid,
	tenant_id: &str,
	embedding_version: &str,
	vec: &[f32],
	now: OffsetDateTime,
) -> Result<()>
where
	E: SqliteExecutor<'e>,
{
	let dim = i32::try_from(vec.len())
		.map_err(|_| Error::InvalidArgument("Vector dimension is out of range.".to_string()))?;

	// REPLACE deletes the old row, so a rewritten vector always gets a fresh `seq`.
	sqlx::query(
		"\
INSERT OR REPLACE INTO chunk_vectors (
\tchunk_id,
\ttenant_id,
\tembedding_version,
\tembedding_dim,
\tvec,
\tcreated_at
)
VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
	)
	.bind(chunk_id)
	.bind(tenant_id)
	.bind(embedding_version)
	.bind(dim)
	.bind(format_vector_text(vec))
	.bind(now)
	.execute(executor)
	.await?;

	Ok(())
}

pub async fn delete_vectors_for_record<'e, E>(executor: E, record_id: Uuid) -> Result<u64>
where
	E: SqliteExecutor<'e>,
{
	let result = sqlx::query(
		"\
DELETE FROM chunk_vectors
WHERE chunk_id IN (SELECT chunk_id FROM knowledge_chunks WHERE record_id = ?1)",
	)
	.bind(record_id)
	.execute(executor)
	.await?;

	Ok(result.rows_affected())
}

/// Stored vectors for the given chunks, restricted to `tenant_id`.
pub async fn load_vectors(
	conn: &mut sqlx::SqliteConnection,
	tenant_id: &str,
	chunk_ids: &[Uuid],
) -> Result<HashMap<Uuid, Vec<f32>>> {
	let mut out = HashMap::with_capacity(chunk_ids.len());

	for batch in chunk_ids.chunks(LOOKUP_BATCH_IDS) {
		let mut builder: QueryBuilder<'_, Sqlite> =
			QueryBuilder::new("SELECT chunk_id, vec FROM chunk_vectors WHERE tenant_id = ");

		builder.push_bind(tenant_id);
		builder.push(" AND chunk_id IN (");

		let mut separated = builder.separated(", ");

		for chunk_id in batch {
			separated.push_bind(*chunk_id);
		}

		separated.push_unseparated(")");

		let rows: Vec<(Uuid, String)> = builder.build_query_as().fetch_all(&mut *conn).await?;

		for (chunk_id, raw) in rows {
			out.insert(chunk_id, parse_vector_text(&raw)?);
		}
	}

	Ok(out)
}

/// Vectors of live records stored after `after_seq`, in commit order.
///
/// `seq` only grows and SQLite admits one writer at a time, so a caller that remembers the
/// largest `seq` it has seen never misses a later commit. Pass 0 to read everything.
pub async fn list_live_vectors_after<'e, E>(
	executor: E,
	after_seq: i64,
) -> Result<Vec<StoredVector>>
where
	E: SqliteExecutor<'e>,
{
	let rows: Vec<(i64, Uuid, String)> = sqlx::query_as(
		"\
SELECT v.seq, v.chunk_id, v.vec
FROM chunk_vectors v
JOIN knowledge_chunks c ON c.chunk_id = v.chunk_id
JOIN knowledge_records r ON r.record_id = c.record_id
WHERE v.seq > ?1 AND r.deleted_at IS NULL AND r.tenant_id = v.tenant_id
ORDER BY v.seq ASC",
	)
	.bind(after_seq)
	.fetch_all(executor)
	.await?;
	let mut out = Vec::with_capacity(rows.len());

	for (seq, chunk_id, raw) in rows {
		out.push(StoredVector { seq, chunk_id, vec: parse_vector_text(&raw)? });
	}

	Ok(out)
}
