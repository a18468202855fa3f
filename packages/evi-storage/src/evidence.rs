use sqlx::{QueryBuilder, Sqlite, SqliteExecutor};
use uuid::Uuid;

use crate::{Result, models::EvidenceRecord};

pub async fn insert_evidence_records(
	conn: &mut sqlx::SqliteConnection,
	records: &[EvidenceRecord],
) -> Result<()> {
	if records.is_empty() {
		return Ok(());
	}

	let mut builder: QueryBuilder<'_, Sqlite> = QueryBuilder::new(
		"\
INSERT INTO evidence_records (
\tevidence_id,
\tpack_id,
\ttenant_id,
\trecord_id,
\tchunk_id,
\tmethod,
\tscore,
\tsnippet,
\tredacted,
\tcreated_at
) ",
	);

	builder.push_values(records, |mut row, record| {
		row.push_bind(record.evidence_id)
			.push_bind(record.pack_id)
			.push_bind(record.tenant_id.as_str())
			.push_bind(record.record_id)
			.push_bind(record.chunk_id)
			.push_bind(record.method.as_str())
			.push_bind(record.score)
			.push_bind(record.snippet.as_deref())
			.push_bind(record.redacted)
			.push_bind(record.created_at);
	});
	builder.build().execute(&mut *conn).await?;

	Ok(())
}

pub async fn list_evidence_for_pack<'e, E>(
	executor: E,
	tenant_id: &str,
	pack_id: Uuid,
) -> Result<Vec<EvidenceRecord>>
where
	E: SqliteExecutor<'e>,
{
	let rows = sqlx::query_as::<_, EvidenceRecord>(
		"\
SELECT
\tevidence_id,
\tpack_id,
\ttenant_id,
\trecord_id,
\tchunk_id,
\tmethod,
\tscore,
\tsnippet,
\tredacted,
\tcreated_at
FROM evidence_records
WHERE tenant_id = ?1 AND pack_id = ?2
ORDER BY rowid ASC",
	)
	.bind(tenant_id)
	.bind(pack_id)
	.fetch_all(executor)
	.await?;

	Ok(rows)
}
