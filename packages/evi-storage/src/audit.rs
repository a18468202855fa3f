use sqlx::SqliteExecutor;

use crate::{Result, models::AuditEvent};

pub async fn insert_audit_event<'e, E>(executor: E, event: &AuditEvent) -> Result<()>
where
	E: SqliteExecutor<'e>,
{
	sqlx::query(
		"\
INSERT INTO audit_events (
\tevent_id,
\ttenant_id,
\tactor,
\taction,
\tentity_ref,
\toutcome,
\tdetails,
\tcreated_at
)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
	)
	.bind(event.event_id)
	.bind(event.tenant_id.as_str())
	.bind(event.actor.as_str())
	.bind(event.action.as_str())
	.bind(event.entity_ref.as_deref())
	.bind(event.outcome.as_str())
	.bind(&event.details)
	.bind(event.created_at)
	.execute(executor)
	.await?;

	Ok(())
}

pub async fn list_audit_events<'e, E>(
	executor: E,
	tenant_id: &str,
	action: &str,
) -> Result<Vec<AuditEvent>>
where
	E: SqliteExecutor<'e>,
{
	let rows = sqlx::query_as::<_, AuditEvent>(
		"\
SELECT event_id, tenant_id, actor, action, entity_ref, outcome, details, created_at
FROM audit_events
WHERE tenant_id = ?1 AND action = ?2
ORDER BY rowid ASC",
	)
	.bind(tenant_id)
	.bind(action)
	.fetch_all(executor)
	.await?;

	Ok(rows)
}
