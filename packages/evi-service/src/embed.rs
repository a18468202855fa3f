use std::{sync::Arc, time::Duration};

use serde::Serialize;
use time::OffsetDateTime;
use tokio::sync::broadcast::Receiver;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
	Error, EviService, Result,
	bus::{self, KnowledgeIngested, Topic},
};
use evi_storage::{chunks, models::KnowledgeChunk, records, vectors};

const MAX_ERROR_CHARS: usize = 1_024;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum EmbedOutcome {
	NothingPending,
	Embedded {
		embedded: u32,
		/// Chunks that stopped being pending while the provider call was in flight.
		skipped: u32,
	},
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BacklogReport {
	pub requeued_failed: u64,
	pub records: u64,
	pub embedded_chunks: u64,
	pub failed_records: u64,
}

impl EviService {
	/// Embeds every pending chunk of one record in a single provider batch.
	///
	/// On success the vectors, the status flips and the record's `indexed_at` are written in one
	/// transaction. When every attempt fails, or the token is cancelled, all chunks of the batch
	/// are marked failed and the error is returned.
	pub async fn embed_record(
		&self,
		tenant_id: &str,
		record_id: Uuid,
		cancel: &CancellationToken,
	) -> Result<EmbedOutcome> {
		let pending = chunks::list_pending_chunks(&self.db.pool, tenant_id, record_id).await?;

		if pending.is_empty() {
			tracing::debug!(tenant_id, record_id = %record_id, "No pending chunks to embed.");

			return Ok(EmbedOutcome::NothingPending);
		}

		let texts: Vec<String> = pending.iter().map(|chunk| chunk.text.clone()).collect();
		let vectors = match self.embed_with_retry(&texts, cancel).await {
			Ok(vectors) => vectors,
			Err(err) => {
				self.fail_batch(tenant_id, record_id, &pending, &err).await?;

				return Err(err);
			},
		};

		self.store_vectors(tenant_id, record_id, &pending, vectors).await
	}

	/// Requeues failed chunks and embeds every record that still has pending chunks.
	pub async fn embed_backlog(&self, cancel: &CancellationToken) -> Result<BacklogReport> {
		let mut report = BacklogReport {
			requeued_failed: chunks::requeue_failed_chunks(&self.db.pool).await?,
			..Default::default()
		};
		let targets = records::list_records_with_pending_chunks(&self.db.pool).await?;

		for (tenant_id, record_id) in targets {
			if cancel.is_cancelled() {
				return Err(Error::Cancelled);
			}

			report.records += 1;

			match self.embed_record(&tenant_id, record_id, cancel).await {
				Ok(EmbedOutcome::Embedded { embedded, .. }) =>
					report.embedded_chunks += u64::from(embedded),
				Ok(EmbedOutcome::NothingPending) => {},
				Err(Error::Cancelled) => return Err(Error::Cancelled),
				Err(err) => {
					report.failed_records += 1;

					tracing::warn!(
						tenant_id = %tenant_id,
						record_id = %record_id,
						error = %err,
						"Backlog embedding failed."
					);
				},
			}
		}

		tracing::info!(
			records = report.records,
			embedded_chunks = report.embedded_chunks,
			failed_records = report.failed_records,
			requeued_failed = report.requeued_failed,
			"Embedding backlog drained."
		);

		Ok(report)
	}

	async fn embed_with_retry(
		&self,
		texts: &[String],
		cancel: &CancellationToken,
	) -> Result<Vec<Vec<f32>>> {
		let max_attempts = self.cfg.embedder.max_attempts.max(1);
		let mut last_err = None;

		for attempt in 1..=max_attempts {
			let call = self.providers.embedding.embed(&self.cfg.providers.embedding, texts);
			let result = tokio::select! {
				_ = cancel.cancelled() => return Err(Error::Cancelled),
				result = call => result,
			};

			match result.and_then(|vectors| self.check_batch(texts.len(), vectors)) {
				Ok(vectors) => return Ok(vectors),
				Err(err) => {
					tracing::warn!(
						attempt,
						max_attempts,
						error = %err,
						"Embedding attempt failed."
					);

					last_err = Some(err);
				},
			}

			if attempt < max_attempts {
				let delay = backoff_for_attempt(self.cfg.embedder.base_backoff_ms, attempt);

				tokio::select! {
					_ = cancel.cancelled() => return Err(Error::Cancelled),
					_ = tokio::time::sleep(delay) => {},
				}
			}
		}

		Err(last_err.unwrap_or_else(|| Error::Provider {
			message: "No embedding attempt was made.".to_string(),
		}))
	}

	fn check_batch(&self, expected: usize, vectors: Vec<Vec<f32>>) -> Result<Vec<Vec<f32>>> {
		if vectors.len() != expected {
			return Err(Error::Provider {
				message: format!(
					"Embedding provider returned {} vectors for {expected} inputs.",
					vectors.len()
				),
			});
		}

		let dim = self.cfg.providers.embedding.dimensions as usize;

		if let Some(bad) = vectors.iter().find(|vec| vec.len() != dim) {
			return Err(Error::Provider {
				message: format!(
					"Embedding dimension {} does not match configured dimensions {dim}.",
					bad.len()
				),
			});
		}

		Ok(vectors)
	}

	async fn store_vectors(
		&self,
		tenant_id: &str,
		record_id: Uuid,
		pending: &[KnowledgeChunk],
		vecs: Vec<Vec<f32>>,
	) -> Result<EmbedOutcome> {
		let now = OffsetDateTime::now_utc();
		let version = crate::embedding_version(&self.cfg);
		let mut stored = Vec::with_capacity(pending.len());
		let mut tx = self.db.pool.begin().await?;

		for (chunk, vec) in pending.iter().zip(vecs) {
			if !chunks::mark_chunk_embedded(&mut *tx, chunk.chunk_id).await? {
				continue;
			}

			vectors::upsert_vector(&mut *tx, chunk.chunk_id, tenant_id, &version, &vec, now)
				.await?;

			stored.push((chunk.chunk_id, vec));
		}

		if !stored.is_empty() {
			records::mark_record_indexed(&mut *tx, record_id, now).await?;
		}

		tx.commit().await?;

		let embedded = stored.len() as u32;
		let skipped = pending.len() as u32 - embedded;

		for (chunk_id, vec) in stored {
			self.vectors.upsert(chunk_id, vec)?;
		}

		tracing::info!(tenant_id, record_id = %record_id, embedded, skipped, "Chunks embedded.");

		Ok(EmbedOutcome::Embedded { embedded, skipped })
	}

	async fn fail_batch(
		&self,
		tenant_id: &str,
		record_id: Uuid,
		pending: &[KnowledgeChunk],
		err: &Error,
	) -> Result<()> {
		let ids: Vec<Uuid> = pending.iter().map(|chunk| chunk.chunk_id).collect();
		let message = sanitize_error(&err.to_string());
		let mut conn = self.db.pool.acquire().await?;
		let failed = chunks::mark_chunks_failed(&mut conn, &ids, &message).await?;

		tracing::error!(
			tenant_id,
			record_id = %record_id,
			failed,
			error = %message,
			"Embedding batch failed."
		);

		Ok(())
	}
}

/// Consumes `knowledge.ingested` events until the token is cancelled or the bus closes.
pub async fn run_embedder(
	service: Arc<EviService>,
	mut rx: Receiver<serde_json::Value>,
	cancel: CancellationToken,
) {
	tracing::info!("Embedder started.");

	while let Some(event) =
		bus::next_payload::<KnowledgeIngested>(&mut rx, Topic::KnowledgeIngested, &cancel).await
	{
		match service.embed_record(&event.tenant_id, event.record_id, &cancel).await {
			Ok(_) => {},
			Err(Error::Cancelled) => break,
			Err(err) => {
				tracing::warn!(
					tenant_id = %event.tenant_id,
					record_id = %event.record_id,
					error = %err,
					"Failed to embed ingested record."
				);
			},
		}
	}

	tracing::info!("Embedder stopped.");
}

pub(crate) fn backoff_for_attempt(base_ms: u64, attempt: u32) -> Duration {
	let exp = attempt.saturating_sub(1).min(16);

	Duration::from_millis(base_ms.saturating_mul(1_u64 << exp))
}

/// Masks credentials in provider error text before it is persisted.
pub(crate) fn sanitize_error(text: &str) -> String {
	let mut parts = Vec::new();
	let mut redact_next = false;

	for raw in text.split_whitespace() {
		let mut word = raw.to_string();

		if redact_next {
			word = "[REDACTED]".to_string();
			redact_next = false;
		}
		if raw.eq_ignore_ascii_case("bearer") {
			redact_next = true;
		}

		let lowered = raw.to_ascii_lowercase();

		for key in ["api_key", "apikey", "password", "secret", "token"] {
			if lowered.contains(key) && (lowered.contains('=') || lowered.contains(':')) {
				let sep = if raw.contains('=') { '=' } else { ':' };
				let prefix = raw.split(sep).next().unwrap_or(raw);

				word = format!("{prefix}{sep}[REDACTED]");

				break;
			}
		}

		parts.push(word);
	}

	let mut out = parts.join(" ");

	if out.chars().count() > MAX_ERROR_CHARS {
		out = out.chars().take(MAX_ERROR_CHARS).collect();
	}

	out
}
