use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{EviService, Result};
use evi_storage::{chunks, vectors};

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RebuildReport {
	pub lexical_chunks: u64,
	pub vectors: u64,
	pub missing_vector_count: u64,
	pub error_count: u64,
}

impl EviService {
	/// Rebuilds both side indexes from the store. Only chunks of live records are projected.
	pub async fn rebuild_indexes(&self) -> Result<RebuildReport> {
		let mut vector_seq = self.vector_seq.lock().await;
		let sources = chunks::list_live_lexical_sources(&self.db.pool).await?;
		let stored = vectors::list_live_vectors_after(&self.db.pool, 0).await?;
		let mut report = RebuildReport::default();
		let mut with_vector: HashSet<Uuid> = HashSet::with_capacity(stored.len());

		self.lexical.clear();
		self.vectors.clear();

		*vector_seq = stored.iter().map(|row| row.seq).max().unwrap_or(0);

		for row in stored {
			match self.vectors.upsert(row.chunk_id, row.vec) {
				Ok(()) => {
					report.vectors += 1;

					with_vector.insert(row.chunk_id);
				},
				Err(err) => {
					report.error_count += 1;

					tracing::warn!(
						chunk_id = %row.chunk_id,
						error = %err,
						"Skipping stored vector."
					);
				},
			}
		}
		for source in sources {
			self.lexical.add(source.chunk_id, source.record_id, &source.tenant_id, &source.text);

			report.lexical_chunks += 1;

			if !with_vector.contains(&source.chunk_id) {
				report.missing_vector_count += 1;
			}
		}

		tracing::info!(
			lexical_chunks = report.lexical_chunks,
			vectors = report.vectors,
			missing_vector_count = report.missing_vector_count,
			error_count = report.error_count,
			"Indexes rebuilt."
		);

		Ok(report)
	}

	/// Projects vectors committed since the last sync, including those written by other
	/// processes sharing the store. Returns how many were added.
	pub async fn sync_vector_index(&self) -> Result<u64> {
		let mut vector_seq = self.vector_seq.lock().await;
		let stored = vectors::list_live_vectors_after(&self.db.pool, *vector_seq).await?;
		let mut added = 0;

		for row in stored {
			*vector_seq = (*vector_seq).max(row.seq);

			match self.vectors.upsert(row.chunk_id, row.vec) {
				Ok(()) => added += 1,
				Err(err) => {
					tracing::warn!(
						chunk_id = %row.chunk_id,
						error = %err,
						"Skipping stored vector."
					);
				},
			}
		}

		if added > 0 {
			tracing::debug!(added, vector_seq = *vector_seq, "Vector index caught up.");
		}

		Ok(added)
	}
}
