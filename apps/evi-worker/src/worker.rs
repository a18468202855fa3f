//! Backlog drainer for chunks that the in-process embedder never reached.

use std::{sync::Arc, time::Duration};

use tokio_util::sync::CancellationToken;

use evi_service::{Error, EviService};

pub struct WorkerState {
	pub service: Arc<EviService>,
	pub interval: Duration,
	pub once: bool,
}

/// Requeues failed chunks and embeds pending ones until cancelled.
pub async fn run_worker(state: WorkerState, cancel: CancellationToken) {
	tracing::info!(
		interval_ms = state.interval.as_millis() as u64,
		once = state.once,
		"Worker started."
	);

	loop {
		match state.service.embed_backlog(&cancel).await {
			Ok(_) => {},
			Err(Error::Cancelled) => break,
			Err(err) => tracing::error!(error = %err, "Backlog pass failed."),
		}

		if state.once {
			break;
		}

		tokio::select! {
			_ = cancel.cancelled() => break,
			_ = tokio::time::sleep(state.interval) => {},
		}
	}

	tracing::info!("Worker stopped.");
}
