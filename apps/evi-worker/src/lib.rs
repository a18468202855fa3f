pub mod worker;

use std::{path::PathBuf, sync::Arc, time::Duration};

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use evi_service::EviService;
use evi_storage::db::Db;

#[derive(Debug, Parser)]
#[command(
	version = evi_cli::VERSION,
	rename_all = "kebab",
	styles = evi_cli::styles(),
)]
pub struct Args {
	#[arg(long, short = 'c', value_name = "FILE")]
	pub config: PathBuf,
	/// Pause between two backlog passes.
	#[arg(long, value_name = "MS", default_value_t = 500)]
	pub interval_ms: u64,
	/// Drain the backlog once and exit.
	#[arg(long)]
	pub once: bool,
}

pub async fn run(args: Args) -> color_eyre::Result<()> {
	let config = evi_config::load(&args.config)?;
	let filter =
		EnvFilter::try_new(&config.service.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

	tracing_subscriber::fmt().with_env_filter(filter).init();

	let db = Db::connect(&config.storage.sqlite).await?;

	db.ensure_schema().await?;

	let service = Arc::new(EviService::new(config, db)?);
	let cancel = CancellationToken::new();
	let signal = cancel.clone();

	tokio::spawn(async move {
		if let Err(err) = tokio::signal::ctrl_c().await {
			tracing::error!(error = %err, "Failed to listen for shutdown signal.");
		}

		signal.cancel();
	});

	let state = worker::WorkerState {
		service,
		interval: Duration::from_millis(args.interval_ms),
		once: args.once,
	};

	worker::run_worker(state, cancel).await;

	Ok(())
}
