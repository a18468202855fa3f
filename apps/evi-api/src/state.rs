use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use evi_service::{EviService, Topic, embed, reindex};
use evi_storage::db::Db;

#[derive(Clone)]
pub struct AppState {
	pub service: Arc<EviService>,
	pub cancel: CancellationToken,
}
impl AppState {
	pub async fn new(config: evi_config::Config) -> color_eyre::Result<Self> {
		let db = Db::connect(&config.storage.sqlite).await?;

		db.ensure_schema().await?;

		let service = EviService::new(config, db)?;

		service.rebuild_indexes().await?;

		Ok(Self::from_service(Arc::new(service)))
	}

	pub fn from_service(service: Arc<EviService>) -> Self {
		Self { service, cancel: CancellationToken::new() }
	}

	/// Starts the embedder and reindex subscribers. Both stop when `cancel` fires.
	pub fn spawn_workers(&self) -> Vec<JoinHandle<()>> {
		let ingested = self.service.bus.subscribe(Topic::KnowledgeIngested);
		let changed = self.service.bus.subscribe(Topic::RecordChanged);

		vec![
			tokio::spawn(embed::run_embedder(self.service.clone(), ingested, self.cancel.clone())),
			tokio::spawn(reindex::run_reindexer(
				self.service.clone(),
				changed,
				self.cancel.clone(),
			)),
		]
	}
}
