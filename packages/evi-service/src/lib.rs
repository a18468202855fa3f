pub mod admin;
pub mod bus;
pub mod embed;
pub mod evidence;
pub mod ingest;
pub mod policy;
pub mod reindex;
pub mod search;

mod error;
mod time_serde;

pub use admin::RebuildReport;
pub use bus::{ChangeOp, EventBus, KnowledgeIngested, RecordChanged, Topic};
pub use embed::{BacklogReport, EmbedOutcome};
pub use error::{Error, Result};
pub use evidence::{EvidencePack, EvidencePackRequest, EvidenceSource};
pub use ingest::{IngestRequest, IngestResponse};
pub use policy::{PermissionFilter, Principal, RedactedItem, RedactionItem};
pub use reindex::{ReindexOutcome, WorkspaceReindexRequest};
pub use search::{SearchHit, SearchRequest, SearchResponse};

use std::{future::Future, pin::Pin, sync::Arc};

use serde_json::Value;
use sqlx::SqlitePool;
use tokio::sync::Mutex;

use evi_config::{Config, EmbeddingProviderConfig};
use evi_domain::{entity::RendererRegistry, pii::PiiRedactor};
use evi_storage::{
	audit, db::Db, lexical::LexicalIndex, models::AuditEvent, vector_index::VectorIndex,
};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub trait EmbeddingProvider
where
	Self: Send + Sync,
{
	fn embed<'a>(
		&'a self,
		cfg: &'a EmbeddingProviderConfig,
		texts: &'a [String],
	) -> BoxFuture<'a, Result<Vec<Vec<f32>>>>;
}

/// Access-control and PII decisions. The core only fixes the call order: the permission filter
/// runs before redaction, and redaction only ever sees items that survived the filter.
pub trait PolicyProvider
where
	Self: Send + Sync,
{
	fn permission_filter<'a>(
		&'a self,
		principal: &'a Principal,
	) -> BoxFuture<'a, Result<PermissionFilter>>;

	fn redact_pii<'a>(
		&'a self,
		items: Vec<RedactionItem>,
	) -> BoxFuture<'a, Result<Vec<RedactedItem>>>;
}

pub trait AuditSink
where
	Self: Send + Sync,
{
	fn record<'a>(&'a self, event: AuditEvent) -> BoxFuture<'a, Result<()>>;
}

/// Current state of upstream business entities, consulted when a change event has no snapshot.
pub trait EntitySource
where
	Self: Send + Sync,
{
	fn fetch<'a>(
		&'a self,
		tenant_id: &'a str,
		entity_kind: &'a str,
		entity_id: &'a str,
	) -> BoxFuture<'a, Result<Option<Value>>>;
}

#[derive(Clone)]
pub struct Providers {
	pub embedding: Arc<dyn EmbeddingProvider>,
	pub policy: Arc<dyn PolicyProvider>,
	pub audit: Arc<dyn AuditSink>,
	pub entities: Arc<dyn EntitySource>,
}
impl Providers {
	pub fn new(
		embedding: Arc<dyn EmbeddingProvider>,
		policy: Arc<dyn PolicyProvider>,
		audit: Arc<dyn AuditSink>,
		entities: Arc<dyn EntitySource>,
	) -> Self {
		Self { embedding, policy, audit, entities }
	}

	/// HTTP embeddings, regex PII rules, audit rows in the store and no entity source.
	pub fn defaults(db: &Db) -> Result<Self> {
		let redactor = PiiRedactor::new()
			.map_err(|err| Error::Policy { message: format!("Invalid PII rule: {err}.") })?;

		Ok(Self {
			embedding: Arc::new(HttpEmbedding),
			policy: Arc::new(policy::DefaultPolicy::new(redactor)),
			audit: Arc::new(StoreAuditSink { pool: db.pool.clone() }),
			entities: Arc::new(NoEntitySource),
		})
	}
}

pub struct EviService {
	pub cfg: Config,
	pub db: Db,
	pub lexical: LexicalIndex,
	pub vectors: VectorIndex,
	pub bus: EventBus,
	pub renderers: RendererRegistry,
	pub providers: Providers,
	/// Largest stored-vector `seq` already projected into `vectors`.
	vector_seq: Mutex<i64>,
}
impl EviService {
	pub fn new(cfg: Config, db: Db) -> Result<Self> {
		let providers = Providers::defaults(&db)?;

		Ok(Self::with_providers(cfg, db, providers))
	}

	pub fn with_providers(cfg: Config, db: Db, providers: Providers) -> Self {
		let vectors = VectorIndex::new(cfg.providers.embedding.dimensions);

		Self {
			cfg,
			db,
			lexical: LexicalIndex::new(),
			vectors,
			bus: EventBus::new(),
			renderers: RendererRegistry::with_defaults(),
			providers,
			vector_seq: Mutex::new(0),
		}
	}

	pub fn with_renderers(mut self, renderers: RendererRegistry) -> Self {
		self.renderers = renderers;

		self
	}
}

struct HttpEmbedding;
impl EmbeddingProvider for HttpEmbedding {
	fn embed<'a>(
		&'a self,
		cfg: &'a EmbeddingProviderConfig,
		texts: &'a [String],
	) -> BoxFuture<'a, Result<Vec<Vec<f32>>>> {
		Box::pin(async move { Ok(evi_providers::embedding::embed(cfg, texts).await?) })
	}
}

struct StoreAuditSink {
	pool: SqlitePool,
}
impl AuditSink for StoreAuditSink {
	fn record<'a>(&'a self, event: AuditEvent) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			audit::insert_audit_event(&self.pool, &event).await?;

			Ok(())
		})
	}
}

struct NoEntitySource;
impl EntitySource for NoEntitySource {
	fn fetch<'a>(
		&'a self,
		_tenant_id: &'a str,
		_entity_kind: &'a str,
		_entity_id: &'a str,
	) -> BoxFuture<'a, Result<Option<Value>>> {
		Box::pin(async { Ok(None) })
	}
}

pub(crate) fn embedding_version(cfg: &Config) -> String {
	format!(
		"{}:{}:{}",
		cfg.providers.embedding.provider_id,
		cfg.providers.embedding.model,
		cfg.providers.embedding.dimensions
	)
}
