use serde::Deserialize;
use serde_json::{Map, Value};

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
	pub service: Service,
	pub storage: Storage,
	pub providers: Providers,
	#[serde(default)]
	pub chunking: Chunking,
	#[serde(default)]
	pub embedder: Embedder,
	#[serde(default)]
	pub search: Search,
	#[serde(default)]
	pub evidence: Evidence,
	#[serde(default)]
	pub reindex: Reindex,
	#[serde(default)]
	pub security: Security,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Service {
	pub http_bind: String,
	pub admin_bind: String,
	pub log_level: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Storage {
	pub sqlite: Sqlite,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Sqlite {
	/// Connection string, e.g. `sqlite://data/evi.db` or `sqlite::memory:`.
	pub dsn: String,
	pub pool_max_conns: u32,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Providers {
	pub embedding: EmbeddingProviderConfig,
}

#[derive(Clone, Debug, Deserialize)]
pub struct EmbeddingProviderConfig {
	pub provider_id: String,
	pub api_base: String,
	pub api_key: String,
	pub path: String,
	pub model: String,
	pub dimensions: u32,
	pub timeout_ms: u64,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Chunking {
	pub window_tokens: u32,
	pub overlap_tokens: u32,
}
impl Default for Chunking {
	fn default() -> Self {
		Self { window_tokens: 512, overlap_tokens: 50 }
	}
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Embedder {
	pub max_attempts: u32,
	pub base_backoff_ms: u64,
}
impl Default for Embedder {
	fn default() -> Self {
		Self { max_attempts: 3, base_backoff_ms: 100 }
	}
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Search {
	pub lexical_k: u32,
	pub vector_k: u32,
	/// Reciprocal rank fusion constant.
	pub rrf_k: u32,
	pub max_chunks_per_hit: u32,
}
impl Default for Search {
	fn default() -> Self {
		Self { lexical_k: 50, vector_k: 50, rrf_k: 60, max_chunks_per_hit: 5 }
	}
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Evidence {
	pub top_k: u32,
	pub candidate_k: u32,
	pub dedup_sim_threshold: f32,
	pub max_sources_per_record: u32,
	pub stale_after_days: i64,
	pub high_confidence: f32,
	pub medium_confidence: f32,
	pub snippet_max_chars: u32,
}
impl Default for Evidence {
	fn default() -> Self {
		Self {
			top_k: 10,
			candidate_k: 40,
			dedup_sim_threshold: 0.95,
			max_sources_per_record: 3,
			stale_after_days: 30,
			high_confidence: 0.8,
			medium_confidence: 0.5,
			snippet_max_chars: 600,
		}
	}
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Reindex {
	pub batch_size: u32,
}
impl Default for Reindex {
	fn default() -> Self {
		Self { batch_size: 200 }
	}
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Security {
	pub bind_localhost_only: bool,
	pub redact_pii: bool,
	pub admin_auth_token: Option<String>,
}
impl Default for Security {
	fn default() -> Self {
		Self { bind_localhost_only: true, redact_pii: true, admin_auth_token: None }
	}
}
