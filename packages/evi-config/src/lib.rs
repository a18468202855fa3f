mod error;
mod types;

pub use error::{Error, Result};
pub use types::{
	Chunking, Config, Embedder, EmbeddingProviderConfig, Evidence, Providers, Reindex, Search,
	Security, Service, Sqlite, Storage,
};

use std::{fs, path::Path};

pub fn load(path: &Path) -> Result<Config> {
	let raw = fs::read_to_string(path)
		.map_err(|err| Error::ReadConfig { path: path.to_path_buf(), source: err })?;

	parse(path, &raw)
}

pub fn parse(path: &Path, raw: &str) -> Result<Config> {
	let mut cfg: Config = toml::from_str(raw)
		.map_err(|err| Error::ParseConfig { path: path.to_path_buf(), source: err })?;

	normalize(&mut cfg);

	validate(&cfg)?;

	Ok(cfg)
}

pub fn validate(cfg: &Config) -> Result<()> {
	if cfg.storage.sqlite.dsn.trim().is_empty() {
		return Err(Error::Validation {
			message: "storage.sqlite.dsn must be non-empty.".to_string(),
		});
	}
	if cfg.storage.sqlite.pool_max_conns == 0 {
		return Err(Error::Validation {
			message: "storage.sqlite.pool_max_conns must be greater than zero.".to_string(),
		});
	}
	if cfg.providers.embedding.dimensions == 0 {
		return Err(Error::Validation {
			message: "providers.embedding.dimensions must be greater than zero.".to_string(),
		});
	}
	if cfg.providers.embedding.api_key.trim().is_empty() {
		return Err(Error::Validation {
			message: "Provider embedding api_key must be non-empty.".to_string(),
		});
	}
	if cfg.chunking.window_tokens == 0 {
		return Err(Error::Validation {
			message: "chunking.window_tokens must be greater than zero.".to_string(),
		});
	}
	if cfg.embedder.max_attempts == 0 {
		return Err(Error::Validation {
			message: "embedder.max_attempts must be greater than zero.".to_string(),
		});
	}
	if cfg.search.lexical_k == 0 || cfg.search.vector_k == 0 {
		return Err(Error::Validation {
			message: "search.lexical_k and search.vector_k must be greater than zero.".to_string(),
		});
	}
	if cfg.evidence.top_k == 0 {
		return Err(Error::Validation {
			message: "evidence.top_k must be greater than zero.".to_string(),
		});
	}
	if cfg.evidence.candidate_k < cfg.evidence.top_k {
		return Err(Error::Validation {
			message: "evidence.candidate_k must be greater than or equal to evidence.top_k."
				.to_string(),
		});
	}
	if !cfg.evidence.dedup_sim_threshold.is_finite()
		|| !(0.0..=1.0).contains(&cfg.evidence.dedup_sim_threshold)
	{
		return Err(Error::Validation {
			message: "evidence.dedup_sim_threshold must be in the range 0.0-1.0.".to_string(),
		});
	}
	if cfg.evidence.max_sources_per_record == 0 {
		return Err(Error::Validation {
			message: "evidence.max_sources_per_record must be greater than zero.".to_string(),
		});
	}
	if cfg.evidence.stale_after_days <= 0 {
		return Err(Error::Validation {
			message: "evidence.stale_after_days must be greater than zero.".to_string(),
		});
	}
	if cfg.evidence.medium_confidence > cfg.evidence.high_confidence {
		return Err(Error::Validation {
			message: "evidence.medium_confidence must not exceed evidence.high_confidence."
				.to_string(),
		});
	}
	if cfg.reindex.batch_size == 0 {
		return Err(Error::Validation {
			message: "reindex.batch_size must be greater than zero.".to_string(),
		});
	}

	Ok(())
}

fn normalize(cfg: &mut Config) {
	if cfg.chunking.window_tokens > 0 && cfg.chunking.overlap_tokens >= cfg.chunking.window_tokens
	{
		cfg.chunking.overlap_tokens = cfg.chunking.window_tokens - 1;
	}
	if cfg
		.security
		.admin_auth_token
		.as_deref()
		.map(|token| token.trim().is_empty())
		.unwrap_or(false)
	{
		cfg.security.admin_auth_token = None;
	}
}
