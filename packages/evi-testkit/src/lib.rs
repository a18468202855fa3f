mod error;

pub use error::{Error, Result};

use std::{
	env, fs,
	future::Future,
	io::ErrorKind,
	path::{Path, PathBuf},
};

use serde_json::Map;
use uuid::Uuid;

const SIDECAR_SUFFIXES: [&str; 3] = ["", "-wal", "-shm"];

/// A throwaway SQLite database file under the system temp directory.
///
/// The file and its WAL sidecars are removed by `cleanup`, or on drop as a fallback.
pub struct TestDatabase {
	name: String,
	path: PathBuf,
	dsn: String,
	cleaned: bool,
}
impl TestDatabase {
	pub fn new() -> Result<Self> {
		let name = format!("evi_test_{}", Uuid::new_v4().simple());
		let dir = env::var_os("EVI_TEST_DIR").map(PathBuf::from).unwrap_or_else(env::temp_dir);

		fs::create_dir_all(&dir)?;

		let path = dir.join(format!("{name}.db"));
		let dsn = format!("sqlite://{}?mode=rwc", path.display());

		Ok(Self { name, path, dsn, cleaned: false })
	}

	pub fn dsn(&self) -> &str {
		&self.dsn
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	pub fn sqlite_config(&self) -> evi_config::Sqlite {
		evi_config::Sqlite { dsn: self.dsn.clone(), pool_max_conns: 4 }
	}

	pub fn cleanup(mut self) -> Result<()> {
		self.cleanup_inner()
	}

	fn cleanup_inner(&mut self) -> Result<()> {
		if self.cleaned {
			return Ok(());
		}

		remove_database_files(&self.path)?;

		self.cleaned = true;

		Ok(())
	}
}
impl Drop for TestDatabase {
	fn drop(&mut self) {
		if self.cleaned {
			return;
		}
		if let Err(err) = remove_database_files(&self.path) {
			eprintln!("Test database cleanup failed: {err}.");
		}
	}
}

pub async fn with_test_db<F, Fut, T>(f: F) -> Result<T>
where
	F: FnOnce(&TestDatabase) -> Fut,
	Fut: Future<Output = Result<T>>,
{
	let db = TestDatabase::new()?;
	let result = f(&db).await;
	let mut db = db;

	if let Err(err) = db.cleanup_inner() {
		eprintln!("Test database cleanup warning: {err}.");

		if result.is_ok() {
			return Err(err);
		}
	}

	result
}

/// A complete configuration pointing at `dsn`, with every tunable at its default and a small
/// embedding dimension suited to stub providers.
pub fn test_config(dsn: &str, dimensions: u32) -> evi_config::Config {
	evi_config::Config {
		service: evi_config::Service {
			http_bind: "127.0.0.1:0".to_string(),
			admin_bind: "127.0.0.1:0".to_string(),
			log_level: "info".to_string(),
		},
		storage: evi_config::Storage {
			sqlite: evi_config::Sqlite { dsn: dsn.to_string(), pool_max_conns: 4 },
		},
		providers: evi_config::Providers {
			embedding: evi_config::EmbeddingProviderConfig {
				provider_id: "test".to_string(),
				api_base: "http://127.0.0.1:1".to_string(),
				api_key: "test-key".to_string(),
				path: "/v1/embeddings".to_string(),
				model: "test-embedding".to_string(),
				dimensions,
				timeout_ms: 1_000,
				default_headers: Map::new(),
			},
		},
		chunking: Default::default(),
		embedder: Default::default(),
		search: Default::default(),
		evidence: Default::default(),
		reindex: Default::default(),
		security: Default::default(),
	}
}

fn remove_database_files(path: &Path) -> Result<()> {
	for suffix in SIDECAR_SUFFIXES {
		let mut target = path.as_os_str().to_owned();

		target.push(suffix);

		match fs::remove_file(PathBuf::from(target)) {
			Ok(()) => {},
			Err(err) if err.kind() == ErrorKind::NotFound => {},
			Err(err) => return Err(err.into()),
		}
	}

	Ok(())
}
