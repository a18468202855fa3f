use std::str::FromStr;

use sqlx::{
	SqlitePool,
	sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
};

use crate::{Result, schema};

pub struct Db {
	pub pool: SqlitePool,
}
impl Db {
	pub async fn connect(cfg: &evi_config::Sqlite) -> Result<Self> {
		let in_memory = is_in_memory(&cfg.dsn);
		let mut options = SqliteConnectOptions::from_str(&cfg.dsn)?
			.create_if_missing(true)
			.foreign_keys(true);

		if !in_memory {
			options = options.journal_mode(SqliteJournalMode::Wal);
		}

		// Every connection to `:memory:` opens its own database, so the pool must keep exactly one
		// connection alive for the lifetime of the process.
		let pool = if in_memory {
			SqlitePoolOptions::new()
				.max_connections(1)
				.min_connections(1)
				.idle_timeout(None)
				.max_lifetime(None)
				.connect_with(options)
				.await?
		} else {
			SqlitePoolOptions::new()
				.max_connections(cfg.pool_max_conns)
				.connect_with(options)
				.await?
		};

		Ok(Self { pool })
	}

	pub async fn ensure_schema(&self) -> Result<()> {
		let sql = schema::render_schema();
		let mut tx = self.pool.begin().await?;

		for statement in sql.split(';') {
			let trimmed = statement.trim();

			if trimmed.is_empty() {
				continue;
			}

			sqlx::query(trimmed).execute(&mut *tx).await?;
		}

		tx.commit().await?;

		Ok(())
	}
}

fn is_in_memory(dsn: &str) -> bool {
	dsn.contains(":memory:") || dsn.contains("mode=memory")
}
