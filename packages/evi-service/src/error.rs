pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("Invalid request: {message}")]
	InvalidRequest { message: String },
	#[error("Not found: {message}")]
	NotFound { message: String },
	#[error("Conflict: {message}")]
	Conflict { message: String },
	#[error("Provider error: {message}")]
	Provider { message: String },
	#[error("Policy error: {message}")]
	Policy { message: String },
	#[error("Storage error: {message}")]
	Storage { message: String },
	#[error("Index error: {message}")]
	Index { message: String },
	#[error("Operation cancelled.")]
	Cancelled,
}
impl From<sqlx::Error> for Error {
	fn from(err: sqlx::Error) -> Self {
		Self::Storage { message: err.to_string() }
	}
}

impl From<evi_storage::Error> for Error {
	fn from(err: evi_storage::Error) -> Self {
		match err {
			evi_storage::Error::Sqlx(inner) => Self::Storage { message: inner.to_string() },
			evi_storage::Error::InvalidArgument(message) => Self::InvalidRequest { message },
			evi_storage::Error::NotFound(message) => Self::NotFound { message },
			evi_storage::Error::Conflict(message) => Self::Conflict { message },
			evi_storage::Error::Index(message) => Self::Index { message },
		}
	}
}

impl From<evi_providers::Error> for Error {
	fn from(err: evi_providers::Error) -> Self {
		Self::Provider { message: err.to_string() }
	}
}

impl From<evi_domain::entity::RenderError> for Error {
	fn from(err: evi_domain::entity::RenderError) -> Self {
		Self::InvalidRequest { message: err.to_string() }
	}
}
