pub mod audit;
pub mod chunks;
pub mod db;
pub mod evidence;
pub mod lexical;
pub mod models;
pub mod records;
pub mod schema;
pub mod vector_index;
pub mod vectors;

mod error;

pub use error::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;
