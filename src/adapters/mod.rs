// Adapters layer: concrete TableWriter implementations.

pub mod csv_file;
pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use csv_file::CsvFileWriter;
pub use memory::{FailureMode, MemoryWriter};
#[cfg(feature = "postgres")]
pub use postgres::PostgresWriter;
