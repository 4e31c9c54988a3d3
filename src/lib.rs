pub mod adapters;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::CliConfig;
pub use config::EtlConfig;

pub use adapters::{CsvFileWriter, MemoryWriter};
#[cfg(feature = "postgres")]
pub use adapters::PostgresWriter;
pub use core::etl::{EtlEngine, RunState, RunSummary};
pub use core::schema::Schema;
pub use utils::error::{EtlError, Result};
