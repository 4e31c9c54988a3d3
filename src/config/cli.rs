use crate::utils::error::Result;
use crate::utils::validation;
use clap::Parser;

#[derive(Debug, Clone, Parser)]
#[command(name = "event-etl")]
#[command(about = "Load a delimited event file into PostgreSQL, splitting valid and invalid rows")]
pub struct CliConfig {
    /// Input file name, resolved against data_import.input_dir
    pub file_name: String,

    /// Path to the configuration file (TOML, or JSON by extension)
    #[arg(short, long, default_value = "etl-config.toml")]
    pub config: String,

    /// Write staging CSV files into this directory instead of PostgreSQL
    #[arg(long)]
    pub output_dir: Option<String>,

    /// Skip this many data rows (use the offset reported by a failed run)
    #[arg(long, default_value = "0")]
    pub resume_from: u64,

    /// Override data_import.batch_size
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Classify the whole file without writing anything
    #[arg(long)]
    pub dry_run: bool,

    /// Enable system monitoring (memory/CPU per batch)
    #[arg(long)]
    pub monitor: bool,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Emit logs as JSON
    #[arg(long)]
    pub log_json: bool,
}

impl CliConfig {
    /// 命令列指定的批次大小，驗證規則同設定檔
    pub fn batch_size_override(&self) -> Result<Option<usize>> {
        if let Some(batch_size) = self.batch_size {
            validation::validate_positive_number("--batch-size", batch_size, 1)?;
        }
        Ok(self.batch_size)
    }
}
