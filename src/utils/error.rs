use thiserror::Error;

#[derive(Error, Debug)]
pub enum EtlError {
    #[error("CSV processing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Invalid configuration value for '{field}': {value} ({reason})")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Missing configuration field: {field}")]
    MissingConfigError { field: String },

    #[error("Schema error: {message}")]
    SchemaError { message: String },

    #[error("Extract error for '{path}': {message}")]
    ExtractError { path: String, message: String },

    #[error("Storage error: {message}")]
    StorageError { message: String, transient: bool },

    #[error("Load into '{table}' failed at batch offset {batch_offset}: {message}")]
    LoadError {
        table: String,
        batch_offset: u64,
        message: String,
    },
}

/// 失敗發生的管線階段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorStage {
    Config,
    Schema,
    Extract,
    Load,
}

impl std::fmt::Display for ErrorStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorStage::Config => "config",
            ErrorStage::Schema => "schema",
            ErrorStage::Extract => "extract",
            ErrorStage::Load => "load",
        };
        f.write_str(name)
    }
}

impl EtlError {
    pub fn config(message: impl Into<String>) -> Self {
        EtlError::ConfigError {
            message: message.into(),
        }
    }

    pub fn schema(message: impl Into<String>) -> Self {
        EtlError::SchemaError {
            message: message.into(),
        }
    }

    pub fn extract(path: impl Into<String>, message: impl Into<String>) -> Self {
        EtlError::ExtractError {
            path: path.into(),
            message: message.into(),
        }
    }

    /// 可重試的存儲錯誤 (例如連線中斷)
    pub fn transient_storage(message: impl Into<String>) -> Self {
        EtlError::StorageError {
            message: message.into(),
            transient: true,
        }
    }

    pub fn permanent_storage(message: impl Into<String>) -> Self {
        EtlError::StorageError {
            message: message.into(),
            transient: false,
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            EtlError::StorageError {
                transient: true,
                ..
            }
        )
    }

    pub fn stage(&self) -> ErrorStage {
        match self {
            EtlError::ConfigError { .. }
            | EtlError::InvalidConfigValueError { .. }
            | EtlError::MissingConfigError { .. }
            | EtlError::SerializationError(_) => ErrorStage::Config,
            EtlError::SchemaError { .. } => ErrorStage::Schema,
            EtlError::ExtractError { .. } | EtlError::CsvError(_) | EtlError::IoError(_) => {
                ErrorStage::Extract
            }
            EtlError::StorageError { .. } | EtlError::LoadError { .. } => ErrorStage::Load,
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self.stage() {
            ErrorStage::Config | ErrorStage::Schema => 2,
            ErrorStage::Extract => 3,
            ErrorStage::Load => 1,
        }
    }

    pub fn recovery_suggestion(&self) -> String {
        match self {
            EtlError::LoadError { batch_offset, .. } => format!(
                "Check the database, then re-run with --resume-from {}",
                batch_offset
            ),
            EtlError::StorageError { .. } => "Check the database connection settings".to_string(),
            EtlError::ExtractError { .. } | EtlError::CsvError(_) | EtlError::IoError(_) => {
                "Make sure the input file exists, is readable and has a header row".to_string()
            }
            EtlError::SchemaError { .. } => {
                "Fix the [data_import.fields] section of the configuration".to_string()
            }
            _ => "Check the configuration file".to_string(),
        }
    }

    pub fn user_friendly_message(&self) -> String {
        format!("{} stage failed: {}", self.stage(), self)
    }
}

pub type Result<T> = std::result::Result<T, EtlError>;
