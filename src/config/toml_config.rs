use crate::utils::error::{EtlError, Result};
use crate::utils::validation::{self, Validate};
use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer};
use std::fmt;
use std::path::{Path, PathBuf};

pub const DEFAULT_INPUT_DIR: &str = "./data";
pub const DEFAULT_BATCH_SIZE: usize = 100_000;
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 500;
pub const DEFAULT_PSQL_PORT: u16 = 5432;

#[derive(Debug, Clone, Deserialize)]
pub struct EtlConfig {
    pub psql_db: PsqlDbConfig,
    pub data_import: ImportConfig,
    pub monitoring: Option<MonitoringConfig>,
}

#[derive(Clone, Deserialize)]
pub struct PsqlDbConfig {
    pub host: String,
    pub port: Option<u16>,
    pub dbname: String,
    pub user: String,
    #[serde(alias = "password")]
    pub pwd: Option<String>,
}

// 避免在 verbose 日誌中洩漏密碼
impl fmt::Debug for PsqlDbConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PsqlDbConfig")
            .field("host", &self.host)
            .field("port", &self.port())
            .field("dbname", &self.dbname)
            .field("user", &self.user)
            .field("pwd", &self.pwd.as_ref().map(|_| "****"))
            .finish()
    }
}

impl PsqlDbConfig {
    pub fn port(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_PSQL_PORT)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImportConfig {
    #[serde(alias = "csv_separator")]
    pub separator: String,
    pub destination_table: String,
    pub invalid_data_table: String,
    /// 保留設定檔中的欄位順序
    #[serde(deserialize_with = "deserialize_ordered_fields")]
    pub fields: Vec<(String, FieldConfig)>,
    pub input_dir: Option<String>,
    pub batch_size: Option<usize>,
    pub retry_attempts: Option<u32>,
    pub retry_delay_ms: Option<u64>,
    pub prefetch: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldConfig {
    pub r#type: Option<String>,
    pub format: Option<String>,
    pub not_null: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitoringConfig {
    pub enabled: bool,
}

fn deserialize_ordered_fields<'de, D>(
    deserializer: D,
) -> std::result::Result<Vec<(String, FieldConfig)>, D::Error>
where
    D: Deserializer<'de>,
{
    struct OrderedFields;

    impl<'de> Visitor<'de> for OrderedFields {
        type Value = Vec<(String, FieldConfig)>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a map of field name to field configuration")
        }

        fn visit_map<A>(self, mut map: A) -> std::result::Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut fields = Vec::with_capacity(map.size_hint().unwrap_or(0));
            while let Some((name, config)) = map.next_entry::<String, FieldConfig>()? {
                fields.push((name, config));
            }
            Ok(fields)
        }
    }

    deserializer.deserialize_map(OrderedFields)
}

impl EtlConfig {
    /// 從檔案載入配置；副檔名為 .json 時以 JSON 解析，其餘視為 TOML
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            EtlError::config(format!("cannot read config '{}': {}", path.display(), e))
        })?;

        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        if is_json {
            Self::from_json_str(&content)
        } else {
            Self::from_toml_str(&content)
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content)?;

        toml::from_str(&processed_content)
            .map_err(|e| EtlError::config(format!("TOML parsing error: {}", e)))
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content)?;

        serde_json::from_str(&processed_content)
            .map_err(|e| EtlError::config(format!("JSON parsing error: {}", e)))
    }

    /// 替換環境變數 (例如 ${PSQL_PASSWORD})，未設定的變數保持原樣
    fn substitute_env_vars(content: &str) -> Result<String> {
        let re = regex::Regex::new(r"\$\{([^}]+)\}")
            .map_err(|e| EtlError::config(format!("invalid substitution pattern: {}", e)))?;

        let result = re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        });

        Ok(result.into_owned())
    }

    pub fn monitoring_enabled(&self) -> bool {
        self.monitoring.as_ref().map(|m| m.enabled).unwrap_or(false)
    }
}

impl ImportConfig {
    pub fn separator_byte(&self) -> Result<u8> {
        validation::validate_separator("data_import.separator", &self.separator)
    }

    pub fn input_dir(&self) -> &str {
        self.input_dir.as_deref().unwrap_or(DEFAULT_INPUT_DIR)
    }

    /// 位置參數的檔名相對於 input_dir；絕對路徑則直接使用
    pub fn resolve_input(&self, file_name: &str) -> PathBuf {
        let candidate = Path::new(file_name);
        if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            Path::new(self.input_dir()).join(candidate)
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size.unwrap_or(DEFAULT_BATCH_SIZE)
    }

    pub fn retry_attempts(&self) -> u32 {
        self.retry_attempts.unwrap_or(DEFAULT_RETRY_ATTEMPTS)
    }

    pub fn retry_delay_ms(&self) -> u64 {
        self.retry_delay_ms.unwrap_or(DEFAULT_RETRY_DELAY_MS)
    }

    pub fn prefetch(&self) -> bool {
        self.prefetch.unwrap_or(false)
    }
}

impl Validate for ImportConfig {
    fn validate(&self) -> Result<()> {
        self.separator_byte()?;
        validation::validate_non_empty_string(
            "data_import.destination_table",
            &self.destination_table,
        )?;
        validation::validate_non_empty_string(
            "data_import.invalid_data_table",
            &self.invalid_data_table,
        )?;

        if self.destination_table == self.invalid_data_table {
            return Err(EtlError::InvalidConfigValueError {
                field: "data_import.invalid_data_table".to_string(),
                value: self.invalid_data_table.clone(),
                reason: "must differ from destination_table".to_string(),
            });
        }

        validation::validate_path("data_import.input_dir", self.input_dir())?;
        validation::validate_positive_number("data_import.batch_size", self.batch_size(), 1)?;
        validation::validate_range("data_import.retry_attempts", self.retry_attempts(), 0, 20)?;

        Ok(())
    }
}

impl Validate for PsqlDbConfig {
    fn validate(&self) -> Result<()> {
        validation::validate_non_empty_string("psql_db.host", &self.host)?;
        validation::validate_non_empty_string("psql_db.dbname", &self.dbname)?;
        validation::validate_non_empty_string("psql_db.user", &self.user)?;
        validation::validate_range("psql_db.port", self.port(), 1, u16::MAX)?;
        Ok(())
    }
}

impl Validate for EtlConfig {
    fn validate(&self) -> Result<()> {
        self.psql_db.validate()?;
        self.data_import.validate()
    }
}
