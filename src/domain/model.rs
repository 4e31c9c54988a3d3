use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;
use std::collections::HashMap;

/// 欄位型別；日期類型必定帶有格式字串
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldKind {
    String,
    Date { format: String },
    DateTime { format: String },
}

impl FieldKind {
    pub fn name(&self) -> &'static str {
        match self {
            FieldKind::String => "string",
            FieldKind::Date { .. } => "date",
            FieldKind::DateTime { .. } => "datetime",
        }
    }

    pub fn format(&self) -> Option<&str> {
        match self {
            FieldKind::String => None,
            FieldKind::Date { format } | FieldKind::DateTime { format } => Some(format),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
    pub required: bool,
}

/// 一列原始資料，欄位值保持檔案中的原始文字
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    /// 檔案中的實際行號 (標頭為第 1 行)
    pub source_row_number: u64,
    pub values: HashMap<String, String>,
    /// 結構性錯誤，例如欄位數量不符
    pub defect: Option<String>,
}

impl RawRecord {
    pub fn new(source_row_number: u64, values: HashMap<String, String>) -> Self {
        Self {
            source_row_number,
            values,
            defect: None,
        }
    }

    pub fn with_defect(mut self, defect: impl Into<String>) -> Self {
        self.defect = Some(defect.into());
        self
    }

    /// 空字串視同缺值
    pub fn get(&self, field: &str) -> Option<&str> {
        self.values
            .get(field)
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum TypedValue {
    Null,
    Text(String),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
}

impl TypedValue {
    pub fn is_null(&self) -> bool {
        matches!(self, TypedValue::Null)
    }

    /// 轉成寫入 CSV 或文字欄位時使用的表示法
    pub fn to_text(&self) -> Option<String> {
        match self {
            TypedValue::Null => None,
            TypedValue::Text(value) => Some(value.clone()),
            TypedValue::Date(value) => Some(value.format("%Y-%m-%d").to_string()),
            TypedValue::DateTime(value) => Some(value.format("%Y-%m-%d %H:%M:%S%.f").to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypedRecord {
    pub source_row_number: u64,
    /// 依照 schema 順序排列的轉換結果
    pub values: Vec<(String, TypedValue)>,
    pub raw: RawRecord,
    pub failure_reasons: Vec<String>,
}

impl TypedRecord {
    pub fn is_valid(&self) -> bool {
        self.failure_reasons.is_empty()
    }

    pub fn value(&self, field: &str) -> Option<&TypedValue> {
        self.values
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, value)| value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch<T> {
    /// 批次第一列在資料列 (不含標頭) 中的位置，從 0 起算
    pub offset: u64,
    pub records: Vec<T>,
}

impl<T> Batch<T> {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// 單一批次分割後的結果，兩邊都維持原始列順序
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    pub offset: u64,
    pub valid: Vec<TypedRecord>,
    pub invalid: Vec<TypedRecord>,
}

impl Partition {
    pub fn len(&self) -> usize {
        self.valid.len() + self.invalid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadResult {
    pub table: String,
    pub rows_written: u64,
}
