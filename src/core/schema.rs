use crate::config::{FieldConfig, ImportConfig};
use crate::domain::model::{FieldKind, FieldSpec};
use crate::domain::ports::{Column, ColumnType};
use crate::utils::error::{EtlError, Result};
use chrono::format::{Item, StrftimeItems};
use std::collections::HashSet;

/// 已載入的欄位規格；載入後唯讀，可在各階段共用
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    fields: Vec<FieldSpec>,
}

impl Schema {
    pub fn load(config: &ImportConfig) -> Result<Self> {
        Self::from_fields(&config.fields)
    }

    pub fn from_fields(fields: &[(String, FieldConfig)]) -> Result<Self> {
        if fields.is_empty() {
            return Err(EtlError::schema("no fields declared"));
        }

        let mut seen = HashSet::with_capacity(fields.len());
        let mut specs = Vec::with_capacity(fields.len());

        for (name, field) in fields {
            if name.trim().is_empty() {
                return Err(EtlError::schema("field name cannot be empty"));
            }
            if !seen.insert(name.as_str()) {
                return Err(EtlError::schema(format!("duplicate field: {}", name)));
            }

            specs.push(FieldSpec {
                name: name.clone(),
                kind: parse_kind(name, field)?,
                required: field.not_null.unwrap_or(false),
            });
        }

        tracing::debug!("Loaded schema with {} fields", specs.len());
        Ok(Self { fields: specs })
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|spec| spec.name == name)
    }

    /// 有效資料表的欄位，依 schema 型別
    pub fn typed_columns(&self) -> Vec<Column> {
        self.fields
            .iter()
            .map(|spec| {
                let column_type = match spec.kind {
                    FieldKind::String => ColumnType::Text,
                    FieldKind::Date { .. } => ColumnType::Date,
                    FieldKind::DateTime { .. } => ColumnType::Timestamp,
                };
                Column::new(spec.name.clone(), column_type)
            })
            .collect()
    }
}

fn parse_kind(name: &str, field: &FieldConfig) -> Result<FieldKind> {
    let type_name = field.r#type.as_deref().unwrap_or("string");

    match type_name {
        "string" => {
            if field.format.is_some() {
                tracing::warn!("⚠️ Field '{}' is a string, its format is ignored", name);
            }
            Ok(FieldKind::String)
        }
        "date" => Ok(FieldKind::Date {
            format: required_format(name, type_name, field)?,
        }),
        "datetime" => Ok(FieldKind::DateTime {
            format: required_format(name, type_name, field)?,
        }),
        other => Err(EtlError::schema(format!(
            "field '{}' has unknown type '{}' (expected string, date or datetime)",
            name, other
        ))),
    }
}

fn required_format(name: &str, type_name: &str, field: &FieldConfig) -> Result<String> {
    let format = field.format.as_deref().ok_or_else(|| {
        EtlError::schema(format!(
            "field '{}' of type {} requires a format",
            name, type_name
        ))
    })?;

    if format.trim().is_empty() {
        return Err(EtlError::schema(format!(
            "field '{}' has an empty format",
            name
        )));
    }

    if StrftimeItems::new(format).any(|item| matches!(item, Item::Error)) {
        return Err(EtlError::schema(format!(
            "field '{}' has an invalid format '{}'",
            name, format
        )));
    }

    Ok(format.to_string())
}
