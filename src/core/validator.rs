use crate::core::convert::convert;
use crate::core::schema::Schema;
use crate::domain::model::{RawRecord, TypedRecord, TypedValue};

/// 驗證單一列並產生帶有判定結果的 TypedRecord。
/// 錯誤都記錄在 failure_reasons 中，永遠不會中斷批次。
pub fn validate(raw: RawRecord, schema: &Schema) -> TypedRecord {
    let mut failure_reasons = Vec::new();
    let mut values = Vec::with_capacity(schema.len());

    if let Some(defect) = &raw.defect {
        failure_reasons.push(defect.clone());
    }

    for spec in schema.fields() {
        let value = match raw.get(&spec.name) {
            None => {
                if spec.required {
                    failure_reasons.push(format!("missing required field: {}", spec.name));
                }
                TypedValue::Null
            }
            Some(raw_value) => match convert(raw_value, spec) {
                Ok(value) => value,
                Err(_) => {
                    failure_reasons.push(format!(
                        "invalid {} value for {}: {}",
                        spec.kind.name(),
                        spec.name,
                        raw_value
                    ));
                    TypedValue::Null
                }
            },
        };
        values.push((spec.name.clone(), value));
    }

    TypedRecord {
        source_row_number: raw.source_row_number,
        values,
        raw,
        failure_reasons,
    }
}
