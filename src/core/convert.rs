use crate::domain::model::{FieldKind, FieldSpec, TypedValue};
use chrono::format::{Item, Numeric, ParseErrorKind, StrftimeItems};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("cannot convert '{raw_value}' for field '{field}' with format '{format}'")]
pub struct ConversionError {
    pub field: String,
    pub raw_value: String,
    pub format: String,
}

/// 將原始文字依欄位規格轉為型別值。
/// 不檢查必填，必填屬於整列驗證的範圍。
pub fn convert(raw_value: &str, spec: &FieldSpec) -> Result<TypedValue, ConversionError> {
    match &spec.kind {
        FieldKind::String => Ok(if raw_value.is_empty() {
            TypedValue::Null
        } else {
            TypedValue::Text(raw_value.to_string())
        }),
        FieldKind::Date { format } => NaiveDate::parse_from_str(raw_value, format)
            .map(TypedValue::Date)
            .map_err(|_| conversion_error(spec, raw_value, format)),
        FieldKind::DateTime { format } => parse_datetime(raw_value, format)
            .map(TypedValue::DateTime)
            .ok_or_else(|| conversion_error(spec, raw_value, format)),
    }
}

fn parse_datetime(raw_value: &str, format: &str) -> Option<NaiveDateTime> {
    match NaiveDateTime::parse_from_str(raw_value, format) {
        Ok(value) => Some(value),
        // 只有日期的格式視為當天 00:00:00
        Err(e) if e.kind() == ParseErrorKind::NotEnough && !has_time_component(format) => {
            NaiveDate::parse_from_str(raw_value, format)
                .ok()
                .map(|date| date.and_time(NaiveTime::MIN))
        }
        Err(_) => None,
    }
}

fn has_time_component(format: &str) -> bool {
    StrftimeItems::new(format).any(|item| {
        matches!(
            item,
            Item::Numeric(
                Numeric::Hour
                    | Numeric::Hour12
                    | Numeric::Minute
                    | Numeric::Second
                    | Numeric::Nanosecond
                    | Numeric::Timestamp,
                _
            )
        )
    })
}

fn conversion_error(spec: &FieldSpec, raw_value: &str, format: &str) -> ConversionError {
    ConversionError {
        field: spec.name.clone(),
        raw_value: raw_value.to_string(),
        format: format.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(kind: FieldKind) -> FieldSpec {
        FieldSpec {
            name: "f".to_string(),
            kind,
            required: false,
        }
    }

    fn date(format: &str) -> FieldSpec {
        spec(FieldKind::Date {
            format: format.to_string(),
        })
    }

    fn datetime(format: &str) -> FieldSpec {
        spec(FieldKind::DateTime {
            format: format.to_string(),
        })
    }

    #[test]
    fn test_string_identity_and_empty_is_null() {
        let s = spec(FieldKind::String);
        assert_eq!(convert("42", &s).unwrap(), TypedValue::Text("42".to_string()));
        assert_eq!(convert(" padded ", &s).unwrap(), TypedValue::Text(" padded ".to_string()));
        assert_eq!(convert("", &s).unwrap(), TypedValue::Null);
    }

    #[test]
    fn test_date_parsing() {
        assert_eq!(
            convert("2021-01-05", &date("%Y-%m-%d")).unwrap(),
            TypedValue::Date(NaiveDate::from_ymd_opt(2021, 1, 5).unwrap())
        );
        assert_eq!(
            convert("05/01/2021", &date("%d/%m/%Y")).unwrap(),
            TypedValue::Date(NaiveDate::from_ymd_opt(2021, 1, 5).unwrap())
        );
    }

    #[test]
    fn test_date_is_all_or_nothing() {
        let err = convert("2021-01-05x", &date("%Y-%m-%d")).unwrap_err();
        assert_eq!(err.raw_value, "2021-01-05x");
        assert_eq!(err.format, "%Y-%m-%d");
        assert!(convert("2021-02-30", &date("%Y-%m-%d")).is_err());
        assert!(convert("", &date("%Y-%m-%d")).is_err());
    }

    #[test]
    fn test_date_with_time_format_drops_time() {
        assert_eq!(
            convert("2021-01-05 10:00:00", &date("%Y-%m-%d %H:%M:%S")).unwrap(),
            TypedValue::Date(NaiveDate::from_ymd_opt(2021, 1, 5).unwrap())
        );
    }

    #[test]
    fn test_datetime_parsing() {
        let expected = NaiveDate::from_ymd_opt(2021, 1, 5)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap();
        assert_eq!(
            convert("2021-01-05 10:00:00", &datetime("%Y-%m-%d %H:%M:%S")).unwrap(),
            TypedValue::DateTime(expected)
        );

        let err = convert("not-a-date", &datetime("%Y-%m-%d %H:%M:%S")).unwrap_err();
        assert_eq!(
            err,
            ConversionError {
                field: "f".to_string(),
                raw_value: "not-a-date".to_string(),
                format: "%Y-%m-%d %H:%M:%S".to_string(),
            }
        );
    }

    #[test]
    fn test_datetime_with_date_only_format_is_midnight() {
        let expected = NaiveDate::from_ymd_opt(2021, 1, 5)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        assert_eq!(
            convert("2021-01-05", &datetime("%Y-%m-%d")).unwrap(),
            TypedValue::DateTime(expected)
        );
    }

    #[test]
    fn test_datetime_with_partial_time_is_rejected() {
        // 有小時但缺分鐘，不可默默補成午夜
        assert!(convert("2021-01-05 10", &datetime("%Y-%m-%d %H")).is_err());
    }

    #[test]
    fn test_conversion_is_deterministic() {
        let s = datetime("%Y-%m-%d %H:%M:%S");
        for raw in ["2021-01-05 10:00:00", "garbage", ""] {
            assert_eq!(convert(raw, &s), convert(raw, &s));
        }
    }
}
