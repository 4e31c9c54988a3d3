use crate::utils::error::{EtlError, Result};

pub trait Validate {
    fn validate(&self) -> Result<()>;
}

pub fn validate_path(field_name: &str, path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(EtlError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: path.to_string(),
            reason: "Path cannot be empty".to_string(),
        });
    }

    if path.contains('\0') {
        return Err(EtlError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: path.to_string(),
            reason: "Path contains null bytes".to_string(),
        });
    }

    Ok(())
}

pub fn validate_positive_number(field_name: &str, value: usize, min_value: usize) -> Result<()> {
    if value < min_value {
        return Err(EtlError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: value.to_string(),
            reason: format!("Value must be at least {}", min_value),
        });
    }
    Ok(())
}

pub fn validate_non_empty_string(field_name: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(EtlError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: value.to_string(),
            reason: "Value cannot be empty or whitespace-only".to_string(),
        });
    }
    Ok(())
}

pub fn validate_range<T: PartialOrd + std::fmt::Display + Copy>(
    field_name: &str,
    value: T,
    min: T,
    max: T,
) -> Result<()> {
    if value < min || value > max {
        return Err(EtlError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: value.to_string(),
            reason: format!("Value must be between {} and {}", min, max),
        });
    }
    Ok(())
}

/// 分隔符必須是單一 ASCII 字元 (csv crate 以 u8 表示)
pub fn validate_separator(field_name: &str, value: &str) -> Result<u8> {
    match value.as_bytes() {
        [byte] if byte.is_ascii() && *byte != b'"' && *byte != b'\n' && *byte != b'\r' => Ok(*byte),
        _ => Err(EtlError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: value.to_string(),
            reason: "Separator must be a single ASCII character other than quote or newline"
                .to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_positive_number() {
        assert!(validate_positive_number("batch_size", 5, 1).is_ok());
        assert!(validate_positive_number("batch_size", 0, 1).is_err());
    }

    #[test]
    fn test_validate_separator() {
        assert_eq!(validate_separator("separator", ",").unwrap(), b',');
        assert_eq!(validate_separator("separator", "\t").unwrap(), b'\t');
        assert_eq!(validate_separator("separator", ";").unwrap(), b';');
        assert!(validate_separator("separator", "").is_err());
        assert!(validate_separator("separator", ",,").is_err());
        assert!(validate_separator("separator", "\"").is_err());
        assert!(validate_separator("separator", "é").is_err());
    }

    #[test]
    fn test_validate_range_and_strings() {
        assert!(validate_range("psql_db.port", 5432u32, 1, 65535).is_ok());
        assert!(validate_range("psql_db.port", 0u32, 1, 65535).is_err());
        assert!(validate_non_empty_string("destination_table", "  ").is_err());
        assert!(validate_path("input_dir", "./data").is_ok());
        assert!(validate_path("input_dir", "").is_err());
    }
}
