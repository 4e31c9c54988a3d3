use crate::core::schema::Schema;
use crate::core::validator::validate;
use crate::domain::model::{Batch, Partition, RawRecord};

/// 驗證批次內每一列，穩定地分成有效與無效兩部分。無 I/O，可重複呼叫。
pub fn transform(batch: Batch<RawRecord>, schema: &Schema) -> Partition {
    let mut valid = Vec::with_capacity(batch.len());
    let mut invalid = Vec::new();

    for raw in batch.records {
        let record = validate(raw, schema);
        if record.is_valid() {
            valid.push(record);
        } else {
            invalid.push(record);
        }
    }

    Partition {
        offset: batch.offset,
        valid,
        invalid,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FieldConfig;
    use std::collections::HashMap;

    fn schema() -> Schema {
        Schema::from_fields(&[(
            "user_id".to_string(),
            FieldConfig {
                not_null: Some(true),
                ..Default::default()
            },
        )])
        .unwrap()
    }

    fn batch(user_ids: &[&str]) -> Batch<RawRecord> {
        let records = user_ids
            .iter()
            .enumerate()
            .map(|(i, id)| {
                let mut values = HashMap::new();
                values.insert("user_id".to_string(), id.to_string());
                RawRecord::new(i as u64 + 2, values)
            })
            .collect();
        Batch {
            offset: 10,
            records,
        }
    }

    #[test]
    fn test_stable_partition() {
        let partition = transform(batch(&["1", "", "2", "", "3"]), &schema());

        assert_eq!(partition.offset, 10);
        assert_eq!(partition.len(), 5);

        let valid_rows: Vec<u64> = partition.valid.iter().map(|r| r.source_row_number).collect();
        let invalid_rows: Vec<u64> = partition
            .invalid
            .iter()
            .map(|r| r.source_row_number)
            .collect();
        assert_eq!(valid_rows, vec![2, 4, 6]);
        assert_eq!(invalid_rows, vec![3, 5]);
        assert!(partition.valid.iter().all(|r| r.is_valid()));
        assert!(partition.invalid.iter().all(|r| !r.failure_reasons.is_empty()));
    }

    #[test]
    fn test_transform_is_repeatable() {
        let input = batch(&["1", "", "x"]);
        assert_eq!(
            transform(input.clone(), &schema()),
            transform(input, &schema())
        );
    }

    #[test]
    fn test_empty_batch() {
        let partition = transform(batch(&[]), &schema());
        assert!(partition.is_empty());
    }
}
