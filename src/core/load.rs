use crate::core::schema::Schema;
use crate::domain::model::{LoadResult, Partition, TypedRecord, TypedValue};
use crate::domain::ports::{Column, ColumnType, TableBatch, TableWriter};
use crate::utils::error::{EtlError, Result};
use std::sync::Arc;
use std::time::Duration;

pub const FAILURE_REASONS_COLUMN: &str = "failure_reasons";

const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkKind {
    /// 依 schema 型別寫入轉換後的值
    Valid,
    /// 寫入原始文字與失敗原因
    Invalid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, base_delay: Duration) -> Self {
        Self {
            attempts,
            base_delay,
        }
    }

    pub fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }

    /// 指數退避：base, 2*base, 4*base ... 上限 30 秒
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(MAX_RETRY_DELAY)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(500))
    }
}

/// 一個目的地資料表加上對應的資料投影
#[derive(Debug, Clone)]
pub struct Sink {
    table: String,
    kind: SinkKind,
    fields: Vec<String>,
    columns: Vec<Column>,
}

impl Sink {
    pub fn valid(table: impl Into<String>, schema: &Schema) -> Self {
        Self {
            table: table.into(),
            kind: SinkKind::Valid,
            fields: field_names(schema),
            columns: schema.typed_columns(),
        }
    }

    pub fn invalid(table: impl Into<String>, schema: &Schema) -> Self {
        let fields = field_names(schema);
        let mut columns: Vec<Column> = fields
            .iter()
            .map(|name| Column::new(name.clone(), ColumnType::Text))
            .collect();
        columns.push(Column::new(FAILURE_REASONS_COLUMN, ColumnType::Text));

        Self {
            table: table.into(),
            kind: SinkKind::Invalid,
            fields,
            columns,
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn kind(&self) -> SinkKind {
        self.kind
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// 將紀錄投影成此資料表的列
    pub fn project(&self, records: &[TypedRecord]) -> Result<Vec<Vec<TypedValue>>> {
        records
            .iter()
            .map(|record| -> Result<Vec<TypedValue>> {
                match self.kind {
                    SinkKind::Valid => Ok(record.values.iter().map(|(_, v)| v.clone()).collect()),
                    SinkKind::Invalid => {
                        let mut row: Vec<TypedValue> = self
                            .fields
                            .iter()
                            .map(|name| match record.raw.values.get(name) {
                                Some(raw) => TypedValue::Text(raw.clone()),
                                None => TypedValue::Null,
                            })
                            .collect();
                        row.push(TypedValue::Text(serde_json::to_string(
                            &record.failure_reasons,
                        )?));
                        Ok(row)
                    }
                }
            })
            .collect()
    }
}

/// 把一個批次的有效與無效紀錄寫入各自的資料表。
///
/// 兩個資料表在同一次寫入中提交，批次要嘛完整寫入要嘛完全沒有，
/// 因此從失敗的批次位置續跑不會重複寫入。
pub struct Loader<W: TableWriter> {
    writer: Arc<W>,
    valid: Sink,
    invalid: Sink,
    retry: RetryPolicy,
}

impl<W: TableWriter> Loader<W> {
    pub fn new(
        writer: Arc<W>,
        schema: &Schema,
        valid_table: impl Into<String>,
        invalid_table: impl Into<String>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            writer,
            valid: Sink::valid(valid_table, schema),
            invalid: Sink::invalid(invalid_table, schema),
            retry,
        }
    }

    pub fn valid_sink(&self) -> &Sink {
        &self.valid
    }

    pub fn invalid_sink(&self) -> &Sink {
        &self.invalid
    }

    /// 回傳 [有效, 無效] 兩個資料表的寫入結果；可重試的錯誤會依退避策略重試
    pub async fn load(&self, partition: &Partition) -> Result<[LoadResult; 2]> {
        let batch_offset = partition.offset;
        let valid_rows = self
            .valid
            .project(&partition.valid)
            .map_err(|e| self.load_error(batch_offset, e))?;
        let invalid_rows = self
            .invalid
            .project(&partition.invalid)
            .map_err(|e| self.load_error(batch_offset, e))?;

        // 空的資料表不寫
        let sinks = [(&self.valid, &valid_rows), (&self.invalid, &invalid_rows)];
        let batches: Vec<TableBatch<'_>> = sinks
            .into_iter()
            .filter(|(_, rows)| !rows.is_empty())
            .map(|(sink, rows)| TableBatch {
                table: sink.table(),
                columns: sink.columns(),
                rows: rows.as_slice(),
            })
            .collect();

        let mut results = [
            LoadResult {
                table: self.valid.table.clone(),
                rows_written: 0,
            },
            LoadResult {
                table: self.invalid.table.clone(),
                rows_written: 0,
            },
        ];
        if batches.is_empty() {
            return Ok(results);
        }

        let written = self.write_with_retry(&batches, batch_offset).await?;

        for (batch, rows_written) in batches.iter().zip(written) {
            if rows_written != batch.rows.len() as u64 {
                return Err(self.load_error(
                    batch_offset,
                    format!(
                        "wrote {} of {} rows to {}",
                        rows_written,
                        batch.rows.len(),
                        batch.table
                    ),
                ));
            }
            if let Some(result) = results.iter_mut().find(|r| r.table == batch.table) {
                result.rows_written = rows_written;
            }
        }

        tracing::debug!(
            "Wrote {} valid and {} invalid rows (batch offset {})",
            results[0].rows_written,
            results[1].rows_written,
            batch_offset
        );
        Ok(results)
    }

    async fn write_with_retry(
        &self,
        batches: &[TableBatch<'_>],
        batch_offset: u64,
    ) -> Result<Vec<u64>> {
        let mut retry = 0;
        loop {
            match self.writer.write_tables(batches).await {
                Ok(written) if written.len() == batches.len() => return Ok(written),
                Ok(written) => {
                    return Err(self.load_error(
                        batch_offset,
                        format!(
                            "writer reported {} tables, expected {}",
                            written.len(),
                            batches.len()
                        ),
                    ));
                }
                Err(e) if e.is_transient() && retry < self.retry.attempts => {
                    retry += 1;
                    let delay = self.retry.delay_for(retry);
                    tracing::warn!(
                        "⚠️ Write failed (batch offset {}), retry {}/{} in {:?}: {}",
                        batch_offset,
                        retry,
                        self.retry.attempts,
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(self.load_error(batch_offset, e)),
            }
        }
    }

    fn load_error(&self, batch_offset: u64, cause: impl ToString) -> EtlError {
        EtlError::LoadError {
            table: format!("{}, {}", self.valid.table, self.invalid.table),
            batch_offset,
            message: cause.to_string(),
        }
    }
}

fn field_names(schema: &Schema) -> Vec<String> {
    schema.fields().iter().map(|spec| spec.name.clone()).collect()
}
