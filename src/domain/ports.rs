use crate::domain::model::TypedValue;
use crate::utils::error::Result;
use async_trait::async_trait;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Text,
    Date,
    Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub column_type: ColumnType,
}

impl Column {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
        }
    }
}

/// 要寫入某個資料表的一批資料列
#[derive(Debug, Clone, Copy)]
pub struct TableBatch<'a> {
    pub table: &'a str,
    pub columns: &'a [Column],
    pub rows: &'a [Vec<TypedValue>],
}

/// 目的地資料表的寫入介面
#[async_trait]
pub trait TableWriter: Send + Sync {
    /// 以單一交易寫入所有批次，回傳各批次的寫入列數 (順序同輸入)。
    /// 任何一個批次失敗時全部不得留下資料；可重試的錯誤以 `EtlError::StorageError { transient: true }` 回報。
    async fn write_tables(&self, batches: &[TableBatch<'_>]) -> Result<Vec<u64>>;

    async fn write_batch(
        &self,
        table: &str,
        columns: &[Column],
        rows: &[Vec<TypedValue>],
    ) -> Result<u64> {
        let written = self
            .write_tables(&[TableBatch {
                table,
                columns,
                rows,
            }])
            .await?;
        Ok(written.into_iter().sum())
    }
}

#[async_trait]
impl<W: TableWriter + ?Sized> TableWriter for std::sync::Arc<W> {
    async fn write_tables(&self, batches: &[TableBatch<'_>]) -> Result<Vec<u64>> {
        (**self).write_tables(batches).await
    }
}
