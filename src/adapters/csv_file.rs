use crate::domain::model::TypedValue;
use crate::domain::ports::{Column, TableBatch, TableWriter};
use crate::utils::error::{EtlError, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// 每個資料表一個 CSV 檔 (`<dir>/<table>.csv`)。
///
/// 批次先完整序列化到記憶體，再一次附加到檔案，
/// 序列化失敗時檔案不會有任何變動；附加失敗時已附加的檔案會截回原長度。
#[derive(Debug, Clone)]
pub struct CsvFileWriter {
    base_path: PathBuf,
    delimiter: u8,
}

impl CsvFileWriter {
    pub fn new<P: AsRef<Path>>(base_path: P, delimiter: u8) -> Self {
        Self {
            base_path: base_path.as_ref().to_path_buf(),
            delimiter,
        }
    }

    pub fn table_path(&self, table: &str) -> PathBuf {
        self.base_path.join(format!("{}.csv", table))
    }

    fn serialize(
        &self,
        columns: &[Column],
        rows: &[Vec<TypedValue>],
        with_header: bool,
    ) -> Result<Vec<u8>> {
        let mut writer = csv::WriterBuilder::new()
            .delimiter(self.delimiter)
            .from_writer(Vec::new());

        if with_header {
            writer.write_record(columns.iter().map(|c| c.name.as_str()))?;
        }

        for row in rows {
            if row.len() != columns.len() {
                return Err(EtlError::permanent_storage(format!(
                    "row has {} values, expected {}",
                    row.len(),
                    columns.len()
                )));
            }
            writer.write_record(row.iter().map(|v| v.to_text().unwrap_or_default()))?;
        }

        writer
            .into_inner()
            .map_err(|e| EtlError::permanent_storage(format!("CSV buffer error: {}", e)))
    }

    async fn current_len(path: &Path) -> Result<u64> {
        match tokio::fs::metadata(path).await {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    async fn append(path: &Path, data: &[u8]) -> Result<()> {
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        file.write_all(data).await?;
        file.flush().await?;
        Ok(())
    }

    /// 把已附加的檔案截回寫入前的長度
    async fn rollback(appended: &[(PathBuf, u64)]) {
        for (path, len) in appended {
            let truncated = match tokio::fs::OpenOptions::new().write(true).open(path).await {
                Ok(file) => file.set_len(*len).await,
                Err(e) => Err(e),
            };
            if let Err(e) = truncated {
                tracing::error!("❌ Could not roll back {}: {}", path.display(), e);
            }
        }
    }
}

#[async_trait]
impl TableWriter for CsvFileWriter {
    async fn write_tables(&self, batches: &[TableBatch<'_>]) -> Result<Vec<u64>> {
        tokio::fs::create_dir_all(&self.base_path).await?;

        // 全部序列化成功後才動到檔案
        let mut pending = Vec::with_capacity(batches.len());
        for batch in batches {
            let path = self.table_path(batch.table);
            let len = Self::current_len(&path).await?;
            let data = self.serialize(batch.columns, batch.rows, len == 0)?;
            pending.push((path, len, data));
        }

        let mut appended: Vec<(PathBuf, u64)> = Vec::with_capacity(pending.len());
        for (path, len, data) in &pending {
            if let Err(e) = Self::append(path, data).await {
                appended.push((path.clone(), *len));
                Self::rollback(&appended).await;
                return Err(e);
            }
            appended.push((path.clone(), *len));
            tracing::debug!("Appended {} bytes to {}", data.len(), path.display());
        }

        Ok(batches.iter().map(|batch| batch.rows.len() as u64).collect())
    }
}
