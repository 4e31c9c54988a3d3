use crate::config::ImportConfig;
use crate::core::extract::Extractor;
use crate::core::load::{Loader, RetryPolicy};
use crate::core::schema::Schema;
use crate::core::transform::transform;
use crate::domain::model::{Batch, LoadResult, RawRecord};
use crate::domain::ports::TableWriter;
use crate::utils::error::{EtlError, Result};
use crate::utils::monitor::SystemMonitor;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunState {
    Idle,
    Extracting,
    Transforming,
    Loading,
    Done,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// 續跑時跳過的資料列數
    pub rows_skipped: u64,
    pub rows_extracted: u64,
    pub rows_valid: u64,
    pub rows_invalid: u64,
    pub batches: u64,
    pub rows_written: BTreeMap<String, u64>,
    /// 下一個未提交的資料列位置，可作為 --resume-from
    pub next_offset: u64,
    pub state: RunState,
}

impl RunSummary {
    fn new(valid_table: &str, invalid_table: &str) -> Self {
        let mut rows_written = BTreeMap::new();
        rows_written.insert(valid_table.to_string(), 0);
        rows_written.insert(invalid_table.to_string(), 0);

        Self {
            rows_skipped: 0,
            rows_extracted: 0,
            rows_valid: 0,
            rows_invalid: 0,
            batches: 0,
            rows_written,
            next_offset: 0,
            state: RunState::Idle,
        }
    }

    fn record_written(&mut self, result: &LoadResult) {
        *self.rows_written.entry(result.table.clone()).or_insert(0) += result.rows_written;
    }

    pub fn total_written(&self) -> u64 {
        self.rows_written.values().sum()
    }
}

/// 單一輸入檔的管線：逐批 Extract → Transform → Load
pub struct EtlEngine<W: TableWriter> {
    input: PathBuf,
    schema: Arc<Schema>,
    writer: Arc<W>,
    valid_table: String,
    invalid_table: String,
    separator: u8,
    batch_size: usize,
    retry: RetryPolicy,
    resume_from: u64,
    prefetch: bool,
    monitor: SystemMonitor,
    state: RunState,
}

impl<W: TableWriter> EtlEngine<W> {
    pub fn new(
        input: impl Into<PathBuf>,
        schema: Schema,
        writer: Arc<W>,
        config: &ImportConfig,
    ) -> Result<Self> {
        Ok(Self {
            input: input.into(),
            schema: Arc::new(schema),
            writer,
            valid_table: config.destination_table.clone(),
            invalid_table: config.invalid_data_table.clone(),
            separator: config.separator_byte()?,
            batch_size: config.batch_size(),
            retry: RetryPolicy::new(
                config.retry_attempts(),
                Duration::from_millis(config.retry_delay_ms()),
            ),
            resume_from: 0,
            prefetch: config.prefetch(),
            monitor: SystemMonitor::new(false),
            state: RunState::Idle,
        })
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_resume_from(mut self, offset: u64) -> Self {
        self.resume_from = offset;
        self
    }

    pub fn with_prefetch(mut self, prefetch: bool) -> Self {
        self.prefetch = prefetch;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_monitoring(mut self, enabled: bool) -> Self {
        self.monitor = SystemMonitor::new(enabled);
        self
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub async fn run(&mut self) -> Result<RunSummary> {
        tracing::info!(
            "🚀 Starting ETL for {} (batch size {}, prefetch {})",
            self.input.display(),
            self.batch_size,
            self.prefetch
        );

        match self.execute().await {
            Ok(mut summary) => {
                self.transition(RunState::Done);
                summary.state = RunState::Done;
                self.monitor.log_final_stats();
                tracing::info!(
                    "✅ Finished: {} extracted, {} valid, {} invalid in {} batches",
                    summary.rows_extracted,
                    summary.rows_valid,
                    summary.rows_invalid,
                    summary.batches
                );
                Ok(summary)
            }
            Err(e) => {
                self.transition(RunState::Failed);
                tracing::error!("❌ ETL failed during {} stage: {}", e.stage(), e);
                Err(e)
            }
        }
    }

    async fn execute(&mut self) -> Result<RunSummary> {
        let loader = Loader::new(
            self.writer.clone(),
            &self.schema,
            self.valid_table.clone(),
            self.invalid_table.clone(),
            self.retry,
        );
        let mut summary = RunSummary::new(&self.valid_table, &self.invalid_table);

        self.transition(RunState::Extracting);
        let mut extractor = Extractor::open(&self.input, self.separator, self.batch_size)?;

        if self.resume_from > 0 {
            summary.rows_skipped = extractor.skip_rows(self.resume_from)?;
            tracing::info!("⏩ Resuming after {} rows", summary.rows_skipped);
        }
        summary.next_offset = extractor.next_offset();

        if self.prefetch {
            self.run_prefetched(extractor, &loader, &mut summary).await?;
        } else {
            loop {
                self.transition(RunState::Extracting);
                let Some(batch) = extractor.next() else {
                    break;
                };
                self.process_batch(batch?, &loader, &mut summary).await?;
            }
        }

        // 計數守恆：違反代表程式錯誤而非資料錯誤
        assert_eq!(
            summary.rows_valid + summary.rows_invalid,
            summary.rows_extracted,
            "every extracted row must be classified exactly once"
        );
        assert_eq!(
            summary.total_written(),
            summary.rows_extracted,
            "every extracted row must be written to exactly one table"
        );

        Ok(summary)
    }

    /// 在 blocking 執行緒上預先讀取下一批，佇列深度為一。
    /// 載入失敗時丟棄接收端，讀取端下一次送出即失敗並關閉檔案。
    async fn run_prefetched(
        &mut self,
        extractor: Extractor,
        loader: &Loader<W>,
        summary: &mut RunSummary,
    ) -> Result<()> {
        let (tx, mut rx) = mpsc::channel::<Result<Batch<RawRecord>>>(1);

        let producer = tokio::task::spawn_blocking(move || {
            for batch in extractor {
                if tx.blocking_send(batch).is_err() {
                    tracing::debug!("Consumer stopped, abandoning extraction");
                    break;
                }
            }
        });

        let result = async {
            loop {
                self.transition(RunState::Extracting);
                let Some(batch) = rx.recv().await else {
                    break;
                };
                self.process_batch(batch?, loader, summary).await?;
            }
            Ok::<(), EtlError>(())
        }
        .await;

        drop(rx);
        if let Err(e) = producer.await {
            tracing::warn!("⚠️ Extraction task ended abnormally: {}", e);
        }

        result
    }

    async fn process_batch(
        &mut self,
        batch: Batch<RawRecord>,
        loader: &Loader<W>,
        summary: &mut RunSummary,
    ) -> Result<()> {
        let offset = batch.offset;
        let extracted = batch.len();

        self.transition(RunState::Transforming);
        let partition = transform(batch, &self.schema);

        self.transition(RunState::Loading);
        let [valid_result, invalid_result] = loader.load(&partition).await?;

        summary.batches += 1;
        summary.rows_extracted += extracted as u64;
        summary.rows_valid += partition.valid.len() as u64;
        summary.rows_invalid += partition.invalid.len() as u64;
        summary.record_written(&valid_result);
        summary.record_written(&invalid_result);
        summary.next_offset = offset + extracted as u64;

        tracing::info!(
            "📦 Batch @{}: {} rows, {} valid, {} invalid",
            offset,
            extracted,
            partition.valid.len(),
            partition.invalid.len()
        );
        self.monitor.log_batch_stats(offset, extracted);

        self.transition(RunState::Idle);
        Ok(())
    }

    fn transition(&mut self, next: RunState) {
        if self.state != next {
            tracing::debug!("State {:?} -> {:?}", self.state, next);
            self.state = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::{FailureMode, MemoryWriter};
    use crate::config::EtlConfig;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const CONFIG: &str = r#"
[psql_db]
host = "localhost"
dbname = "events"
user = "etl"

[data_import]
separator = ","
destination_table = "events"
invalid_data_table = "events_invalid"
batch_size = 2
retry_attempts = 0

[data_import.fields.user_id]
not_null = true
"#;

    fn input(rows: &[&str]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "user_id,note").unwrap();
        for row in rows {
            writeln!(file, "{}", row).unwrap();
        }
        file
    }

    fn engine(file: &NamedTempFile, writer: Arc<MemoryWriter>) -> EtlEngine<MemoryWriter> {
        let config = EtlConfig::from_toml_str(CONFIG).unwrap();
        let schema = Schema::load(&config.data_import).unwrap();
        EtlEngine::new(file.path(), schema, writer, &config.data_import).unwrap()
    }

    #[tokio::test]
    async fn test_run_splits_and_counts() {
        let file = input(&["1,a", ",b", "3,c", "4,d", ",e"]);
        let writer = Arc::new(MemoryWriter::new());
        let mut engine = engine(&file, writer.clone());

        let summary = engine.run().await.unwrap();

        assert_eq!(summary.rows_extracted, 5);
        assert_eq!(summary.rows_valid, 3);
        assert_eq!(summary.rows_invalid, 2);
        assert_eq!(summary.batches, 3);
        assert_eq!(summary.next_offset, 5);
        assert_eq!(summary.rows_written["events"], 3);
        assert_eq!(summary.rows_written["events_invalid"], 2);
        assert_eq!(summary.state, RunState::Done);
        assert_eq!(engine.state(), RunState::Done);
        assert_eq!(writer.row_count("events"), 3);
    }

    #[tokio::test]
    async fn test_load_failure_is_fatal_and_keeps_committed_batches() {
        let file = input(&["1,a", "2,b", "3,c", "4,d"]);
        // 第一批寫入成功，第二批失敗
        let writer = Arc::new(MemoryWriter::new().fail_after(1, 1, FailureMode::Permanent));
        let mut engine = engine(&file, writer.clone());

        let err = engine.run().await.unwrap_err();

        assert!(matches!(err, EtlError::LoadError { batch_offset: 2, .. }));
        assert_eq!(engine.state(), RunState::Failed);
        assert_eq!(writer.row_count("events"), 2);
    }

    #[tokio::test]
    async fn test_resume_after_failed_batch_writes_each_row_once() {
        let file = input(&["1,a", ",b"]);
        let writer = Arc::new(MemoryWriter::new().fail_next(1, FailureMode::Permanent));

        let err = engine(&file, writer.clone())
            .with_batch_size(10)
            .run()
            .await
            .unwrap_err();
        let EtlError::LoadError { batch_offset, .. } = err else {
            panic!("unexpected error: {err}");
        };
        assert_eq!(batch_offset, 0);
        assert_eq!(writer.row_count("events"), 0);
        assert_eq!(writer.row_count("events_invalid"), 0);

        let summary = engine(&file, writer.clone())
            .with_batch_size(10)
            .with_resume_from(batch_offset)
            .run()
            .await
            .unwrap();

        assert_eq!(summary.rows_extracted, 2);
        assert_eq!(writer.row_count("events"), 1);
        assert_eq!(writer.row_count("events_invalid"), 1);
    }

    #[tokio::test]
    async fn test_transient_failure_depends_on_retry_policy() {
        let file = input(&["1,a", "2,b"]);

        let writer = Arc::new(MemoryWriter::new().fail_next(1, FailureMode::Transient));
        let summary = engine(&file, writer.clone())
            .with_retry_policy(RetryPolicy::new(2, Duration::from_millis(1)))
            .run()
            .await
            .unwrap();
        assert_eq!(summary.rows_valid, 2);
        assert_eq!(writer.row_count("events"), 2);

        let writer = Arc::new(MemoryWriter::new().fail_next(1, FailureMode::Transient));
        let err = engine(&file, writer.clone())
            .with_retry_policy(RetryPolicy::none())
            .run()
            .await
            .unwrap_err();
        assert!(matches!(err, EtlError::LoadError { batch_offset: 0, .. }));
        assert_eq!(writer.row_count("events"), 0);
    }

    #[tokio::test]
    async fn test_prefetch_matches_sequential() {
        let file = input(&["1,a", ",b", "3,c", "4,d", ",e", "6,f", "7,g"]);

        let sequential = engine(&file, Arc::new(MemoryWriter::new()))
            .run()
            .await
            .unwrap();
        let prefetched = engine(&file, Arc::new(MemoryWriter::new()))
            .with_prefetch(true)
            .run()
            .await
            .unwrap();

        assert_eq!(sequential, prefetched);
    }

    #[tokio::test]
    async fn test_prefetch_failure_stops_extraction() {
        let file = input(&["1,a", "2,b", "3,c", "4,d", "5,e", "6,f"]);
        let writer = Arc::new(MemoryWriter::new().fail_next(1, FailureMode::Permanent));

        let err = engine(&file, writer.clone())
            .with_prefetch(true)
            .run()
            .await
            .unwrap_err();

        assert!(matches!(err, EtlError::LoadError { batch_offset: 0, .. }));
        assert_eq!(writer.write_calls(), 1);
    }

    #[tokio::test]
    async fn test_resume_skips_committed_rows() {
        let file = input(&["1,a", "2,b", "3,c", "4,d", "5,e"]);
        let writer = Arc::new(MemoryWriter::new());

        let summary = engine(&file, writer.clone())
            .with_resume_from(2)
            .run()
            .await
            .unwrap();

        assert_eq!(summary.rows_skipped, 2);
        assert_eq!(summary.rows_extracted, 3);
        assert_eq!(summary.next_offset, 5);
        assert_eq!(
            writer.rows("events")[0],
            vec![crate::domain::model::TypedValue::Text("3".to_string())]
        );
    }

    #[tokio::test]
    async fn test_missing_input_is_extract_error() {
        let config = EtlConfig::from_toml_str(CONFIG).unwrap();
        let schema = Schema::load(&config.data_import).unwrap();
        let mut engine = EtlEngine::new(
            "/no/such/events.csv",
            schema,
            Arc::new(MemoryWriter::new()),
            &config.data_import,
        )
        .unwrap();

        assert!(matches!(
            engine.run().await.unwrap_err(),
            EtlError::ExtractError { .. }
        ));
        assert_eq!(engine.state(), RunState::Failed);
    }
}
