use crate::domain::model::TypedValue;
use crate::domain::ports::{TableBatch, TableWriter};
use crate::utils::error::{EtlError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureMode {
    Transient,
    Permanent,
}

#[derive(Debug, Default)]
struct FailurePlan {
    /// 開始失敗前允許的成功寫入次數
    succeed_first: usize,
    remaining: u32,
    mode: Option<FailureMode>,
}

/// 記憶體中的資料表，用於測試與 dry run。
/// 每次寫入整批附加或整批失敗。
#[derive(Debug, Default)]
pub struct MemoryWriter {
    tables: Mutex<HashMap<String, Vec<Vec<TypedValue>>>>,
    counts: Mutex<HashMap<String, u64>>,
    retain_rows: bool,
    failures: Mutex<FailurePlan>,
    write_calls: AtomicUsize,
    successful_writes: AtomicUsize,
}

impl MemoryWriter {
    pub fn new() -> Self {
        Self {
            retain_rows: true,
            ..Default::default()
        }
    }

    /// 只計數不保留資料列，記憶體用量固定
    pub fn discarding() -> Self {
        Self {
            retain_rows: false,
            ..Default::default()
        }
    }

    /// 接下來的 n 次寫入失敗
    pub fn fail_next(self, times: u32, mode: FailureMode) -> Self {
        self.fail_after(0, times, mode)
    }

    /// 前 `successful` 次寫入成功，之後的 `times` 次寫入失敗
    pub fn fail_after(self, successful: usize, times: u32, mode: FailureMode) -> Self {
        if let Ok(mut plan) = self.failures.lock() {
            *plan = FailurePlan {
                succeed_first: successful,
                remaining: times,
                mode: Some(mode),
            };
        }
        self
    }

    pub fn rows(&self, table: &str) -> Vec<Vec<TypedValue>> {
        self.tables
            .lock()
            .map(|tables| tables.get(table).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    pub fn row_count(&self, table: &str) -> u64 {
        self.counts
            .lock()
            .map(|counts| counts.get(table).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    pub fn write_calls(&self) -> usize {
        self.write_calls.load(Ordering::SeqCst)
    }

    fn planned_failure(&self) -> Option<FailureMode> {
        let mut plan = self.failures.lock().ok()?;
        let mode = plan.mode?;
        if self.successful_writes.load(Ordering::SeqCst) < plan.succeed_first || plan.remaining == 0
        {
            return None;
        }
        plan.remaining -= 1;
        Some(mode)
    }
}

#[async_trait]
impl TableWriter for MemoryWriter {
    async fn write_tables(&self, batches: &[TableBatch<'_>]) -> Result<Vec<u64>> {
        self.write_calls.fetch_add(1, Ordering::SeqCst);

        let names: Vec<&str> = batches.iter().map(|batch| batch.table).collect();
        match self.planned_failure() {
            Some(FailureMode::Transient) => {
                return Err(EtlError::transient_storage(format!(
                    "simulated connection loss writing {}",
                    names.join(", ")
                )))
            }
            Some(FailureMode::Permanent) => {
                return Err(EtlError::permanent_storage(format!(
                    "simulated rejection writing {}",
                    names.join(", ")
                )))
            }
            None => {}
        }

        // 先檢查全部批次，再一次套用
        for batch in batches {
            if let Some(row) = batch.rows.iter().find(|row| row.len() != batch.columns.len()) {
                return Err(EtlError::permanent_storage(format!(
                    "row has {} values but {} has {} columns",
                    row.len(),
                    batch.table,
                    batch.columns.len()
                )));
            }
        }

        let mut tables = self
            .tables
            .lock()
            .map_err(|_| EtlError::permanent_storage("memory table lock poisoned"))?;
        let mut counts = self
            .counts
            .lock()
            .map_err(|_| EtlError::permanent_storage("memory table lock poisoned"))?;

        let mut written = Vec::with_capacity(batches.len());
        for batch in batches {
            if self.retain_rows {
                tables
                    .entry(batch.table.to_string())
                    .or_default()
                    .extend(batch.rows.iter().cloned());
            }
            *counts.entry(batch.table.to_string()).or_insert(0) += batch.rows.len() as u64;
            written.push(batch.rows.len() as u64);
        }

        self.successful_writes.fetch_add(1, Ordering::SeqCst);
        Ok(written)
    }
}
