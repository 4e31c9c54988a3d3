use crate::domain::model::{Batch, RawRecord};
use crate::utils::error::{EtlError, Result};
use csv::{ByteRecord, Reader, ReaderBuilder};
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::path::{Path, PathBuf};

/// 以固定大小的批次逐步讀取分隔檔。
///
/// 檔案由 Extractor 持有，讀完或被丟棄時即關閉，
/// 因此記憶體用量只和批次大小有關，和檔案大小無關。
pub struct Extractor {
    path: PathBuf,
    reader: Option<Reader<File>>,
    headers: Vec<String>,
    batch_size: usize,
    next_offset: u64,
    record: ByteRecord,
}

impl std::fmt::Debug for Extractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Extractor")
            .field("path", &self.path)
            .field("open", &self.reader.is_some())
            .field("headers", &self.headers)
            .field("batch_size", &self.batch_size)
            .field("next_offset", &self.next_offset)
            .finish()
    }
}

impl Extractor {
    pub fn open<P: AsRef<Path>>(path: P, separator: u8, batch_size: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let path_text = path.display().to_string();

        if batch_size == 0 {
            return Err(EtlError::extract(path_text, "batch size must be at least 1"));
        }

        let file = File::open(&path).map_err(|e| EtlError::extract(&path_text, e.to_string()))?;
        let mut reader = ReaderBuilder::new()
            .delimiter(separator)
            .has_headers(true)
            .flexible(true)
            .from_reader(file);

        let headers: Vec<String> = reader
            .headers()
            .map_err(|e| EtlError::extract(&path_text, format!("unreadable header: {}", e)))?
            .iter()
            .map(str::to_string)
            .collect();

        if headers.iter().all(|name| name.trim().is_empty()) {
            return Err(EtlError::extract(path_text, "header row is empty"));
        }

        // 重複欄名會讓後面的值覆蓋前面的值
        let mut seen = HashSet::with_capacity(headers.len());
        if let Some(duplicate) = headers
            .iter()
            .filter(|name| !name.is_empty())
            .find(|name| !seen.insert(name.as_str()))
        {
            return Err(EtlError::extract(
                path_text,
                format!("duplicate column '{}' in header", duplicate),
            ));
        }

        tracing::debug!("Opened {} with {} columns", path_text, headers.len());

        Ok(Self {
            path,
            reader: Some(reader),
            headers,
            batch_size,
            next_offset: 0,
            record: ByteRecord::new(),
        })
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    /// 下一個批次的起始位置 (已讀取的資料列數)
    pub fn next_offset(&self) -> u64 {
        self.next_offset
    }

    pub fn is_open(&self) -> bool {
        self.reader.is_some()
    }

    /// 跳過前 n 筆資料列，用於從失敗的批次位置續跑；回傳實際跳過的列數
    pub fn skip_rows(&mut self, rows: u64) -> Result<u64> {
        let mut skipped = 0;
        while skipped < rows {
            if self.read_next()?.is_none() {
                break;
            }
            skipped += 1;
        }
        Ok(skipped)
    }

    fn read_next(&mut self) -> Result<Option<RawRecord>> {
        let Some(reader) = self.reader.as_mut() else {
            return Ok(None);
        };

        let has_record = reader.read_byte_record(&mut self.record).map_err(|e| {
            EtlError::extract(self.path.display().to_string(), format!("read failed: {}", e))
        })?;

        if !has_record {
            // 讀完即釋放檔案
            self.reader = None;
            return Ok(None);
        }

        self.next_offset += 1;
        Ok(Some(self.to_raw_record()))
    }

    fn to_raw_record(&self) -> RawRecord {
        let row_number = self
            .record
            .position()
            .map(|position| position.line())
            .unwrap_or(self.next_offset + 1);

        let mut values = HashMap::with_capacity(self.headers.len());
        let mut invalid_utf8 = false;

        for (name, bytes) in self.headers.iter().zip(self.record.iter()) {
            let value = match std::str::from_utf8(bytes) {
                Ok(text) => text.to_string(),
                Err(_) => {
                    invalid_utf8 = true;
                    String::from_utf8_lossy(bytes).into_owned()
                }
            };
            values.insert(name.clone(), value);
        }

        let mut record = RawRecord::new(row_number, values);

        if self.record.len() != self.headers.len() {
            record = record.with_defect(format!(
                "expected {} columns, found {}",
                self.headers.len(),
                self.record.len()
            ));
        } else if invalid_utf8 {
            record = record.with_defect("row contains invalid UTF-8");
        }

        record
    }

    fn read_batch(&mut self) -> Result<Option<Batch<RawRecord>>> {
        let offset = self.next_offset;
        let mut records = Vec::with_capacity(self.batch_size);

        while records.len() < self.batch_size {
            match self.read_next()? {
                Some(record) => records.push(record),
                None => break,
            }
        }

        if records.is_empty() {
            return Ok(None);
        }

        Ok(Some(Batch { offset, records }))
    }
}

impl Iterator for Extractor {
    type Item = Result<Batch<RawRecord>>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.read_batch() {
            Ok(batch) => batch.map(Ok),
            Err(e) => {
                // 讀取錯誤後不再產生批次
                self.reader = None;
                Some(Err(e))
            }
        }
    }
}
