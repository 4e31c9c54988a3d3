//! PostgreSQL 寫入端
//!
//! 每個批次使用一個交易，以 binary COPY 寫入有效與無效資料表；
//! 任何一列失敗都會回滾整個批次。
//! 連線中斷後下一次寫入會自動重新連線。

use crate::config::PsqlDbConfig;
use crate::domain::model::TypedValue;
use crate::domain::ports::{Column, ColumnType, TableBatch, TableWriter};
use crate::utils::error::{EtlError, Result};
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use tokio::sync::Mutex;
use tokio_postgres::binary_copy::BinaryCopyInWriter;
use tokio_postgres::types::{ToSql, Type};
use tokio_postgres::{Client, NoTls};

type SqlParam = Box<dyn ToSql + Sync + Send>;

pub struct PostgresWriter {
    config: tokio_postgres::Config,
    client: Mutex<Option<Client>>,
}

impl PostgresWriter {
    /// 建立連線；連線失敗屬於載入階段的錯誤
    pub async fn connect(db: &PsqlDbConfig) -> Result<Self> {
        let mut config = tokio_postgres::Config::new();
        config
            .host(&db.host)
            .port(db.port())
            .dbname(&db.dbname)
            .user(&db.user)
            .application_name("event-etl");
        if let Some(pwd) = &db.pwd {
            config.password(pwd);
        }

        let writer = Self {
            config,
            client: Mutex::new(None),
        };

        let client = writer.open_client().await?;
        *writer.client.lock().await = Some(client);

        tracing::info!(
            "🔌 Connected to PostgreSQL {}:{}/{}",
            db.host,
            db.port(),
            db.dbname
        );
        Ok(writer)
    }

    async fn open_client(&self) -> Result<Client> {
        let (client, connection) = self.config.connect(NoTls).await.map_err(classify)?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!("PostgreSQL connection error: {}", e);
            }
        });

        Ok(client)
    }
}

#[async_trait]
impl TableWriter for PostgresWriter {
    async fn write_tables(&self, batches: &[TableBatch<'_>]) -> Result<Vec<u64>> {
        let mut guard = self.client.lock().await;

        if guard.as_ref().map(Client::is_closed).unwrap_or(true) {
            tracing::warn!("⚠️ PostgreSQL connection lost, reconnecting");
            *guard = Some(self.open_client().await?);
        }
        let client = guard
            .as_mut()
            .ok_or_else(|| EtlError::transient_storage("no PostgreSQL connection"))?;

        let transaction = client.transaction().await.map_err(classify)?;

        let mut written = Vec::with_capacity(batches.len());
        for batch in batches {
            let sql = copy_sql(batch.table, batch.columns);
            let sink = transaction.copy_in(sql.as_str()).await.map_err(classify)?;
            let types: Vec<Type> = batch.columns.iter().map(|c| sql_type(c.column_type)).collect();
            let writer = BinaryCopyInWriter::new(sink, &types);
            tokio::pin!(writer);

            for row in batch.rows {
                let params = to_params(row, batch.columns)?;
                let refs: Vec<&(dyn ToSql + Sync)> = params
                    .iter()
                    .map(|p| p.as_ref() as &(dyn ToSql + Sync))
                    .collect();
                writer.as_mut().write(&refs).await.map_err(classify)?;
            }

            let rows = writer.finish().await.map_err(classify)?;
            tracing::debug!("COPY {} rows into {}", rows, batch.table);
            written.push(rows);
        }

        // 任一資料表失敗時交易在 drop 時回滾
        transaction.commit().await.map_err(classify)?;
        Ok(written)
    }
}

/// 連線類錯誤、序列化衝突與死結可重試，其餘 (如 SQL 或資料錯誤) 不重試
fn classify(e: tokio_postgres::Error) -> EtlError {
    let transient = match e.code() {
        Some(state) => {
            let code = state.code();
            code.starts_with("08")
                || matches!(code, "40001" | "40P01" | "53300" | "57P01" | "57P02" | "57P03")
        }
        None => {
            e.is_closed()
                || std::error::Error::source(&e)
                    .map(|source| source.is::<std::io::Error>())
                    .unwrap_or(false)
        }
    };

    if transient {
        EtlError::transient_storage(e.to_string())
    } else {
        EtlError::permanent_storage(e.to_string())
    }
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// `schema.table` 形式的資料表名稱逐段加上引號
fn quote_table(table: &str) -> String {
    table
        .split('.')
        .map(quote_identifier)
        .collect::<Vec<_>>()
        .join(".")
}

fn copy_sql(table: &str, columns: &[Column]) -> String {
    let names: Vec<String> = columns.iter().map(|c| quote_identifier(&c.name)).collect();

    format!(
        "COPY {} ({}) FROM STDIN (FORMAT binary)",
        quote_table(table),
        names.join(", ")
    )
}

fn sql_type(column_type: ColumnType) -> Type {
    match column_type {
        ColumnType::Text => Type::TEXT,
        ColumnType::Date => Type::DATE,
        ColumnType::Timestamp => Type::TIMESTAMP,
    }
}

fn to_params(row: &[TypedValue], columns: &[Column]) -> Result<Vec<SqlParam>> {
    if row.len() != columns.len() {
        return Err(EtlError::permanent_storage(format!(
            "row has {} values, expected {}",
            row.len(),
            columns.len()
        )));
    }

    row.iter()
        .zip(columns)
        .map(|(value, column)| -> Result<SqlParam> {
            match (column.column_type, value) {
                (ColumnType::Text, value) => Ok(Box::new(value.to_text())),
                (ColumnType::Date, TypedValue::Date(date)) => Ok(Box::new(Some(*date))),
                (ColumnType::Date, TypedValue::Null) => Ok(Box::new(None::<NaiveDate>)),
                (ColumnType::Timestamp, TypedValue::DateTime(ts)) => Ok(Box::new(Some(*ts))),
                (ColumnType::Timestamp, TypedValue::Null) => Ok(Box::new(None::<NaiveDateTime>)),
                (column_type, value) => Err(EtlError::permanent_storage(format!(
                    "value {:?} does not fit {:?} column {}",
                    value, column_type, column.name
                ))),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_sql_quotes_identifiers() {
        let columns = vec![
            Column::new("dim_date_id", ColumnType::Date),
            Column::new("user \"id\"", ColumnType::Text),
        ];
        assert_eq!(
            copy_sql("public.events", &columns),
            r#"COPY "public"."events" ("dim_date_id", "user ""id""") FROM STDIN (FORMAT binary)"#
        );
    }

    #[test]
    fn test_binary_copy_types_follow_columns() {
        assert_eq!(sql_type(ColumnType::Text), Type::TEXT);
        assert_eq!(sql_type(ColumnType::Date), Type::DATE);
        assert_eq!(sql_type(ColumnType::Timestamp), Type::TIMESTAMP);
    }

    #[test]
    fn test_params_follow_column_types() {
        let columns = vec![
            Column::new("d", ColumnType::Date),
            Column::new("t", ColumnType::Timestamp),
            Column::new("s", ColumnType::Text),
        ];
        let row = vec![
            TypedValue::Date(NaiveDate::from_ymd_opt(2021, 1, 5).unwrap()),
            TypedValue::Null,
            TypedValue::Text("42".to_string()),
        ];
        assert_eq!(to_params(&row, &columns).unwrap().len(), 3);

        let wrong = vec![
            TypedValue::Text("2021-01-05".to_string()),
            TypedValue::Null,
            TypedValue::Null,
        ];
        assert!(to_params(&wrong, &columns).is_err());
        assert!(to_params(&row[..2], &columns).is_err());
    }
}
