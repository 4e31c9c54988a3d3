use anyhow::Result;
use event_etl::utils::validation::Validate;
use event_etl::{CsvFileWriter, EtlConfig, EtlEngine, Schema};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

fn write_config(dir: &Path, input_dir: &Path) -> Result<std::path::PathBuf> {
    let config = serde_json::json!({
        "psql_db": {
            "host": "localhost",
            "dbname": "analytics",
            "user": "etl",
            "password": "secret"
        },
        "data_import": {
            "csv_separator": ";",
            "destination_table": "events",
            "invalid_data_table": "events_invalid",
            "input_dir": input_dir.to_string_lossy(),
            "batch_size": 2,
            "prefetch": true,
            "fields": {
                "dim_date_id": { "type": "date", "format": "%d/%m/%Y" },
                "user_id": { "not_null": true },
                "event_name": {}
            }
        }
    });

    let path = dir.join("etl-config.json");
    fs::write(&path, serde_json::to_string_pretty(&config)?)?;
    Ok(path)
}

fn read_table(path: &Path) -> Result<Vec<Vec<String>>> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b';')
        .has_headers(false)
        .from_path(path)?;
    let mut rows = Vec::new();
    for record in reader.records() {
        rows.push(record?.iter().map(str::to_string).collect());
    }
    Ok(rows)
}

#[tokio::test]
async fn test_json_config_to_csv_tables() -> Result<()> {
    let work = TempDir::new()?;
    let input_dir = work.path().join("data");
    let output_dir = work.path().join("out");
    fs::create_dir_all(&input_dir)?;

    fs::write(
        input_dir.join("events.csv"),
        "user_id;dim_date_id;event_name;ignored\n\
         1;05/01/2021;click;x\n\
         ;06/01/2021;view;x\n\
         3;2021-01-07;buy;x\n\
         4;08/01/2021;;x\n\
         5;09/01/2021;click;x\n",
    )?;

    let config_path = write_config(work.path(), &input_dir)?;
    let config = EtlConfig::from_file(&config_path)?;
    config.validate()?;

    let schema = Schema::load(&config.data_import)?;
    let writer = Arc::new(CsvFileWriter::new(
        &output_dir,
        config.data_import.separator_byte()?,
    ));
    let input = config.data_import.resolve_input("events.csv");

    let summary = EtlEngine::new(input, schema, writer.clone(), &config.data_import)?
        .run()
        .await?;

    assert_eq!(summary.rows_extracted, 5);
    assert_eq!(summary.rows_valid, 3);
    assert_eq!(summary.rows_invalid, 2);
    assert_eq!(summary.batches, 3);

    // 欄位順序依照設定檔，而非輸入檔
    let valid = read_table(&writer.table_path("events"))?;
    assert_eq!(valid[0], vec!["dim_date_id", "user_id", "event_name"]);
    assert_eq!(valid[1], vec!["2021-01-05", "1", "click"]);
    assert_eq!(valid[2], vec!["2021-01-08", "4", ""]);
    assert_eq!(valid.len(), 4);

    let invalid = read_table(&writer.table_path("events_invalid"))?;
    assert_eq!(
        invalid[0],
        vec!["dim_date_id", "user_id", "event_name", "failure_reasons"]
    );
    assert_eq!(invalid[1][0], "06/01/2021");
    assert_eq!(
        invalid[1][3],
        r#"["missing required field: user_id"]"#
    );
    assert_eq!(invalid[2][0], "2021-01-07");
    assert_eq!(
        invalid[2][3],
        r#"["invalid date value for dim_date_id: 2021-01-07"]"#
    );
    Ok(())
}

/// 從指定位移續跑時只處理剩下的資料列，標頭不會重複寫入
#[tokio::test]
async fn test_resume_appends_remaining_rows() -> Result<()> {
    let work = TempDir::new()?;
    let input_dir = work.path().join("data");
    let output_dir = work.path().join("out");
    fs::create_dir_all(&input_dir)?;
    fs::write(
        input_dir.join("events.csv"),
        "dim_date_id;user_id;event_name\n\
         05/01/2021;1;a\n\
         05/01/2021;2;b\n\
         05/01/2021;3;c\n\
         05/01/2021;4;d\n",
    )?;

    let config = EtlConfig::from_file(write_config(work.path(), &input_dir)?)?;
    let writer = Arc::new(CsvFileWriter::new(&output_dir, b';'));
    let input = config.data_import.resolve_input("events.csv");

    let first = EtlEngine::new(
        &input,
        Schema::load(&config.data_import)?,
        writer.clone(),
        &config.data_import,
    )?
    .with_resume_from(3)
    .run()
    .await?;
    assert_eq!(first.rows_skipped, 3);
    assert_eq!(first.rows_extracted, 1);
    assert_eq!(first.next_offset, 4);

    let second = EtlEngine::new(
        &input,
        Schema::load(&config.data_import)?,
        writer.clone(),
        &config.data_import,
    )?
    .with_resume_from(2)
    .run()
    .await?;
    assert_eq!(second.rows_extracted, 2);

    let rows = read_table(&writer.table_path("events"))?;
    let users: Vec<&str> = rows.iter().map(|row| row[1].as_str()).collect();
    assert_eq!(users, vec!["user_id", "4", "3", "4"]);
    Ok(())
}
