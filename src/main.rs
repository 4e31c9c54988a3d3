use anyhow::Context;
use clap::Parser;
use event_etl::core::TableWriter;
use event_etl::utils::{logger, validation::Validate};
use event_etl::{
    CliConfig, CsvFileWriter, EtlConfig, EtlEngine, EtlError, MemoryWriter, RunSummary, Schema,
};
use std::sync::Arc;

const EXIT_ABORTED: i32 = 130;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = CliConfig::parse();

    logger::init_cli_logger(cli.verbose, cli.log_json);

    tracing::info!("Starting event-etl");
    tracing::debug!("CLI config: {:?}", cli);

    let config = match EtlConfig::from_file(&cli.config) {
        Ok(config) => config,
        Err(e) => fail(&e),
    };
    tracing::debug!("Loaded config: {:?}", config);

    // CSV 與 dry run 模式不需要資料庫設定
    let uses_database = cli.output_dir.is_none() && !cli.dry_run;
    let validation = if uses_database {
        config.validate()
    } else {
        config.data_import.validate()
    };
    if let Err(e) = validation {
        fail(&e);
    }
    let batch_size = match cli.batch_size_override() {
        Ok(batch_size) => batch_size,
        Err(e) => fail(&e),
    };

    // schema 錯誤必須在任何 I/O 之前中止
    let schema = match Schema::load(&config.data_import) {
        Ok(schema) => schema,
        Err(e) => fail(&e),
    };

    let outcome = if cli.dry_run {
        tracing::info!("🔍 DRY RUN MODE - rows are classified but not written");
        run_with(Arc::new(MemoryWriter::discarding()), schema, &config, &cli, batch_size).await
    } else if let Some(output_dir) = &cli.output_dir {
        let separator = match config.data_import.separator_byte() {
            Ok(separator) => separator,
            Err(e) => fail(&e),
        };
        tracing::info!("📁 Writing staging CSV files to {}", output_dir);
        run_with(
            Arc::new(CsvFileWriter::new(output_dir, separator)),
            schema,
            &config,
            &cli,
            batch_size,
        )
        .await
    } else {
        run_with_database(schema, &config, &cli, batch_size).await
    };

    match outcome {
        Some(Ok(summary)) => report(&summary, cli.log_json)?,
        Some(Err(e)) => fail(&e),
        None => {
            eprintln!("⚠️ Aborted; batches committed before the abort remain in place");
            std::process::exit(EXIT_ABORTED);
        }
    }

    Ok(())
}

#[cfg(feature = "postgres")]
async fn run_with_database(
    schema: Schema,
    config: &EtlConfig,
    cli: &CliConfig,
    batch_size: Option<usize>,
) -> Option<event_etl::Result<RunSummary>> {
    let writer = match event_etl::PostgresWriter::connect(&config.psql_db).await {
        Ok(writer) => writer,
        Err(e) => return Some(Err(e)),
    };
    run_with(Arc::new(writer), schema, config, cli, batch_size).await
}

#[cfg(not(feature = "postgres"))]
async fn run_with_database(
    _schema: Schema,
    _config: &EtlConfig,
    _cli: &CliConfig,
    _batch_size: Option<usize>,
) -> Option<event_etl::Result<RunSummary>> {
    Some(Err(EtlError::config(
        "built without the postgres feature; use --output-dir or --dry-run",
    )))
}

/// 執行管線；收到 Ctrl-C 時回傳 None
async fn run_with<W: TableWriter>(
    writer: Arc<W>,
    schema: Schema,
    config: &EtlConfig,
    cli: &CliConfig,
    batch_size: Option<usize>,
) -> Option<event_etl::Result<RunSummary>> {
    let input = config.data_import.resolve_input(&cli.file_name);

    let engine = match EtlEngine::new(input, schema, writer, &config.data_import) {
        Ok(engine) => engine,
        Err(e) => return Some(Err(e)),
    };
    let mut engine = engine
        .with_resume_from(cli.resume_from)
        .with_monitoring(cli.monitor || config.monitoring_enabled());
    if let Some(batch_size) = batch_size {
        engine = engine.with_batch_size(batch_size);
    }

    let outcome = tokio::select! {
        result = engine.run() => Some(result),
        _ = tokio::signal::ctrl_c() => None,
    };

    if outcome.is_none() {
        tracing::warn!("🛑 Interrupted while {:?}", engine.state());
    }
    outcome
}

fn report(summary: &RunSummary, json: bool) -> anyhow::Result<()> {
    if json {
        let line = serde_json::to_string(summary).context("serializing run summary")?;
        println!("{}", line);
        return Ok(());
    }

    println!("✅ ETL process completed successfully!");
    println!("  Rows extracted: {}", summary.rows_extracted);
    if summary.rows_skipped > 0 {
        println!("  Rows skipped (resume): {}", summary.rows_skipped);
    }
    println!("  Valid rows: {}", summary.rows_valid);
    println!("  Invalid rows: {}", summary.rows_invalid);
    println!("  Batches: {}", summary.batches);
    for (table, rows) in &summary.rows_written {
        println!("  {} <- {} rows", table, rows);
    }
    Ok(())
}

fn fail(e: &EtlError) -> ! {
    tracing::error!("❌ {} (stage: {})", e, e.stage());
    tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());
    eprintln!("❌ {}", e.user_friendly_message());
    eprintln!("💡 {}", e.recovery_suggestion());
    std::process::exit(e.exit_code());
}
