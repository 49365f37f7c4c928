use anyhow::{Context, Result};
use recibo_ocr::config::AppConfig;
use recibo_ocr::db::{PersistenceSink, PgSink};
use recibo_ocr::extraction::FieldExtractor;
use recibo_ocr::instance_manager::TesseractFactory;
use recibo_ocr::name_repair::{NameDictionary, NameRepairer};
use recibo_ocr::observability::{self, ReadinessProbe};
use recibo_ocr::pipeline::DocumentPipeline;
use recibo_ocr::progress::{progress_channel, ProgressReporter, ProgressTracker};
use recibo_ocr::worker_pool::WorkerPool;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

fn image_paths_from_args() -> Result<Vec<PathBuf>> {
    let paths: Vec<PathBuf> = std::env::args_os().skip(1).map(PathBuf::from).collect();
    if paths.is_empty() {
        anyhow::bail!("usage: recibo-ocr <image> [<image> ...]");
    }
    Ok(paths)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file first
    dotenvy::dotenv().ok();

    let paths = image_paths_from_args()?;

    let config = AppConfig::from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    let sink: Option<Arc<dyn PersistenceSink>> = match &config.database.url {
        Some(_) => Some(Arc::new(
            PgSink::connect(&config.database)
                .await
                .context("Failed to initialize database")?,
        )),
        None => None,
    };

    let pool = WorkerPool::new(Arc::new(TesseractFactory::new(config.ocr.clone())), config.ocr.clone());

    let telemetry = observability::init_observability_with_config(
        config.observability.clone(),
        ReadinessProbe::new(sink.clone(), Some(pool.clone())),
    )
    .await?;
    info!("{}", config.summary());
    if sink.is_none() {
        warn!("DATABASE_URL not set, results will not be stored");
    }

    // No worker at all is the only condition that aborts the batch
    let workers = pool.initialize().await.context("OCR worker pool failed to start")?;
    info!(workers, "OCR worker pool ready");

    let (progress_tx, progress_rx) = progress_channel();
    let tracker = tokio::spawn(ProgressTracker::new().run(progress_rx));
    let session = format!("batch-{}", chrono::Utc::now().format("%Y%m%d%H%M%S"));

    let extractor = FieldExtractor::new(
        NameRepairer::new(NameDictionary::default()),
        config.batch.known_clients.clone(),
    );
    let mut pipeline = DocumentPipeline::new(pool.clone(), extractor, config.batch.clone())
        .with_progress(ProgressReporter::new(Some(progress_tx), session.clone()));
    if let Some(sink) = sink {
        pipeline = pipeline.with_sink(sink);
    }
    let pipeline = Arc::new(pipeline);

    let outcome = Arc::clone(&pipeline).process_batch(paths).await;

    // Dropping the pipeline closes the progress channel so the tracker can finish
    drop(pipeline);
    match tracker.await {
        Ok(tracker) => {
            if let Some(snapshot) = tracker.snapshot(&session) {
                info!(
                    percent = snapshot.overall_percent,
                    errors = snapshot.errors.len(),
                    "Progress summary"
                );
            }
        }
        Err(e) => warn!("Progress tracker ended abnormally: {}", e),
    }

    pool.terminate().await;

    let report = outcome?;
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for result in &report.results {
        writeln!(out, "{}", serde_json::to_string(result)?)?;
    }
    out.flush()?;

    info!(
        total = report.total,
        succeeded = report.succeeded,
        failed = report.failed,
        "Batch complete"
    );
    telemetry.shutdown().await;
    Ok(())
}
