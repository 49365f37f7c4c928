//! Readiness checks behind `/health/ready`.

use anyhow::{anyhow, Result};
use std::sync::Arc;
use std::time::Instant;

use crate::db::PersistenceSink;
use crate::worker_pool::WorkerPool;

/// Dependencies probed by the readiness endpoint. Missing ones are skipped.
#[derive(Clone, Default)]
pub struct ReadinessProbe {
    pub sink: Option<Arc<dyn PersistenceSink>>,
    pub pool: Option<WorkerPool>,
}

impl std::fmt::Debug for ReadinessProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadinessProbe")
            .field("has_sink", &self.sink.is_some())
            .field("has_pool", &self.pool.is_some())
            .finish()
    }
}

impl ReadinessProbe {
    pub fn new(sink: Option<Arc<dyn PersistenceSink>>, pool: Option<WorkerPool>) -> Self {
        Self { sink, pool }
    }

    /// Database answers and the OCR pool holds at least one worker
    pub async fn check(&self) -> Result<()> {
        if let Some(sink) = &self.sink {
            let started = Instant::now();
            let result = check_database_health(sink.as_ref()).await;
            super::metrics::record_health_check_metrics("database", result.is_ok(), started.elapsed());
            result?;
        }

        if let Some(pool) = &self.pool {
            let started = Instant::now();
            let result = check_ocr_pool_health(pool);
            super::metrics::record_health_check_metrics("ocr_pool", result.is_ok(), started.elapsed());
            result?;
        }

        Ok(())
    }
}

/// Run `SELECT 1` through the sink
pub async fn check_database_health(sink: &dyn PersistenceSink) -> Result<()> {
    sink.ping()
        .await
        .map_err(|e| anyhow!("Database health check failed: {}", e))?;
    tracing::debug!("Database health check passed");
    Ok(())
}

pub fn check_ocr_pool_health(pool: &WorkerPool) -> Result<()> {
    let stats = pool.stats();
    if !pool.is_ready() {
        return Err(anyhow!(
            "OCR pool not ready: status {}, {} workers",
            stats.status,
            stats.total_workers
        ));
    }
    tracing::debug!(workers = stats.total_workers, "OCR pool health check passed");
    Ok(())
}
