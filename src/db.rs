//! # Persistence Adapter
//!
//! Stores extracted documents in the `papeleria` table. The pipeline talks to
//! a [`PersistenceSink`] so tests and dry runs can swap in an in-memory sink.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use sqlx::postgres::PgPool;
use sqlx::Row;
use tracing::{debug, info, warn, Instrument};

use crate::config::DatabaseConfig;
use crate::errors::{error_logging, AppError, AppResult};
use crate::extraction::{DocumentKind, ExtractedFields};

/// Default payment column value when the document carries none (contracts)
pub const DEFAULT_PAYMENT: &str = "EFECTIVO";
/// Default cash register tag for automatic inserts
pub const DEFAULT_CAJA: &str = "AUTO";

/// Client values that mean "no name was read". Compared whole, never as substrings.
const BLACKLISTED_CLIENTS: &[&str] = &[
    "",
    "SIN TEXTO OCR",
    "SIN TEXTO",
    "SIN_TEXTO",
    "NO TEXTO",
    "NO_TEXTO",
    "NULL",
    "N/A",
    "NA",
];

/// True when a client value is a placeholder rather than a name
pub fn is_blacklisted_client(cliente: &str) -> bool {
    let normalized = cliente.trim().to_uppercase();
    BLACKLISTED_CLIENTS.iter().any(|blocked| *blocked == normalized)
}

/// Row to insert into `papeleria`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewRecord {
    pub cliente: String,
    pub fecha_contrato: Option<NaiveDate>,
    pub tipo: DocumentKind,
    pub monto: Option<f64>,
    pub t_pago: String,
    pub folio: Option<String>,
    pub caja: String,
    pub usuario: String,
}

impl NewRecord {
    /// `None` when the record has no client at all
    pub fn from_fields(fields: &ExtractedFields, usuario: &str) -> Option<Self> {
        let cliente = fields.cliente.clone()?;
        Some(Self {
            cliente,
            fecha_contrato: fields.fecha_contrato,
            tipo: fields.tipo,
            monto: fields.monto,
            t_pago: fields
                .t_pago
                .map(|t| t.as_str().to_string())
                .unwrap_or_else(|| DEFAULT_PAYMENT.to_string()),
            folio: fields.folio.clone(),
            caja: DEFAULT_CAJA.to_string(),
            usuario: usuario.to_string(),
        })
    }
}

/// Row read back from `papeleria`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredRecord {
    pub id: i64,
    pub cliente: String,
    pub fecha_contrato: Option<NaiveDate>,
    pub tipo: String,
    pub monto: Option<f64>,
    pub t_pago: Option<String>,
    pub folio: Option<String>,
    pub caja: Option<String>,
    pub usuario: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Destination for extracted records
#[async_trait]
pub trait PersistenceSink: Send + Sync {
    /// Insert a record and return its id
    async fn insert(&self, record: &NewRecord) -> AppResult<i64>;

    /// Id of an existing record with a matching client, date and type
    async fn find_duplicate(&self, record: &NewRecord) -> AppResult<Option<i64>>;

    /// Most recent records, newest first
    async fn recent(&self, limit: i64) -> AppResult<Vec<StoredRecord>>;

    /// Cheap connectivity probe for readiness checks
    async fn ping(&self) -> AppResult<()> {
        Ok(())
    }
}

/// Result of [`store_extracted`]
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum PersistenceOutcome {
    Inserted { id: i64 },
    Duplicate { existing_id: i64, reason: String },
    Rejected { reason: String },
}

impl PersistenceOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            PersistenceOutcome::Inserted { .. } => "inserted",
            PersistenceOutcome::Duplicate { .. } => "duplicate",
            PersistenceOutcome::Rejected { .. } => "rejected",
        }
    }
}

/// Validate, de-duplicate and insert one extraction.
///
/// Placeholder clients are rejected before the database is touched.
/// Duplicates (same client, date and type) are skipped unless `force` is set.
pub async fn store_extracted(
    sink: &dyn PersistenceSink,
    fields: &ExtractedFields,
    usuario: &str,
    force: bool,
) -> AppResult<PersistenceOutcome> {
    let outcome = store_inner(sink, fields, usuario, force).await;
    match &outcome {
        Ok(result) => crate::observability::record_persistence(result.label()),
        Err(_) => crate::observability::record_persistence("error"),
    }
    outcome
}

async fn store_inner(
    sink: &dyn PersistenceSink,
    fields: &ExtractedFields,
    usuario: &str,
    force: bool,
) -> AppResult<PersistenceOutcome> {
    let Some(record) = NewRecord::from_fields(fields, usuario) else {
        return Ok(PersistenceOutcome::Rejected {
            reason: "no client name extracted, record not inserted".to_string(),
        });
    };

    if is_blacklisted_client(&record.cliente) {
        info!(cliente = %record.cliente, "Placeholder client, record not inserted");
        return Ok(PersistenceOutcome::Rejected {
            reason: format!("client '{}' is empty or a placeholder, record not inserted", record.cliente.trim()),
        });
    }

    if !force && record.fecha_contrato.is_some() {
        if let Some(existing_id) = sink.find_duplicate(&record).await? {
            info!(cliente = %record.cliente, existing_id, "Duplicate record skipped");
            return Ok(PersistenceOutcome::Duplicate {
                existing_id,
                reason: "a record with the same client, date and type already exists; force to insert anyway"
                    .to_string(),
            });
        }
    }

    let id = sink.insert(&record).await.inspect_err(|e| {
        error_logging::log_database_error(e, "insert_papeleria", Some(&record.cliente), None);
    })?;
    info!(id, cliente = %record.cliente, tipo = record.tipo.as_str(), "Record inserted");
    Ok(PersistenceOutcome::Inserted { id })
}

/// Create the `papeleria` table and its lookup index
pub async fn init_database_schema(pool: &PgPool) -> Result<()> {
    info!("Initializing database schema");

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS papeleria (
            id BIGSERIAL PRIMARY KEY,
            cliente VARCHAR(255) NOT NULL,
            sucursal VARCHAR(100),
            bloque VARCHAR(100),
            fecha_contrato DATE,
            tipo VARCHAR(20) NOT NULL,
            monto NUMERIC(12,2),
            t_pago VARCHAR(100),
            folio VARCHAR(50),
            caja VARCHAR(50),
            usuario VARCHAR(100),
            created_at TIMESTAMPTZ DEFAULT CURRENT_TIMESTAMP
        )",
    )
    .execute(pool)
    .await
    .context("Failed to create papeleria table")?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS papeleria_fecha_tipo_idx ON papeleria(fecha_contrato, tipo)",
    )
    .execute(pool)
    .await
    .context("Failed to create papeleria lookup index")?;

    info!("Database schema initialized successfully");
    Ok(())
}

/// Postgres-backed sink
#[derive(Debug, Clone)]
pub struct PgSink {
    pool: PgPool,
}

impl PgSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect and make sure the table exists
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let url = config
            .url
            .as_deref()
            .context("DATABASE_URL is not configured")?;
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(std::time::Duration::from_secs(config.connect_timeout_secs))
            .connect(url)
            .await
            .context("Failed to connect to database")?;
        init_database_schema(&pool).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn insert_record(&self, record: &NewRecord) -> Result<i64> {
        debug!(cliente = %record.cliente, tipo = record.tipo.as_str(), "Inserting record");

        let row = sqlx::query(
            "INSERT INTO papeleria (cliente, fecha_contrato, tipo, monto, t_pago, folio, caja, usuario)
             VALUES ($1, $2, $3, $4::float8::numeric, $5, $6, $7, $8)
             RETURNING id",
        )
        .bind(&record.cliente)
        .bind(record.fecha_contrato)
        .bind(record.tipo.as_str())
        .bind(record.monto)
        .bind(&record.t_pago)
        .bind(&record.folio)
        .bind(&record.caja)
        .bind(&record.usuario)
        .fetch_one(&self.pool)
        .await
        .context("Failed to insert papeleria record")?;

        Ok(row.get(0))
    }

    async fn find_duplicate_record(&self, record: &NewRecord) -> Result<Option<i64>> {
        let row = sqlx::query(
            "SELECT id FROM papeleria
             WHERE cliente ILIKE $1 AND fecha_contrato = $2 AND tipo = $3
             LIMIT 1",
        )
        .bind(format!("%{}%", escape_like(&record.cliente)))
        .bind(record.fecha_contrato)
        .bind(record.tipo.as_str())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to look up duplicate record")?;

        Ok(row.map(|row| row.get(0)))
    }

    async fn recent_records(&self, limit: i64) -> Result<Vec<StoredRecord>> {
        let rows = sqlx::query(
            "SELECT id, cliente, fecha_contrato, tipo, monto::float8, t_pago, folio, caja, usuario, created_at
             FROM papeleria
             ORDER BY created_at DESC
             LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to read recent records")?;

        Ok(rows
            .into_iter()
            .map(|row| StoredRecord {
                id: row.get(0),
                cliente: row.get(1),
                fecha_contrato: row.get(2),
                tipo: row.get(3),
                monto: row.get(4),
                t_pago: row.get(5),
                folio: row.get(6),
                caja: row.get(7),
                usuario: row.get(8),
                created_at: row.get(9),
            })
            .collect())
    }
}

/// `%` and `_` in names must match literally inside ILIKE
fn escape_like(value: &str) -> String {
    value.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

fn database_error(err: anyhow::Error) -> AppError {
    AppError::Database(format!("{:#}", err))
}

#[async_trait]
impl PersistenceSink for PgSink {
    async fn insert(&self, record: &NewRecord) -> AppResult<i64> {
        self.insert_record(record)
            .instrument(crate::observability::db_span("insert", "papeleria"))
            .await
            .map_err(database_error)
    }

    async fn find_duplicate(&self, record: &NewRecord) -> AppResult<Option<i64>> {
        self.find_duplicate_record(record)
            .instrument(crate::observability::db_span("find_duplicate", "papeleria"))
            .await
            .map_err(database_error)
    }

    async fn recent(&self, limit: i64) -> AppResult<Vec<StoredRecord>> {
        self.recent_records(limit)
            .instrument(crate::observability::db_span("recent", "papeleria"))
            .await
            .map_err(database_error)
    }

    async fn ping(&self) -> AppResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await.map_err(|e| {
            warn!(error = %e, "Database ping failed");
            AppError::from(e)
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalizer::PaymentType;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct MemorySink {
        records: Mutex<Vec<NewRecord>>,
    }

    #[async_trait]
    impl PersistenceSink for MemorySink {
        async fn insert(&self, record: &NewRecord) -> AppResult<i64> {
            let mut records = self.records.lock();
            records.push(record.clone());
            Ok(records.len() as i64)
        }

        async fn find_duplicate(&self, record: &NewRecord) -> AppResult<Option<i64>> {
            let records = self.records.lock();
            Ok(records
                .iter()
                .position(|r| {
                    r.cliente.to_uppercase().contains(&record.cliente.to_uppercase())
                        && r.fecha_contrato == record.fecha_contrato
                        && r.tipo == record.tipo
                })
                .map(|i| i as i64 + 1))
        }

        async fn recent(&self, limit: i64) -> AppResult<Vec<StoredRecord>> {
            let records = self.records.lock();
            Ok(records
                .iter()
                .enumerate()
                .rev()
                .take(usize::try_from(limit).unwrap_or(0))
                .map(|(i, r)| StoredRecord {
                    id: i as i64 + 1,
                    cliente: r.cliente.clone(),
                    fecha_contrato: r.fecha_contrato,
                    tipo: r.tipo.as_str().to_string(),
                    monto: r.monto,
                    t_pago: Some(r.t_pago.clone()),
                    folio: r.folio.clone(),
                    caja: Some(r.caja.clone()),
                    usuario: Some(r.usuario.clone()),
                    created_at: Utc::now(),
                })
                .collect())
        }
    }

    fn receipt(cliente: &str) -> ExtractedFields {
        let mut fields = ExtractedFields::empty(DocumentKind::Recibo);
        fields.cliente = Some(cliente.to_string());
        fields.fecha_contrato = NaiveDate::from_ymd_opt(2025, 5, 25);
        fields.monto = Some(1500.0);
        fields.t_pago = Some(PaymentType::AnticipoPaqueteNuevo);
        fields
    }

    #[test]
    fn test_blacklist_is_exact_and_case_insensitive() {
        assert!(is_blacklisted_client("SIN TEXTO OCR"));
        assert!(is_blacklisted_client("  sin texto ocr "));
        assert!(is_blacklisted_client("n/a"));
        assert!(is_blacklisted_client(""));
        assert!(!is_blacklisted_client("NATALIA SIN TEXTO"));
        assert!(!is_blacklisted_client("DIANA LOPEZ"));
    }

    #[tokio::test]
    async fn test_blacklisted_client_never_inserted() {
        let sink = MemorySink::default();
        let outcome = store_extracted(&sink, &receipt("SIN TEXTO OCR"), "OCR_AUTO", true)
            .await
            .expect("store");
        assert!(matches!(outcome, PersistenceOutcome::Rejected { .. }));
        assert!(sink.records.lock().is_empty());
    }

    #[tokio::test]
    async fn test_missing_client_rejected() {
        let sink = MemorySink::default();
        let fields = ExtractedFields::empty(DocumentKind::Contrato);
        let outcome = store_extracted(&sink, &fields, "OCR_AUTO", false).await.expect("store");
        assert_eq!(outcome.label(), "rejected");
    }

    #[tokio::test]
    async fn test_duplicate_skipped_unless_forced() {
        let sink = MemorySink::default();
        let fields = receipt("MARIA LUISA HERNANDEZ LANDEROS");

        let first = store_extracted(&sink, &fields, "OCR_AUTO", false).await.expect("store");
        assert_eq!(first, PersistenceOutcome::Inserted { id: 1 });

        let second = store_extracted(&sink, &fields, "OCR_AUTO", false).await.expect("store");
        assert!(matches!(second, PersistenceOutcome::Duplicate { existing_id: 1, .. }));

        let forced = store_extracted(&sink, &fields, "OCR_AUTO", true).await.expect("store");
        assert_eq!(forced, PersistenceOutcome::Inserted { id: 2 });
    }

    #[tokio::test]
    async fn test_recent_is_newest_first_and_limited() {
        let sink = MemorySink::default();
        for name in ["ROSA MARIA PEREZ", "LAURA VEGA MORALES", "YANET ISLAS ROJAS"] {
            store_extracted(&sink, &receipt(name), "OCR_AUTO", false).await.expect("store");
        }

        let recent = sink.recent(2).await.expect("recent");
        let names: Vec<&str> = recent.iter().map(|r| r.cliente.as_str()).collect();
        assert_eq!(names, vec!["YANET ISLAS ROJAS", "LAURA VEGA MORALES"]);
        assert_eq!(recent[0].id, 3);
        assert_eq!(recent[0].tipo, "recibo");
        assert!(sink.recent(0).await.expect("recent").is_empty());
    }

    #[test]
    fn test_record_defaults() {
        let mut fields = ExtractedFields::empty(DocumentKind::Contrato);
        fields.cliente = Some("ANA MYRYHA OLVERA PINELA".to_string());
        let record = NewRecord::from_fields(&fields, "OCR_AUTO").expect("has client");
        assert_eq!(record.t_pago, DEFAULT_PAYMENT);
        assert_eq!(record.caja, DEFAULT_CAJA);
        assert_eq!(record.usuario, "OCR_AUTO");
        assert_eq!(record.monto, None);
    }

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like("50%_OFF"), "50\\%\\_OFF");
    }
}
