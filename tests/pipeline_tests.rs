//! # Document Pipeline Tests
//!
//! End-to-end runs of the pipeline over real image files, with the OCR engine
//! replaced by a scripted one so the text of every file is known.


#[cfg(test)]
mod tests {
    use crate::test_helpers::*;
    use chrono::NaiveDate;
    use recibo_ocr::config::BatchConfig;
    use recibo_ocr::db::PersistenceOutcome;
    use recibo_ocr::errors::AppError;
    use recibo_ocr::extraction::{DocumentKind, FieldExtractor};
    use recibo_ocr::pipeline::DocumentPipeline;
    use recibo_ocr::progress::{progress_channel, ProgressReporter, ProgressTracker, Stage};
    use recibo_ocr::worker_pool::WorkerPool;
    use recibo_ocr::DocumentType;
    use std::path::PathBuf;
    use std::sync::Arc;

    const SECOND_RECEIPT: &str = "EUROPIEL SINERGIA LASER CENTER\n\
        RECIBO DE PAGO\n\
        Folio: Q22-10457\n\
        Fecha: 26/05/2025 09:12:44\n\
        Recibí de LAURA VEGA MORALES la cantidad de $ 800.00 (OCHOCIENTOS PESOS 00/100 MN)\n\
        por concepto de PAGO DE SESION\n\
        TRANSACCION APROBADA\n";

    fn batch_config() -> BatchConfig {
        BatchConfig {
            segmentation: false,
            geometric_separation: false,
            ..BatchConfig::default()
        }
    }

    async fn ready_pool(script: &[(&str, &str)], size: usize) -> WorkerPool {
        let pool = WorkerPool::new(Arc::new(ScriptedFactory::new(script)), fast_ocr_config(size));
        pool.initialize().await.expect("pool init");
        pool
    }

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid test date")
    }

    #[tokio::test]
    async fn test_receipt_image_end_to_end() {
        let dir = tempfile::tempdir().expect("tempdir");
        let image = write_image(dir.path(), "recibo_mayo.png", &document_image(600, 400));
        let sink = Arc::new(MemorySink::default());

        let pool = ready_pool(&[("recibo", RECEIPT_TEXT)], 1).await;
        let pipeline = DocumentPipeline::new(pool, FieldExtractor::default(), batch_config()).with_sink(sink.clone());

        let result = pipeline.process_image(&image).await;
        assert!(result.success, "unexpected failure: {:?}", result.error);
        assert_eq!(result.file_name, "recibo_mayo.png");
        assert_eq!(result.source_file, None);

        let classification = result.classification.as_ref().expect("classification");
        assert_eq!(classification.document_type, DocumentType::Receipt);

        let fields = result.fields.as_ref().expect("fields");
        assert_eq!(fields.tipo, DocumentKind::Recibo);
        assert_eq!(fields.cliente.as_deref(), Some("MARIA LUISA HERNANDEZ LANDEROS"));
        assert_eq!(fields.fecha_contrato, Some(ymd(2025, 5, 25)));
        assert_eq!(fields.monto, Some(1500.0));
        assert_eq!(fields.folio.as_deref(), Some("Q22-10456"));

        let ocr = result.ocr.as_ref().expect("ocr summary");
        assert!(!ocr.low_confidence);
        assert!(!ocr.geometric_separation_applied);

        assert!(matches!(result.persistence, Some(PersistenceOutcome::Inserted { id: 1 })));
        let records = sink.records.lock();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].usuario, "OCR_AUTO");
        assert_eq!(records[0].caja, "AUTO");
    }

    #[tokio::test]
    async fn test_contract_image_end_to_end() {
        let dir = tempfile::tempdir().expect("tempdir");
        let image = write_image(dir.path(), "contrato_olvera.png", &document_image(600, 800));

        let pool = ready_pool(&[("contrato", CONTRACT_TEXT)], 1).await;
        let pipeline = DocumentPipeline::new(pool, FieldExtractor::default(), batch_config());

        let result = pipeline.process_image(&image).await;
        assert!(result.success, "unexpected failure: {:?}", result.error);
        assert_eq!(
            result.classification.as_ref().map(|c| c.document_type),
            Some(DocumentType::Contract)
        );

        let fields = result.fields.as_ref().expect("fields");
        assert_eq!(fields.tipo, DocumentKind::Contrato);
        assert_eq!(fields.cliente.as_deref(), Some("ANA MYRYHA OLVERA PINELA"));
        assert_eq!(fields.fecha_contrato, Some(ymd(2024, 8, 28)));
        assert_eq!(fields.monto, None);
        assert_eq!(fields.t_pago, None);

        // No sink configured
        assert!(result.persistence.is_none());
    }

    #[tokio::test]
    async fn test_repeated_receipt_is_reported_as_duplicate() {
        let dir = tempfile::tempdir().expect("tempdir");
        let image = write_image(dir.path(), "recibo.png", &document_image(600, 400));
        let sink = Arc::new(MemorySink::default());

        let pool = ready_pool(&[("recibo", RECEIPT_TEXT)], 1).await;
        let pipeline = DocumentPipeline::new(pool.clone(), FieldExtractor::default(), batch_config())
            .with_sink(sink.clone());

        let first = pipeline.process_image(&image).await;
        assert!(matches!(first.persistence, Some(PersistenceOutcome::Inserted { .. })));

        let second = pipeline.process_image(&image).await;
        assert!(second.success);
        assert!(matches!(
            second.persistence,
            Some(PersistenceOutcome::Duplicate { existing_id: 1, .. })
        ));
        assert_eq!(sink.records.lock().len(), 1);

        let forced = DocumentPipeline::new(
            pool,
            FieldExtractor::default(),
            BatchConfig {
                force_insert: true,
                ..batch_config()
            },
        )
        .with_sink(sink.clone());
        let third = forced.process_image(&image).await;
        assert!(matches!(third.persistence, Some(PersistenceOutcome::Inserted { id: 2 })));
    }

    #[tokio::test]
    async fn test_persistence_failure_keeps_extracted_fields() {
        let dir = tempfile::tempdir().expect("tempdir");
        let image = write_image(dir.path(), "recibo.png", &document_image(600, 400));
        let sink = Arc::new(MemorySink {
            fail_inserts: true,
            ..MemorySink::default()
        });

        let pool = ready_pool(&[("recibo", RECEIPT_TEXT)], 1).await;
        let pipeline = DocumentPipeline::new(pool, FieldExtractor::default(), batch_config()).with_sink(sink);

        let result = pipeline.process_image(&image).await;
        assert!(!result.success);
        assert_eq!(result.error.as_ref().map(|e| e.kind.as_str()), Some("DatabaseError"));
        assert_eq!(
            result.fields.as_ref().and_then(|f| f.cliente.as_deref()),
            Some("MARIA LUISA HERNANDEZ LANDEROS")
        );
        assert!(result.persistence.is_none());
    }

    #[tokio::test]
    async fn test_batch_isolates_failing_images() {
        let dir = tempfile::tempdir().expect("tempdir");
        let receipt = write_image(dir.path(), "recibo_a.png", &document_image(600, 400));
        let contract = write_image(dir.path(), "contrato_b.png", &document_image(600, 800));
        let unreadable = write_image(dir.path(), "borroso.png", &document_image(300, 200));
        let empty = dir.path().join("vacio.png");
        std::fs::write(&empty, b"").expect("write empty file");
        let missing = dir.path().join("perdido.png");

        let pool = ready_pool(&[("recibo", RECEIPT_TEXT), ("contrato", CONTRACT_TEXT)], 2).await;
        let pipeline = Arc::new(DocumentPipeline::new(
            pool.clone(),
            FieldExtractor::default(),
            BatchConfig {
                chunk_size: 2,
                ..batch_config()
            },
        ));

        let report = Arc::clone(&pipeline)
            .process_batch(vec![receipt, missing, empty, contract, unreadable])
            .await
            .expect("batch runs");

        assert_eq!(report.total, 5);
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failed, 3);

        let names: Vec<&str> = report.results.iter().map(|r| r.file_name.as_str()).collect();
        assert_eq!(
            names,
            vec!["recibo_a.png", "perdido.png", "vacio.png", "contrato_b.png", "borroso.png"]
        );

        let kinds: Vec<Option<&str>> = report
            .results
            .iter()
            .map(|r| r.error.as_ref().map(|e| e.kind.as_str()))
            .collect();
        assert_eq!(
            kinds,
            vec![None, Some("FileNotFound"), Some("EmptyFile"), None, Some("NoTextExtracted")]
        );
        assert_eq!(
            report.results[3].fields.as_ref().map(|f| f.tipo),
            Some(DocumentKind::Contrato)
        );

        let stats = pool.stats();
        assert_eq!(stats.busy_workers, 0);
        assert_eq!(stats.acquired_total, stats.released_total);
        assert!(pool.is_consistent());
    }

    #[tokio::test]
    async fn test_oversized_batch_is_rejected() {
        let pool = WorkerPool::new(Arc::new(ScriptedFactory::new(&[])), fast_ocr_config(1));
        let pipeline = Arc::new(DocumentPipeline::new(pool, FieldExtractor::default(), batch_config()));

        let paths: Vec<PathBuf> = (0..201).map(|i| PathBuf::from(format!("scan_{}.png", i))).collect();
        let err = pipeline.process_batch(paths).await.expect_err("too many files");
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_batch_needs_a_running_pool() {
        let dir = tempfile::tempdir().expect("tempdir");
        let image = write_image(dir.path(), "recibo.png", &document_image(200, 100));
        let pool = WorkerPool::new(Arc::new(ScriptedFactory::new(&[])), fast_ocr_config(1));
        let pipeline = Arc::new(DocumentPipeline::new(pool, FieldExtractor::default(), batch_config()));

        let err = pipeline.process_batch(vec![image]).await.expect_err("pool not started");
        assert!(matches!(err, AppError::Ocr(_)));
    }

    #[tokio::test]
    async fn test_stacked_receipts_are_split_into_parts() {
        let dir = tempfile::tempdir().expect("tempdir");
        let scan = write_image(dir.path(), "stack.png", &stacked_receipts());

        let pool = ready_pool(&[("stack", RECEIPT_TEXT), ("stack_receipt_2", SECOND_RECEIPT)], 2).await;
        let pipeline = Arc::new(DocumentPipeline::new(
            pool,
            FieldExtractor::default(),
            BatchConfig {
                segmentation: true,
                ..batch_config()
            },
        ));

        let report = pipeline.process_batch(vec![scan]).await.expect("batch runs");
        assert_eq!(report.total, 2);
        assert_eq!(report.succeeded, 2);

        let first = &report.results[0];
        let second = &report.results[1];
        assert_eq!(first.file_name, "stack_parte_1.png");
        assert_eq!(second.file_name, "stack_parte_2.png");
        assert_eq!(first.source_file.as_deref(), Some("stack.png"));
        assert_eq!(second.source_file.as_deref(), Some("stack.png"));

        assert_eq!(
            first.fields.as_ref().and_then(|f| f.cliente.as_deref()),
            Some("MARIA LUISA HERNANDEZ LANDEROS")
        );
        assert_eq!(
            second.fields.as_ref().and_then(|f| f.cliente.as_deref()),
            Some("LAURA VEGA MORALES")
        );
        assert_eq!(second.fields.as_ref().and_then(|f| f.monto), Some(800.0));
    }

    #[tokio::test]
    async fn test_uploads_are_expanded_concurrently_in_order() {
        let first_dir = tempfile::tempdir().expect("tempdir");
        let second_dir = tempfile::tempdir().expect("tempdir");
        // Same file name from two folders
        let first = write_image(first_dir.path(), "stack.png", &stacked_receipts());
        let contract = write_image(first_dir.path(), "contrato_doble.png", &stacked_receipts());
        let second = write_image(second_dir.path(), "stack.png", &stacked_receipts());

        let pool = ready_pool(
            &[
                ("stack", RECEIPT_TEXT),
                ("stack_receipt_2", SECOND_RECEIPT),
                ("contrato", CONTRACT_TEXT),
            ],
            2,
        )
        .await;
        let pipeline = Arc::new(DocumentPipeline::new(
            pool,
            FieldExtractor::default(),
            BatchConfig {
                segmentation: true,
                ..batch_config()
            },
        ));

        let report = Arc::clone(&pipeline)
            .process_batch(vec![first, contract, second])
            .await
            .expect("batch runs");
        let names: Vec<&str> = report.results.iter().map(|r| r.file_name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "stack_parte_1.png",
                "stack_parte_2.png",
                "contrato_doble.png",
                "stack_parte_1.png",
                "stack_parte_2.png",
            ]
        );
        assert_eq!(report.succeeded, 5);

        let clients: Vec<Option<&str>> = report
            .results
            .iter()
            .map(|r| r.fields.as_ref().and_then(|f| f.cliente.as_deref()))
            .collect();
        assert_eq!(clients[1], Some("LAURA VEGA MORALES"));
        assert_eq!(clients[2], Some("ANA MYRYHA OLVERA PINELA"));
        assert_eq!(clients[4], Some("LAURA VEGA MORALES"));

        let stats = pipeline.pool().stats();
        assert_eq!(stats.acquired_total, stats.released_total);
        assert!(pipeline.pool().is_consistent());
    }

    #[tokio::test]
    async fn test_contract_scans_are_never_split() {
        let dir = tempfile::tempdir().expect("tempdir");
        let scan = write_image(dir.path(), "contrato_doble.png", &stacked_receipts());

        let pool = ready_pool(&[("contrato", CONTRACT_TEXT)], 1).await;
        let pipeline = Arc::new(DocumentPipeline::new(
            pool,
            FieldExtractor::default(),
            BatchConfig {
                segmentation: true,
                ..batch_config()
            },
        ));

        let report = pipeline.process_batch(vec![scan]).await.expect("batch runs");
        assert_eq!(report.total, 1);
        assert_eq!(report.results[0].file_name, "contrato_doble.png");
        assert_eq!(report.results[0].source_file, None);
    }

    #[tokio::test]
    async fn test_progress_follows_the_batch() {
        let dir = tempfile::tempdir().expect("tempdir");
        let receipt = write_image(dir.path(), "recibo.png", &document_image(600, 400));
        let missing = dir.path().join("perdido.png");

        let (tx, rx) = progress_channel();
        let tracker = tokio::spawn(ProgressTracker::new().run(rx));

        let pool = ready_pool(&[("recibo", RECEIPT_TEXT)], 1).await;
        let pipeline = Arc::new(
            DocumentPipeline::new(pool, FieldExtractor::default(), batch_config())
                .with_progress(ProgressReporter::new(Some(tx), "lote-prueba")),
        );
        let report = Arc::clone(&pipeline)
            .process_batch(vec![receipt, missing])
            .await
            .expect("batch runs");
        assert_eq!(report.session, "lote-prueba");

        drop(pipeline);
        let tracker = tracker.await.expect("tracker join");
        let snapshot = tracker.snapshot("lote-prueba").expect("session tracked");

        assert_eq!(snapshot.total_files, 2);
        assert_eq!(snapshot.files_processed, 2);
        assert!(snapshot.is_complete);
        assert_eq!(snapshot.overall_percent, 100);
        assert!(!snapshot.success);
        assert_eq!(snapshot.errors.len(), 1);
        assert_eq!(snapshot.errors[0].file_name, "perdido.png");
        assert_eq!(snapshot.errors[0].stage, Stage::Upload);
    }
}
