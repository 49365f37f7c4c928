//! # Extraction Scenarios
//!
//! Classification followed by field extraction on OCR text taken from damaged
//! scans, the way the pipeline chains them.


#[cfg(test)]
mod tests {
    use crate::test_helpers::{CONTRACT_TEXT, RECEIPT_TEXT};
    use chrono::NaiveDate;
    use recibo_ocr::classifier::{DocumentClassifier, DocumentType};
    use recibo_ocr::extraction::{DocumentKind, FieldExtractor, MANUAL_REVIEW};
    use recibo_ocr::name_repair::{NameDictionary, NameRepairer};
    use recibo_ocr::normalizer::PaymentType;

    fn classify_and_extract(extractor: &FieldExtractor, text: &str) -> recibo_ocr::extraction::Extraction {
        let classification = DocumentClassifier::default().classify(text);
        extractor.extract_classified(text, &classification)
    }

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid test date")
    }

    #[test]
    fn test_clean_receipt() {
        let extraction = classify_and_extract(&FieldExtractor::default(), RECEIPT_TEXT);
        let fields = extraction.fields;
        assert_eq!(fields.tipo, DocumentKind::Recibo);
        assert_eq!(fields.cliente.as_deref(), Some("MARIA LUISA HERNANDEZ LANDEROS"));
        assert_eq!(fields.fecha_contrato, Some(ymd(2025, 5, 25)));
        assert_eq!(fields.monto, Some(1500.0));
        assert_eq!(fields.t_pago, Some(PaymentType::AnticipoPaqueteNuevo));
        assert_eq!(fields.folio.as_deref(), Some("Q22-10456"));
        assert!(!extraction.issues.iter().any(|i| i.field == "tipo"));
    }

    #[test]
    fn test_clean_contract() {
        let extraction = classify_and_extract(&FieldExtractor::default(), CONTRACT_TEXT);
        let fields = extraction.fields;
        assert_eq!(fields.tipo, DocumentKind::Contrato);
        assert_eq!(fields.cliente.as_deref(), Some("ANA MYRYHA OLVERA PINELA"));
        assert_eq!(fields.fecha_contrato, Some(ymd(2024, 8, 28)));
        // Contracts carry no amount, payment type or folio
        assert_eq!(fields.monto, None);
        assert_eq!(fields.t_pago, None);
        assert_eq!(fields.folio, None);
    }

    #[test]
    fn test_stray_digit_before_amount() {
        let text = RECEIPT_TEXT.replace(
            "$ 1,500.00 (UN MIL QUINIENTOS PESOS 00/100 MN)",
            "$ 1 1000.00 (UN MIL PESOS 00/100 MN)",
        );
        let extraction = classify_and_extract(&FieldExtractor::default(), &text);
        assert_eq!(extraction.fields.monto, Some(1000.0));
    }

    #[test]
    fn test_ambiguous_amount_is_left_out() {
        let text = RECEIPT_TEXT.replace("$ 1,500.00 (UN MIL QUINIENTOS PESOS 00/100 MN)", "$ 12 45000");
        let extraction = classify_and_extract(&FieldExtractor::default(), &text);
        assert_eq!(extraction.fields.monto, None);
        assert!(extraction.issues.iter().any(|i| i.field == "monto"));
        // The rest of the receipt still comes through
        assert_eq!(
            extraction.fields.cliente.as_deref(),
            Some("MARIA LUISA HERNANDEZ LANDEROS")
        );
    }

    #[test]
    fn test_impossible_date_is_omitted() {
        let text = RECEIPT_TEXT.replace("25/05/2025", "31/02/2025");
        let extraction = classify_and_extract(&FieldExtractor::default(), &text);
        assert_eq!(extraction.fields.fecha_contrato, None);
        assert!(extraction.issues.iter().any(|i| i.field == "fecha_contrato"));
    }

    #[test]
    fn test_out_of_range_year_is_omitted() {
        let text = CONTRACT_TEXT.replace("del año 2024", "del año 2019");
        let extraction = classify_and_extract(&FieldExtractor::default(), &text);
        assert_eq!(extraction.fields.fecha_contrato, None);
        assert_eq!(extraction.fields.tipo, DocumentKind::Contrato);
    }

    #[test]
    fn test_unusable_name_goes_to_manual_review() {
        let text = "Recibí de LUZ la cantidad de $ 750.00 pesos";
        let extraction = FieldExtractor::default().extract(text, DocumentKind::Recibo);
        assert_eq!(extraction.fields.cliente.as_deref(), Some(MANUAL_REVIEW));
        assert!(extraction.fields.needs_manual_review());
    }

    #[test]
    fn test_known_client_matches_across_line_break() {
        let extractor = FieldExtractor::new(
            NameRepairer::new(NameDictionary::default()),
            vec!["Ana Myryha Olvera Pinela".to_string()],
        );
        let text = "RECIBO DE PAGO\nRecibí de ANA MYRYHA\nOLVERA PINELA la cantidad de $ 900.00\nTRANSACCION APROBADA";
        let extraction = classify_and_extract(&extractor, text);
        assert_eq!(extraction.fields.cliente.as_deref(), Some("ANA MYRYHA OLVERA PINELA"));
        assert_eq!(extraction.fields.monto, Some(900.0));
    }

    #[test]
    fn test_low_confidence_text_is_extracted_as_nominal_type() {
        let text = "Firma del cliente\nOrden: 5521";
        let classification = DocumentClassifier::default().classify(text);
        assert_eq!(classification.document_type, DocumentType::Unknown);

        let extraction = FieldExtractor::default().extract_classified(text, &classification);
        assert_eq!(extraction.fields.tipo, DocumentKind::Recibo);
        assert!(extraction.issues.iter().any(|i| i.field == "tipo"));
    }

    #[test]
    fn test_name_repair_is_stable() {
        let repairer = NameRepairer::new(NameDictionary::default());
        for raw in [
            "MARIA LUISA HERNANDEZ LANDEROS",
            "ana myryha olvera pinela",
            "YANET ISLAS ROJAS",
            "LAURA VEGA MORALES",
        ] {
            let once = repairer.repair(raw);
            assert_eq!(repairer.repair(&once), once, "repair of {:?} is not stable", raw);
            assert_eq!(once, once.to_uppercase());
        }
    }
}
