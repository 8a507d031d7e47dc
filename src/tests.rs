use std::fs;
use std::path::Path;

use crate::config::PipelineConfig;
use crate::encoder::{
    preprocess, FeatureEncoder, Preprocess, DROPPED_COLUMNS, UNKNOWN_TYPE_CODE,
};
use crate::error::PipelineError;
use crate::masking::{mask_account_ids, mask_identifier};
use crate::model::FraudPipeline;
use crate::persistence;
use crate::pipeline::{run, train_test_split, RunMode};
use crate::storage::{self, Location, PredictionSink, TransactionSource};
use crate::transaction::{EncodedRecord, PredictionResult, TransactionRecord};

#[cfg(test)]
mod tests {
    use super::*;

    const LABELED_CSV: &str = concat!(
        "type,amount,nameOrig,nameDest,oldbalanceOrg,newbalanceOrig,",
        "oldbalanceDest,newbalanceDest,isFraud\n",
        "CASH_OUT,1000,C123,M123,5000,4000,1000,2000,0\n",
        "TRANSFER,2000,C456,M456,1000,800,300,500,1\n",
        "CASH_OUT,1500,C789,M789,3000,1500,200,100,0\n",
    );

    const UNLABELED_CSV: &str = concat!(
        "type,amount,originAccountId,destAccountId,originBalanceBefore,",
        "originBalanceAfter,destBalanceBefore,destBalanceAfter\n",
        "CASH_OUT,1200,C999,M999,5000,3800,100,1300\n",
        "TRANSFER,800,C888,M888,2000,1500,50,400\n",
        "UNKNOWN,50,C777,M777,60,10,0,50\n",
    );

    fn create_test_record(
        tx_type: Option<&str>,
        amount: f64,
        is_fraud: Option<bool>,
    ) -> TransactionRecord {
        TransactionRecord {
            tx_type: tx_type.map(String::from),
            amount,
            origin_account_id: Some("C12345".to_string()),
            dest_account_id: Some("M67890".to_string()),
            origin_balance_before: amount * 2.0,
            origin_balance_after: amount,
            dest_balance_before: 0.0,
            dest_balance_after: amount,
            is_fraud,
            is_flagged_fraud: Some(false),
        }
    }

    // Large transfers are fraud, everything else is legit
    fn create_training_records() -> Vec<TransactionRecord> {
        (0..40)
            .map(|i| {
                let transfer = i % 2 == 0;
                let amount = 100.0 * (i + 1) as f64;
                create_test_record(
                    Some(if transfer { "TRANSFER" } else { "PAYMENT" }),
                    amount,
                    Some(transfer && amount > 2000.0),
                )
            })
            .collect()
    }

    fn test_config(dir: &Path) -> PipelineConfig {
        let mut config = PipelineConfig::default();
        config.output.dir = dir.to_path_buf();
        config
    }

    fn write_input(dir: &Path, name: &str, contents: &str) -> Location {
        let path = dir.join(name);
        fs::write(&path, contents).unwrap();
        Location::csv(path)
    }

    #[test]
    fn test_masking_is_deterministic_hex() {
        let first = mask_identifier("C12345");
        assert_eq!(first, mask_identifier("C12345"), "Masking should be deterministic");
        assert_eq!(first.len(), 64, "Digest should be 64 hex characters");
        assert!(first.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_ne!(first, mask_identifier("M67890"), "Different ids should not collide");
        assert_ne!(first, "C12345");
    }

    #[test]
    fn test_mask_account_ids_in_place() {
        let with_ids = create_test_record(Some("CASH_OUT"), 10.0, None);
        let without_ids = TransactionRecord {
            origin_account_id: None,
            dest_account_id: None,
            ..with_ids.clone()
        };
        let mut records = vec![with_ids, without_ids];
        mask_account_ids(&mut records);

        assert_eq!(
            records[0].origin_account_id.as_deref(),
            Some(mask_identifier("C12345").as_str())
        );
        assert_eq!(
            records[0].dest_account_id.as_deref(),
            Some(mask_identifier("M67890").as_str())
        );
        assert_eq!(records[1].origin_account_id, None, "Missing ids should stay missing");
        assert_eq!(records[1].dest_account_id, None);
    }

    #[test]
    fn test_type_encoding() {
        let encoder = PipelineConfig::default().encoder();
        assert_eq!(encoder.encode_type(Some("CASH_OUT")), 1);
        assert_eq!(encoder.encode_type(Some("PAYMENT")), 2);
        assert_eq!(encoder.encode_type(Some("CASH_IN")), 3);
        assert_eq!(encoder.encode_type(Some("TRANSFER")), 4);
        assert_eq!(encoder.encode_type(Some("DEBIT")), 5);
        assert_eq!(encoder.encode_type(Some("UNKNOWN")), UNKNOWN_TYPE_CODE);
        assert_eq!(encoder.encode_type(Some("")), UNKNOWN_TYPE_CODE);
        assert_eq!(encoder.encode_type(None), UNKNOWN_TYPE_CODE);
        // lookup is by name only, numeric strings are unrecognized
        assert_eq!(encoder.encode_type(Some("3")), UNKNOWN_TYPE_CODE);
        assert_eq!(encoder.encode_type(Some("4")), UNKNOWN_TYPE_CODE);
        assert_eq!(encoder.encode_type(Some("9")), UNKNOWN_TYPE_CODE);
    }

    #[test]
    fn test_unknown_type_encodes_to_zero() {
        let encoder = PipelineConfig::default().encoder();
        let record = create_test_record(Some("UNKNOWN"), 500.0, None);
        assert_eq!(record.preprocess(&encoder).tx_type, 0);
    }

    #[test]
    fn test_custom_type_table() {
        let mut config = PipelineConfig::default();
        config.type_codes.retain(|tc| tc.name != "DEBIT");
        let encoder = config.encoder();
        assert_eq!(encoder.encode_type(Some("DEBIT")), UNKNOWN_TYPE_CODE);
        assert_eq!(encoder.type_codes().len(), 4);
    }

    #[test]
    fn test_retained_columns_drop_identifiers() {
        let encoder = PipelineConfig::default().encoder();
        let columns: Vec<String> = [
            "type",
            "amount",
            "originAccountId",
            "destAccountId",
            "isFlaggedFraud",
            "isFraud",
        ]
        .iter()
        .map(|c| c.to_string())
        .collect();

        let retained = encoder.retained_columns(&columns);
        assert_eq!(retained, vec!["type", "amount", "isFraud"]);
        // dropping is idempotent and a no-op when nothing matches
        assert_eq!(encoder.retained_columns(&retained), retained);
        let clean = vec!["amount".to_string()];
        assert_eq!(encoder.retained_columns(&clean), clean);
    }

    #[test]
    fn test_preprocessing_is_idempotent() {
        let encoder = PipelineConfig::default().encoder();
        let records = vec![
            create_test_record(Some("CASH_OUT"), 1000.0, Some(false)),
            create_test_record(None, 20.0, None),
        ];
        let once = preprocess(&records, &encoder);
        let twice = preprocess(&once, &encoder);
        assert_eq!(once, twice);
        assert_eq!(once[0].tx_type, 1);
        assert_eq!(once[1].tx_type, 0, "Absent type should encode to 0");
    }

    #[test]
    fn test_empty_preprocessing() {
        let encoder = PipelineConfig::default().encoder();
        let empty: Vec<TransactionRecord> = vec![];
        assert!(preprocess(&empty, &encoder).is_empty());
    }

    #[test]
    fn test_split_is_seeded_and_disjoint() {
        let (train, eval) = train_test_split(10, 0.2, 42);
        assert_eq!(train.len(), 8);
        assert_eq!(eval.len(), 2);
        assert!(eval.iter().all(|i| !train.contains(i)));
        assert_eq!((train.clone(), eval.clone()), train_test_split(10, 0.2, 42));

        let (train, eval) = train_test_split(3, 0.2, 42);
        assert_eq!((train.len(), eval.len()), (2, 1), "Evaluation share rounds up");
    }

    #[test]
    fn test_fit_separates_fraud() {
        let records = create_training_records();
        let pipeline = FraudPipeline::fit(
            PipelineConfig::default().encoder(),
            &records,
            &PipelineConfig::default().tree,
        )
        .unwrap();

        let probabilities = pipeline.predict_proba(&records);
        assert_eq!(probabilities.len(), records.len());
        assert!(probabilities.iter().all(|p| (0.0..=1.0).contains(p)));

        let predicted = pipeline.predict(&records, 0.3);
        let correct = predicted
            .iter()
            .zip(records.iter())
            .filter(|(p, r)| Some(**p) == r.is_fraud)
            .count();
        assert!(correct >= 36, "Tree should learn the rule, got {correct}/40");
    }

    #[test]
    fn test_fit_requires_labels() {
        let records = vec![
            create_test_record(Some("CASH_OUT"), 10.0, Some(false)),
            create_test_record(Some("CASH_OUT"), 20.0, None),
        ];
        let result = FraudPipeline::fit(
            PipelineConfig::default().encoder(),
            &records,
            &PipelineConfig::default().tree,
        );
        assert!(matches!(result, Err(PipelineError::InputFormat(_))));
    }

    #[test]
    fn test_persistence_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.json");
        let records = create_training_records();
        let config = PipelineConfig::default();
        let pipeline = FraudPipeline::fit(config.encoder(), &records, &config.tree).unwrap();

        persistence::save(&pipeline, &path).unwrap();
        let loaded = persistence::load(&path).unwrap();

        assert_eq!(loaded, pipeline);
        let held_out = vec![
            create_test_record(Some("TRANSFER"), 3150.0, None),
            create_test_record(Some("PAYMENT"), 3150.0, None),
            create_test_record(Some("DEBIT"), 5.0, None),
        ];
        assert_eq!(loaded.predict_proba(&held_out), pipeline.predict_proba(&held_out));
        assert_eq!(loaded.predict(&held_out, 0.3), pipeline.predict(&held_out, 0.3));
    }

    #[test]
    fn test_load_missing_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let result = persistence::load(&dir.path().join("absent.json"));
        assert!(matches!(result, Err(PipelineError::ModelNotFound(_))));
    }

    #[test]
    fn test_load_rejects_unknown_version_and_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let records = create_training_records();
        let config = PipelineConfig::default();
        let pipeline = FraudPipeline::fit(config.encoder(), &records, &config.tree).unwrap();
        let path = dir.path().join("pipeline.json");
        persistence::save(&pipeline, &path).unwrap();

        let json = fs::read_to_string(&path).unwrap();
        let bumped = json.replacen("\"format_version\": 1", "\"format_version\": 99", 1);
        fs::write(&path, bumped).unwrap();
        assert!(matches!(persistence::load(&path), Err(PipelineError::CorruptArtifact(_))));

        fs::write(&path, "not json").unwrap();
        assert!(matches!(persistence::load(&path), Err(PipelineError::CorruptArtifact(_))));
    }

    #[test]
    fn test_train_on_three_labeled_rows() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let source = write_input(dir.path(), "labeled.csv", LABELED_CSV);

        let summary = run(&source, &config, None).unwrap();
        assert_eq!(summary.mode, RunMode::Train);
        assert!(summary.metrics.is_some());
        assert_eq!(summary.predictions.len(), 1, "Evaluation partition holds one row");
        assert!(summary.predictions[0].actual_label.is_some());

        let report = fs::read_to_string(config.output.report_path()).unwrap();
        assert!(report.contains("ROC AUC"), "Report should state the ROC AUC");
        assert!(report.contains("Classification Report:"));
        assert!(config.output.roc_path().exists());
        assert!(config.output.artifact_path().exists());

        let predictions = fs::read_to_string(config.output.predictions_path()).unwrap();
        assert!(predictions.starts_with("type,amount,originBalanceBefore"));
        assert!(predictions.lines().next().unwrap().contains("actualLabel"));
    }

    #[test]
    fn test_outputs_never_contain_raw_ids() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let source = write_input(dir.path(), "labeled.csv", LABELED_CSV);
        run(&source, &config, None).unwrap();

        for path in [
            config.output.report_path(),
            config.output.predictions_path(),
            config.output.artifact_path(),
        ] {
            let contents = fs::read_to_string(&path).unwrap();
            for raw in ["C123", "M456", "C789"] {
                assert!(!contents.contains(raw), "{} leaks {raw}", path.display());
            }
        }
    }

    #[test]
    fn test_score_without_artifact_fails() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let source = write_input(dir.path(), "unlabeled.csv", UNLABELED_CSV);

        let result = run(&source, &config, None);
        assert!(matches!(result, Err(PipelineError::ModelNotFound(_))));
    }

    #[test]
    fn test_train_then_score() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        run(&write_input(dir.path(), "labeled.csv", LABELED_CSV), &config, None).unwrap();

        let unlabeled = write_input(dir.path(), "unlabeled.csv", UNLABELED_CSV);
        let summary = run(&unlabeled, &config, None).unwrap();
        assert_eq!(summary.mode, RunMode::Score);
        assert!(summary.metrics.is_none());
        assert_eq!(summary.predictions.len(), 3);
        assert!(summary.predictions.iter().all(|p| p.actual_label.is_none()));
        assert_eq!(summary.predictions[2].record.tx_type, 0, "UNKNOWN type encodes to 0");

        let written = fs::read_to_string(config.output.unlabeled_predictions_path()).unwrap();
        assert_eq!(written.lines().count(), 4);
        assert!(!written.lines().next().unwrap().contains("actualLabel"));
    }

    #[test]
    fn test_empty_input_gives_empty_output() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let header_only = UNLABELED_CSV.lines().next().unwrap().to_string() + "\n";
        let source = write_input(dir.path(), "empty.csv", &header_only);

        // no artifact exists, yet an empty batch still succeeds
        let summary = run(&source, &config, None).unwrap();
        assert!(summary.predictions.is_empty());
        assert!(config.output.unlabeled_predictions_path().exists());
    }

    #[test]
    fn test_missing_required_column() {
        let dir = tempfile::tempdir().unwrap();
        let source = write_input(dir.path(), "bad.csv", "type,amount\nCASH_OUT,10\n");
        let result = source.load();
        assert!(matches!(result, Err(PipelineError::InputFormat(_))));
    }

    #[test]
    fn test_unreadable_source_is_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = Location::csv(dir.path().join("absent.csv")).load();
        assert!(matches!(result, Err(PipelineError::Storage(_))));
    }

    #[test]
    fn test_malformed_value_is_input_error() {
        let dir = tempfile::tempdir().unwrap();
        let bad = LABELED_CSV.replace("CASH_OUT,1000,", "CASH_OUT,lots,");
        let source = write_input(dir.path(), "bad.csv", &bad);
        assert!(matches!(source.load(), Err(PipelineError::InputFormat(_))));
    }

    #[test]
    fn test_sqlite_import_and_train() {
        let dir = tempfile::tempdir().unwrap();
        let csv_path = dir.path().join("labeled.csv");
        fs::write(&csv_path, LABELED_CSV).unwrap();
        let db_path = dir.path().join("transactions.db");

        storage::init_transactions_table(&db_path, "transactions").unwrap();
        let rows = storage::import_csv(&csv_path, &db_path, "transactions").unwrap();
        assert_eq!(rows, 3);

        let source = Location::sqlite(&db_path, "transactions");
        let set = storage::load(&source).unwrap();
        assert_eq!(set.records.len(), 3);
        assert_eq!(set.records[0].tx_type.as_deref(), Some("CASH_OUT"));
        assert_eq!(set.records[1].is_fraud, Some(true));

        let config = test_config(dir.path());
        let sink = Location::sqlite(dir.path().join("out.db"), "predictions");
        let summary = run(&source, &config, Some(&sink)).unwrap();
        assert_eq!(summary.mode, RunMode::Train);

        let conn = rusqlite::Connection::open(dir.path().join("out.db")).unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM predictions", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count as usize, summary.predictions.len());
    }

    #[test]
    fn test_sqlite_write_replaces_table() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Location::sqlite(dir.path().join("out.db"), "predictions");
        let prediction = |tx_type: u8| PredictionResult {
            record: EncodedRecord {
                tx_type,
                amount: 10.0,
                origin_balance_before: 20.0,
                origin_balance_after: 10.0,
                dest_balance_before: 0.0,
                dest_balance_after: 10.0,
                is_fraud: None,
            },
            predicted_label: false,
            fraud_probability: 0.1,
            actual_label: None,
        };

        sink.write(&[prediction(1), prediction(2), prediction(3)]).unwrap();
        storage::write(&[prediction(4)], &sink).unwrap();

        let conn = rusqlite::Connection::open(dir.path().join("out.db")).unwrap();
        let types: Vec<i64> = conn
            .prepare("SELECT type FROM predictions")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(types, vec![4], "A write replaces the previous rows");
    }

    #[test]
    fn test_sqlite_missing_table_is_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let source = Location::sqlite(dir.path().join("empty.db"), "transactions");
        assert!(matches!(source.load(), Err(PipelineError::Storage(_))));
    }

    #[test]
    fn test_encoder_matches_artifact_encoder() {
        let config = PipelineConfig::default();
        let records = create_training_records();
        let pipeline = FraudPipeline::fit(config.encoder(), &records, &config.tree).unwrap();
        let standalone = FeatureEncoder::new(&config.type_codes);
        assert_eq!(pipeline.encoder, standalone);
    }

    #[test]
    fn test_dropped_columns_are_fixed() {
        assert_eq!(DROPPED_COLUMNS, ["originAccountId", "destAccountId", "isFlaggedFraud"]);

        // the artifact carries only the type table
        let config = PipelineConfig::default();
        let records = create_training_records();
        let pipeline = FraudPipeline::fit(config.encoder(), &records, &config.tree).unwrap();
        let json = serde_json::to_string(&pipeline.encoder).unwrap();
        assert!(!json.contains("drop"), "Encoder should not store a drop list: {json}");
    }

    #[test]
    fn test_import_keeps_only_csv_columns() {
        let dir = tempfile::tempdir().unwrap();
        let csv_path = dir.path().join("unlabeled.csv");
        fs::write(&csv_path, UNLABELED_CSV).unwrap();
        let db_path = dir.path().join("transactions.db");

        storage::import_csv(&csv_path, &db_path, "transactions").unwrap();
        let set = Location::sqlite(&db_path, "transactions").load().unwrap();
        assert!(!set.has_column("isFraud"), "Unlabeled import should stay unlabeled");
        assert!(!set.has_column("isFlaggedFraud"));
        assert!(set.records.iter().all(|r| r.is_fraud.is_none()));
        assert_eq!(set.records[2].tx_type.as_deref(), Some("UNKNOWN"));
    }

    #[test]
    fn test_score_from_imported_sqlite_table() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        run(&write_input(dir.path(), "labeled.csv", LABELED_CSV), &config, None).unwrap();

        let csv_path = dir.path().join("unlabeled.csv");
        fs::write(&csv_path, UNLABELED_CSV).unwrap();
        let db_path = dir.path().join("transactions.db");
        let rows = storage::import_csv(&csv_path, &db_path, "transactions").unwrap();
        assert_eq!(rows, 3);

        let source = Location::sqlite(&db_path, "transactions");
        let sink = Location::sqlite(dir.path().join("out.db"), "predictions");
        let summary = run(&source, &config, Some(&sink)).unwrap();
        assert_eq!(summary.mode, RunMode::Score, "Imported unlabeled table should be scored");
        assert_eq!(summary.predictions.len(), 3);
        assert!(summary.metrics.is_none());
        assert!(config.output.unlabeled_predictions_path().exists());

        let conn = rusqlite::Connection::open(dir.path().join("out.db")).unwrap();
        let (count, with_actual): (i64, i64) = conn
            .query_row(
                "SELECT COUNT(*), (SELECT COUNT(*) FROM pragma_table_info('predictions') \
                 WHERE name = 'actualLabel') FROM predictions",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(count, 3);
        assert_eq!(with_actual, 0, "Scored rows carry no actualLabel column");
    }
}
