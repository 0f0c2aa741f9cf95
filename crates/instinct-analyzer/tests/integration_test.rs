//! Integration tests running real engine processes

use instinct_analyzer::{AnalysisOutcome, AnalyzerConfig, CliAnalyzer, EngineCommand, PatternExtractor};
use instinct_store::{InstinctStore, ObservationStore, StorePaths, DEFAULT_MAX_FILE_SIZE};
use instinct_types::Observation;
use std::sync::Arc;

fn extractor(command: &str, root: &std::path::Path) -> PatternExtractor {
    let paths = StorePaths::new(root);
    let config = AnalyzerConfig {
        command: EngineCommand::Simple(command.into()),
        ..AnalyzerConfig::default()
    };
    let analyzer = CliAnalyzer::new(&config, paths.instincts_dir()).unwrap();

    let store = ObservationStore::new(&paths, DEFAULT_MAX_FILE_SIZE);
    for i in 0..10 {
        store
            .append(&Observation::parse_error(&format!("raw {i}"), 2000))
            .unwrap();
    }

    PatternExtractor::new(store, InstinctStore::new(paths.instincts_dir()), Arc::new(analyzer))
}

#[tokio::test]
#[ignore] // Requires the claude CLI: cargo test -- --ignored
async fn test_real_engine() {
    let dir = tempfile::tempdir().unwrap();
    let extractor = extractor("claude", dir.path());

    let outcome = extractor.analyze().await.unwrap();
    assert!(matches!(outcome, AnalysisOutcome::Completed { records: 10, .. }));
}

#[tokio::test]
async fn test_missing_engine_archives_batch() {
    let dir = tempfile::tempdir().unwrap();
    let extractor = extractor("no-such-instinct-engine", dir.path());

    let outcome = extractor.analyze().await.unwrap();
    match outcome {
        AnalysisOutcome::EngineFailed { records, archive, error } => {
            assert_eq!(records, 10);
            assert!(archive.is_some());
            assert!(error.contains("not found"));
        }
        other => panic!("Expected EngineFailed, got {other:?}"),
    }
    assert_eq!(extractor.store().line_count().unwrap(), 0);
    assert!(StorePaths::new(dir.path()).instincts_dir().is_dir());
}

#[cfg(unix)]
#[tokio::test]
async fn test_failing_engine_archives_batch() {
    let dir = tempfile::tempdir().unwrap();
    let extractor = extractor("false", dir.path());

    let outcome = extractor.analyze().await.unwrap();
    assert!(matches!(outcome, AnalysisOutcome::EngineFailed { records: 10, .. }));
    assert_eq!(extractor.store().archives().unwrap().len(), 1);
}
