use super::*;
use aptamyx_common::DockingMethod;

#[test]
fn test_default_output() {
    let output = OutputConfig::default();
    assert_eq!(output.csv_path, PathBuf::from("aptamer_candidates.csv"));
    assert_eq!(output.top_n, 5);
    assert!(output.report_path.is_none());
}

#[test]
fn test_empty_file_is_all_defaults() {
    let config = Config::from_toml_str("").unwrap();
    assert_eq!(config.pipeline.generation.default_length, 20);
    assert_eq!(config.pipeline.docking.placeholder_affinity, -7.0);
    assert_eq!(config.output.top_n, 5);
}

#[test]
fn test_sections_are_read() {
    let config = Config::from_toml_str(
        r#"
        [generation]
        seed = 7

        [docking]
        method = "vina"
        exhaustiveness = 16

        [execution]
        temp_dir = "/tmp/aptamyx"
        workers = 2

        [output]
        csv_path = "ranked.csv"
        report_path = "report.json"
        top_n = 10
        "#,
    )
    .unwrap();
    assert_eq!(config.pipeline.generation.seed, Some(7));
    assert_eq!(config.pipeline.docking.method, DockingMethod::Vina);
    assert_eq!(config.pipeline.docking.exhaustiveness, 16);
    assert_eq!(config.pipeline.execution.workers, 2);
    assert_eq!(config.output.csv_path, PathBuf::from("ranked.csv"));
    assert_eq!(config.output.report_path, Some(PathBuf::from("report.json")));
    assert_eq!(config.output.top_n, 10);
}

#[test]
fn test_invalid_pipeline_section_is_rejected() {
    assert!(Config::from_toml_str("[execution]\nworkers = 0\n").is_err());
    assert!(Config::from_toml_str("[generation]\nmin_length = 50\n").is_err());
}

#[test]
fn test_missing_explicit_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    assert!(Config::load(Some(&dir.path().join("absent.toml"))).is_err());
}

#[test]
fn test_explicit_file_is_loaded() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("aptamyx.toml");
    std::fs::write(&path, "[scoring]\nn_trees = 12\n").unwrap();
    let config = Config::load(Some(&path)).unwrap();
    assert_eq!(config.pipeline.scoring.n_trees, 12);
}
