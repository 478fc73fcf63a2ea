use std::fs;
use std::time::Duration;

use assert_matches::assert_matches;

use kira_annotations::config::{
    AnnotationRequest, AnnotationsEntry, Config, ConfigLoader, read_identifier_file,
};
use kira_annotations::error::KiraError;

#[test]
fn parse_config_file() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("kira-annot.json");
    fs::write(
        &path,
        r#"{
            "schema_version": 1,
            "identifiers": ["P69905", " sp|P68871|HBB_HUMAN ", ""],
            "annotations": ["reviewed", "taxonomy"],
            "workers": 2,
            "timeout_secs": 5,
            "reference_max_age_days": 2,
            "keep_intermediate": false
        }"#,
    )
    .unwrap();

    let resolved = ConfigLoader::resolve(path.to_str()).unwrap();
    assert_eq!(resolved.identifiers, vec!["P69905", "sp|P68871|HBB_HUMAN"]);
    assert_eq!(
        resolved.annotations,
        Some(AnnotationRequest::Names(vec![
            "reviewed".to_string(),
            "taxonomy".to_string()
        ]))
    );
    assert_eq!(resolved.settings.workers, 2);
    assert_eq!(resolved.settings.batch_size, 100);
    assert_eq!(resolved.settings.timeout, Duration::from_secs(5));
    assert_eq!(resolved.settings.reference_max_age, Duration::from_secs(2 * 86_400));
    assert!(!resolved.settings.keep_intermediate);
}

#[test]
fn zero_timeout_in_file_is_rejected() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("kira-annot.json");
    fs::write(&path, r#"{"identifiers": ["P69905"], "timeout_secs": 0}"#).unwrap();
    let err = ConfigLoader::resolve(path.to_str()).unwrap_err();
    assert_matches!(err, KiraError::ConfigParse(_));
}

#[test]
fn single_annotation_string_may_name_a_table() {
    let temp = tempfile::tempdir().unwrap();
    let table = temp.path().join("precomputed.tsv");
    fs::write(&table, "identifier\tcluster\nP69905\t1\n").unwrap();

    let config = Config {
        annotations: Some(AnnotationsEntry::Single(table.to_string_lossy().into_owned())),
        ..Config::default()
    };
    let resolved = ConfigLoader::resolve_config(config).unwrap();
    assert_eq!(resolved.annotations, Some(AnnotationRequest::Table(table)));
}

#[test]
fn missing_table_path_is_treated_as_names() {
    assert_eq!(
        AnnotationRequest::parse("absent.csv"),
        AnnotationRequest::Names(vec!["absent.csv".to_string()])
    );
}

#[test]
fn invalid_config_values() {
    let zero_workers = Config {
        workers: Some(0),
        ..Config::default()
    };
    assert_matches!(
        ConfigLoader::resolve_config(zero_workers),
        Err(KiraError::ConfigParse(_))
    );

    let future_schema = Config {
        schema_version: Some(2),
        ..Config::default()
    };
    assert_matches!(
        ConfigLoader::resolve_config(future_schema),
        Err(KiraError::ConfigParse(_))
    );
}

#[test]
fn unreadable_explicit_config() {
    assert_matches!(
        ConfigLoader::resolve(Some("/nonexistent/kira-annot.json")),
        Err(KiraError::ConfigRead(_))
    );
}

#[test]
fn plain_identifier_file_skips_comments() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("ids.txt");
    fs::write(&path, "# hemoglobins\nP69905\n\n  P68871  \n").unwrap();
    assert_eq!(read_identifier_file(&path).unwrap(), vec!["P69905", "P68871"]);
}
