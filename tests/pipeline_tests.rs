use food_access_map::config::{AppConfig, ClassifierMode, OutputFormat};
use food_access_map::data::{load_scores, parse_demographics};
use food_access_map::processing::join_and_classify;
use food_access_map::render::write_artifact;
use food_access_map::types::TractId;
use std::env;
use std::fs;
use std::path::PathBuf;

const SCORES_CSV: &str = "\
Census Tract,Score-Limited Access to Healthy Food Retailers\n\
53033000100,85\n\
53033000200,75\n\
53033000300,95\n\
Statewide,50\n\
53033000400,\n";

const TRACTS_GEOJSON: &str = r#"{
    "type": "FeatureCollection",
    "features": [
        {
            "type": "Feature",
            "properties": { "Census_Tract": 53033000100.0, "Percent_People_of_Color": 45.0 },
            "geometry": { "type": "Polygon", "coordinates": [[[-120.0, 47.0], [-119.6, 47.0], [-119.6, 47.4], [-120.0, 47.4], [-120.0, 47.0]]] }
        },
        {
            "type": "Feature",
            "properties": { "Census_Tract": 53033000200.0, "Percent_People_of_Color": 15.0 },
            "geometry": { "type": "Polygon", "coordinates": [[[-119.5, 47.0], [-119.1, 47.0], [-119.1, 47.4], [-119.5, 47.4], [-119.5, 47.0]]] }
        },
        {
            "type": "Feature",
            "properties": { "Census_Tract": 53033000900.0, "Percent_People_of_Color": 60.0 },
            "geometry": { "type": "Polygon", "coordinates": [[[-119.0, 47.0], [-118.6, 47.0], [-118.6, 47.4], [-119.0, 47.4], [-119.0, 47.0]]] }
        }
    ]
}"#;

fn pipeline_config(scores_name: &str, output_name: &str) -> AppConfig {
    let mut config = AppConfig::default();
    config.input.scores_csv = env::temp_dir().join(scores_name);
    config.output.path = env::temp_dir().join(output_name);
    config
}

fn run_pipeline(config: &AppConfig) -> Vec<food_access_map::types::JoinedRecord> {
    fs::write(&config.input.scores_csv, SCORES_CSV).unwrap();
    let (scores, score_report) = load_scores(config).unwrap();
    assert_eq!(score_report.invalid_tract_id, 1);
    assert_eq!(score_report.missing_score, 1);

    let (tracts, _) = parse_demographics(TRACTS_GEOJSON, config).unwrap();
    let (records, _) = join_and_classify(config, tracts, &scores);
    records
}

#[test]
fn joined_records_match_published_classification() {
    let config = pipeline_config("fam_e2e_classify.csv", "fam_e2e_classify.html");
    let records = run_pipeline(&config);

    // Tract 53033000900 exists only remotely, 53033000300/400 only locally.
    assert_eq!(records.len(), 2);

    let high = records
        .iter()
        .find(|r| r.tract_id == TractId(53033000100))
        .unwrap();
    assert_eq!(high.bi_class.unwrap().code(), "32");
    assert_eq!(high.color.as_deref(), Some("#8c62aa"));

    let low = records
        .iter()
        .find(|r| r.tract_id == TractId(53033000200))
        .unwrap();
    assert_eq!(low.bi_class.unwrap().code(), "11");
    assert_eq!(low.color.as_deref(), Some("#e8e8e8"));

    fs::remove_file(&config.input.scores_csv).unwrap();
}

#[test]
fn html_artifact_is_written_once_and_nonempty() {
    let config = pipeline_config("fam_e2e_html.csv", "fam_e2e_html.html");
    let _ = fs::remove_file(&config.output.path);

    let records = run_pipeline(&config);
    let path = write_artifact(&config, &records).unwrap();

    assert_eq!(path, config.output.path);
    let content = fs::read_to_string(&path).unwrap();
    assert!(!content.is_empty());
    assert!(content.contains("53033000100"));
    assert!(content.contains("#8c62aa"));
    assert!(content.contains("Bivariate Legend"));

    fs::remove_file(&config.input.scores_csv).unwrap();
    fs::remove_file(&path).unwrap();
}

#[test]
fn svg_artifact_is_written_once_and_nonempty() {
    let mut config = pipeline_config("fam_e2e_svg.csv", "fam_e2e_svg.svg");
    config.output.format = OutputFormat::Svg;
    config.output.image_width = 300;
    let _ = fs::remove_file(&config.output.path);

    let records = run_pipeline(&config);
    let path = write_artifact(&config, &records).unwrap();

    let content = fs::read_to_string(&path).unwrap();
    assert!(content.starts_with("<svg"));
    assert!(content.contains("#8c62aa"));

    fs::remove_file(&config.input.scores_csv).unwrap();
    fs::remove_file(&path).unwrap();
}

#[test]
fn png_artifact_is_written_once_and_nonempty() {
    let mut config = pipeline_config("fam_e2e_png.csv", "fam_e2e_png.png");
    config.output.format = OutputFormat::Png;
    config.output.image_width = 150;
    let _ = fs::remove_file(&config.output.path);

    let records = run_pipeline(&config);
    let path = write_artifact(&config, &records).unwrap();

    let metadata = fs::metadata(&path).unwrap();
    assert!(metadata.len() > 0);

    fs::remove_file(&config.input.scores_csv).unwrap();
    fs::remove_file(&path).unwrap();
}

#[test]
fn quantile_mode_runs_the_legacy_classifier() {
    let mut config = pipeline_config("fam_e2e_quantile.csv", "fam_e2e_quantile.html");
    config.classification.mode = ClassifierMode::Quantile;

    let records = run_pipeline(&config);

    // 45 vs 85: breaks sit at 58.3 and 71.7, so the pair splits to "13".
    let high = records
        .iter()
        .find(|r| r.tract_id == TractId(53033000100))
        .unwrap();
    assert_eq!(high.bi_class.unwrap().code(), "13");

    fs::remove_file(&config.input.scores_csv).unwrap();
}

#[test]
fn missing_config_file_is_an_error_but_no_file_means_defaults() {
    assert!(AppConfig::load_from_file(&PathBuf::from("/nonexistent/config.toml")).is_err());
    let config = AppConfig::load(None).unwrap();
    assert_eq!(config.classification.mode, ClassifierMode::Fixed);
}
