use crate::config::AppConfig;
use crate::types::{DemographicRecord, FoodAccessRecord, TractId};
use anyhow::{anyhow, Context, Result};
use csv::ReaderBuilder;
use geo::MultiPolygon;
use geojson::GeoJson;
use std::fs::File;
use tracing::{info, warn};

/// Rows excluded while loading the local score table, by reason.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ScoreReport {
    pub loaded: usize,
    pub invalid_tract_id: usize,
    pub missing_score: usize,
}

/// Features excluded while reading the remote collection, by reason.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DemographicReport {
    pub loaded: usize,
    pub invalid_tract_id: usize,
    pub unusable_geometry: usize,
}

/// Loads and cleans the food-access score table.
///
/// Rows whose tract identifier does not parse as a whole number are excluded,
/// as are rows with a missing or non-numeric score cell. Exclusions are
/// counted rather than silently dropped.
pub fn load_scores(config: &AppConfig) -> Result<(Vec<FoodAccessRecord>, ScoreReport)> {
    let file = File::open(&config.input.scores_csv)
        .with_context(|| format!("Failed to open scores CSV: {:?}", config.input.scores_csv))?;
    let mut rdr = ReaderBuilder::new().from_reader(file);
    let headers = rdr.headers()?.clone();

    let tract_idx = headers
        .iter()
        .position(|h| h == config.input.tract_column)
        .ok_or_else(|| anyhow!("Tract column '{}' not found in CSV", config.input.tract_column))?;
    let score_idx = headers
        .iter()
        .position(|h| h == config.input.score_column)
        .ok_or_else(|| anyhow!("Score column '{}' not found in CSV", config.input.score_column))?;

    let mut records = Vec::new();
    let mut report = ScoreReport::default();

    for result in rdr.records() {
        let row = result?;

        let tract_id = match row.get(tract_idx).and_then(TractId::parse_str) {
            Some(id) => id,
            None => {
                report.invalid_tract_id += 1;
                continue;
            }
        };

        let access_score = match row
            .get(score_idx)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .and_then(|s| s.parse::<f64>().ok())
        {
            Some(v) => v,
            None => {
                report.missing_score += 1;
                continue;
            }
        };

        records.push(FoodAccessRecord { tract_id, access_score });
    }

    report.loaded = records.len();
    if report.invalid_tract_id > 0 || report.missing_score > 0 {
        warn!(
            invalid_tract_id = report.invalid_tract_id,
            missing_score = report.missing_score,
            "Excluded rows from score table"
        );
    }
    info!(loaded = report.loaded, "Loaded food-access scores");

    Ok((records, report))
}

/// Fetches the demographic feature collection from the remote service.
///
/// Network or parse failures are fatal; there is no retry.
pub async fn fetch_demographics(
    config: &AppConfig,
) -> Result<(Vec<DemographicRecord>, DemographicReport)> {
    info!(url = %config.remote.url, "Fetching demographic features");

    let response = reqwest::Client::new()
        .get(&config.remote.url)
        .query(&[("outFields", "*"), ("where", "1=1"), ("f", "geojson")])
        .send()
        .await
        .with_context(|| format!("Feature service request failed: {}", config.remote.url))?
        .error_for_status()
        .context("Feature service returned an error status")?;

    let body = response
        .text()
        .await
        .context("Failed to read feature service response body")?;

    parse_demographics(&body, config)
}

/// Parses a GeoJSON feature collection into demographic records.
pub fn parse_demographics(
    body: &str,
    config: &AppConfig,
) -> Result<(Vec<DemographicRecord>, DemographicReport)> {
    let geojson: GeoJson = body
        .parse()
        .context("Failed to parse feature service response as GeoJSON")?;

    let collection = match geojson {
        GeoJson::FeatureCollection(fc) => fc,
        _ => return Err(anyhow!("Feature service response must be a FeatureCollection")),
    };

    let mut records = Vec::new();
    let mut report = DemographicReport::default();

    for feature in collection.features {
        let tract_id = match feature
            .properties
            .as_ref()
            .and_then(|props| props.get(&config.remote.tract_field))
            .and_then(json_tract_id)
        {
            Some(id) => id,
            None => {
                report.invalid_tract_id += 1;
                continue;
            }
        };

        let percent_poc = feature
            .properties
            .as_ref()
            .and_then(|props| props.get(&config.remote.percent_field))
            .and_then(json_number);

        let geometry = match feature.geometry {
            Some(geom) => {
                let converted: geo::Geometry<f64> = geom
                    .value
                    .try_into()
                    .map_err(|e| anyhow!("Failed to convert feature geometry: {:?}", e))?;
                match converted {
                    geo::Geometry::MultiPolygon(mp) => mp,
                    geo::Geometry::Polygon(p) => MultiPolygon::new(vec![p]),
                    _ => {
                        // Points and lines cannot be shaded.
                        report.unusable_geometry += 1;
                        continue;
                    }
                }
            }
            None => {
                report.unusable_geometry += 1;
                continue;
            }
        };

        records.push(DemographicRecord {
            tract_id,
            percent_poc,
            geometry,
        });
    }

    report.loaded = records.len();
    if report.invalid_tract_id > 0 || report.unusable_geometry > 0 {
        warn!(
            invalid_tract_id = report.invalid_tract_id,
            unusable_geometry = report.unusable_geometry,
            "Excluded features from demographic collection"
        );
    }
    info!(loaded = report.loaded, "Parsed demographic tracts");

    Ok((records, report))
}

fn json_tract_id(value: &serde_json::Value) -> Option<TractId> {
    match value {
        serde_json::Value::String(s) => TractId::parse_str(s),
        serde_json::Value::Number(n) => n.as_f64().and_then(TractId::from_f64),
        _ => None,
    }
}

fn json_number(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
