use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Runtime configuration for the whole pipeline. Every constant the map
/// depends on (source locations, field names, thresholds, colors, output
/// path, view parameters) lives here; `Default` carries the values the map
/// was originally published with.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AppConfig {
    pub input: InputConfig,
    pub remote: RemoteConfig,
    pub classification: ClassificationConfig,
    pub colors: HashMap<String, String>,
    pub output: OutputConfig,
    pub server: ServerConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            input: InputConfig::default(),
            remote: RemoteConfig::default(),
            classification: ClassificationConfig::default(),
            colors: default_colors(),
            output: OutputConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct InputConfig {
    pub scores_csv: PathBuf,
    pub tract_column: String,
    pub score_column: String,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            scores_csv: PathBuf::from("csv_files/Limited_Access_to_Healthy_Food.csv"),
            tract_column: "Census Tract".to_string(),
            score_column: "Score-Limited Access to Healthy Food Retailers".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RemoteConfig {
    pub url: String,
    pub tract_field: String,
    pub percent_field: String,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            url: "https://services8.arcgis.com/rGGrs6HCnw87OFOT/arcgis/rest/services/People_of_Color_v2/FeatureServer/0/query".to_string(),
            tract_field: "Census_Tract".to_string(),
            percent_field: "Percent_People_of_Color".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ClassifierMode {
    Fixed,
    /// Legacy per-pair tertile mode. See `processing::classify_quantile`.
    Quantile,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ClassificationConfig {
    pub mode: ClassifierMode,
    /// Closed upper bounds for demographic classes 1 and 2.
    pub percent_breaks: [f64; 2],
    /// Closed upper bounds for access classes 1 and 2.
    pub score_breaks: [f64; 2],
}

impl Default for ClassificationConfig {
    fn default() -> Self {
        Self {
            mode: ClassifierMode::Fixed,
            percent_breaks: [20.0, 40.0],
            score_breaks: [80.0, 90.0],
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Html,
    Svg,
    Png,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct OutputConfig {
    pub path: PathBuf,
    pub format: OutputFormat,
    /// Initial view for the interactive map: [lat, lon].
    pub map_center: [f64; 2],
    pub zoom: u8,
    /// Pixel width of static artifacts; height follows the data aspect.
    pub image_width: u32,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("interactive_map_with_legend.html"),
            format: OutputFormat::Html,
            map_center: [47.5, -120.0],
            zoom: 6,
            image_width: 1400,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 8080 }
    }
}

/// The nine bivariate codes and their published hex colors.
pub fn default_colors() -> HashMap<String, String> {
    [
        ("33", "#3b4994"),
        ("32", "#8c62aa"),
        ("31", "#be64ac"),
        ("23", "#5698b9"),
        ("22", "#a5add3"),
        ("21", "#dfb0d6"),
        ("13", "#5ac8c8"),
        ("12", "#ace4e4"),
        ("11", "#e8e8e8"),
    ]
    .into_iter()
    .map(|(code, color)| (code.to_string(), color.to_string()))
    .collect()
}

impl AppConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let config: AppConfig = toml::from_str(&content)
            .with_context(|| "Failed to parse TOML configuration")?;
        Ok(config)
    }

    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load_from_file(p),
            None => {
                info!("No config file given, using built-in defaults");
                Ok(Self::default())
            }
        }
    }
}
