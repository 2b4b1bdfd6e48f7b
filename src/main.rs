use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;

use food_access_map::{config, data, processing, render, server, types};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch, join, classify, and render the choropleth artifact
    Generate {
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,
    },
    /// Serve the rendered artifact and a tract lookup API
    Serve {
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Generate { config } => {
            let app_config = config::AppConfig::load(config.as_deref())?;
            let records = build_records(&app_config).await?;
            let path = render::write_artifact(&app_config, &records)?;
            info!(path = %path.display(), "Generation complete");
        }
        Commands::Serve { config } => {
            let app_config = config::AppConfig::load(config.as_deref())?;
            let records = build_records(&app_config).await?;
            server::start_server(app_config, records).await?;
        }
    }

    Ok(())
}

/// Runs the pipeline up to classification: load scores, fetch demographics,
/// join, classify, color.
async fn build_records(config: &config::AppConfig) -> Result<Vec<types::JoinedRecord>> {
    let (scores, _score_report) = data::load_scores(config)?;
    let (tracts, _tract_report) = data::fetch_demographics(config).await?;
    let (records, _join_report) = processing::join_and_classify(config, tracts, &scores);
    Ok(records)
}
