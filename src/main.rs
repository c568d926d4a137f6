pub mod cache;
pub mod config;
pub mod data;
pub mod error;
pub mod pipeline;
pub mod processing;
pub mod render;
pub mod scale;
pub mod server;
pub mod spatial;
pub mod types;

use anyhow::{bail, Context};
use cache::SourceCache;
use clap::{Parser, Subcommand};
use config::{AppConfig, RenderOverrides};
use render::TileStyle;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render static HTML choropleth maps
    Generate {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
        /// Render only this level (repeatable); all levels by default
        #[arg(short, long, value_name = "NAME")]
        level: Vec<String>,
        /// Draw area labels at centroids
        #[arg(long, conflicts_with = "no_labels")]
        labels: bool,
        /// Do not draw area labels
        #[arg(long)]
        no_labels: bool,
        /// Base tile style
        #[arg(short, long, value_enum)]
        tiles: Option<TileStyle>,
        /// Numeric column that drives the fill color
        #[arg(long, value_name = "COLUMN")]
        value_field: Option<String>,
        #[arg(short, long, value_name = "DIR")]
        output_dir: Option<PathBuf>,
    },
    /// Serve the interactive dashboard
    Serve {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
        #[arg(short, long)]
        port: Option<u16>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Generate {
            config,
            level,
            labels,
            no_labels,
            tiles,
            value_field,
            output_dir,
        } => {
            info!("Generating maps with config: {:?}", config);
            let app_config = AppConfig::load_from_file(&config)?;

            let selected: Vec<&config::LevelConfig> = if level.is_empty() {
                app_config.levels.iter().collect()
            } else {
                level
                    .iter()
                    .map(|name| {
                        app_config
                            .level(name)
                            .with_context(|| format!("Unknown level '{}'", name))
                    })
                    .collect::<anyhow::Result<Vec<_>>>()?
            };

            let overrides = RenderOverrides {
                labels: match (labels, no_labels) {
                    (true, _) => Some(true),
                    (_, true) => Some(false),
                    _ => None,
                },
                tiles,
                value_field,
                zoom: None,
            };
            let out_dir = output_dir.unwrap_or_else(|| app_config.output.dir.clone());

            let mut cache = SourceCache::new();
            let mut failed = 0;
            for lvl in selected {
                let opts = app_config.options_for(lvl).apply(&overrides);
                match pipeline::render_level(&mut cache, lvl, &opts) {
                    Ok(rendered) => {
                        let path = out_dir.join(format!("map_{}.html", lvl.name));
                        render::save_html(&rendered.artifact, &path)?;
                    }
                    Err(e) => {
                        error!("Level '{}' skipped: {}", lvl.name, e);
                        failed += 1;
                    }
                }
            }

            if failed > 0 {
                bail!("{} level(s) could not be rendered", failed);
            }
            info!("Generation complete!");
        }
        Commands::Serve { config, port } => {
            info!("Serving dashboard with config: {:?}", config);
            let app_config = AppConfig::load_from_file(&config)?;
            let port = port.unwrap_or(app_config.server.port);
            server::start_server(app_config, port).await?;
        }
    }

    Ok(())
}
