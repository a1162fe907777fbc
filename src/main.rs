use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

use shashinkan::{Catalog, Config};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Global options that apply to all commands
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: PathBuf,

    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Scan the source tree and print the inventory with metadata summaries
    Scan {
        /// Substring filter over the searchable text fields
        #[arg(short, long)]
        query: Option<String>,

        /// Filter by derived orientation (portrait, landscape, square)
        #[arg(long)]
        orient: Option<String>,
    },

    /// Print the distinct region and season facet values for the catalog
    Facets,

    /// Pre-generate every thumbnail and display derivative
    Prebuild {
        /// Also build the WebP variant of each derivative
        #[arg(long)]
        webp: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = if cli.config.exists() {
        let config_content = std::fs::read_to_string(&cli.config)?;
        toml_edit::de::from_str::<Config>(&config_content)?
    } else {
        info!("Config file not found at {:?}, using defaults", cli.config);
        Config::default()
    };

    info!("Starting {}", config.app.name);
    info!(
        "Source directory: {:?}",
        config.catalog.source_directory
    );

    let catalog = Catalog::new(config);

    match cli.command {
        Commands::Scan { query, orient } => {
            let sources = catalog.scan().await?;
            let summaries = catalog.summaries(&sources).await;

            let query = query.unwrap_or_default();
            let orient = orient.unwrap_or_default();
            let matched: Vec<_> = summaries
                .iter()
                .filter(|s| s.matches_query(&query) && s.matches_orientation(&orient))
                .collect();

            println!("{}", serde_json::to_string_pretty(&matched)?);
            info!("{} of {} images matched", matched.len(), sources.len());
        }
        Commands::Facets => {
            let sources = catalog.scan().await?;
            let summaries = catalog.summaries(&sources).await;
            let facets = catalog.facets(&summaries);
            println!("{}", serde_json::to_string_pretty(&facets)?);
        }
        Commands::Prebuild { webp } => {
            let sources = catalog.scan().await?;
            let edges = catalog.config().derivatives.thumbnail_edges.clone();
            let display_edge = catalog.config().derivatives.display_max_edge;

            let report = catalog.prebuild(sources, edges, display_edge, webp).await;
            println!(
                "{} artifacts generated ({} skipped, {} failed)",
                report.generated, report.skipped, report.failed
            );
        }
    }

    Ok(())
}
