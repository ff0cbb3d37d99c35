//! djlm-analysis - analysis engine command line
//!
//! Imports audio files into the catalog, runs analyzers, derives cue points
//! and reports duplicate groups. Ctrl-C terminates running analyzers.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use djlm_common::config::{RootFolderInitializer, RootFolderResolver, TomlConfig};
use djlm_common::events::EventBus;
use djlm_common::models::AnalyzerKind;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use djlm_analysis::db::{Catalog, SqliteCatalog};
use djlm_analysis::AnalysisEngine;

/// How long an interrupted command may keep running to persist its state
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// 128 + SIGINT
const INTERRUPTED_EXIT_CODE: i32 = 130;

#[derive(Parser)]
#[command(name = "djlm-analysis", version, about = "DJ library analysis engine")]
struct Cli {
    /// Config file (overrides DJLM_CONFIG)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Root folder holding the catalog database (overrides DJLM_ROOT)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Register audio files as catalog tracks
    Import {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Run analyzers against tracks
    Analyze {
        #[arg(required = true)]
        track_ids: Vec<Uuid>,
        /// Comma-separated analyzer names (default: tempo,key,energy,metadata)
        #[arg(long, value_delimiter = ',')]
        analyzers: Option<Vec<String>>,
    },
    /// Derive cue points for a track
    Cues { track_id: Uuid },
    /// List probable duplicate groups
    Duplicates,
    /// List catalog tracks
    Tracks,
}

fn init_tracing(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .context("Invalid log filter")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to install tracing subscriber: {}", e))
}

fn default_analyzers() -> Vec<String> {
    [
        AnalyzerKind::Tempo,
        AnalyzerKind::Key,
        AnalyzerKind::Energy,
        AnalyzerKind::Metadata,
    ]
    .iter()
    .map(|k| k.as_str().to_string())
    .collect()
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = TomlConfig::load_or_default(cli.config.as_deref())
        .context("Failed to load configuration")?;
    init_tracing(&config.logging.level)?;

    info!("Starting djlm-analysis {}", env!("CARGO_PKG_VERSION"));

    let root_folder = RootFolderResolver::new("analysis")
        .with_cli_arg(cli.root.clone())
        .with_config(&config)
        .resolve();
    let initializer = RootFolderInitializer::new(root_folder);
    initializer
        .ensure_directory_exists()
        .context("Failed to initialize root folder")?;

    let db_path = initializer.database_path();
    info!("Database: {}", db_path.display());
    let catalog: Arc<dyn Catalog> = Arc::new(SqliteCatalog::open(&db_path).await?);

    let event_bus = EventBus::new(100);
    let engine = Arc::new(AnalysisEngine::new(&config, catalog, event_bus));

    {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                let cancelled = engine.shutdown();
                warn!(cancelled, "Interrupt received, analysis stopped");

                // Give the running command time to record its cancelled jobs; a second interrupt exits at once
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = tokio::time::sleep(SHUTDOWN_GRACE) => {}
                }
                std::process::exit(INTERRUPTED_EXIT_CODE);
            }
        });
    }

    match cli.command {
        Command::Import { paths } => {
            let imported = djlm_analysis::import::import_files(engine.catalog().as_ref(), &paths).await?;
            for track in &imported {
                println!("{}\t{}", track.id, track.path.display());
            }
            info!(count = imported.len(), "Import finished");
        }
        Command::Analyze {
            track_ids,
            analyzers,
        } => {
            let analyzers = analyzers.unwrap_or_else(default_analyzers);
            if let [track_id] = track_ids.as_slice() {
                let summary = engine
                    .orchestrator()
                    .analyze_track(*track_id, &analyzers)
                    .await?;
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                let summary = engine
                    .orchestrator()
                    .analyze_selected_tracks(&track_ids, &analyzers)
                    .await;
                println!("{}", serde_json::to_string_pretty(&summary)?);
            }
        }
        Command::Cues { track_id } => {
            let cues = engine.cues().generate_cues(track_id).await?;
            println!("{}", serde_json::to_string_pretty(&cues)?);
        }
        Command::Duplicates => {
            let groups = engine.duplicates().find_duplicates().await?;
            println!("{}", serde_json::to_string_pretty(&groups)?);
        }
        Command::Tracks => {
            for track in engine.catalog().all_tracks().await? {
                println!(
                    "{}\t{}\t{}\t{}\t{}",
                    track.id,
                    track.bpm.map(|b| b.to_string()).unwrap_or_default(),
                    track.key.as_deref().unwrap_or(""),
                    track.energy.map(|e| e.to_string()).unwrap_or_default(),
                    track.path.display()
                );
            }
        }
    }

    Ok(())
}
