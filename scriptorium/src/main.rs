//! scriptorium - analysis lifecycle manager
//!
//! CLI over scriptorium-core: upload analysis scripts, drive their workers,
//! inspect version history and logs, and manage environments.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use scriptorium_core::{
    format, AnalysisEngine, AnalysisKind, AnalysisUpdate, ChaChaCipher, Cipher, Config,
    EngineSettings, LoggingRuntime, OpenTeamDirectory, TimeRange,
};

#[derive(Parser)]
#[command(name = "scriptorium", version, about = "Analysis lifecycle manager")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List all analyses
    List,
    /// Upload a script file as a new analysis
    Create {
        name: String,
        /// Script file to upload
        #[arg(long)]
        file: PathBuf,
        /// Team to assign the analysis to
        #[arg(long)]
        team: Option<String>,
    },
    /// Print the live source of an analysis
    Show { name: String },
    /// Start an analysis worker
    Run { name: String },
    /// Stop an analysis worker
    Stop { name: String },
    /// Update source content, team, or enabled flag
    Update {
        name: String,
        /// File holding the new source content
        #[arg(long)]
        file: Option<PathBuf>,
        #[arg(long)]
        team: Option<String>,
        /// Auto-restart on system start (true/false)
        #[arg(long)]
        enabled: Option<bool>,
    },
    /// Rename an analysis, keeping versions and logs
    Rename { name: String, new_name: String },
    /// Delete an analysis and all its files
    Delete { name: String },
    /// Show execution logs, most recent first
    Logs {
        name: String,
        #[arg(long, default_value_t = 1)]
        page: usize,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Dump raw logs filtered to a time range (1h, 24h, 7d, 30d, all)
    DownloadLogs {
        name: String,
        #[arg(long, default_value = "all")]
        range: String,
    },
    /// Clear all execution logs (destructive)
    ClearLogs { name: String },
    /// List stored versions
    Versions { name: String },
    /// Print one version's content (0 = live)
    VersionContent { name: String, version: u32 },
    /// Snapshot the live content unless already stored
    SaveVersion { name: String },
    /// Roll back to a stored version
    Rollback { name: String, version: u32 },
    /// Print decrypted environment variables
    Env { name: String },
    /// Replace environment variables (KEY=VALUE ...)
    SetEnv { name: String, vars: Vec<String> },
    /// Start previously running and enabled analyses, then stream events
    /// until interrupted
    Up,
}

fn build_engine(config: &Config) -> Result<AnalysisEngine> {
    let cipher: Arc<dyn Cipher> = match &config.engine.env_key {
        Some(key) => Arc::new(ChaChaCipher::from_key_b64(key)?),
        None => Arc::new(ChaChaCipher::load_or_generate(&Config::env_key_path())?),
    };
    Ok(AnalysisEngine::new(
        EngineSettings::from_config(config),
        Arc::new(LoggingRuntime),
        Arc::new(OpenTeamDirectory),
        cipher,
    ))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load().context("failed to load configuration")?;
    let _log_guard = scriptorium_core::logging::init(&config.logging)
        .context("failed to initialize logging")?;

    let default_limit = config.engine.log_page_size;
    let engine = build_engine(&config)?;
    engine
        .initialize()
        .await
        .context("failed to initialize engine")?;

    match cli.command {
        Command::List => {
            let summaries = engine.list_analyses().await?;
            if summaries.is_empty() {
                println!("no analyses");
                return Ok(());
            }
            println!(
                "{:<24} {:<10} {:<8} {:>10}  {:<14} {}",
                "NAME", "STATUS", "ENABLED", "SIZE", "TEAM", "LAST START"
            );
            for s in summaries {
                println!(
                    "{:<24} {:<10} {:<8} {:>10}  {:<14} {}",
                    s.name,
                    s.status,
                    s.enabled,
                    s.size,
                    s.team_id.as_deref().unwrap_or("-"),
                    format::format_relative_time_opt(s.last_start_time),
                );
            }
        }
        Command::Create { name, file, team } => {
            let content = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            engine
                .create_analysis(&name, &content, AnalysisKind::Listener, team.as_deref())
                .await?;
            println!("created analysis '{name}' (version 1)");
        }
        Command::Show { name } => {
            print!("{}", engine.content(&name).await?);
        }
        Command::Run { name } => {
            let status = engine.run(&name, AnalysisKind::Listener).await?;
            println!("{name}: {status}");
        }
        Command::Stop { name } => {
            engine.stop(&name).await?;
            println!("{name}: stopped");
        }
        Command::Update {
            name,
            file,
            team,
            enabled,
        } => {
            let content = match file {
                Some(path) => Some(
                    std::fs::read_to_string(&path)
                        .with_context(|| format!("failed to read {}", path.display()))?,
                ),
                None => None,
            };
            let outcome = engine
                .update_analysis(
                    &name,
                    AnalysisUpdate {
                        content,
                        team_id: team,
                        enabled,
                    },
                )
                .await?;
            match outcome.saved_version {
                Some(v) => println!("updated '{name}' (previous content saved as v{v})"),
                None => println!("updated '{name}'"),
            }
            if outcome.restarted {
                println!("worker restarted");
            }
        }
        Command::Rename { name, new_name } => {
            let outcome = engine.rename_analysis(&name, &new_name).await?;
            println!("renamed '{name}' to '{new_name}'");
            if outcome.restarted {
                println!("worker restarted");
            }
        }
        Command::Delete { name } => {
            engine.delete_analysis(&name).await?;
            println!("deleted '{name}'");
        }
        Command::Logs { name, page, limit } => {
            let page = engine
                .logs(&name, page, limit.unwrap_or(default_limit))
                .await?;
            for entry in &page.entries {
                println!(
                    "{:>6}  [{}] {}",
                    entry.sequence,
                    entry.timestamp.to_rfc3339(),
                    entry.message
                );
            }
            println!(
                "-- {} of {} entries ({:?} tier){}",
                page.entries.len(),
                page.total_count,
                page.source,
                if page.has_more { ", more available" } else { "" }
            );
        }
        Command::DownloadLogs { name, range } => {
            let range = TimeRange::from_str(&range)?;
            print!("{}", engine.download_logs(&name, range).await?);
        }
        Command::ClearLogs { name } => {
            engine.clear_logs(&name).await?;
            println!("logs cleared for '{name}'");
        }
        Command::Versions { name } => {
            let meta = engine.versions(&name).await?;
            for v in &meta.versions {
                let marker = if v.version == meta.current_version {
                    "*"
                } else {
                    " "
                };
                println!(
                    "{marker} v{:<4} {:>10}  {}",
                    v.version,
                    format::format_file_size(v.size),
                    v.timestamp.to_rfc3339()
                );
            }
            if meta.current_version == meta.next_version_number {
                println!("* live content is an unsaved draft");
            }
        }
        Command::VersionContent { name, version } => {
            print!("{}", engine.version_content(&name, version).await?);
        }
        Command::SaveVersion { name } => match engine.save_version(&name).await? {
            Some(v) => println!("saved version {v}"),
            None => println!("no version created - content unchanged"),
        },
        Command::Rollback { name, version } => {
            let outcome = engine.rollback_to_version(&name, version).await?;
            println!("rolled back '{name}' to version {}", outcome.version);
            if outcome.restarted {
                println!("worker restarted");
            }
        }
        Command::Env { name } => {
            for (key, value) in engine.environment(&name).await? {
                println!("{key}={value}");
            }
        }
        Command::SetEnv { name, vars } => {
            let mut pairs = Vec::with_capacity(vars.len());
            for var in &vars {
                let (key, value) = var
                    .split_once('=')
                    .with_context(|| format!("expected KEY=VALUE, got '{var}'"))?;
                pairs.push((key.to_string(), value.to_string()));
            }
            let outcome = engine.update_environment(&name, pairs).await?;
            println!("environment updated for '{name}'");
            if outcome.restarted {
                println!("worker restarted");
            }
        }
        Command::Up => {
            let started = engine.start_enabled().await?;
            println!("{started} analyses started; streaming events (ctrl-c to exit)");

            let mut events = engine.subscribe();
            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        println!("shutting down");
                        break;
                    }
                    event = events.recv() => match event {
                        Ok(event) => match serde_json::to_string(&event) {
                            Ok(line) => println!("{line}"),
                            Err(e) => tracing::warn!(error = %e, "failed to serialize event"),
                        },
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                            tracing::warn!(missed, "event stream lagged");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        }
    }

    Ok(())
}
