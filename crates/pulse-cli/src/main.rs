//! # pulse
//!
//! Command-line client that follows an analysis job's progress stream,
//! restarts jobs, and shows where a job's stream lives.

#![deny(unsafe_code)]

mod render;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use pulse_client::{
    ChannelSubscriber, ClientConfig, ConnectionManager, EndpointResolver, RestartController,
    SubscriberEvent,
};
use pulse_core::DocumentId;
use pulse_core::logging::{LogFormat, init_subscriber};
use pulse_settings::{PulseSettings, load_settings_from_path, settings_path};
use tracing::{debug, info};

/// Follow analysis job progress.
#[derive(Parser, Debug)]
#[command(name = "pulse", version, about = "Follow analysis job progress")]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct GlobalArgs {
    /// Settings file (defaults to `~/.pulse/settings.json`).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// API base URL (overrides settings).
    #[arg(long, global = true)]
    api_url: Option<String>,

    /// Log filter directive (overrides settings; `RUST_LOG` wins).
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Follow a job's progress stream until it finishes.
    Watch {
        /// Document whose job to follow.
        document_id: String,

        /// Restart the job before following it.
        #[arg(long)]
        restart: bool,

        /// Keep following after the job reports completed or error.
        #[arg(long)]
        keep_open: bool,

        /// Print progress events as JSON lines.
        #[arg(long)]
        json: bool,
    },
    /// Ask the backend to restart a job.
    Restart {
        /// Document whose job to restart.
        document_id: String,
    },
    /// Print the streaming URL for a document.
    Endpoint {
        /// Document to resolve.
        document_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = load_settings(&cli.global)?;

    let format = if cli.global.json_logs {
        LogFormat::Json
    } else {
        settings.logging.format
    };
    let level = cli
        .global
        .log_level
        .as_deref()
        .unwrap_or(&settings.logging.level);
    init_subscriber(level, format);
    debug!(api = %settings.api.base_url, "settings loaded");

    let config = ClientConfig::from(&settings);
    match cli.command {
        Command::Watch {
            document_id,
            restart,
            keep_open,
            json,
        } => {
            let options = WatchOptions {
                restart,
                keep_open,
                json,
            };
            watch(config, &document_id, options).await
        }
        Command::Restart { document_id } => restart(config, &document_id).await,
        Command::Endpoint { document_id } => {
            let document_id = parse_id(&document_id)?;
            let resolver = EndpointResolver::new(config.api_base_url);
            println!("{}", resolver.analysis_url(&document_id));
            Ok(())
        }
    }
}

fn load_settings(args: &GlobalArgs) -> Result<PulseSettings> {
    let path = args.settings.clone().unwrap_or_else(settings_path);
    let mut settings = load_settings_from_path(&path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))?;
    if let Some(url) = &args.api_url {
        settings.api.base_url.clone_from(url);
        settings
            .validate()
            .context("Invalid --api-url")?;
    }
    Ok(settings)
}

fn parse_id(raw: &str) -> Result<DocumentId> {
    DocumentId::parse(raw).with_context(|| format!("Invalid document id {raw:?}"))
}

#[derive(Clone, Copy, Debug)]
struct WatchOptions {
    restart: bool,
    keep_open: bool,
    json: bool,
}

async fn watch(config: ClientConfig, raw_id: &str, options: WatchOptions) -> Result<()> {
    let document_id = parse_id(raw_id)?;
    let manager = ConnectionManager::new(config).context("Failed to create connection manager")?;

    if options.restart {
        let accepted = manager
            .restart_analysis(&document_id)
            .await
            .context("Restart request failed")?;
        println!("{}", render::restart_line(&document_id, &accepted));
    }

    let (subscriber, mut events) = ChannelSubscriber::new();
    manager.connect(&document_id, Arc::new(subscriber));
    info!(document_id = %document_id, "watching progress");

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let outcome = loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else {
                    break Ok(());
                };
                match event {
                    SubscriberEvent::Progress(progress) => {
                        if options.json {
                            println!("{}", render::progress_json(&progress));
                        } else {
                            println!("{}", render::progress_line(&progress));
                        }
                        if progress.is_finished() && !options.keep_open {
                            break Ok(());
                        }
                    }
                    SubscriberEvent::Error(error) => {
                        eprintln!("error: {error}");
                        if error.is_terminal() {
                            break Err(anyhow::Error::new(error).context("Progress stream ended"));
                        }
                    }
                    SubscriberEvent::State(state) => debug!(%state, "connection state"),
                }
            }
            result = &mut ctrl_c => {
                result.context("Failed to listen for Ctrl-C")?;
                info!("interrupted");
                break Ok(());
            }
        }
    };

    manager.disconnect();
    manager.shutdown().await;
    outcome
}

async fn restart(config: ClientConfig, raw_id: &str) -> Result<()> {
    let document_id = parse_id(raw_id)?;
    let resolver = EndpointResolver::new(config.api_base_url);
    let controller = RestartController::new(resolver, config.request_timeout)
        .context("Failed to create HTTP client")?;
    let accepted = controller
        .restart_analysis(&document_id)
        .await
        .context("Restart request failed")?;
    println!("{}", render::restart_line(&document_id, &accepted));
    Ok(())
}
