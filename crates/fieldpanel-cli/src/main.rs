use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use fieldpanel_api::{shutdown_signal, AppState, Server};
use fieldpanel_core::{delete_trial_data, ConfigManager, Settings, TrialId};
use fieldpanel_proxy::ProxyServer;
use fieldpanel_runtime::{DesktopController, DesktopOutcome, SysinfoProcessTable};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "fieldpanel")]
#[command(about = "Control panel for aquatic mapping simulation trials", long_about = None)]
#[command(version)]
struct Cli {
    /// Directory holding default.toml / <env>.toml / local.toml
    #[arg(long, global = true, env = "FIELDPANEL_CONFIG_DIR")]
    config_dir: Option<PathBuf>,

    /// Configuration environment (defaults to APP_ENV or "development")
    #[arg(long, global = true)]
    env: Option<String>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the control panel web server
    Serve {
        #[arg(long)]
        host: Option<String>,

        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Run the per-trial VNC proxy
    Proxy {
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Delete mission data and reconstruction results of trials
    Cleanup {
        /// Trial numbers
        #[arg(required = true)]
        trials: Vec<u32>,
    },

    /// Host remote desktop (x11vnc + noVNC)
    #[command(subcommand)]
    Desktop(DesktopCommands),

    /// Print the effective configuration
    Config,
}

#[derive(Subcommand)]
enum DesktopCommands {
    Start,
    Stop,
    Status,
}

fn init_tracing(settings: &Settings, verbose: bool) {
    let fallback = if verbose {
        "fieldpanel=debug,tower_http=debug".to_string()
    } else {
        match settings.logging.level.trim() {
            "" => "fieldpanel=info,tower_http=info".to_string(),
            level if level.contains('=') => level.to_string(),
            level => format!("fieldpanel={level},tower_http={level}"),
        }
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config = ConfigManager::load(cli.config_dir.clone(), cli.env.clone())
        .context("Failed to load configuration")?;
    let mut settings = config.into_settings();
    init_tracing(&settings, cli.verbose);

    match cli.command {
        Commands::Serve { host, port } => {
            if let Some(host) = host {
                settings.server.host = host;
            }
            if let Some(port) = port {
                settings.server.port = port;
            }
            serve(settings).await?;
        }
        Commands::Proxy { port } => {
            if let Some(port) = port {
                settings.proxy.port = port;
            }
            info!(port = settings.proxy.port, "Starting trial VNC proxy");
            ProxyServer::new(settings.proxy)?
                .run(shutdown_signal())
                .await?;
        }
        Commands::Cleanup { trials } => return Ok(cleanup(&settings, &trials)),
        Commands::Desktop(cmd) => return desktop(settings, cmd).await,
        Commands::Config => {
            let rendered = toml::to_string_pretty(&settings).context("rendering configuration")?;
            println!("{rendered}");
        }
    }

    Ok(ExitCode::SUCCESS)
}

async fn serve(settings: Settings) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", settings.server.host, settings.server.port)
        .parse()
        .with_context(|| {
            format!(
                "invalid listen address {}:{}",
                settings.server.host, settings.server.port
            )
        })?;

    let state = AppState::from_settings(settings)
        .await
        .context("Failed to initialize application state")?;
    Server::new(addr, state).run().await
}

fn cleanup(settings: &Settings, trials: &[u32]) -> ExitCode {
    let layout = settings.layout();
    let mut failed = false;

    for &trial in trials {
        let id = TrialId(trial);
        println!("{}", format!("Trial {id}").bold());

        let report = delete_trial_data(&layout, id);
        info!(trial = %id, deleted = report.deleted.len(), errors = report.errors.len(), "Cleanup finished");
        if report.is_empty() {
            println!("  {} no data found", "-".yellow());
            continue;
        }
        for item in &report.deleted {
            println!("  {} deleted {}", "✓".green(), item);
        }
        for error in &report.errors {
            warn!(trial = %id, "Cleanup error: {}", error);
            println!("  {} {}", "✗".red(), error);
            failed = true;
        }
    }

    if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn print_outcome(outcome: &DesktopOutcome) {
    let mark = if outcome.success {
        "✓".green()
    } else {
        "✗".red()
    };
    println!("{} {}", mark, outcome.message);
    if let Some(port) = outcome.vnc_port {
        println!("  VNC:   localhost:{port}");
    }
    if let (Some(port), Some(url)) = (outcome.novnc_port, &outcome.novnc_url) {
        println!("  noVNC: port {port} ({url})");
    }
}

async fn desktop(settings: Settings, cmd: DesktopCommands) -> Result<ExitCode> {
    let controller = DesktopController::new(settings.desktop, Arc::new(SysinfoProcessTable::new()))
        .context("invalid desktop configuration")?;

    match cmd {
        DesktopCommands::Start => print_outcome(&controller.start().await?),
        DesktopCommands::Stop => print_outcome(&controller.stop().await?),
        DesktopCommands::Status => {
            let status = controller.status().await;
            let show = |running: bool| {
                if running {
                    "running".green()
                } else {
                    "stopped".red()
                }
            };
            println!("x11vnc:    {}", show(status.x11vnc_running));
            println!("websockify: {}", show(status.novnc_running));
            if let Some(url) = &status.novnc_url {
                println!("noVNC URL: {url}");
            }
            if !status.running {
                return Ok(ExitCode::FAILURE);
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}
