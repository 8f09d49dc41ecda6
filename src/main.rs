//! Broker CLI - terminal client for the Schwab brokerage API

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use broker_cli::api::{self, ApiCategory, BrokerClient};
use broker_cli::auth::{
    AuthManager, AuthSnapshot, HttpTokenExchanger, RenewalEvent, RenewalScheduler, TerminalLogin,
};
use broker_cli::config::{EnvFileStore, Settings};

#[derive(Parser)]
#[command(name = "broker-cli")]
#[command(about = "OAuth2 token manager and CLI client for the Schwab brokerage API", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Credential store path (overrides `env_path` in config.toml)
    #[arg(long, global = true)]
    env: Option<PathBuf>,

    /// Settings file (defaults to the platform config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Authenticate: refresh if possible, otherwise log in interactively
    Login {
        /// Force interactive login even if the cached token is valid
        #[arg(short, long)]
        force: bool,
    },

    /// Renew the access token without prompting
    Refresh,

    /// Show current authentication status
    Status,

    /// Print a currently valid bearer token
    Token,

    /// Keep the access token fresh until interrupted
    Daemon,

    /// Authenticated GET against an API product
    Get {
        /// API product
        #[arg(value_enum)]
        category: ApiCategory,

        /// Endpoint path, e.g. /quotes
        endpoint: String,

        /// Query parameter as key=value (repeatable)
        #[arg(short, long = "param", value_parser = parse_param)]
        params: Vec<(String, String)>,
    },
}

fn parse_param(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected key=value, got '{}'", raw))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let mut settings = match &cli.config {
        Some(path) => Settings::load_from(path)?,
        None => Settings::load()?,
    };
    if let Some(env) = cli.env {
        settings.env_path = env;
    }

    let manager = Arc::new(build_manager(&settings)?);
    let auto_renew = settings.auto_renew || matches!(cli.command, Commands::Daemon);
    let scheduler = auto_renew.then(|| RenewalScheduler::spawn(manager.clone()));

    let events = scheduler.as_ref().map(RenewalScheduler::subscribe);
    let result = run(cli.command, &manager, &settings, events).await;

    if let Some(scheduler) = scheduler {
        scheduler.shutdown().await;
    }
    result
}

fn build_manager(settings: &Settings) -> Result<AuthManager> {
    let store = EnvFileStore::new(&settings.env_path);
    let exchanger = HttpTokenExchanger::new(settings.oauth_base(), settings.request_timeout())?;
    let manager = AuthManager::new(Box::new(store), settings.oauth_base(), Arc::new(exchanger))
        .with_context(|| format!("Failed to load credentials from {}", settings.env_path.display()))?
        .with_login_flow(Arc::new(TerminalLogin::default()))
        .with_retry_policy(settings.retry_policy());
    Ok(manager)
}

async fn run(
    command: Commands,
    manager: &Arc<AuthManager>,
    settings: &Settings,
    events: Option<broadcast::Receiver<RenewalEvent>>,
) -> Result<()> {
    match command {
        Commands::Login { force } => {
            tracing::info!("Starting authentication flow...");
            manager.login(force).await?;
            println!("Login successful.");
        }
        Commands::Refresh => {
            manager.ensure_authenticated_background().await?;
            println!("Access token is valid.");
        }
        Commands::Status => {
            print_status(&manager.snapshot().await);
        }
        Commands::Token => {
            println!("{}", manager.current_token().await?);
        }
        Commands::Daemon => {
            manager.ensure_authenticated().await?;
            println!("Renewing access token in the background. Press Ctrl-C to stop.");
            let mut events = events.context("Renewal scheduler is not running")?;
            loop {
                tokio::select! {
                    signal = tokio::signal::ctrl_c() => {
                        signal.context("Failed to listen for Ctrl-C")?;
                        break;
                    }
                    event = events.recv() => match event {
                        Ok(event) => report_event(&event),
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            tracing::warn!("Missed {} renewal events", n);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
            tracing::info!("Shutting down...");
        }
        Commands::Get {
            category,
            endpoint,
            params,
        } => {
            if !endpoint.starts_with('/') {
                bail!("Endpoint must start with '/', e.g. /quotes");
            }
            let client = BrokerClient::new(manager.clone(), settings)?;
            let value = api::api_request(&client, settings, category, &endpoint, &params).await?;
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
    }
    Ok(())
}

fn report_event(event: &RenewalEvent) {
    match event {
        RenewalEvent::LoginRequired { authorization_url } => {
            eprintln!("Automatic renewal paused: the refresh token is no longer usable.");
            eprintln!("Authorize at {}", authorization_url);
            eprintln!("then run 'broker-cli login' and restart the daemon.");
        }
        RenewalEvent::Resumed => eprintln!("Login detected, automatic renewal resumed."),
        RenewalEvent::RenewalFailed { error } => {
            eprintln!("Renewal failed, retrying next cycle: {}", error);
        }
    }
}

fn print_status(snapshot: &AuthSnapshot) {
    let describe = |issued_at: Option<u64>| match issued_at {
        Some(ts) => {
            let issued = chrono::DateTime::from_timestamp(ts as i64, 0)
                .map(|dt| dt.to_rfc3339())
                .unwrap_or_else(|| ts.to_string());
            let age = snapshot.now.saturating_sub(ts);
            format!("issued {} ({}m ago)", issued, age / 60)
        }
        None => "none".to_string(),
    };

    println!("State:         {}", snapshot.state);
    println!("Access token:  {}", describe(snapshot.access_issued_at));
    println!("Refresh token: {}", describe(snapshot.refresh_issued_at));

    if snapshot.state.needs_interactive_login() {
        println!("\nRun 'broker-cli login' to authenticate.");
    }
}
