//! sessionkit - sign in to the backend and inspect the session from a terminal.
//!
//! Every command builds the same session store the frontend uses, so
//! `whoami` exercises the full bootstrap: token lookup, `/auth/me` with
//! retries, and token cleanup on rejection.

mod app;

use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use serde_json::{Map, Value};
use tracing::{debug, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use sessionkit_core::routes::{load_verify, match_route, VERIFY_PRERENDER, VERIFY_ROUTE};
use sessionkit_core::{Config, StorageBackend};

use app::{describe_state, App, TerminalNavigator};

#[derive(Debug, Parser)]
#[command(name = "sessionkit", version, about = "Manage your session with the backend")]
struct Cli {
    /// Backend base URL (overrides config and environment)
    #[arg(long, global = true)]
    api_url: Option<String>,

    /// Where to keep the session token: file, keyring or memory
    #[arg(long, global = true)]
    storage: Option<StorageBackend>,

    /// Also write logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Resolve the stored token and show the signed-in user
    Whoami,
    /// Store a session token and verify it
    Login { token: String },
    /// Sign in from a verification link path, e.g. /auth/verify/<token>
    Verify { path: String },
    /// Forget the stored session
    Logout,
    /// Start a subscription checkout
    Checkout,
    /// Send an analytics event
    Track {
        event: String,
        /// Event property as key=value; values that parse as JSON are sent as JSON
        #[arg(long = "prop", value_parser = parse_prop)]
        props: Vec<(String, Value)>,
    },
}

fn parse_prop(raw: &str) -> std::result::Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", raw))?;
    if key.is_empty() {
        return Err("property name must not be empty".to_string());
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

/// Initialize the tracing subscriber for logging
fn init_tracing(log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let name = path
                .file_name()
                .ok_or_else(|| anyhow!("--log-file must name a file"))?;
            let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));
            (Some(fmt::layer().with_writer(writer).with_ansi(false)), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .init();

    Ok(guard)
}

async fn login(app: &App, token: &str) -> Result<ExitCode> {
    let state = app.session.set_session_token(token).await?;
    println!("{}", describe_state(&state));
    Ok(if state.is_authenticated() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let mut config = Config::load()?;
    if let Some(url) = cli.api_url {
        config.api_base_url = url;
    }
    if let Some(storage) = cli.storage {
        config.storage = storage;
    }

    let app = App::new(config).await?;

    match cli.command {
        Command::Whoami => {
            app.session.initialize().await;
            app.session.debug();
            println!("{}", describe_state(&app.session.state()));
            Ok(ExitCode::SUCCESS)
        }
        Command::Login { token } => login(&app, &token).await,
        Command::Verify { path } => {
            debug!(route = VERIFY_ROUTE, prerender = VERIFY_PRERENDER, "Loading verification page");
            let page = match_route(VERIFY_ROUTE, &path)
                .and_then(|params| load_verify(&params))
                .ok_or_else(|| anyhow!("'{}' is not a verification link ({})", path, VERIFY_ROUTE))?;
            login(&app, &page.token).await
        }
        Command::Logout => {
            app.session.logout().await;
            println!("Signed out.");
            Ok(ExitCode::SUCCESS)
        }
        Command::Checkout => match app.checkout.redirect(&TerminalNavigator).await {
            Ok(_) => Ok(ExitCode::SUCCESS),
            Err(_) => Ok(ExitCode::FAILURE),
        },
        Command::Track { event, props } => {
            let properties: Map<String, Value> = props.into_iter().collect();
            app.tracker.track(&event, Some(properties)).await;
            Ok(ExitCode::SUCCESS)
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let _guard = init_tracing(cli.log_file.as_deref())?;
    info!("sessionkit starting");

    run(cli).await
}
