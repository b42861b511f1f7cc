//! stackctl - System Profile Switcher
//!
//! Coordinates safe transitions between mutually exclusive system profiles
//! (desktop, server, dev) on top of APT and Flatpak.
//!
//! Features:
//! - Install/remove packages and apps through one request contract
//! - Switch profiles behind a snapshot, with a post-migration health check
//! - Report migration impact and risk before switching
//! - Background update monitoring
//!
//! Usage: stackctl [OPTIONS] <ACTION> | serve

mod actions;
mod api;
mod config;
mod error;
mod migration;
mod monitor;
mod profiles;
mod system;
mod types;

use anyhow::{bail, Context, Result};
use api::{Params, Request, Service};
use config::Config;
use monitor::UpdateMonitor;
use serde_json::json;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Parsed command line
#[derive(Debug, Default, PartialEq)]
struct Cli {
    dry_run: bool,
    config: Option<PathBuf>,
    mode: Mode,
}

#[derive(Debug, Default, PartialEq)]
enum Mode {
    #[default]
    Help,
    Version,
    Serve,
    Request {
        action: String,
        id: Option<String>,
        query: Option<String>,
        snapshot: bool,
        allow_unguarded: bool,
    },
}

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let cli = match parse_args(&args) {
        Ok(cli) => cli,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            eprintln!("Run `stackctl --help` for usage.");
            std::process::exit(2);
        }
    };

    match cli.mode {
        Mode::Help => {
            print_help();
            return Ok(());
        }
        Mode::Version => {
            println!("stackctl {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        _ => {}
    }

    if let Err(e) = run(cli) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}

fn print_help() {
    println!(
        r#"stackctl - System Profile Switcher

USAGE:
    stackctl [OPTIONS] <ACTION> [ACTION OPTIONS]
    stackctl [OPTIONS] serve

OPTIONS:
    -n, --dry-run          Show what would be done without executing
    -c, --config <PATH>    Use an alternative config file
    -h, --help             Print help information
    -v, --version          Print version information

ACTIONS:
    list_featured          Profiles and hardware-suggested stacks
    list_all               Bundles, profiles and installed apps
    get_details --id ID    Details for a package, app or profile
    search --query Q       Search catalog and repositories
    install --id ID        Install a package or app
    remove --id ID         Remove a package or app
    switch_profile --id ID Switch to another profile
    migration_impact --id ID
    update                 Refresh package metadata
    check_health           Run the post-migration health check
    restore_snapshot --id ID
    list_snapshots

ACTION OPTIONS:
    --snapshot             Take a restore point before install/remove
    --allow-unguarded      Switch even without a snapshot facility

SERVE:
    Reads one JSON request per line from stdin and writes one JSON
    response per line to stdout. Update notices are written as
    {{"event":"updates_available","count":N}}.

CONFIG:
    ~/.config/stackctl/config.toml
"#
    );
}

fn parse_args(args: &[String]) -> Result<Cli> {
    let mut cli = Cli::default();
    let mut action: Option<String> = None;
    let mut id = None;
    let mut query = None;
    let mut snapshot = false;
    let mut allow_unguarded = false;

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-h" | "--help" => return Ok(Cli::default()),
            "-v" | "--version" => {
                cli.mode = Mode::Version;
                return Ok(cli);
            }
            "-n" | "--dry-run" => cli.dry_run = true,
            "-c" | "--config" => {
                let path = iter.next().context("--config requires a path")?;
                cli.config = Some(PathBuf::from(path));
            }
            "--id" => id = Some(iter.next().context("--id requires a value")?.clone()),
            "--query" => query = Some(iter.next().context("--query requires a value")?.clone()),
            "--snapshot" => snapshot = true,
            "--allow-unguarded" => allow_unguarded = true,
            flag if flag.starts_with('-') => bail!("Unknown option: {}", flag),
            positional => {
                if let Some(first) = &action {
                    bail!("Unexpected argument '{}' after action '{}'", positional, first);
                }
                action = Some(positional.to_string());
            }
        }
    }

    cli.mode = match action.as_deref() {
        None => Mode::Help,
        Some("serve") => Mode::Serve,
        Some(name) => Mode::Request {
            action: name.to_string(),
            id,
            query,
            snapshot,
            allow_unguarded,
        },
    };
    Ok(cli)
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn run(cli: Cli) -> Result<()> {
    let mut config = match &cli.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
    .context("Failed to load configuration")?;
    config.dry_run |= cli.dry_run;

    init_logging(&config.log_level);
    if config.dry_run {
        tracing::info!("running in dry-run mode (no changes will be made)");
    }

    let service = Service::from_config(&config);

    match cli.mode {
        Mode::Serve => serve(Arc::new(service), &config),
        Mode::Request {
            action,
            id,
            query,
            snapshot,
            allow_unguarded,
        } => {
            let request = Request {
                action,
                params: Params {
                    id,
                    query,
                    snapshot,
                    allow_unguarded: allow_unguarded.then_some(true),
                },
            };
            let response = service.handle(&request);
            let rendered = serde_json::to_string_pretty(&response)
                .context("Failed to serialize response")?;
            println!("{}", rendered);
            Ok(())
        }
        Mode::Help | Mode::Version => Ok(()),
    }
}

/// Answer newline-delimited JSON requests until stdin closes
fn serve(service: Arc<Service>, config: &Config) -> Result<()> {
    let monitor = if config.updates.enabled {
        let monitor = UpdateMonitor::spawn(
            service.packages().clone(),
            config.updates.interval(),
            config.updates.queue_capacity,
        )
        .context("Failed to start update monitor")?;

        let notices = monitor.notices().clone();
        std::thread::Builder::new()
            .name("update-notices".into())
            .spawn(move || {
                for notice in notices.iter() {
                    let event = json!({
                        "event": "updates_available",
                        "count": notice.count,
                        "checked_at": notice.checked_at,
                    });
                    if emit(&event.to_string()).is_err() {
                        break;
                    }
                }
            })
            .context("Failed to start notice forwarder")?;
        Some(monitor)
    } else {
        None
    };

    tracing::info!("serving requests on stdin");
    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line.context("Failed to read request")?;
        if line.trim().is_empty() {
            continue;
        }
        let response = service.handle_json(&line);
        emit(&response.to_string()).context("Failed to write response")?;
    }

    if let Some(monitor) = monitor {
        monitor.stop();
    }
    tracing::info!("stdin closed, shutting down");
    Ok(())
}

/// Write one line to stdout atomically
fn emit(line: &str) -> io::Result<()> {
    let mut out = io::stdout().lock();
    writeln!(out, "{}", line)?;
    out.flush()
}
