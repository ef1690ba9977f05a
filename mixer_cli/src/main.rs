mod cli;
mod error_fmt;
mod session;

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::Parser;
use eyre::WrapErr;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

use crate::cli::{Cli, Commands, FILE_GUARD, JSON_MODE};
use crate::error_fmt::{exit_code_for_error, format_error_json, humanize};
use crate::session::ConsoleObserver;

fn main() {
    let cli = Cli::parse();
    let _ = JSON_MODE.set(cli.json);
    if let Err(e) = color_eyre::install() {
        eprintln!("warning: could not install error hooks: {e}");
    }

    if let Err(err) = run(cli) {
        tracing::error!(error = %session::chain_text(&err), "command failed");
        if JSON_MODE.get().copied().unwrap_or(false) {
            eprintln!("{}", format_error_json(&err));
        } else {
            eprintln!("{}", humanize(&err));
        }
        std::process::exit(exit_code_for_error(&err));
    }
}

fn run(cli: Cli) -> eyre::Result<()> {
    let cfg = session::load_config(cli.config.as_deref())?;
    init_tracing(&cli, &cfg.logging)?;
    let sim = cli.sim || cfg.simulation.enabled;
    tracing::debug!(sim, command = ?cli.cmd, "starting");

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let flag = Arc::clone(&shutdown);
        if let Err(e) = ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst)) {
            tracing::warn!(error = %e, "could not install Ctrl-C handler");
        }
    }

    match cli.cmd {
        Commands::Ports => session::list_ports(&cfg, sim, cli.json),
        Commands::SelfCheck => {
            let sys = session::build_system(&cfg, sim, Arc::new(ConsoleObserver::new(cli.json)))?;
            let port = session::self_check(&sys)?;
            if cli.json {
                println!(
                    "{}",
                    serde_json::json!({ "event": "self_check", "ok": true, "port": port })
                );
            } else {
                println!("self-check ok: telemetry received on {port}");
            }
            Ok(())
        }
        Commands::Run {
            schedule,
            resolution_s,
        } => {
            let sys = session::build_system(&cfg, sim, Arc::new(ConsoleObserver::new(cli.json)))?;
            let summary = session::run_schedule(&sys, &cfg, &schedule, resolution_s, &shutdown)?;
            print_summary(&summary, cli.json);
            Ok(())
        }
        Commands::Manual {
            setpoints,
            valve,
            duration_s,
        } => {
            let sys = session::build_system(&cfg, sim, Arc::new(ConsoleObserver::new(cli.json)))?;
            let summary =
                session::run_manual(&sys, valve.into(), setpoints, duration_s, &shutdown)?;
            print_summary(&summary, cli.json);
            Ok(())
        }
    }
}

fn print_summary(summary: &session::RunSummary, json: bool) {
    if json {
        println!("{}", summary.to_json());
    } else {
        println!("{}", summary.render());
    }
}

fn init_tracing(cli: &Cli, logging: &mixer_config::Logging) -> eyre::Result<()> {
    let level = cli
        .log_level
        .as_deref()
        .or(logging.level.as_deref())
        .unwrap_or("info");
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .wrap_err_with(|| format!("invalid log level {level:?}"))?;

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();
    if cli.json {
        layers.push(
            fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .boxed(),
        );
    } else {
        layers.push(
            fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr)
                .boxed(),
        );
    }

    if let Some(file) = logging.file.as_deref() {
        let rotation = match logging.rotation.as_deref().unwrap_or("never") {
            "daily" => Rotation::DAILY,
            "hourly" => Rotation::HOURLY,
            _ => Rotation::NEVER,
        };
        let path = Path::new(file);
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let name = path
            .file_name()
            .ok_or_else(|| eyre::eyre!("logging.file must name a file, got {file:?}"))?;
        let appender = RollingFileAppender::new(rotation, dir, name);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let _ = FILE_GUARD.set(guard);
        layers.push(
            fmt::layer()
                .json()
                .with_ansi(false)
                .with_writer(writer)
                .boxed(),
        );
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
        .wrap_err("install tracing subscriber")
}
