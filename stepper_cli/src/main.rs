#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]

mod backend;
mod cli;
mod commands;
mod error_fmt;
mod rt;

use clap::Parser;
use cli::{Cli, Commands, JSON_MODE, json_mode};
use error_fmt::{exit_code_for_error, format_error_json, humanize};
use eyre::{Result, WrapErr};
use std::path::Path;
use stepper_core::MotorConfig;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

fn main() {
    let cli = Cli::parse();
    let _ = JSON_MODE.set(cli.json);

    if let Err(e) = real_main(cli) {
        if json_mode() {
            println!("{}", format_error_json(&e));
        } else {
            eprintln!("{}", humanize(&e));
        }
        tracing::error!(error = %e, "command failed");
        std::process::exit(exit_code_for_error(&e));
    }
}

fn real_main(cli: Cli) -> Result<()> {
    let text = std::fs::read_to_string(&cli.config)
        .wrap_err_with(|| format!("read config {}", cli.config.display()))?;
    let cfg = stepper_config::load_toml(&text)
        .wrap_err_with(|| format!("parse config {}", cli.config.display()))?;

    // Held until the command returns so the file writer flushes.
    let _file_guard = init_tracing(cli.json, &cli.log_level, &cfg.logging)?;
    let _ = color_eyre::install();

    cfg.validate().wrap_err("invalid config")?;
    let motor = MotorConfig::try_from(&cfg)?;
    tracing::debug!(config = %cli.config.display(), styles = motor.styles.len(), "config loaded");

    match cli.cmd {
        Commands::Styles => commands::styles(&motor),
        Commands::Trace {
            style,
            to,
            from,
            limit,
        } => commands::trace(&motor, &style, to, from, limit),
        Commands::Move {
            style,
            to,
            max_tps,
            accel,
            timeout_ms,
            rt,
        } => commands::move_to(
            motor,
            &commands::MoveArgs {
                style,
                to,
                max_tps,
                accel,
                timeout_ms,
                rt,
            },
        ),
        Commands::SelfCheck => commands::self_check(motor),
    }
}

/// Console layer on stderr (pretty or JSON), plus an optional JSON file
/// layer from `[logging]`. `RUST_LOG` overrides `--log-level`.
fn init_tracing(
    json: bool,
    level: &str,
    logging: &stepper_config::Logging,
) -> Result<Option<WorkerGuard>> {
    let filter = || {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
    };

    let console_json = json.then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_filter(filter())
    });
    let console_text = (!json).then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
            .with_filter(filter())
    });

    let mut guard = None;
    let file_layer = match logging.file.as_deref() {
        Some(path) => {
            let path = Path::new(path);
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let name = path
                .file_name()
                .ok_or_else(|| eyre::eyre!("logging.file has no file name: {}", path.display()))?;
            let appender = match logging.rotation.as_deref().unwrap_or("never") {
                "daily" => tracing_appender::rolling::daily(dir, name),
                "hourly" => tracing_appender::rolling::hourly(dir, name),
                _ => tracing_appender::rolling::never(dir, name),
            };
            let (writer, g) = tracing_appender::non_blocking(appender);
            guard = Some(g);
            let file_level = logging.level.clone().unwrap_or_else(|| "info".to_string());
            Some(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_ansi(false)
                    .with_writer(writer)
                    .with_filter(EnvFilter::new(file_level)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(console_json)
        .with(console_text)
        .with(file_layer)
        .try_init()
        .wrap_err("init tracing")?;
    Ok(guard)
}
