//! Human-readable error descriptions, stable exit codes and structured JSON
//! error formatting.

use serde_json::json;
use stepper_core::error::{ConfigError, MotionError};

/// Failures that only exist at the command line.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("move did not park within {ms} ms (position {position})")]
    Timeout { ms: u64, position: f64 },
    #[error("move interrupted by a second Ctrl-C")]
    Interrupted,
}

/// Map an eyre::Report to a human-readable explanation with likely causes and fix hints.
pub fn humanize(err: &eyre::Report) -> String {
    if let Some(me) = err.downcast_ref::<MotionError>() {
        return match me {
            MotionError::Config(ce) => humanize_config(ce),
            MotionError::UnknownStyle(name) => format!(
                "What happened: No drive style named '{name}'.\nLikely causes: Typo, or the style lives in another config file.\nHow to fix: Run `stepper styles` to list the configured styles."
            ),
            MotionError::AlreadyRunning => {
                "What happened: A run was requested while the motor was already running.\nLikely causes: A previous run has not stopped yet.\nHow to fix: Stop the current run first.".to_string()
            }
            MotionError::QueueRejected(reason) => format!(
                "What happened: The wave queue rejected a batch of pulses ({reason}).\nLikely causes: max_pulses or max_waves above what the pulse engine can hold.\nHow to fix: Lower styles.<name>.wave.max_pulses / max_waves in the config. The logged pulse dump shows the offending wave."
            ),
            MotionError::HardwareDisconnected => {
                "What happened: The output lines are not reachable.\nLikely causes: GPIO not available to this process, or the backend went away mid-run.\nHow to fix: Check GPIO permissions and wiring, then rerun `stepper self-check`.".to_string()
            }
            MotionError::Hardware(msg) => format!(
                "What happened: An output write failed ({msg}).\nLikely causes: Incorrect pin numbers or insufficient GPIO permissions.\nHow to fix: Fix motor.pins in the config; ensure the process may access GPIO."
            ),
            MotionError::EngineLost => {
                "What happened: The engine thread panicked; the windings may still be energized.\nLikely causes: A bug; see the logs.\nHow to fix: Power-cycle the driver board and report the log.".to_string()
            }
        };
    }

    if let Some(ce) = err.downcast_ref::<ConfigError>() {
        return humanize_config(ce);
    }

    if let Some(ce) = err.downcast_ref::<CliError>() {
        return match ce {
            CliError::Timeout { ms, position } => format!(
                "What happened: The motor did not park within {ms} ms (stopped at {position}).\nLikely causes: Target too far for the style's speed, or a stalled run.\nHow to fix: Raise --timeout-ms or --max-tps."
            ),
            CliError::Interrupted => {
                "What happened: The move was crash-stopped by a second Ctrl-C.\nLikely causes: Operator request.\nHow to fix: Nothing to fix; position is where the motor stopped.".to_string()
            }
        };
    }

    // String-based heuristics for errors coming from init or config
    let msg = format!("{err:#}");
    let lower = msg.to_ascii_lowercase();

    if lower.contains("read config") {
        return format!(
            "What happened: Could not read the config file.\nLikely causes: Wrong --config path.\nHow to fix: Pass --config <FILE> pointing at a stepper TOML. Original: {msg}"
        );
    }

    if lower.contains("parse config") || lower.contains("invalid config") {
        return format!(
            "What happened: Configuration is invalid ({msg}).\nLikely causes: Missing or out-of-range values in the TOML.\nHow to fix: Edit the config file, then rerun. etc/stepper.toml is a working sample."
        );
    }

    if lower.contains("open motor pins") {
        return "What happened: Failed to initialize hardware pins.\nLikely causes: Incorrect pin numbers or insufficient GPIO permissions.\nHow to fix: Fix motor.pins in the config; ensure the process has permission to access GPIO.".to_string();
    }

    // Generic fallback
    let mut cause = String::new();
    if let Some(src) = err.source() {
        cause = format!(" Cause: {src}");
    }
    format!(
        "Something went wrong.{cause}\nHow to fix: Re-run with --log-level=debug for details. Original: {msg}"
    )
}

fn humanize_config(ce: &ConfigError) -> String {
    format!(
        "What happened: Invalid configuration ({ce}).\nLikely causes: A step table or drive style that the motion core cannot use.\nHow to fix: Edit the [tables] / [styles] sections of the config, then rerun."
    )
}

/// Short stable name for the JSON `reason` field.
pub fn reason_name(err: &eyre::Report) -> &'static str {
    if let Some(me) = err.downcast_ref::<MotionError>() {
        return match me {
            MotionError::Config(_) => "Config",
            MotionError::UnknownStyle(_) => "UnknownStyle",
            MotionError::AlreadyRunning => "AlreadyRunning",
            MotionError::QueueRejected(_) => "QueueRejected",
            MotionError::HardwareDisconnected => "HardwareDisconnected",
            MotionError::Hardware(_) => "Hardware",
            MotionError::EngineLost => "EngineLost",
        };
    }
    if err.downcast_ref::<ConfigError>().is_some() {
        return "Config";
    }
    match err.downcast_ref::<CliError>() {
        Some(CliError::Timeout { .. }) => "Timeout",
        Some(CliError::Interrupted) => "Interrupted",
        None => "Error",
    }
}

/// Stable exit codes per failure class; anything unclassified returns 1.
pub fn exit_code_for_error(err: &eyre::Report) -> i32 {
    match reason_name(err) {
        "Config" | "UnknownStyle" => 2,
        "QueueRejected" => 3,
        "HardwareDisconnected" | "Hardware" => 4,
        "EngineLost" => 5,
        "Timeout" => 6,
        "Interrupted" => 130,
        _ => 1,
    }
}

/// Structured JSON for errors when --json is enabled.
pub fn format_error_json(err: &eyre::Report) -> String {
    let reason = reason_name(err);
    let detail = match err.downcast_ref::<MotionError>() {
        Some(MotionError::QueueRejected(r)) => Some(json!({ "queue": r })),
        Some(MotionError::UnknownStyle(s)) => Some(json!({ "style": s })),
        _ => match err.downcast_ref::<CliError>() {
            Some(CliError::Timeout { ms, position }) => {
                Some(json!({ "timeout_ms": ms, "position": position }))
            }
            _ => None,
        },
    };
    let mut obj = json!({
        "reason": reason,
        "exit_code": exit_code_for_error(err),
        "message": humanize(err),
    });
    if let Some(d) = detail {
        obj["details"] = d;
    }
    obj.to_string()
}
