//! Subcommand bodies: styles, trace, move and self-check.

use crate::backend;
use crate::cli::{RtArgs, json_mode};
use crate::error_fmt::CliError;
use crate::rt::setup_rt_once;
use eyre::{Result, WrapErr};
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use stepper_core::{
    DriveStyle, MotorConfig, ProfileControls, StepAction, StepEvent, StepGenerator, StepTable,
};

/// How often `move` samples the controller.
const POLL: Duration = Duration::from_millis(5);
/// Interval between progress log lines during `move`.
const PROGRESS_EVERY: Duration = Duration::from_millis(250);

fn table_kind(t: &StepTable) -> &'static str {
    match t {
        StepTable::Binary(_) => "onoff",
        StepTable::Proportional(_) => "pwm",
        StepTable::PinMask(_) => "block",
    }
}

fn unix_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

pub fn styles(motor: &MotorConfig) -> Result<()> {
    for (name, style) in &motor.styles {
        let m = style.motion();
        let k = &m.kinematics;
        if json_mode() {
            let levels: Vec<_> = m
                .levels
                .iter()
                .map(|l| {
                    json!({
                        "table": table_kind(&l.table),
                        "rows": l.table.len(),
                        "microsteps": l.microsteps,
                        "ceiling_tps": l.ceiling_tps,
                    })
                })
                .collect();
            let mut line = json!({
                "name": name,
                "mode": style.mode().as_str(),
                "start_tps": k.start_tps,
                "max_tps": k.max_tps,
                "accel_tps": k.accel_tps,
                "ustep_factor": k.ustep_factor,
                "hold_timeout_s": m.hold_timeout.as_secs_f64(),
                "levels": levels,
            });
            if let DriveStyle::Dma { waves, .. } = style {
                line["wave"] = json!({
                    "max_pulses": waves.max_pulses,
                    "max_waves": waves.max_waves,
                    "max_span_us": waves.max_span_us,
                });
            }
            println!("{line}");
        } else {
            let ladder: Vec<String> = m
                .levels
                .iter()
                .map(|l| format!("{}x{}@{}", table_kind(&l.table), l.microsteps, l.ceiling_tps))
                .collect();
            println!(
                "{name:<12} {:<4} {:>7.1}..{:<8.1} accel {:<8.1} uf {} levels {}",
                style.mode().as_str(),
                k.start_tps,
                k.max_tps,
                k.accel_tps,
                k.ustep_factor,
                ladder.join(" "),
            );
        }
    }
    Ok(())
}

fn trace_line(t: f64, ev: &StepEvent) -> String {
    let t_us = (t * 1e6).round() as u64;
    let delay_us = (ev.delay * 1e6).round() as u64;
    if json_mode() {
        let event = match ev.action {
            StepAction::Hold => "hold",
            StepAction::Step => "step",
            StepAction::ModeChange { .. } => "mode",
        };
        let mut line = json!({
            "t_us": t_us,
            "event": event,
            "position": ev.position,
            "state": ev.status.as_str(),
            "tps": ev.tps,
            "delay_us": delay_us,
        });
        if let Some(signed) = ev.signed_level() {
            line["level"] = json!(signed);
        }
        line.to_string()
    } else {
        let action = match ev.action {
            StepAction::Hold => "hold".to_string(),
            StepAction::Step => "step".to_string(),
            StepAction::ModeChange { .. } => {
                format!("mode {:+}", ev.signed_level().unwrap_or_default())
            }
        };
        format!(
            "{t_us:>12} {action:<8} {:>10} {:<5} {:>9.2} {delay_us:>8}",
            ev.position,
            ev.status.as_str(),
            ev.tps
        )
    }
}

/// Run the profile offline from `from` to `to` and print every event until
/// the motor parks or `limit` events have been produced.
pub fn trace(motor: &MotorConfig, style: &str, to: f64, from: Option<f64>, limit: usize) -> Result<()> {
    let drive = motor
        .styles
        .get(style)
        .ok_or_else(|| stepper_core::MotionError::UnknownStyle(style.to_owned()))?;
    if let Some(bad) = [Some(to), from].into_iter().flatten().find(|&v| !motor.in_range(v)) {
        eyre::bail!("position {bad} is out of range");
    }
    let m = drive.motion();
    let start = motor.to_steps(from.unwrap_or(motor.initial_position));
    let target = motor.to_steps(to);
    let controls = Arc::new(ProfileControls::new(
        target,
        m.kinematics.max_tps,
        m.kinematics.accel_tps,
    ));
    let mut generator = StepGenerator::new(controls, m.kinematics, Arc::clone(&m.levels), start);

    if !json_mode() {
        println!(
            "{:>12} {:<8} {:>10} {:<5} {:>9} {:>8}",
            "t_us", "action", "position", "state", "tps", "delay_us"
        );
    }
    let (mut t, mut events, mut steps, mut parked) = (0.0_f64, 0_usize, 0_usize, false);
    while events < limit {
        let Some(ev) = generator.next_event() else {
            break;
        };
        println!("{}", trace_line(t, &ev));
        events += 1;
        if ev.is_step() {
            steps += 1;
        }
        if ev.action == StepAction::Hold {
            parked = true;
            break;
        }
        t += ev.delay;
    }

    let final_position = generator.current_position();
    if json_mode() {
        println!(
            "{}",
            json!({
                "event": "summary",
                "style": style,
                "mode": drive.mode().as_str(),
                "from_steps": start,
                "target_steps": target,
                "final_steps": final_position,
                "events": events,
                "steps": steps,
                "duration_us": (t * 1e6).round() as u64,
                "parked": parked,
            })
        );
    } else {
        println!(
            "{events} events, {steps} steps, {t:.6} s, final position {} ({final_position} steps){}",
            motor.to_units(final_position),
            if parked { "" } else { " [truncated]" }
        );
    }
    Ok(())
}

pub struct MoveArgs {
    pub style: String,
    pub to: f64,
    pub max_tps: Option<f64>,
    pub accel: Option<f64>,
    pub timeout_ms: u64,
    pub rt: RtArgs,
}

/// Drive the motor to `args.to` and stop once it parks. The first Ctrl-C
/// requests a clean stop, the second a crash stop.
pub fn move_to(motor: MotorConfig, args: &MoveArgs) -> Result<()> {
    if !motor.in_range(args.to) {
        eyre::bail!("target {} is out of range", args.to);
    }
    let target_steps = motor.to_steps(args.to);
    let ctl = backend::controller(motor)?;
    setup_rt_once(&args.rt);

    let interrupts = Arc::new(AtomicUsize::new(0));
    {
        let interrupts = Arc::clone(&interrupts);
        ctrlc::set_handler(move || {
            interrupts.fetch_add(1, Ordering::SeqCst);
        })
        .wrap_err("install Ctrl-C handler")?;
    }

    ctl.set_target_position(args.to);
    let started = Instant::now();
    ctl.run(&args.style).wrap_err("start run")?;
    if let Some(tps) = args.max_tps {
        ctl.set_max_tps(tps);
    }
    if let Some(a) = args.accel {
        ctl.set_acceleration(a);
    }

    let deadline = Duration::from_millis(args.timeout_ms);
    let mut stopping = false;
    let mut last_progress = Instant::now();
    while ctl.is_active() {
        match interrupts.load(Ordering::SeqCst) {
            0 => {}
            1 if !stopping => {
                tracing::warn!("Ctrl-C: clean stop (press again to crash stop)");
                ctl.clean_stop();
                stopping = true;
            }
            1 => {}
            _ => {
                ctl.crash_stop_and_wait(POLL)?;
                return Err(CliError::Interrupted.into());
            }
        }
        if !stopping && ctl.current_position_steps() == target_steps && ctl.current_tps() == 0.0 {
            ctl.clean_stop();
            stopping = true;
        }
        if started.elapsed() >= deadline {
            let position = ctl.current_position();
            ctl.crash_stop_and_wait(POLL)?;
            return Err(CliError::Timeout {
                ms: args.timeout_ms,
                position,
            }
            .into());
        }
        if last_progress.elapsed() >= PROGRESS_EVERY {
            last_progress = Instant::now();
            tracing::info!(
                position = ctl.current_position(),
                tps = ctl.current_tps(),
                state = %ctl.drive_state(),
                "moving"
            );
        }
        std::thread::sleep(POLL);
    }

    if let Some(e) = ctl.take_last_error() {
        return Err(e.into());
    }

    let duration_ms = started.elapsed().as_millis();
    let mode = ctl
        .config()
        .styles
        .get(&args.style)
        .map_or("off", |s| s.mode().as_str());
    let final_position = ctl.current_position();
    let final_steps = ctl.current_position_steps();
    tracing::info!(final_position, final_steps, duration_ms, "move complete");
    if json_mode() {
        println!(
            "{}",
            json!({
                "timestamp": unix_ms(),
                "style": args.style,
                "mode": mode,
                "target": args.to,
                "target_steps": target_steps,
                "final_position": final_position,
                "final_steps": final_steps,
                "duration_ms": duration_ms,
            })
        );
    } else {
        println!(
            "Moved to {final_position:.3} ({final_steps} steps) with style {} ({mode}) in {duration_ms} ms",
            args.style
        );
    }
    Ok(())
}

/// Build the controller (which switches every winding off) and report.
pub fn self_check(motor: MotorConfig) -> Result<()> {
    let pins = motor.pins;
    let styles = motor.styles.len();
    let ctl = backend::controller(motor)?;
    let state = ctl.drive_state();
    if json_mode() {
        println!(
            "{}",
            json!({
                "ok": true,
                "backend": backend::KIND,
                "pins": pins,
                "styles": styles,
                "state": state.as_str(),
            })
        );
    } else {
        println!(
            "OK: {} backend, pins {pins:?}, {styles} styles, outputs {state}",
            backend::KIND
        );
    }
    Ok(())
}
