//! Conversions from `stepper_config` TOML schema types to runtime types.
//!
//! This is the point where a parsed config is validated structurally: table
//! lengths, microstep ratios, pin masks for DMA styles.

use crate::config::{DriveStyle, Kinematics, MotionStyle, MotorConfig, WaveLimits};
use crate::error::ConfigError;
use crate::step_table::{StepLevel, StepTable, WINDINGS};
use std::time::Duration;
use stepper_config as cfg;

impl From<&cfg::StyleCfg> for Kinematics {
    fn from(s: &cfg::StyleCfg) -> Self {
        Self {
            start_tps: s.start_tps,
            max_tps: s.max_tps,
            accel_tps: s.accel_tps,
            dir_delay: s.dir_delay,
            hold_tick: s.hold_tick,
            ustep_factor: s.ustep_factor,
            decel_margin: s.decel_margin,
        }
    }
}

impl From<&cfg::WaveCfg> for WaveLimits {
    fn from(w: &cfg::WaveCfg) -> Self {
        Self {
            max_pulses: w.max_pulses,
            max_waves: w.max_waves,
            max_span_us: w.max_span_us,
            poll: Duration::from_millis(w.poll_ms),
        }
    }
}

fn build_table(t: &cfg::TableCfg, pins: &[u8; WINDINGS]) -> Result<StepTable, ConfigError> {
    match t.kind {
        cfg::TableKind::Onoff => StepTable::binary(&t.rows),
        cfg::TableKind::Pwm => StepTable::proportional(&t.rows),
        cfg::TableKind::Block => StepTable::pin_mask(&t.rows, pins),
    }
}

fn build_style(c: &cfg::Config, s: &cfg::StyleCfg) -> Result<DriveStyle, ConfigError> {
    let levels = s
        .levels
        .iter()
        .map(|l| {
            let table = c
                .tables
                .get(&l.table)
                .ok_or_else(|| ConfigError::UnknownTable(l.table.clone()))?;
            Ok(StepLevel::new(
                l.ceiling_tps,
                l.microsteps,
                build_table(table, &c.motor.pins)?,
            ))
        })
        .collect::<Result<Vec<_>, ConfigError>>()?;

    let hold_timeout = Duration::try_from_secs_f64(s.hold_timeout)
        .map_err(|_| ConfigError::Kinematics("hold_timeout must be >= 0"))?;
    let motion = MotionStyle::new(Kinematics::from(s), levels, hold_timeout)?;
    match s.drive_mode {
        cfg::DriveModeCfg::Soft => Ok(DriveStyle::soft(motion)),
        cfg::DriveModeCfg::Dma => DriveStyle::dma(motion, (&s.wave).into()),
    }
}

impl TryFrom<&cfg::Config> for MotorConfig {
    type Error = ConfigError;

    fn try_from(c: &cfg::Config) -> Result<Self, Self::Error> {
        let mut motor = Self::new(c.motor.pins, c.motor.unit_scale)?
            .with_initial_position(c.motor.initial_position);
        for (name, style) in &c.styles {
            let built = build_style(c, style).inspect_err(|e| {
                tracing::debug!(style = %name, error = %e, "style rejected");
            })?;
            motor = motor.with_style(name.clone(), built);
        }
        Ok(motor)
    }
}
