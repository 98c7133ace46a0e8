#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schema for a four-winding stepper motor and its drive styles.
//!
//! - `Config` and sub-structs are deserialized from TOML and validated.
//! - Step tables are declared once under `[tables.<name>]` and referenced by
//!   name from each style's `levels` list.
//! - Structural checks that need the runtime types (power-of-two table
//!   lengths, microstep ratios between levels) live in `stepper_core`.
use serde::Deserialize;
use std::collections::BTreeMap;

/// Number of windings (and therefore output lines) driven per motor.
pub const WINDINGS: usize = 4;

#[derive(Debug, Deserialize, Clone)]
pub struct MotorCfg {
    /// One output line per winding, in table column order.
    pub pins: [u8; WINDINGS],
    /// Microsteps per engineering unit (e.g. per degree of output shaft).
    pub unit_scale: f64,
    /// Position reported at startup, in engineering units.
    #[serde(default)]
    pub initial_position: f64,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TableKind {
    /// Binary rows written line by line.
    Onoff,
    /// Duty rows (0..=255) written line by line.
    Pwm,
    /// Binary rows pre-resolved into pin bank masks.
    Block,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TableCfg {
    pub kind: TableKind,
    pub rows: Vec<[u32; WINDINGS]>,
}

impl TableCfg {
    /// Largest value a cell of this table kind may hold.
    pub const fn max_value(&self) -> u32 {
        match self.kind {
            TableKind::Onoff | TableKind::Block => 1,
            TableKind::Pwm => 255,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LevelCfg {
    /// Name of a `[tables.<name>]` entry.
    pub table: String,
    /// Highest full-step speed at which this level is used.
    pub ceiling_tps: f64,
    /// Microsteps issued per full step while this level is active.
    pub microsteps: u32,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DriveModeCfg {
    Soft,
    Dma,
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct WaveCfg {
    pub max_pulses: usize,
    pub max_waves: usize,
    pub max_span_us: u64,
    pub poll_ms: u64,
}

impl Default for WaveCfg {
    fn default() -> Self {
        Self {
            max_pulses: 1000,
            max_waves: 3,
            max_span_us: 500_000,
            poll_ms: 100,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StyleCfg {
    pub drive_mode: DriveModeCfg,
    pub start_tps: f64,
    pub max_tps: f64,
    pub accel_tps: f64,
    #[serde(default = "default_dir_delay")]
    pub dir_delay: f64,
    #[serde(default = "default_hold_tick")]
    pub hold_tick: f64,
    pub ustep_factor: u32,
    /// Seconds of continuous holding before the windings are switched off.
    /// Zero keeps them energized indefinitely.
    #[serde(default = "default_hold_timeout")]
    pub hold_timeout: f64,
    /// Extra stopping distance in microsteps; defaults to `2 * ustep_factor`.
    #[serde(default)]
    pub decel_margin: Option<f64>,
    pub levels: Vec<LevelCfg>,
    /// Wave pipeline limits; only meaningful for `drive_mode = "dma"`.
    #[serde(default)]
    pub wave: WaveCfg,
}

const fn default_dir_delay() -> f64 {
    0.001
}

const fn default_hold_tick() -> f64 {
    0.7
}

const fn default_hold_timeout() -> f64 {
    1.5
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub motor: MotorCfg,
    #[serde(default)]
    pub tables: BTreeMap<String, TableCfg>,
    pub styles: BTreeMap<String, StyleCfg>,
    #[serde(default)]
    pub logging: Logging,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

fn finite_positive(x: f64) -> bool {
    x.is_finite() && x > 0.0
}

impl Config {
    pub fn validate(&self) -> eyre::Result<()> {
        // Motor
        for (i, &pin) in self.motor.pins.iter().enumerate() {
            if pin == 0 || pin >= 32 {
                eyre::bail!("motor.pins[{i}] must be in 1..=31, got {pin}");
            }
            if self.motor.pins[..i].contains(&pin) {
                eyre::bail!("motor.pins must be distinct, {pin} appears twice");
            }
        }
        if !finite_positive(self.motor.unit_scale) {
            eyre::bail!("motor.unit_scale must be > 0");
        }
        if !self.motor.initial_position.is_finite() {
            eyre::bail!("motor.initial_position must be finite");
        }

        // Tables
        for (name, table) in &self.tables {
            if table.rows.len() < WINDINGS {
                eyre::bail!(
                    "tables.{name}.rows must have at least {WINDINGS} rows, got {}",
                    table.rows.len()
                );
            }
            let max = table.max_value();
            if let Some((r, row)) = table
                .rows
                .iter()
                .enumerate()
                .find(|(_, row)| row.iter().any(|&v| v > max))
            {
                eyre::bail!("tables.{name}.rows[{r}] = {row:?} has a value above {max}");
            }
        }

        // Styles
        if self.styles.is_empty() {
            eyre::bail!("styles must define at least one drive style");
        }
        for (name, s) in &self.styles {
            if !finite_positive(s.start_tps) {
                eyre::bail!("styles.{name}.start_tps must be > 0");
            }
            if !s.max_tps.is_finite() || s.max_tps < s.start_tps {
                eyre::bail!("styles.{name}.max_tps must be >= start_tps");
            }
            if !finite_positive(s.accel_tps) {
                eyre::bail!("styles.{name}.accel_tps must be > 0");
            }
            if !s.dir_delay.is_finite() || s.dir_delay < 0.0 {
                eyre::bail!("styles.{name}.dir_delay must be >= 0");
            }
            if !finite_positive(s.hold_tick) {
                eyre::bail!("styles.{name}.hold_tick must be > 0");
            }
            if !s.hold_timeout.is_finite() || s.hold_timeout < 0.0 {
                eyre::bail!("styles.{name}.hold_timeout must be >= 0");
            }
            if s.ustep_factor == 0 {
                eyre::bail!("styles.{name}.ustep_factor must be >= 1");
            }
            if let Some(m) = s.decel_margin
                && (!m.is_finite() || m < 0.0)
            {
                eyre::bail!("styles.{name}.decel_margin must be >= 0");
            }
            if s.levels.is_empty() {
                eyre::bail!("styles.{name}.levels must not be empty");
            }
            for (i, level) in s.levels.iter().enumerate() {
                if !self.tables.contains_key(&level.table) {
                    eyre::bail!(
                        "styles.{name}.levels[{i}].table references unknown table '{}'",
                        level.table
                    );
                }
                if level.microsteps == 0 {
                    eyre::bail!("styles.{name}.levels[{i}].microsteps must be >= 1");
                }
                if !finite_positive(level.ceiling_tps) {
                    eyre::bail!("styles.{name}.levels[{i}].ceiling_tps must be > 0");
                }
            }
            if s.drive_mode == DriveModeCfg::Dma {
                let w = &s.wave;
                if w.max_pulses == 0 || w.max_waves == 0 || w.max_span_us == 0 || w.poll_ms == 0 {
                    eyre::bail!("styles.{name}.wave limits must all be >= 1");
                }
            }
        }

        // Logging
        if let Some(rot) = self.logging.rotation.as_deref()
            && !matches!(rot, "never" | "daily" | "hourly")
        {
            eyre::bail!("logging.rotation must be one of never|daily|hourly");
        }

        Ok(())
    }
}
