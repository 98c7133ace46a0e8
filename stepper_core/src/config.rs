//! Validated runtime configuration: kinematics, wave limits, drive styles.

use crate::error::ConfigError;
use crate::status::DriveMode;
use crate::step_table::{StepLevel, WINDINGS, check_levels, check_pins};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Speed profile parameters of one drive style.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Kinematics {
    /// Speed (full steps per second) at which motion starts and ends.
    pub start_tps: f64,
    /// Cruise speed; may be changed live through the profile controls.
    pub max_tps: f64,
    /// Acceleration in full steps per second per second.
    pub accel_tps: f64,
    /// Delay (s) of the first step after rest.
    pub dir_delay: f64,
    /// Interval (s) between Hold events while parked.
    pub hold_tick: f64,
    /// Finest microsteps per full step; positions count in these units.
    pub ustep_factor: u32,
    /// Extra stopping distance in microsteps. `None` means `2 * ustep_factor`.
    pub decel_margin: Option<f64>,
}

impl Default for Kinematics {
    fn default() -> Self {
        Self {
            start_tps: 10.0,
            max_tps: 300.0,
            accel_tps: 100.0,
            dir_delay: 0.001,
            hold_tick: 0.7,
            ustep_factor: 4,
            decel_margin: None,
        }
    }
}

impl Kinematics {
    pub fn decel_margin(&self) -> f64 {
        self.decel_margin
            .unwrap_or_else(|| 2.0 * f64::from(self.ustep_factor))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let finite_pos = |x: f64| x.is_finite() && x > 0.0;
        if !finite_pos(self.start_tps) {
            return Err(ConfigError::Kinematics("start_tps must be > 0"));
        }
        if !self.max_tps.is_finite() || self.max_tps < self.start_tps {
            return Err(ConfigError::Kinematics("max_tps must be >= start_tps"));
        }
        if !finite_pos(self.accel_tps) {
            return Err(ConfigError::Kinematics("accel_tps must be > 0"));
        }
        if !self.dir_delay.is_finite() || self.dir_delay < 0.0 {
            return Err(ConfigError::Kinematics("dir_delay must be >= 0"));
        }
        if !finite_pos(self.hold_tick) {
            return Err(ConfigError::Kinematics("hold_tick must be > 0"));
        }
        if self.ustep_factor == 0 {
            return Err(ConfigError::Kinematics("ustep_factor must be >= 1"));
        }
        if let Some(m) = self.decel_margin
            && (!m.is_finite() || m < 0.0)
        {
            return Err(ConfigError::Kinematics("decel_margin must be >= 0"));
        }
        Ok(())
    }
}

/// Bounds on the DMA wave pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaveLimits {
    /// Pulses per wave (N).
    pub max_pulses: usize,
    /// Waves in flight (W).
    pub max_waves: usize,
    /// Upper bound on the summed pulse delays of one wave, in microseconds
    /// (T). A single pulse longer than this gets a wave of its own.
    pub max_span_us: u64,
    /// Sleep while the pipeline is full or draining.
    pub poll: Duration,
}

impl Default for WaveLimits {
    fn default() -> Self {
        Self {
            max_pulses: 1000,
            max_waves: 3,
            max_span_us: 500_000,
            poll: Duration::from_millis(100),
        }
    }
}

/// Everything needed to build a profile and drive outputs for one style.
#[derive(Debug, Clone, PartialEq)]
pub struct MotionStyle {
    pub kinematics: Kinematics,
    pub levels: Arc<[StepLevel]>,
    /// Continuous holding time before outputs are switched off; zero = never.
    pub hold_timeout: Duration,
}

impl MotionStyle {
    pub fn new(
        kinematics: Kinematics,
        levels: Vec<StepLevel>,
        hold_timeout: Duration,
    ) -> Result<Self, ConfigError> {
        kinematics.validate()?;
        check_levels(&levels, kinematics.ustep_factor, kinematics.max_tps)?;
        Ok(Self {
            kinematics,
            levels: levels.into(),
            hold_timeout,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DriveStyle {
    /// Direct line writes from the engine thread.
    Soft(MotionStyle),
    /// Pre-timed waves on a hardware pulse queue.
    Dma { motion: MotionStyle, waves: WaveLimits },
}

impl DriveStyle {
    pub fn soft(motion: MotionStyle) -> Self {
        Self::Soft(motion)
    }

    /// DMA styles must use pin-mask tables at every level.
    pub fn dma(motion: MotionStyle, waves: WaveLimits) -> Result<Self, ConfigError> {
        if let Some(level) = motion
            .levels
            .iter()
            .position(|l| l.table.pin_masks().is_none())
        {
            return Err(ConfigError::PinMaskRequired { level });
        }
        Ok(Self::Dma { motion, waves })
    }

    pub fn motion(&self) -> &MotionStyle {
        match self {
            Self::Soft(m) | Self::Dma { motion: m, .. } => m,
        }
    }

    pub fn mode(&self) -> DriveMode {
        match self {
            Self::Soft(_) => DriveMode::Soft,
            Self::Dma { .. } => DriveMode::Dma,
        }
    }
}

/// Largest position magnitude, in microsteps, a target may have.
pub const MAX_POSITION_STEPS: i64 = 1 << 52;

/// Per-motor configuration: pins, units, and the named styles.
#[derive(Debug, Clone, PartialEq)]
pub struct MotorConfig {
    pub pins: [u8; WINDINGS],
    /// Microsteps per engineering unit.
    pub unit_scale: f64,
    /// Startup position in engineering units.
    pub initial_position: f64,
    pub styles: BTreeMap<String, DriveStyle>,
}

impl MotorConfig {
    pub fn new(pins: [u8; WINDINGS], unit_scale: f64) -> Result<Self, ConfigError> {
        check_pins(&pins)?;
        if !(unit_scale.is_finite() && unit_scale > 0.0) {
            return Err(ConfigError::Kinematics("unit_scale must be > 0"));
        }
        Ok(Self {
            pins,
            unit_scale,
            initial_position: 0.0,
            styles: BTreeMap::new(),
        })
    }

    #[must_use]
    pub fn with_style(mut self, name: impl Into<String>, style: DriveStyle) -> Self {
        self.styles.insert(name.into(), style);
        self
    }

    #[must_use]
    pub fn with_initial_position(mut self, position: f64) -> Self {
        self.initial_position = position;
        self
    }

    /// Engineering units to microsteps, clamped to `±MAX_POSITION_STEPS`.
    pub fn to_steps(&self, value: f64) -> i64 {
        let limit = MAX_POSITION_STEPS as f64;
        (value * self.unit_scale).round().clamp(-limit, limit) as i64
    }

    /// Whether `value` converts to a target without clamping.
    pub fn in_range(&self, value: f64) -> bool {
        value.is_finite() && (value * self.unit_scale).abs() <= MAX_POSITION_STEPS as f64
    }

    /// Microsteps to engineering units.
    pub fn to_units(&self, steps: i64) -> f64 {
        steps as f64 / self.unit_scale
    }
}
