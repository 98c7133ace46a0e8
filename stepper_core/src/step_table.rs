//! Step tables: one electrical cycle of winding activations.
//!
//! A table is cyclic; the engines walk it one row per step in the latched
//! direction. Rows always have one entry per winding. Pin-mask tables are the
//! binary encoding pre-resolved against a pin assignment so the hot path only
//! does a bank write.

use crate::error::ConfigError;

pub const WINDINGS: usize = stepper_config::WINDINGS;

/// A pair of bank masks: lines to raise and lines to lower.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PinMask {
    pub set: u32,
    pub clear: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepTable {
    Binary(Vec<[u8; WINDINGS]>),
    Proportional(Vec<[u8; WINDINGS]>),
    PinMask(Vec<PinMask>),
}

fn check_length(len: usize) -> Result<(), ConfigError> {
    if len < 4 || !len.is_power_of_two() {
        return Err(ConfigError::TableLength { len });
    }
    Ok(())
}

fn narrow_rows(rows: &[[u32; WINDINGS]], max: u32) -> Result<Vec<[u8; WINDINGS]>, ConfigError> {
    check_length(rows.len())?;
    rows.iter()
        .enumerate()
        .map(|(row, vals)| {
            let mut out = [0u8; WINDINGS];
            for (o, &value) in out.iter_mut().zip(vals) {
                *o = u8::try_from(value)
                    .ok()
                    .filter(|&v| u32::from(v) <= max)
                    .ok_or(ConfigError::TableValue { row, value, max })?;
            }
            Ok(out)
        })
        .collect()
}

/// Bit mask covering every pin in `pins`.
pub fn pins_mask(pins: &[u8; WINDINGS]) -> u32 {
    pins.iter().fold(0, |m, &p| m | (1u32 << p))
}

/// Check a pin assignment: each pin in 1..=31 and used once.
pub fn check_pins(pins: &[u8; WINDINGS]) -> Result<(), ConfigError> {
    for (i, &pin) in pins.iter().enumerate() {
        if pin == 0 || pin >= 32 {
            return Err(ConfigError::PinOutOfRange(pin));
        }
        if pins[..i].contains(&pin) {
            return Err(ConfigError::DuplicatePin(pin));
        }
    }
    Ok(())
}

impl StepTable {
    /// On/off rows (each value 0 or 1).
    pub fn binary(rows: &[[u32; WINDINGS]]) -> Result<Self, ConfigError> {
        narrow_rows(rows, 1).map(Self::Binary)
    }

    /// Duty rows (each value 0..=255).
    pub fn proportional(rows: &[[u32; WINDINGS]]) -> Result<Self, ConfigError> {
        narrow_rows(rows, 255).map(Self::Proportional)
    }

    /// On/off rows resolved against `pins` into bank masks.
    pub fn pin_mask(rows: &[[u32; WINDINGS]], pins: &[u8; WINDINGS]) -> Result<Self, ConfigError> {
        check_pins(pins)?;
        let rows = narrow_rows(rows, 1)?;
        let masks = rows
            .iter()
            .map(|row| {
                row.iter()
                    .zip(pins)
                    .fold(PinMask::default(), |mut m, (&on, &pin)| {
                        if on == 1 {
                            m.set |= 1 << pin;
                        } else {
                            m.clear |= 1 << pin;
                        }
                        m
                    })
            })
            .collect();
        Ok(Self::PinMask(masks))
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Binary(r) | Self::Proportional(r) => r.len(),
            Self::PinMask(m) => m.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn pin_masks(&self) -> Option<&[PinMask]> {
        match self {
            Self::PinMask(m) => Some(m),
            _ => None,
        }
    }
}

/// Map a row index from a table of `from_len` rows into a table of `to_len`
/// rows, keeping the same fraction of the electrical cycle.
pub fn rescale_index(index: usize, from_len: usize, to_len: usize) -> usize {
    if from_len == 0 || to_len == 0 {
        return 0;
    }
    let scaled = (to_len as f64 * index as f64 / from_len as f64).round() as usize;
    scaled % to_len
}

/// Where in the electrical cycle the windings were left: a row index and the
/// length of the table it indexes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TablePhase {
    pub index: usize,
    pub table_len: usize,
}

impl TablePhase {
    pub const fn new(index: usize, table_len: usize) -> Self {
        Self { index, table_len }
    }

    /// The same phase expressed as a row of a table with `len` rows.
    pub fn index_in(&self, len: usize) -> usize {
        rescale_index(self.index, self.table_len, len)
    }
}

/// Advance a row index one step in `forward` direction, wrapping.
#[inline]
pub fn advance_index(index: usize, forward: bool, len: usize) -> usize {
    if forward {
        (index + 1) % len
    } else {
        (index + len - 1) % len
    }
}

/// One microstep level of a drive style.
#[derive(Debug, Clone, PartialEq)]
pub struct StepLevel {
    /// Highest full-step speed at which this level is used.
    pub ceiling_tps: f64,
    /// Microsteps issued per full step at this level.
    pub microsteps: u32,
    pub table: StepTable,
}

impl StepLevel {
    pub fn new(ceiling_tps: f64, microsteps: u32, table: StepTable) -> Self {
        Self {
            ceiling_tps,
            microsteps,
            table,
        }
    }
}

/// Structural checks across a level list.
///
/// - at least one level
/// - each level has the same microsteps as its predecessor, or half of them
/// - `ustep_factor` is a multiple of every level's microsteps
/// - the last ceiling can carry `max_tps`
pub fn check_levels(
    levels: &[StepLevel],
    ustep_factor: u32,
    max_tps: f64,
) -> Result<(), ConfigError> {
    let Some(last) = levels.last() else {
        return Err(ConfigError::NoLevels);
    };
    for (level, l) in levels.iter().enumerate() {
        if l.microsteps == 0 || ustep_factor % l.microsteps != 0 {
            return Err(ConfigError::MicrostepFactor {
                level,
                microsteps: l.microsteps,
                ustep_factor,
            });
        }
        if level > 0 {
            let previous = levels[level - 1].microsteps;
            if l.microsteps != previous && l.microsteps * 2 != previous {
                return Err(ConfigError::MicrostepRatio {
                    level,
                    microsteps: l.microsteps,
                    previous,
                });
            }
        }
    }
    if last.ceiling_tps < max_tps {
        return Err(ConfigError::CeilingBelowMax {
            ceiling: last.ceiling_tps,
            max_tps,
        });
    }
    Ok(())
}
