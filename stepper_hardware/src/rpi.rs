//! Raspberry Pi output lines through `rppal`.
//!
//! Binary and bank writes drive the pins directly. Duty writes use rppal's
//! software PWM, which is adequate for slow microstepping only.

use crate::error::{HwError, Result};
use rppal::gpio::{Gpio, OutputPin};
use std::collections::BTreeMap;
use stepper_traits::{HwResult, OutputLines};
use tracing::debug;

/// Software PWM carrier frequency for duty writes.
pub const DEFAULT_PWM_HZ: f64 = 20_000.0;

pub struct GpioLines {
    pins: BTreeMap<u8, OutputPin>,
    /// Lines presently under software PWM.
    pwm: u32,
    pwm_hz: f64,
}

impl GpioLines {
    /// Claim `lines` as outputs, all driven low.
    pub fn new(lines: &[u8]) -> Result<Self> {
        let gpio = Gpio::new()?;
        let mut pins = BTreeMap::new();
        for &line in lines {
            let mut pin = gpio.get(line)?.into_output();
            pin.set_low();
            pins.insert(line, pin);
        }
        debug!(lines = ?lines, "gpio lines claimed");
        Ok(Self {
            pins,
            pwm: 0,
            pwm_hz: DEFAULT_PWM_HZ,
        })
    }

    #[must_use]
    pub fn with_pwm_hz(mut self, hz: f64) -> Self {
        self.pwm_hz = hz;
        self
    }

    fn pin(&mut self, line: u8) -> Result<&mut OutputPin> {
        self.pins
            .get_mut(&line)
            .ok_or_else(|| HwError::Gpio(format!("line {line} was not claimed")))
    }

    fn stop_pwm(&mut self, line: u8) -> Result<()> {
        if self.pwm & (1 << line) != 0 {
            self.pin(line)?.clear_pwm()?;
            self.pwm &= !(1 << line);
        }
        Ok(())
    }

    fn level(&mut self, line: u8, high: bool) -> Result<()> {
        self.stop_pwm(line)?;
        let pin = self.pin(line)?;
        if high {
            pin.set_high();
        } else {
            pin.set_low();
        }
        Ok(())
    }
}

impl OutputLines for GpioLines {
    fn write(&mut self, line: u8, high: bool) -> HwResult<()> {
        Ok(self.level(line, high)?)
    }

    fn set_duty(&mut self, line: u8, duty: u8) -> HwResult<()> {
        match duty {
            0 => self.level(line, false)?,
            255 => self.level(line, true)?,
            d => {
                let hz = self.pwm_hz;
                self.pin(line)?
                    .set_pwm_frequency(hz, f64::from(d) / 255.0)
                    .map_err(HwError::from)?;
                self.pwm |= 1 << line;
            }
        }
        Ok(())
    }

    fn write_bank(&mut self, set: u32, clear: u32) -> HwResult<()> {
        let lines: Vec<u8> = self.pins.keys().copied().collect();
        for line in lines {
            let bit = 1u32 << line;
            if set & bit != 0 {
                self.level(line, true)?;
            } else if clear & bit != 0 {
                self.level(line, false)?;
            }
        }
        Ok(())
    }
}
