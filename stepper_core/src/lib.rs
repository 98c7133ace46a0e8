#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap,
    clippy::missing_const_for_fn,
    clippy::must_use_candidate
)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Stepper motion core (hardware-agnostic).
//!
//! All hardware access goes through `stepper_traits::OutputLines` and
//! `stepper_traits::WaveQueue`; time goes through `stepper_traits::Clock`.
//!
//! ## Architecture
//!
//! - **Step tables**: winding activation cycles and microstep levels (`step_table`)
//! - **Configuration**: kinematics, wave limits, drive styles (`config`, `conversions`)
//! - **Profile**: trapezoidal timing stream with live controls (`profile`)
//! - **Engines**: direct-write tracking (`soft`) and queued-wave tracking (`dma`)
//! - **Controller**: run/stop surface and engine thread ownership (`controller`)
//! - **Status**: shared drive mode, state, position and speed (`status`)
//!
//! ## Units
//!
//! Positions are `i64` microsteps at the finest granularity of a style
//! (`ustep_factor` per full step). Speeds are full steps per second. The
//! controller converts to and from engineering units with `unit_scale`.

pub mod atomic;
pub mod config;
pub mod controller;
pub mod conversions;
pub mod dma;
pub mod error;
pub mod hw_error;
pub mod mocks;
pub mod profile;
pub mod soft;
pub mod status;
pub mod step_table;
pub mod util;

pub use config::{DriveStyle, Kinematics, MotionStyle, MotorConfig, WaveLimits};
pub use controller::MotorController;
pub use dma::{DmaEngine, DmaSummary, Pulse, PulseStream};
pub use error::{ConfigError, MotionError, Result};
pub use profile::{ProfileControls, StepAction, StepEvent, StepGenerator};
pub use soft::{SoftEngine, SoftSummary};
pub use status::{Direction, DriveMode, DriveState, MotorStatus};
pub use step_table::{PinMask, StepLevel, StepTable, TablePhase};
