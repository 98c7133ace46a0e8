//! Output backend assembly: rppal GPIO with a threaded wave player when built
//! with `--features hardware` on Linux, the in-memory simulator otherwise.

use eyre::Result;
use stepper_core::{MotorConfig, MotorController};
use stepper_traits::{MonotonicClock, OutputLines, WaveQueue};

pub type Lines = Box<dyn OutputLines + Send>;
pub type Queue = Box<dyn WaveQueue + Send>;
pub type Controller = MotorController<Lines, Queue, MonotonicClock>;

#[cfg(all(feature = "hardware", target_os = "linux"))]
pub const KIND: &str = "gpio";
#[cfg(not(all(feature = "hardware", target_os = "linux")))]
pub const KIND: &str = "simulated";

#[cfg(all(feature = "hardware", target_os = "linux"))]
pub fn open(cfg: &MotorConfig) -> Result<(Lines, Queue)> {
    use eyre::WrapErr;
    use stepper_hardware::rpi::GpioLines;
    use stepper_hardware::{PlayerWaveQueue, SharedLines};

    let lines = SharedLines::new(
        GpioLines::new(&cfg.pins).wrap_err_with(|| format!("open motor pins {:?}", cfg.pins))?,
    );
    let queue = PlayerWaveQueue::spawn(lines.clone(), MonotonicClock::new())
        .wrap_err("start wave player")?;
    tracing::info!(pins = ?cfg.pins, "gpio backend");
    Ok((Box::new(lines), Box::new(queue)))
}

#[cfg(not(all(feature = "hardware", target_os = "linux")))]
pub fn open(cfg: &MotorConfig) -> Result<(Lines, Queue)> {
    use stepper_hardware::{SimulatedOutputs, SimulatedWaveQueue};
    /// Reject every wave after the first N (tests only).
    const SIM_REJECT_AFTER: &str = "STEPPER_SIM_REJECT_AFTER";

    let mut queue = SimulatedWaveQueue::new(MonotonicClock::new());
    if let Some(n) = std::env::var(SIM_REJECT_AFTER)
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
    {
        queue = queue.rejecting_after(n);
    }
    tracing::info!(pins = ?cfg.pins, "simulated backend");
    Ok((Box::new(SimulatedOutputs::new()), Box::new(queue)))
}

/// Open the backend and hand it to a new controller.
pub fn controller(cfg: MotorConfig) -> Result<Controller> {
    let (lines, queue) = open(&cfg)?;
    Ok(MotorController::new(cfg, lines, queue, MonotonicClock::new())?)
}
