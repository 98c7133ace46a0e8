//! Public control surface of one motor.
//!
//! The controller owns the output lines and the wave queue while idle and
//! hands both to exactly one engine thread per run. Callers steer a running
//! engine only through the run's [`ProfileControls`] and observe it through
//! the shared [`MotorStatus`]; the engine never takes a lock a caller holds.

use crate::config::{DriveStyle, MotorConfig};
use crate::dma::DmaEngine;
use crate::error::{MotionError, Result};
use crate::hw_error::map_hw_error;
use crate::profile::{ProfileControls, StepGenerator};
use crate::soft::SoftEngine;
use crate::status::{DriveMode, DriveState, MotorStatus};
use crate::step_table::{TablePhase, WINDINGS, pins_mask};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;
use stepper_traits::{Clock, OutputLines, WaveQueue};
use tracing::{debug, error, info, info_span, warn};

/// Hardware handed back and forth between the controller and its engine.
struct Hardware<O, Q> {
    outputs: O,
    queue: Q,
    /// Where the windings were left by the previous run.
    phase: TablePhase,
}

struct EngineReturn<O, Q> {
    hw: Hardware<O, Q>,
    result: Result<()>,
}

struct Run<O, Q> {
    controls: Arc<ProfileControls>,
    handle: JoinHandle<EngineReturn<O, Q>>,
}

enum Slot<O, Q> {
    Idle(Hardware<O, Q>),
    Running(Run<O, Q>),
    /// The engine thread panicked and took the hardware with it.
    Lost,
}

pub struct MotorController<O, Q, C>
where
    O: OutputLines + Send + 'static,
    Q: WaveQueue + Send + 'static,
    C: Clock + Clone + Send + Sync + 'static,
{
    config: MotorConfig,
    clock: C,
    status: Arc<MotorStatus>,
    /// Last requested target in microsteps; seeds every new profile.
    target: AtomicI64,
    slot: Mutex<Slot<O, Q>>,
    style: Mutex<Option<String>>,
    last_error: Mutex<Option<MotionError>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

fn de_energize<O: OutputLines + ?Sized>(outputs: &mut O, pins: &[u8; WINDINGS]) -> Result<()> {
    for &pin in pins {
        outputs.write(pin, false).map_err(|e| map_hw_error(&*e))?;
    }
    Ok(())
}

impl<O, Q, C> MotorController<O, Q, C>
where
    O: OutputLines + Send + 'static,
    Q: WaveQueue + Send + 'static,
    C: Clock + Clone + Send + Sync + 'static,
{
    /// Take ownership of the hardware and switch every winding off.
    pub fn new(config: MotorConfig, mut outputs: O, queue: Q, clock: C) -> Result<Self> {
        if !outputs.is_connected() {
            return Err(MotionError::HardwareDisconnected);
        }
        de_energize(&mut outputs, &config.pins)?;
        let position = config.to_steps(config.initial_position);
        info!(
            styles = config.styles.len(),
            position,
            pins = ?config.pins,
            "motor controller ready"
        );
        Ok(Self {
            clock,
            status: Arc::new(MotorStatus::new(position)),
            target: AtomicI64::new(position),
            slot: Mutex::new(Slot::Idle(Hardware {
                outputs,
                queue,
                phase: TablePhase::default(),
            })),
            style: Mutex::new(None),
            last_error: Mutex::new(None),
            config,
        })
    }

    pub fn config(&self) -> &MotorConfig {
        &self.config
    }

    /// Start an engine thread for the named style, moving toward the
    /// current target.
    pub fn run(&self, style_name: &str) -> Result<()> {
        let mut slot = lock(&self.slot);
        self.reap(&mut slot);
        match &*slot {
            Slot::Running(_) => return Err(MotionError::AlreadyRunning),
            Slot::Lost => return Err(MotionError::EngineLost),
            Slot::Idle(_) => {}
        }
        let style = self
            .config
            .styles
            .get(style_name)
            .cloned()
            .ok_or_else(|| MotionError::UnknownStyle(style_name.to_owned()))?;
        let Slot::Idle(hw) = std::mem::replace(&mut *slot, Slot::Lost) else {
            return Err(MotionError::EngineLost);
        };

        let motion = style.motion();
        let target = self.target.load(Ordering::Acquire);
        let position = self.status.position();
        let controls = Arc::new(ProfileControls::new(
            target,
            motion.kinematics.max_tps,
            motion.kinematics.accel_tps,
        ));
        let generator = StepGenerator::new(
            Arc::clone(&controls),
            motion.kinematics,
            Arc::clone(&motion.levels),
            position,
        );

        let mode = style.mode();
        self.status.set_mode(mode);
        self.status.set_state(DriveState::Halt);
        let engine = EngineThread {
            hw,
            style,
            name: style_name.to_owned(),
            generator,
            clock: self.clock.clone(),
            status: Arc::clone(&self.status),
            controls: Arc::clone(&controls),
            pins: self.config.pins,
        };
        let handle = std::thread::Builder::new()
            .name(format!("stepper-{style_name}"))
            .spawn(move || engine.run())
            .map_err(|e| {
                self.status.set_off();
                MotionError::Hardware(format!("failed to spawn engine thread: {e}"))
            })?;

        *slot = Slot::Running(Run { controls, handle });
        *lock(&self.style) = Some(style_name.to_owned());
        info!(style = style_name, %mode, position, target, "run started");
        Ok(())
    }

    /// True while an engine thread is alive. Reaps a finished one.
    pub fn is_active(&self) -> bool {
        let mut slot = lock(&self.slot);
        self.reap(&mut slot);
        matches!(&*slot, Slot::Running(_))
    }

    fn reap(&self, slot: &mut Slot<O, Q>) {
        let finished = matches!(slot, Slot::Running(run) if run.handle.is_finished());
        if !finished {
            return;
        }
        let Slot::Running(run) = std::mem::replace(slot, Slot::Lost) else {
            return;
        };
        match run.handle.join() {
            Ok(ret) => {
                if let Err(e) = ret.result {
                    warn!(error = %e, "engine run failed");
                    *lock(&self.last_error) = Some(e);
                }
                *slot = Slot::Idle(ret.hw);
            }
            Err(_) => {
                error!("engine thread panicked");
                *lock(&self.last_error) = Some(MotionError::EngineLost);
            }
        }
        self.status.set_off();
    }

    fn with_controls<T>(&self, f: impl FnOnce(&ProfileControls) -> T) -> Option<T> {
        match &*lock(&self.slot) {
            Slot::Running(run) => Some(f(&run.controls)),
            _ => None,
        }
    }

    /// Decelerate to rest and end the run.
    pub fn clean_stop(&self) {
        if self.with_controls(ProfileControls::clean_stop).is_some() {
            debug!("clean stop requested");
        }
    }

    /// End the run at the next event, without deceleration. Poll
    /// [`Self::is_active`] to see the engine exit.
    pub fn crash_stop(&self) {
        if self.with_controls(ProfileControls::crash_stop).is_some() {
            debug!("crash stop requested");
        }
    }

    /// Crash stop, wait for the engine to exit, then switch every winding off.
    pub fn crash_stop_and_wait(&self, poll: Duration) -> Result<()> {
        self.crash_stop();
        while self.is_active() {
            self.clock.sleep(poll);
        }
        match &mut *lock(&self.slot) {
            Slot::Idle(hw) => de_energize(&mut hw.outputs, &self.config.pins),
            Slot::Lost => Err(MotionError::EngineLost),
            Slot::Running(_) => Err(MotionError::AlreadyRunning),
        }
    }

    /// Set the target in engineering units. Kept for the next run when idle.
    pub fn set_target_position(&self, value: f64) {
        if !value.is_finite() {
            warn!(value, "ignoring non-finite target position");
            return;
        }
        if !self.config.in_range(value) {
            warn!(value, "ignoring out-of-range target position");
            return;
        }
        let steps = self.config.to_steps(value);
        self.target.store(steps, Ordering::Release);
        self.with_controls(|c| c.set_target_position(steps));
        debug!(value, steps, "target position set");
    }

    pub fn set_max_tps(&self, tps: f64) {
        if !(tps.is_finite() && tps > 0.0) {
            warn!(tps, "ignoring invalid max_tps");
            return;
        }
        if self.with_controls(|c| c.set_max_tps(tps)).is_none() {
            debug!(tps, "max_tps ignored, no run in progress");
        }
    }

    pub fn set_acceleration(&self, tps: f64) {
        if !(tps.is_finite() && tps > 0.0) {
            warn!(tps, "ignoring invalid acceleration");
            return;
        }
        if self.with_controls(|c| c.set_accel_tps(tps)).is_none() {
            debug!(tps, "acceleration ignored, no run in progress");
        }
    }

    /// Live max speed of the current run.
    pub fn max_tps(&self) -> Option<f64> {
        self.with_controls(ProfileControls::max_tps)
    }

    /// Live acceleration of the current run.
    pub fn acceleration(&self) -> Option<f64> {
        self.with_controls(ProfileControls::accel_tps)
    }

    /// Position in engineering units.
    pub fn current_position(&self) -> f64 {
        self.config.to_units(self.status.position())
    }

    pub fn current_position_steps(&self) -> i64 {
        self.status.position()
    }

    /// Target in engineering units.
    pub fn target_position(&self) -> f64 {
        self.config.to_units(self.target.load(Ordering::Acquire))
    }

    pub fn current_tps(&self) -> f64 {
        self.status.tps()
    }

    pub fn drive_mode(&self) -> DriveMode {
        self.status.mode()
    }

    pub fn drive_state(&self) -> DriveState {
        self.status.state()
    }

    /// Style of the current or most recent run.
    pub fn step_style(&self) -> Option<String> {
        lock(&self.style).clone()
    }

    pub fn style_names(&self) -> Vec<&str> {
        self.config.styles.keys().map(String::as_str).collect()
    }

    pub fn last_error(&self) -> Option<MotionError> {
        lock(&self.last_error).clone()
    }

    pub fn take_last_error(&self) -> Option<MotionError> {
        lock(&self.last_error).take()
    }
}

impl<O, Q, C> Drop for MotorController<O, Q, C>
where
    O: OutputLines + Send + 'static,
    Q: WaveQueue + Send + 'static,
    C: Clock + Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        let slot = self.slot.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Slot::Running(run) = std::mem::replace(slot, Slot::Lost) {
            run.controls.crash_stop();
            match run.handle.join() {
                Ok(mut ret) => {
                    if let Err(e) = de_energize(&mut ret.hw.outputs, &self.config.pins) {
                        warn!(error = %e, "failed to de-energize outputs on drop");
                    }
                }
                Err(_) => error!("engine thread panicked"),
            }
            self.status.set_off();
        }
    }
}

/// Everything one engine thread owns for the length of a run.
struct EngineThread<O, Q, C> {
    hw: Hardware<O, Q>,
    style: DriveStyle,
    name: String,
    generator: StepGenerator,
    clock: C,
    status: Arc<MotorStatus>,
    controls: Arc<ProfileControls>,
    pins: [u8; WINDINGS],
}

impl<O, Q, C> EngineThread<O, Q, C>
where
    O: OutputLines,
    Q: WaveQueue,
    C: Clock,
{
    fn run(self) -> EngineReturn<O, Q> {
        let Self {
            mut hw,
            style,
            name,
            mut generator,
            clock,
            status,
            controls,
            pins,
        } = self;
        let mode = style.mode();
        let span = info_span!("engine", mode = %mode, style = %name);
        let _enter = span.enter();
        info!(
            position = generator.current_position(),
            target = controls.target_position(),
            "engine start"
        );

        let result = match &style {
            DriveStyle::Soft(motion) => SoftEngine::new(
                &mut hw.outputs,
                pins,
                &motion.levels,
                motion.hold_timeout,
                &clock,
                &status,
            )
            .run(&mut generator, &mut hw.phase)
            .map(|_| ()),
            DriveStyle::Dma { motion, waves } => DmaEngine::new(
                &mut hw.outputs,
                &mut hw.queue,
                pins_mask(&pins),
                &motion.levels,
                motion.hold_timeout,
                *waves,
                &clock,
                &status,
                &controls,
            )
            .run(&mut generator, &mut hw.phase)
            .map(|_| ()),
        };
        info!(position = status.position(), ok = result.is_ok(), "engine exit");
        EngineReturn { hw, result }
    }
}
