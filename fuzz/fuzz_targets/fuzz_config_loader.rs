#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    // Parse, validate and convert arbitrary TOML; errors are fine, panics are not.
    let Ok(cfg) = stepper_config::load_toml(data) else {
        return;
    };
    if cfg.validate().is_err() {
        return;
    }
    if let Ok(motor) = stepper_core::MotorConfig::try_from(&cfg) {
        for style in motor.styles.values() {
            let _ = motor.to_steps(motor.initial_position);
            assert!(!style.motion().levels.is_empty());
        }
    }
});
