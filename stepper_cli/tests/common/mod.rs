#![allow(dead_code)]

use std::fs;
use std::path::PathBuf;

/// Small, fast styles for the simulated backend. 4 microsteps per unit.
pub const CONFIG: &str = r#"
[motor]
pins = [4, 17, 27, 22]
unit_scale = 4.0

[tables.wave]
kind = "onoff"
rows = [[1, 0, 0, 0], [0, 1, 0, 0], [0, 0, 1, 0], [0, 0, 0, 1]]

[tables.blocks]
kind = "block"
rows = [[1, 1, 0, 0], [0, 1, 1, 0], [0, 0, 1, 1], [1, 0, 0, 1]]

[styles.soft]
drive_mode = "soft"
start_tps = 200.0
max_tps = 1000.0
accel_tps = 20000.0
hold_tick = 0.05
ustep_factor = 1
levels = [{ table = "wave", ceiling_tps = 5000.0, microsteps = 1 }]

[styles.dma]
drive_mode = "dma"
start_tps = 200.0
max_tps = 1000.0
accel_tps = 20000.0
hold_tick = 0.05
ustep_factor = 1
levels = [{ table = "blocks", ceiling_tps = 5000.0, microsteps = 1 }]
wave = { max_pulses = 16, max_waves = 3, max_span_us = 100000, poll_ms = 5 }
"#;

pub fn write_config(dir: &tempfile::TempDir) -> PathBuf {
    let path = dir.path().join("stepper.toml");
    fs::write(&path, CONFIG).unwrap();
    path
}
