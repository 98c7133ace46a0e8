use rstest::rstest;
use stepper_config::{DriveModeCfg, TableKind, load_toml};

const BASE: &str = r#"
[motor]
pins = [15, 22, 27, 17]
unit_scale = 4.0

[tables.pair]
kind = "block"
rows = [[1,1,0,0],[0,1,1,0],[0,0,1,1],[1,0,0,1]]

[tables.soft]
kind = "pwm"
rows = [[255,0,0,0],[128,128,0,0],[0,255,0,0],[0,128,128,0],[0,0,255,0],[0,0,128,128],[0,0,0,255],[128,0,0,128]]

[styles.slow]
drive_mode = "soft"
start_tps = 10.0
max_tps = 300.0
accel_tps = 100.0
ustep_factor = 2
levels = [
    { table = "soft", ceiling_tps = 40.0, microsteps = 2 },
    { table = "pair", ceiling_tps = 1000.0, microsteps = 1 },
]

[styles.fast]
drive_mode = "dma"
start_tps = 10.0
max_tps = 800.0
accel_tps = 200.0
ustep_factor = 1
levels = [{ table = "pair", ceiling_tps = 1000.0, microsteps = 1 }]
"#;

#[test]
fn base_config_parses_and_validates() {
    let cfg = load_toml(BASE).expect("parse TOML");
    cfg.validate().expect("valid config");

    assert_eq!(cfg.motor.pins, [15, 22, 27, 17]);
    assert_eq!(cfg.motor.initial_position, 0.0);
    assert_eq!(cfg.tables["pair"].kind, TableKind::Block);

    let slow = &cfg.styles["slow"];
    assert_eq!(slow.drive_mode, DriveModeCfg::Soft);
    assert_eq!(slow.levels.len(), 2);
    // serde defaults
    assert!((slow.dir_delay - 0.001).abs() < 1e-12);
    assert!((slow.hold_tick - 0.7).abs() < 1e-12);
    assert!((slow.hold_timeout - 1.5).abs() < 1e-12);
    assert!(slow.decel_margin.is_none());

    let fast = &cfg.styles["fast"];
    assert_eq!(fast.drive_mode, DriveModeCfg::Dma);
    assert_eq!(fast.wave.max_pulses, 1000);
    assert_eq!(fast.wave.max_waves, 3);
    assert_eq!(fast.wave.max_span_us, 500_000);
    assert_eq!(fast.wave.poll_ms, 100);
}

#[test]
fn shipped_config_validates() {
    let text = std::fs::read_to_string(concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/../etc/stepper.toml"
    ))
    .expect("read etc/stepper.toml");
    let cfg = load_toml(&text).expect("parse shipped config");
    cfg.validate().expect("shipped config is valid");
    for name in ["slow", "fast1", "fast2", "dma_single", "dma_smooth", "dma_pair"] {
        assert!(cfg.styles.contains_key(name), "missing style {name}");
    }
}

#[rstest]
#[case("pins = [15, 22, 27, 17]", "pins = [0, 22, 27, 17]", "motor.pins[0] must be in 1..=31")]
#[case("pins = [15, 22, 27, 17]", "pins = [15, 22, 27, 40]", "motor.pins[3] must be in 1..=31")]
#[case("pins = [15, 22, 27, 17]", "pins = [15, 22, 15, 17]", "must be distinct")]
#[case("unit_scale = 4.0", "unit_scale = 0.0", "motor.unit_scale must be > 0")]
#[case("start_tps = 10.0\nmax_tps = 300.0", "start_tps = 0.0\nmax_tps = 300.0", "styles.slow.start_tps must be > 0")]
#[case("max_tps = 300.0", "max_tps = 5.0", "styles.slow.max_tps must be >= start_tps")]
#[case("accel_tps = 100.0", "accel_tps = -1.0", "styles.slow.accel_tps must be > 0")]
#[case("ustep_factor = 2", "ustep_factor = 0", "styles.slow.ustep_factor must be >= 1")]
#[case("table = \"soft\"", "table = \"nope\"", "unknown table 'nope'")]
#[case("ceiling_tps = 40.0, microsteps = 2", "ceiling_tps = 40.0, microsteps = 0", "microsteps must be >= 1")]
#[case("[255,0,0,0],[128", "[256,0,0,0],[128", "tables.soft.rows[0]")]
#[case("[1,1,0,0],[0,1,1,0],[0,0,1,1],[1,0,0,1]", "[1,1,0,0],[0,1,1,0],[0,0,1,1]", "at least 4 rows")]
fn rejects_invalid_values(#[case] from: &str, #[case] to: &str, #[case] needle: &str) {
    assert!(BASE.contains(from), "fixture does not contain {from:?}");
    let toml = BASE.replacen(from, to, 1);
    let cfg = load_toml(&toml).expect("parse TOML");
    let err = cfg.validate().expect_err("should be rejected");
    let msg = format!("{err}");
    assert!(msg.contains(needle), "expected {needle:?} in {msg:?}");
}

#[test]
fn rejects_zero_wave_limits_for_dma_styles() {
    let toml = format!("{BASE}\n[styles.fast.wave]\nmax_waves = 0\n");
    let cfg = load_toml(&toml).expect("parse TOML");
    let err = cfg.validate().expect_err("max_waves = 0 must be rejected");
    assert!(format!("{err}").contains("styles.fast.wave limits must all be >= 1"));
}

#[test]
fn rejects_unknown_rotation() {
    let toml = format!("{BASE}\n[logging]\nrotation = \"weekly\"\n");
    let cfg = load_toml(&toml).expect("parse TOML");
    let err = cfg.validate().expect_err("weekly is not a rotation");
    assert!(format!("{err}").contains("logging.rotation"));
}

#[test]
fn unknown_drive_mode_is_a_parse_error() {
    let toml = BASE.replacen("drive_mode = \"soft\"", "drive_mode = \"turbo\"", 1);
    assert!(load_toml(&toml).is_err());
}

#[test]
fn empty_styles_rejected() {
    let toml = r#"
[motor]
pins = [1, 2, 3, 4]
unit_scale = 1.0

[styles]
"#;
    let cfg = load_toml(toml).expect("parse TOML");
    let err = cfg.validate().expect_err("no styles");
    assert!(format!("{err}").contains("at least one drive style"));
}
