use thiserror::Error;

/// Malformed motor or style description. Raised while building runtime
/// types, never while a motor is running.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("step table length {len} must be a power of two >= 4")]
    TableLength { len: usize },
    #[error("step table row {row} has value {value}, above the maximum {max}")]
    TableValue { row: usize, value: u32, max: u32 },
    #[error("a drive style needs at least one step level")]
    NoLevels,
    #[error(
        "level {level} has {microsteps} microsteps per step; expected {previous} or {}",
        .previous / 2
    )]
    MicrostepRatio {
        level: usize,
        microsteps: u32,
        previous: u32,
    },
    #[error("ustep_factor {ustep_factor} is not a multiple of level {level}'s {microsteps} microsteps")]
    MicrostepFactor {
        level: usize,
        microsteps: u32,
        ustep_factor: u32,
    },
    #[error("final level ceiling {ceiling} tps is below max_tps {max_tps}")]
    CeilingBelowMax { ceiling: f64, max_tps: f64 },
    #[error("invalid kinematics: {0}")]
    Kinematics(&'static str),
    #[error("pin {0} is out of range (1..=31)")]
    PinOutOfRange(u8),
    #[error("pin {0} is assigned to more than one winding")]
    DuplicatePin(u8),
    #[error("unknown step table '{0}'")]
    UnknownTable(String),
    #[error("dma styles need pin-mask (block) tables; level {level} is not one")]
    PinMaskRequired { level: usize },
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum MotionError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("motor is already running")]
    AlreadyRunning,
    #[error("unknown drive style '{0}'")]
    UnknownStyle(String),
    #[error("wave queue rejected batch: {0}")]
    QueueRejected(String),
    #[error("hardware disconnected")]
    HardwareDisconnected,
    #[error("hardware error: {0}")]
    Hardware(String),
    #[error("engine thread panicked; output state unknown")]
    EngineLost,
}

pub type Result<T> = std::result::Result<T, MotionError>;
