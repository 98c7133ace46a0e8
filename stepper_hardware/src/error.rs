use thiserror::Error;

#[derive(Debug, Error)]
pub enum HwError {
    #[error("gpio error: {0}")]
    Gpio(String),
    #[error("output lines disconnected")]
    Disconnected,
    #[error("wave rejected: {0}")]
    QueueRejected(String),
    #[error("unknown wave id {0}")]
    UnknownWave(u32),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(all(feature = "hardware", target_os = "linux"))]
impl From<rppal::gpio::Error> for HwError {
    fn from(e: rppal::gpio::Error) -> Self {
        Self::Gpio(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, HwError>;
