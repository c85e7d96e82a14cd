use thiserror::Error;

/// All errors produced by nullwave-core.
#[derive(Debug, Error)]
pub enum NullwaveError {
    /// Operation attempted before `open` or after `close`.
    #[error("no audio device — open it first")]
    NoDevice,

    /// The handle exists but the platform reports it unusable.
    #[error("audio device is not initialized")]
    NotInitialized,

    #[error("audio device is already open")]
    AlreadyOpen,

    #[error("audio device is already recording")]
    AlreadyRecording,

    /// Write parameters do not describe a valid region of the buffer.
    #[error("invalid write parameters: {0}")]
    BadValue(String),

    #[error("device accepted {written} of {expected} bytes")]
    WriteFailure { written: usize, expected: usize },

    #[error("audio device error: {0}")]
    AudioDevice(String),

    #[error("audio stream error: {0}")]
    AudioStream(String),

    #[error("engine is already running")]
    AlreadyRunning,

    #[error("engine is not running")]
    NotRunning,

    #[error("task period must be at least 1 ms")]
    InvalidPeriod,

    #[error("settings error: {0}")]
    Settings(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, NullwaveError>;
