use nix::errno::Errno;
use thiserror::Error;

/// Concrete error taxonomy for the engine. Each variant maps to a process
/// exit code in [`IgnisError::exit_code`].
#[derive(Debug, Error)]
pub enum IgnisError {
    #[error("failed to initialize CPU topology: {0}")]
    FatalInit(String),

    #[error("no applicable platform and no available fallback for this host")]
    FatalNoPayload,

    #[error("unknown function id: {0}, see --list-functions for available ids")]
    UnknownFunctionId(u32),

    #[error("function {id} (\"{name}\") requires features not present on this host")]
    UnavailablePayload { id: u32, name: String },

    #[error("failed to allocate worker buffer ({words} words)")]
    AllocFailure { words: usize },

    #[error("unexpected error from sleep: {0}")]
    SleepError(Errno),

    #[error("--threads {threads} does not match --bind cpuset length {bind_len}")]
    ThreadBindMismatch { threads: usize, bind_len: usize },
}

impl IgnisError {
    pub fn exit_code(&self) -> i32 {
        match self {
            IgnisError::FatalInit(_) => 1,
            IgnisError::FatalNoPayload => 2,
            IgnisError::UnknownFunctionId(_) => 3,
            IgnisError::UnavailablePayload { .. } => 4,
            IgnisError::AllocFailure { .. } => 5,
            IgnisError::SleepError(_) => 6,
            IgnisError::ThreadBindMismatch { .. } => 7,
        }
    }
}
