//! Device-layer error codes.

/// Failure reported by the mixer engine during device lifecycle calls.
///
/// Each variant carries the legacy integer code callers may still expect
/// (`0` is success and is represented by `Ok`). The transport passes these
/// through unchanged and never retries.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceError {
    /// No free output device
    #[error("no free audio device")]
    NoFreeDevice,
    /// Device identifier could not be resolved
    #[error("cannot resolve audio device id")]
    DeviceId,
    /// Device capabilities could not be queried
    #[error("cannot query device capabilities")]
    Capabilities,
    /// Device cannot handle the requested format
    #[error("device cannot handle the requested format")]
    UnsupportedFormat,
    /// A previously open device could not be closed
    #[error("cannot close audio device")]
    CloseFailed,
    /// Device could not be opened
    #[error("cannot open audio device")]
    OpenFailed,
    /// Playback structures could not be allocated
    #[error("out of memory")]
    OutOfMemory,
    /// Any other backend-specific code
    #[error("audio device error {0}")]
    Other(i32),
}

impl DeviceError {
    /// Integer code of this error (always negative for known variants).
    pub const fn code(self) -> i32 {
        match self {
            DeviceError::NoFreeDevice => -1,
            DeviceError::DeviceId => -2,
            DeviceError::Capabilities => -3,
            DeviceError::UnsupportedFormat => -4,
            DeviceError::CloseFailed => -5,
            DeviceError::OpenFailed => -6,
            DeviceError::OutOfMemory => -7,
            DeviceError::Other(code) => code,
        }
    }

    /// Map an integer code back to an error. `0` is not an error.
    pub const fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            0 => return None,
            -1 => DeviceError::NoFreeDevice,
            -2 => DeviceError::DeviceId,
            -3 => DeviceError::Capabilities,
            -4 => DeviceError::UnsupportedFormat,
            -5 => DeviceError::CloseFailed,
            -6 => DeviceError::OpenFailed,
            -7 => DeviceError::OutOfMemory,
            other => DeviceError::Other(other),
        })
    }
}

/// Integer status of a lifecycle call: `0` on success, the error code otherwise.
pub fn status_code(result: &Result<(), DeviceError>) -> i32 {
    match result {
        Ok(()) => 0,
        Err(e) => e.code(),
    }
}
