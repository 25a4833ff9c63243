//! Error types for the motionlink-lib crate.
//!
//! [`DeviceError`] is the engine's result-code taxonomy: every device operation
//! and every asynchronous callback reports one of its variants on failure.
//! [`MotionlinkError`] wraps it together with file I/O and configuration
//! errors so `?` propagates across module boundaries.

use std::fmt;

use crate::platform::OsError;

/// Result codes reported by device operations and callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceError {
    /// Unknown device id, or a channel without path/metadata.
    NoDevice,
    /// Device already open, channel handle live, or send pool exhausted.
    Busy,
    /// Device not open, short transfer, or failed completion.
    Io,
    /// A bounded wait expired with the operation still outstanding.
    Timeout,
    /// Report longer than the target channel's output report.
    SendTooLarge,
    /// Wait failure or hard per-channel error during a receive pass.
    Interrupted,
    /// The device was physically disconnected.
    NotFound,
    /// Any other OS failure.
    Unexpected,
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceError::NoDevice => write!(f, "No such device"),
            DeviceError::Busy => write!(f, "Device busy"),
            DeviceError::Io => write!(f, "I/O error"),
            DeviceError::Timeout => write!(f, "Operation timed out"),
            DeviceError::SendTooLarge => write!(f, "Report too large for output channel"),
            DeviceError::Interrupted => write!(f, "Operation interrupted"),
            DeviceError::NotFound => write!(f, "Device disconnected"),
            DeviceError::Unexpected => write!(f, "Unexpected device error"),
        }
    }
}

impl std::error::Error for DeviceError {}

impl From<OsError> for DeviceError {
    fn from(e: OsError) -> Self {
        match e {
            OsError::Disconnected => DeviceError::NotFound,
            OsError::Aborted | OsError::Code(_) => DeviceError::Unexpected,
        }
    }
}

/// Unified error type for motionlink-lib operations.
#[derive(Debug)]
pub enum MotionlinkError {
    /// Device operation failure.
    Device(DeviceError),
    /// Standard I/O error (config persistence).
    Io(std::io::Error),
    /// Configuration validation error.
    Config(String),
    /// Malformed report text (hex payloads given on the command line).
    Report(String),
}

impl fmt::Display for MotionlinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MotionlinkError::Device(e) => write!(f, "{e}"),
            MotionlinkError::Io(e) => write!(f, "I/O error: {e}"),
            MotionlinkError::Config(e) => write!(f, "Config error: {e}"),
            MotionlinkError::Report(e) => write!(f, "Report error: {e}"),
        }
    }
}

impl std::error::Error for MotionlinkError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MotionlinkError::Device(e) => Some(e),
            MotionlinkError::Io(e) => Some(e),
            MotionlinkError::Config(_) | MotionlinkError::Report(_) => None,
        }
    }
}

impl From<DeviceError> for MotionlinkError {
    fn from(e: DeviceError) -> Self {
        MotionlinkError::Device(e)
    }
}

impl From<std::io::Error> for MotionlinkError {
    fn from(e: std::io::Error) -> Self {
        MotionlinkError::Io(e)
    }
}

/// Crate-level Result alias using [`MotionlinkError`].
pub type Result<T> = std::result::Result<T, MotionlinkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disconnect_maps_to_not_found() {
        assert_eq!(DeviceError::from(OsError::Disconnected), DeviceError::NotFound);
    }

    #[test]
    fn other_os_errors_map_to_unexpected() {
        assert_eq!(DeviceError::from(OsError::Aborted), DeviceError::Unexpected);
        assert_eq!(DeviceError::from(OsError::Code(5)), DeviceError::Unexpected);
    }

    #[test]
    fn display_device_error() {
        let e = MotionlinkError::Device(DeviceError::SendTooLarge);
        assert_eq!(e.to_string(), "Report too large for output channel");
    }

    #[test]
    fn display_config_error() {
        let e = MotionlinkError::Config("bad slot count".into());
        assert_eq!(e.to_string(), "Config error: bad slot count");
    }

    #[test]
    fn source_chains_device_error() {
        let e = MotionlinkError::Device(DeviceError::Timeout);
        let source = std::error::Error::source(&e).unwrap();
        assert_eq!(source.to_string(), "Operation timed out");
    }

    #[test]
    fn source_none_for_config() {
        let e = MotionlinkError::Config("x".into());
        assert!(std::error::Error::source(&e).is_none());
    }

    #[test]
    fn question_mark_propagation_device_to_motionlink() {
        fn inner() -> std::result::Result<(), DeviceError> {
            Err(DeviceError::Busy)
        }
        fn outer() -> Result<()> {
            inner()?;
            Ok(())
        }
        let err = outer().unwrap_err();
        assert!(matches!(err, MotionlinkError::Device(DeviceError::Busy)));
    }

    #[test]
    fn question_mark_propagation_io_to_motionlink() {
        fn inner() -> std::io::Result<()> {
            Err(std::io::Error::new(std::io::ErrorKind::NotFound, "nope"))
        }
        fn outer() -> Result<()> {
            inner()?;
            Ok(())
        }
        assert!(matches!(outer().unwrap_err(), MotionlinkError::Io(_)));
    }
}
