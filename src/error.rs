use crate::types::DeviceKey;
use thiserror::Error;

/// Result type for hub link operations
pub type Result<T> = std::result::Result<T, HubError>;

/// Errors that can occur when talking to the Crestron processor
#[derive(Error, Debug)]
pub enum HubError {
    /// Bytes on the wire could not be decoded into a frame
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    /// A send was attempted while the transport is down
    #[error("Not connected to hub")]
    NotConnected,

    /// The socket failed or the peer closed it
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// The device is not present in the registry
    #[error("Unknown device: {0}")]
    UnknownDevice(DeviceKey),

    /// The topology request to the hub failed
    #[error("Topology fetch failed: {0}")]
    TopologyFetchFailed(#[from] reqwest::Error),

    /// The topology document could not be understood
    #[error("Invalid topology: {0}")]
    InvalidTopology(String),

    /// A command argument was outside its allowed range
    #[error("{name} out of range: {value} (expected 0..={max})")]
    OutOfRange {
        /// Argument name
        name: &'static str,
        /// Rejected value
        value: u16,
        /// Largest accepted value
        max: u16,
    },

    /// The device does not support the requested command
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A subscriber fell behind and device changes were dropped
    #[error("Missed {0} device changes")]
    MissedChanges(u64),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Domain;

    #[test]
    fn should_display_unknown_device() {
        let err = HubError::UnknownDevice(DeviceKey::new(Domain::Shade, 1032));
        assert_eq!(err.to_string(), "Unknown device: shade 1032");
    }

    #[test]
    fn should_display_out_of_range() {
        let err = HubError::OutOfRange {
            name: "hue",
            value: 400,
            max: 360,
        };
        assert_eq!(err.to_string(), "hue out of range: 400 (expected 0..=360)");
    }

    #[test]
    fn should_display_missed_changes() {
        assert_eq!(HubError::MissedChanges(3).to_string(), "Missed 3 device changes");
    }

    #[test]
    fn should_convert_io_error() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe");
        let err: HubError = io.into();
        assert!(matches!(err, HubError::Io(_)));
    }
}
