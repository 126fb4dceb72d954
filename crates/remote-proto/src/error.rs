use thiserror::Error;

/// Errors surfaced to a device over the relay.  The `Display` text is what
/// the device receives in an `error` frame.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Device not found or offline")]
    PairingNotFound,
    #[error("Not paired with any device")]
    NotPaired,
    #[error("Cannot pair a device with itself")]
    SelfPairing,
    #[error("command without an action")]
    MissingAction,
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
}
