//! Error types for the control protocol

use thiserror::Error;

/// Errors that can occur handling the control protocol
#[derive(Debug, Error)]
pub enum ControlError {
    /// A command name or argument exceeds the one-byte length budget
    #[error("field too long for wire format: {0} bytes (max 255)")]
    FieldTooLong(usize),

    /// A command carries more arguments than the wire format allows
    #[error("too many arguments: {0} (max 255)")]
    TooManyArguments(usize),

    /// A frame contained invalid UTF-8
    ///
    /// The decoder drops its buffer; the session stays up.
    #[error("malformed frame: invalid UTF-8")]
    InvalidUtf8,

    /// Transport failure underneath the protocol
    #[error(transparent)]
    Net(#[from] phantom_net::NetError),

    /// I/O failure reading the channel
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
