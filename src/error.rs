//! Error types for connector operations
//!
//! One unified error enum covers both wire-level failures (framing, CRC,
//! socket I/O) and configuration/registry failures. Transport errors are
//! handled inside the worker thread and never cross it; everything surfaced
//! to callers arrives through `Result<T, IgtlError>`.

use thiserror::Error;

/// Unified error type for connector and protocol operations
#[derive(Error, Debug)]
pub enum IgtlError {
    /// Header blob has the wrong size, an invalid name field, or otherwise
    /// cannot be parsed.
    ///
    /// On the receive path this is treated as a lost connection: the stream
    /// position can no longer be trusted, so the worker drops the connection
    /// and returns to waiting.
    #[error("malformed header: {0}")]
    MalformedHeader(String),

    /// Body checksum does not match the header-declared CRC.
    ///
    /// The affected message is discarded; the connection stays up.
    #[error("CRC mismatch: expected {expected:#018x}, got {actual:#018x}")]
    CrcMismatch {
        /// CRC declared in the message header
        expected: u64,
        /// CRC computed over the received body
        actual: u64,
    },

    /// A buffer or field had an unexpected length.
    #[error("invalid size: expected {expected}, got {actual}")]
    InvalidSize {
        /// Expected length in bytes
        expected: usize,
        /// Actual length in bytes
        actual: usize,
    },

    /// Header declares a body larger than the wire-format limit.
    ///
    /// Bounds allocation on peer-controlled input; a peer announcing an
    /// absurd body size costs a disconnect, not an allocation.
    #[error("message body too large: {size} bytes (max {max})")]
    BodyTooLarge {
        /// Declared body size
        size: usize,
        /// Maximum accepted size
        max: usize,
    },

    /// Socket or OS-level I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// `start()` was called before the connector role was set.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(&'static str),

    /// `start()` was called while a worker thread is running.
    #[error("connector is already running")]
    AlreadyRunning,

    /// A send was attempted without an established connection.
    #[error("not connected")]
    NotConnected,

    /// No converter is registered for the given wire type or application tag.
    #[error("no converter registered for {0:?}")]
    NoConverterFound(String),

    /// A converter claiming this wire type name is already registered.
    #[error("converter already registered for wire type {0:?}")]
    DuplicateConverter(String),

    /// The converter declares no wire type names and cannot be indexed.
    #[error("converter declares no wire type names")]
    UnnamedConverter,
}

/// Result type alias for connector operations
pub type Result<T> = std::result::Result<T, IgtlError>;
