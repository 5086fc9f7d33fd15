//! Domain-specific error types for the EPD link.
//!
//! Encoding failures are reported synchronously by the pure image
//! functions; link and transfer failures come back from the async
//! session operations. Every error is typed and recoverable.

use thiserror::Error;

/// The canonical error type for encoding and link operations.
#[derive(Debug, Error)]
pub enum EpdError {
    // ── Encoding Errors ──────────────────────────────────────────
    /// Pixel buffer length does not match `width × height × 4`.
    #[error("invalid dimensions: {width}x{height} needs {expected} bytes, got {actual}")]
    InvalidDimensions {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },

    /// A dither mode name did not match any known algorithm.
    #[error("unknown dither mode: {0}")]
    UnknownDitherMode(String),

    /// A hex payload string contained non-hex characters.
    #[error("invalid hex payload: {0}")]
    InvalidHex(String),

    /// A caller-supplied parameter is out of range.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// A numeric value did not map to any known enum variant.
    #[error("unknown {type_name} discriminant: {value:#x}")]
    UnknownVariant { type_name: &'static str, value: u64 },

    // ── Framing Errors ───────────────────────────────────────────
    /// A frame would exceed the negotiated MTU.
    #[error("oversized frame: {size} bytes (mtu {mtu})")]
    OversizedFrame { size: usize, mtu: usize },

    /// The configuration notification was too short to decode.
    #[error("malformed configuration notification: {len} bytes")]
    MalformedConfig { len: usize },

    // ── Link Errors ──────────────────────────────────────────────
    /// Service or characteristic discovery failed.
    #[error("link setup failed: {0}")]
    LinkSetupFailed(String),

    /// A single write to the command characteristic failed.
    #[error("transport write failed ({kind}): {source}")]
    TransportWriteFailed {
        kind: crate::link::WriteKind,
        #[source]
        source: TransportError,
    },

    /// Another write-bearing operation is already running on this link.
    #[error("link busy: another operation is in flight")]
    LinkBusy,

    /// The peer dropped the connection; any in-flight job is void.
    #[error("peer disconnected")]
    PeerDisconnected,

    /// The operation needs a `Ready` link.
    #[error("not connected")]
    NotConnected,

    /// A state transition was attempted from the wrong state.
    #[error("invalid state transition: {0}")]
    InvalidState(&'static str),

    /// The codec sink reported an I/O failure.
    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),
}

// ── TransportError ───────────────────────────────────────────────

/// Failures reported by a [`GattTransport`](crate::link::GattTransport)
/// implementation.
///
/// The session translates these into [`EpdError`] kinds depending on
/// which stage of the link they occurred in.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// A GATT service or characteristic is not present on the device.
    #[error("not found: {0}")]
    NotFound(String),

    /// The BLE stack reported an I/O failure.
    #[error("i/o: {0}")]
    Io(String),

    /// The connection is gone.
    #[error("disconnected")]
    Disconnected,
}
