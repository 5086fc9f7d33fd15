//! The seam between the session and a BLE stack.
//!
//! A [`GattTransport`] exposes just what the display protocol needs:
//! one service, a write+notify command characteristic and an optional
//! read-only version characteristic.

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::TransportError;

// ── UUIDs ────────────────────────────────────────────────────────

pub const SERVICE_UUID: &str = "62750001-d828-918d-fb46-b6c11c675aec";
/// Write (with and without response) and notify.
pub const COMMAND_CHAR_UUID: &str = "62750002-d828-918d-fb46-b6c11c675aec";
/// Read; first byte is the firmware protocol version.
pub const VERSION_CHAR_UUID: &str = "62750003-d828-918d-fb46-b6c11c675aec";

// ── WriteKind ────────────────────────────────────────────────────

/// BLE write flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriteKind {
    /// Write request; completes once the peripheral confirms it.
    Acknowledged,
    /// Write command; completes once handed to the controller.
    Unacknowledged,
}

impl WriteKind {
    pub fn is_acknowledged(self) -> bool {
        matches!(self, Self::Acknowledged)
    }
}

impl fmt::Display for WriteKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Acknowledged => write!(f, "acknowledged"),
            Self::Unacknowledged => write!(f, "unacknowledged"),
        }
    }
}

// ── TransportEvent ───────────────────────────────────────────────

/// Asynchronous events delivered by the transport after `connect`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A value notified on the command characteristic.
    Notification(Bytes),
    /// The peer (or the stack) dropped the connection.
    Disconnected,
}

pub type TransportEvents = mpsc::UnboundedReceiver<TransportEvent>;

// ── GattTransport ────────────────────────────────────────────────

#[async_trait]
pub trait GattTransport: Send + Sync + 'static {
    /// Open the physical connection. Events for this connection arrive on
    /// the returned receiver until it yields `Disconnected` or closes.
    async fn connect(&self) -> Result<TransportEvents, TransportError>;

    async fn resolve_service(&self, service: &str) -> Result<(), TransportError>;

    async fn resolve_characteristic(
        &self,
        service: &str,
        characteristic: &str,
    ) -> Result<(), TransportError>;

    async fn read(&self, characteristic: &str) -> Result<Bytes, TransportError>;

    /// Enable notifications on `characteristic`.
    async fn subscribe(&self, characteristic: &str) -> Result<(), TransportError>;

    async fn write(
        &self,
        characteristic: &str,
        data: Bytes,
        kind: WriteKind,
    ) -> Result<(), TransportError>;

    async fn disconnect(&self) -> Result<(), TransportError>;
}
