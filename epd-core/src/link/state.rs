//! Link lifecycle state machine.
//!
//! Transitions are validated and return `Result` instead of panicking;
//! the session publishes every change through a `watch` channel.

use std::time::Instant;

use crate::error::EpdError;
use crate::protocol::Opcode;

/// Firmware version assumed when the version characteristic is absent.
pub const DEFAULT_PROTOCOL_VERSION: u8 = 0x15;

/// First firmware version that understands `WRITE_IMG`.
pub const WRITE_IMG_MIN_VERSION: u8 = 0x16;

// ── LinkState ────────────────────────────────────────────────────

/// ```text
///  Disconnected ──► Connecting ──► CapabilityProbe ──► Ready ◄──► Busy
///       ▲               │                │               │          │
///       │               ▼                ▼               ▼          ▼
///       └──────────────────────── Disconnecting ◄───────────────────┘
/// ```
///
/// Peer-initiated disconnects jump straight to `Disconnected` from any
/// state via [`LinkState::force_disconnect`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LinkState {
    #[default]
    Disconnected,
    /// Connection and GATT discovery in progress.
    Connecting,
    /// Service resolved; reading the version, subscribing and sending `INIT`.
    CapabilityProbe,
    /// Idle and accepting commands.
    Ready {
        /// When the link last became idle.
        since: Instant,
    },
    /// A write-bearing operation holds the link.
    Busy,
    Disconnecting,
}

impl std::fmt::Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::CapabilityProbe => write!(f, "CapabilityProbe"),
            Self::Ready { .. } => write!(f, "Ready"),
            Self::Busy => write!(f, "Busy"),
            Self::Disconnecting => write!(f, "Disconnecting"),
        }
    }
}

impl LinkState {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready { .. })
    }

    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Busy)
    }

    pub fn is_disconnected(&self) -> bool {
        matches!(self, Self::Disconnected)
    }

    /// Connected in the sense of "commands can eventually flow".
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Ready { .. } | Self::Busy)
    }

    // ── Transitions ──────────────────────────────────────────────

    /// Valid from: `Disconnected`.
    pub fn begin_connect(&mut self) -> Result<(), EpdError> {
        match self {
            Self::Disconnected => {
                *self = Self::Connecting;
                Ok(())
            }
            _ => Err(EpdError::InvalidState(
                "cannot connect: not in Disconnected state",
            )),
        }
    }

    /// Valid from: `Connecting`.
    pub fn begin_probe(&mut self) -> Result<(), EpdError> {
        match self {
            Self::Connecting => {
                *self = Self::CapabilityProbe;
                Ok(())
            }
            _ => Err(EpdError::InvalidState(
                "cannot probe: not in Connecting state",
            )),
        }
    }

    /// Valid from: `CapabilityProbe`.
    pub fn mark_ready(&mut self) -> Result<(), EpdError> {
        match self {
            Self::CapabilityProbe => {
                *self = Self::Ready {
                    since: Instant::now(),
                };
                Ok(())
            }
            _ => Err(EpdError::InvalidState(
                "cannot become ready: not in CapabilityProbe state",
            )),
        }
    }

    /// Claim the link for one operation.
    ///
    /// Valid from: `Ready`. A second claim while `Busy` is `LinkBusy`.
    pub fn acquire(&mut self) -> Result<(), EpdError> {
        match self {
            Self::Ready { .. } => {
                *self = Self::Busy;
                Ok(())
            }
            Self::Busy => Err(EpdError::LinkBusy),
            _ => Err(EpdError::NotConnected),
        }
    }

    /// Valid from: `Busy`.
    pub fn release(&mut self) -> Result<(), EpdError> {
        match self {
            Self::Busy => {
                *self = Self::Ready {
                    since: Instant::now(),
                };
                Ok(())
            }
            _ => Err(EpdError::InvalidState("cannot release: not Busy")),
        }
    }

    /// Valid from every state except `Disconnected` and `Disconnecting`.
    pub fn begin_disconnect(&mut self) -> Result<(), EpdError> {
        match self {
            Self::Disconnected | Self::Disconnecting => Err(EpdError::InvalidState(
                "cannot disconnect: already disconnecting",
            )),
            _ => {
                *self = Self::Disconnecting;
                Ok(())
            }
        }
    }

    /// Valid from: `Disconnecting`, `Connecting` and `CapabilityProbe`
    /// (setup failure).
    pub fn finish_disconnect(&mut self) -> Result<(), EpdError> {
        match self {
            Self::Disconnecting | Self::Connecting | Self::CapabilityProbe => {
                *self = Self::Disconnected;
                Ok(())
            }
            _ => Err(EpdError::InvalidState(
                "cannot finish disconnect: not in a disconnectable state",
            )),
        }
    }

    /// Peer-initiated or unrecoverable loss of the link.
    pub fn force_disconnect(&mut self) {
        *self = Self::Disconnected;
    }
}

// ── DeviceCapabilities ───────────────────────────────────────────

/// What the capability probe learned about the peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceCapabilities {
    pub version: u8,
    /// `false` when the version characteristic was missing and
    /// `version` is the default.
    pub version_reported: bool,
}

impl Default for DeviceCapabilities {
    fn default() -> Self {
        Self {
            version: DEFAULT_PROTOCOL_VERSION,
            version_reported: false,
        }
    }
}

impl DeviceCapabilities {
    pub fn from_version(version: u8) -> Self {
        Self {
            version,
            version_reported: true,
        }
    }

    /// Whether the firmware understands `opcode`.
    pub fn supports(&self, opcode: Opcode) -> bool {
        self.version >= opcode.min_version()
    }

    pub fn supports_write_img(&self) -> bool {
        self.supports(Opcode::WriteImg)
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use tokio_test::{assert_err, assert_ok};

    use super::*;

    #[test]
    fn happy_path_lifecycle() {
        let mut s = LinkState::default();
        assert_ok!(s.begin_connect());
        assert_eq!(s, LinkState::Connecting);
        assert_ok!(s.begin_probe());
        assert_eq!(s, LinkState::CapabilityProbe);
        assert_ok!(s.mark_ready());
        assert!(s.is_ready());

        assert_ok!(s.acquire());
        assert!(s.is_busy());
        assert_ok!(s.release());
        assert!(s.is_ready());

        assert_ok!(s.begin_disconnect());
        assert_ok!(s.finish_disconnect());
        assert!(s.is_disconnected());
    }

    #[test]
    fn second_acquire_is_link_busy() {
        let mut s = LinkState::Busy;
        assert!(matches!(s.acquire(), Err(EpdError::LinkBusy)));
        assert!(s.is_busy());
    }

    #[test]
    fn acquire_when_down_is_not_connected() {
        for mut s in [
            LinkState::Disconnected,
            LinkState::Connecting,
            LinkState::CapabilityProbe,
        ] {
            assert!(matches!(s.acquire(), Err(EpdError::NotConnected)));
        }
    }

    #[test]
    fn setup_failure_returns_to_disconnected() {
        let mut s = LinkState::Connecting;
        assert_ok!(s.finish_disconnect());
        assert!(s.is_disconnected());

        let mut s = LinkState::CapabilityProbe;
        assert_ok!(s.finish_disconnect());
        assert!(s.is_disconnected());
    }

    #[test]
    fn invalid_transitions() {
        let mut s = LinkState::Busy;
        assert_err!(s.begin_connect());
        assert_err!(s.mark_ready());
        assert!(LinkState::Disconnected.begin_probe().is_err());
        assert!(LinkState::Disconnected.begin_disconnect().is_err());
        assert!(LinkState::Disconnected.release().is_err());
    }

    #[test]
    fn disconnect_from_busy() {
        let mut s = LinkState::Busy;
        assert_ok!(s.begin_disconnect());
        assert_eq!(s, LinkState::Disconnecting);
    }

    #[test]
    fn force_disconnect_from_any_state() {
        let mut s = LinkState::Busy;
        s.force_disconnect();
        assert!(s.is_disconnected());
    }

    #[test]
    fn display_format() {
        assert_eq!(LinkState::CapabilityProbe.to_string(), "CapabilityProbe");
        assert_eq!(
            LinkState::Ready {
                since: Instant::now()
            }
            .to_string(),
            "Ready"
        );
    }

    #[test]
    fn capabilities_default_to_legacy() {
        let caps = DeviceCapabilities::default();
        assert_eq!(caps.version, 0x15);
        assert!(!caps.supports_write_img());
        assert!(DeviceCapabilities::from_version(0x16).supports_write_img());
        assert!(caps.supports(Opcode::SendData));
        assert!(!caps.supports(Opcode::WriteImg));
    }
}
