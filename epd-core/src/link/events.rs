//! Inbound notification demultiplexing.
//!
//! The firmware does not tag its notifications. The first one after
//! notifications are enabled is the configuration struct; every later
//! one is a UTF-8 log line. The ordinal restarts on every connection.

use bytes::Bytes;

use crate::protocol::DeviceConfig;
use crate::protocol::payload::to_hex;

/// Log text the firmware emits once a refresh finishes.
const REFRESH_DONE_MARKERS: [&str; 2] = ["Refresh done", "刷新完成"];

/// What the session tells its subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// First notification of a connection, decoded.
    Config(DeviceConfig),
    /// First notification of a connection, too short to decode.
    MalformedConfig(Bytes),
    /// Any later notification.
    DeviceLog(String),
    /// The link dropped without `disconnect()` being called.
    PeerDisconnected,
}

impl SessionEvent {
    pub fn is_refresh_done(&self) -> bool {
        match self {
            Self::DeviceLog(text) => REFRESH_DONE_MARKERS.iter().any(|m| text.contains(m)),
            _ => false,
        }
    }
}

#[derive(Debug, Default)]
pub struct NotificationDemux {
    ordinal: u64,
}

impl NotificationDemux {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of notifications classified on this connection.
    pub fn ordinal(&self) -> u64 {
        self.ordinal
    }

    pub fn classify(&mut self, value: Bytes) -> SessionEvent {
        let ordinal = self.ordinal;
        self.ordinal += 1;

        if ordinal > 0 {
            let text = String::from_utf8_lossy(&value).into_owned();
            tracing::info!(target: "epd::device", "{text}");
            return SessionEvent::DeviceLog(text);
        }

        match DeviceConfig::decode(&value) {
            Ok(config) => {
                tracing::info!(
                    driver = format_args!("{:02x}", config.driver),
                    raw = %to_hex(&value),
                    "received device configuration"
                );
                SessionEvent::Config(config)
            }
            Err(e) => {
                tracing::warn!(raw = %to_hex(&value), "{e}");
                SessionEvent::MalformedConfig(value)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: [u8; 11] = [0x0D, 0x0E, 0x0F, 0x10, 0x11, 0x12, 0x13, 0x01, 0x07, 0xFF, 0xFF];

    #[test]
    fn first_is_config_rest_are_logs() {
        let mut demux = NotificationDemux::new();
        let first = demux.classify(Bytes::from_static(&CONFIG));
        assert!(matches!(first, SessionEvent::Config(c) if c.driver == 0x01));

        // Config-shaped bytes after the first are still logs.
        let second = demux.classify(Bytes::from_static(&CONFIG));
        assert!(matches!(second, SessionEvent::DeviceLog(_)));

        let third = demux.classify(Bytes::from_static(b"Refresh done"));
        assert_eq!(third, SessionEvent::DeviceLog("Refresh done".into()));
        assert!(third.is_refresh_done());
        assert_eq!(demux.ordinal(), 3);
    }

    #[test]
    fn short_first_notification_is_malformed() {
        let mut demux = NotificationDemux::new();
        let ev = demux.classify(Bytes::from_static(b"hi"));
        assert!(matches!(ev, SessionEvent::MalformedConfig(ref b) if b.len() == 2));
        // The slot is consumed either way.
        assert!(matches!(
            demux.classify(Bytes::from_static(&CONFIG)),
            SessionEvent::DeviceLog(_)
        ));
    }

    #[test]
    fn invalid_utf8_is_lossy() {
        let mut demux = NotificationDemux::new();
        demux.classify(Bytes::from_static(&CONFIG));
        let ev = demux.classify(Bytes::from_static(&[0x6F, 0x6B, 0xFF]));
        assert_eq!(ev, SessionEvent::DeviceLog("ok\u{FFFD}".into()));
    }
}
