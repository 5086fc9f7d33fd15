//! CLI configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use epd_core::raster::DEFAULT_THRESHOLD;
use epd_core::{DitherMode, EpdError, LinkOptions};

/// Top-level configuration for the `epd` binary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EpdConfig {
    /// Target display.
    pub device: DeviceSettings,
    /// BLE link tuning.
    pub link: LinkConfig,
    /// Caller-side reconnection policy.
    pub reconnect: ReconnectConfig,
    /// Encoder settings.
    pub image: ImageConfig,
    /// Logging.
    pub logging: LoggingConfig,
}

/// Target display.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceSettings {
    /// Advertised name or address of the display.
    pub name: String,
    /// Driver id sent with `INIT`. 0 keeps the driver stored on the device.
    pub driver: u8,
    /// Panel resolution; images are resized to it before encoding.
    pub width: u32,
    pub height: u32,
}

/// BLE link tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Largest single write, opcode included.
    pub mtu: usize,
    /// Every n-th chunk is an acknowledged write.
    pub acknowledge_every: usize,
    /// Pause between enabling notifications and the first command.
    pub settle_delay_ms: u64,
    pub connect_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub max_attempts: u32,
    pub delay_ms: u64,
}

/// Encoder settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    pub mode: DitherMode,
    /// Gray level below which a pixel turns black.
    pub threshold: u8,
}

/// Logging.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level, overridden by `RUST_LOG`.
    pub level: String,
    /// Optional log file. Empty logs to stderr.
    pub file: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            name: "NRF_EPD".into(),
            driver: 0,
            width: 400,
            height: 300,
        }
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            mtu: 20,
            acknowledge_every: 20,
            settle_delay_ms: 300,
            connect_timeout_ms: 10_000,
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay_ms: 300,
        }
    }
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            mode: DitherMode::FloydSteinberg,
            threshold: DEFAULT_THRESHOLD,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            file: String::new(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl EpdConfig {
    /// Load from a TOML file. A missing file means defaults; a file that
    /// does not parse is an error.
    pub fn load(path: &Path) -> Result<Self, toml::de::Error> {
        match std::fs::read_to_string(path) {
            Ok(contents) => Self::parse(&contents),
            Err(_) => Ok(Self::default()),
        }
    }

    pub fn parse(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    pub fn validate(&self) -> Result<(), EpdError> {
        if !(epd_core::protocol::MIN_MTU..=epd_core::protocol::MAX_MTU).contains(&self.link.mtu) {
            return Err(EpdError::InvalidArgument("link.mtu must be within 3..=255"));
        }
        if self.link.acknowledge_every == 0 {
            return Err(EpdError::InvalidArgument(
                "link.acknowledge_every must be at least 1",
            ));
        }
        if self.device.width == 0 || self.device.height == 0 {
            return Err(EpdError::InvalidArgument("device resolution must be non-zero"));
        }
        Ok(())
    }

    /// Driver id to send with `INIT`, if one is configured.
    pub fn driver(&self) -> Option<u8> {
        (self.device.driver != 0).then_some(self.device.driver)
    }

    pub fn link_options(&self) -> LinkOptions {
        LinkOptions {
            mtu: self.link.mtu,
            ack_every: self.link.acknowledge_every,
            settle_delay: Duration::from_millis(self.link.settle_delay_ms),
            connect_timeout: Duration::from_millis(self.link.connect_timeout_ms),
            driver: self.driver(),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
