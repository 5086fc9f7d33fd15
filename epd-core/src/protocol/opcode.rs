//! Command opcodes understood by the display firmware.
//!
//! Unknown opcode bytes decode to `EpdError::UnknownVariant`.

use std::fmt;

use crate::error::EpdError;

/// First byte of every frame written to the command characteristic.
///
/// Organized by category:
/// - `0x00..0x0F`: Panel control
/// - `0x20..0x2F`: Clock
/// - `0x30..0x3F`: Image streaming (protocol v1.6+)
/// - `0x90..0x9F`: System
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    // ── Panel (0x0x) ─────────────────────────────────────────────
    /// Set the SPI/GPIO pin mapping.
    SetPins = 0x00,
    /// Initialise the panel driver, optionally switching driver.
    Init = 0x01,
    /// Clear the panel.
    Clear = 0x02,
    /// Forward one raw command byte to the panel controller.
    SendCmd = 0x03,
    /// Forward data bytes to the panel controller.
    SendData = 0x04,
    /// Refresh the panel from its RAM.
    Refresh = 0x05,
    /// Put the panel to deep sleep.
    Sleep = 0x06,

    // ── Clock (0x2x) ─────────────────────────────────────────────
    /// Set the device clock and display mode.
    SetTime = 0x20,

    // ── Image (0x3x) ─────────────────────────────────────────────
    /// Stream an image plane chunk with a plane marker byte.
    WriteImg = 0x30,

    // ── System (0x9x) ────────────────────────────────────────────
    /// Overwrite the stored device configuration.
    SetConfig = 0x90,
    /// Reset the MCU.
    SysReset = 0x91,
    /// Put the MCU to sleep.
    SysSleep = 0x92,
    /// Erase stored configuration and reset.
    CfgErase = 0x99,
}

impl Opcode {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Firmware version from which this opcode is understood.
    pub fn min_version(self) -> u8 {
        match self {
            Opcode::WriteImg => crate::link::WRITE_IMG_MIN_VERSION,
            _ => 0,
        }
    }
}

impl From<Opcode> for u8 {
    fn from(op: Opcode) -> u8 {
        op as u8
    }
}

impl TryFrom<u8> for Opcode {
    type Error = EpdError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(Opcode::SetPins),
            0x01 => Ok(Opcode::Init),
            0x02 => Ok(Opcode::Clear),
            0x03 => Ok(Opcode::SendCmd),
            0x04 => Ok(Opcode::SendData),
            0x05 => Ok(Opcode::Refresh),
            0x06 => Ok(Opcode::Sleep),
            0x20 => Ok(Opcode::SetTime),
            0x30 => Ok(Opcode::WriteImg),
            0x90 => Ok(Opcode::SetConfig),
            0x91 => Ok(Opcode::SysReset),
            0x92 => Ok(Opcode::SysSleep),
            0x99 => Ok(Opcode::CfgErase),
            _ => Err(EpdError::UnknownVariant {
                type_name: "Opcode",
                value: value as u64,
            }),
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Opcode::SetPins => "SET_PINS",
            Opcode::Init => "INIT",
            Opcode::Clear => "CLEAR",
            Opcode::SendCmd => "SEND_CMD",
            Opcode::SendData => "SEND_DATA",
            Opcode::Refresh => "REFRESH",
            Opcode::Sleep => "SLEEP",
            Opcode::SetTime => "SET_TIME",
            Opcode::WriteImg => "WRITE_IMG",
            Opcode::SetConfig => "SET_CONFIG",
            Opcode::SysReset => "SYS_RESET",
            Opcode::SysSleep => "SYS_SLEEP",
            Opcode::CfgErase => "CFG_ERASE",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_known_opcodes() {
        for byte in [0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x20, 0x30, 0x90, 0x91, 0x92, 0x99] {
            let op = Opcode::try_from(byte).unwrap();
            assert_eq!(op.as_u8(), byte);
        }
    }

    #[test]
    fn unknown_opcode_is_error() {
        let err = Opcode::try_from(0x42).unwrap_err();
        assert!(err.to_string().contains("0x42"));
    }

    #[test]
    fn write_img_needs_v16() {
        assert_eq!(Opcode::WriteImg.min_version(), 0x16);
        assert_eq!(Opcode::Init.min_version(), 0);
        assert_eq!(Opcode::WriteImg.to_string(), "WRITE_IMG");
    }
}
