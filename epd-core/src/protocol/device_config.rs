//! The firmware's persisted configuration struct.
//!
//! Sent by the device as the first notification after notifications are
//! enabled, and written back verbatim with `SET_CONFIG`.
//!
//! ```text
//! 0  mosi     4  rst      8  wakeup   (optional)
//! 1  sclk     5  busy     9  led      (optional)
//! 2  cs       6  bs      10  en       (optional)
//! 3  dc       7  driver
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::EpdError;

/// Bytes needed to recover the pin map and driver id.
pub const MIN_CONFIG_LEN: usize = 8;
/// Full size of the firmware struct.
pub const CONFIG_LEN: usize = 11;

/// Panel wiring, in `SET_PINS` order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PinMap {
    pub mosi: u8,
    pub sclk: u8,
    pub cs: u8,
    pub dc: u8,
    pub rst: u8,
    pub busy: u8,
    pub bs: u8,
    /// Power-enable pin; older boards have none.
    pub en: Option<u8>,
}

impl PinMap {
    /// `SET_PINS` payload: seven pin bytes plus `en` when present.
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(8);
        buf.put_slice(&[
            self.mosi, self.sclk, self.cs, self.dc, self.rst, self.busy, self.bs,
        ]);
        if let Some(en) = self.en {
            buf.put_u8(en);
        }
        buf.freeze()
    }

    /// Parse a `SET_PINS` payload (7 or 8 bytes).
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, EpdError> {
        match bytes {
            [mosi, sclk, cs, dc, rst, busy, bs, rest @ ..] if rest.len() <= 1 => Ok(Self {
                mosi: *mosi,
                sclk: *sclk,
                cs: *cs,
                dc: *dc,
                rst: *rst,
                busy: *busy,
                bs: *bs,
                en: rest.first().copied(),
            }),
            _ => Err(EpdError::InvalidArgument("pin map needs 7 or 8 bytes")),
        }
    }
}

/// Decoded configuration notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DeviceConfig {
    pub pins: PinMap,
    pub driver: u8,
    pub wakeup_pin: Option<u8>,
    pub led_pin: Option<u8>,
}

impl DeviceConfig {
    pub fn decode(bytes: &[u8]) -> Result<Self, EpdError> {
        if bytes.len() < MIN_CONFIG_LEN {
            return Err(EpdError::MalformedConfig { len: bytes.len() });
        }
        let at = |i: usize| bytes.get(i).copied();
        Ok(Self {
            pins: PinMap {
                mosi: bytes[0],
                sclk: bytes[1],
                cs: bytes[2],
                dc: bytes[3],
                rst: bytes[4],
                busy: bytes[5],
                bs: bytes[6],
                en: at(10),
            },
            driver: bytes[7],
            wakeup_pin: at(8),
            led_pin: at(9),
        })
    }

    pub fn pin_bytes(&self) -> Bytes {
        self.pins.to_bytes()
    }

    /// `SET_CONFIG` payload. Stops at the first absent optional field,
    /// since the firmware copies the struct prefix positionally.
    pub fn to_bytes(&self) -> Bytes {
        let p = &self.pins;
        let mut buf = BytesMut::with_capacity(CONFIG_LEN);
        buf.put_slice(&[p.mosi, p.sclk, p.cs, p.dc, p.rst, p.busy, p.bs, self.driver]);
        for byte in [self.wakeup_pin, self.led_pin, p.en]
            .into_iter()
            .map_while(|b| b)
        {
            buf.put_u8(byte);
        }
        buf.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: [u8; 11] = [0x0D, 0x0E, 0x0F, 0x10, 0x11, 0x12, 0x13, 0x02, 0x07, 0xFF, 0x14];

    #[test]
    fn decodes_full_struct() {
        let cfg = DeviceConfig::decode(&FULL).unwrap();
        assert_eq!(cfg.driver, 0x02);
        assert_eq!(cfg.pins.mosi, 0x0D);
        assert_eq!(cfg.pins.bs, 0x13);
        assert_eq!(cfg.pins.en, Some(0x14));
        assert_eq!(cfg.wakeup_pin, Some(0x07));
        assert_eq!(cfg.led_pin, Some(0xFF));
        assert_eq!(cfg.to_bytes().as_ref(), &FULL);
    }

    #[test]
    fn pin_bytes_include_enable_pin() {
        let cfg = DeviceConfig::decode(&FULL).unwrap();
        assert_eq!(
            cfg.pin_bytes().as_ref(),
            &[0x0D, 0x0E, 0x0F, 0x10, 0x11, 0x12, 0x13, 0x14]
        );
    }

    #[test]
    fn short_struct_has_no_optionals() {
        let cfg = DeviceConfig::decode(&FULL[..8]).unwrap();
        assert_eq!(cfg.pins.en, None);
        assert_eq!(cfg.wakeup_pin, None);
        assert_eq!(cfg.pin_bytes().len(), 7);
        assert_eq!(cfg.to_bytes().as_ref(), &FULL[..8]);
    }

    #[test]
    fn too_short_is_malformed() {
        assert!(matches!(
            DeviceConfig::decode(&FULL[..7]),
            Err(EpdError::MalformedConfig { len: 7 })
        ));
    }

    #[test]
    fn pin_map_parse() {
        let pins = PinMap::from_bytes(&FULL[..7]).unwrap();
        assert_eq!(pins.en, None);
        assert!(PinMap::from_bytes(&FULL[..6]).is_err());
        assert!(PinMap::from_bytes(&FULL[..9]).is_err());
    }
}
