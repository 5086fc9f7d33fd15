//! `SET_TIME` payload.
//!
//! ```text
//! timestamp:   u32 BE  (4)   seconds since the Unix epoch
//! utc_offset:  i8      (1)   whole hours east of UTC
//! mode:        u8      (1)   0 = calendar, 1 = clock
//! ```

use std::time::{SystemTime, UNIX_EPOCH};

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::EpdError;

pub const SET_TIME_LEN: usize = 6;

/// What the panel shows after the clock is set.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ClockMode {
    #[default]
    Calendar = 0,
    Clock = 1,
}

impl TryFrom<u8> for ClockMode {
    type Error = EpdError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ClockMode::Calendar),
            1 => Ok(ClockMode::Clock),
            _ => Err(EpdError::UnknownVariant {
                type_name: "ClockMode",
                value: value as u64,
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeSync {
    pub timestamp: u32,
    pub utc_offset_hours: i8,
    pub mode: ClockMode,
}

impl TimeSync {
    /// Current wall-clock time. Timestamps past 2106 wrap to 32 bits.
    pub fn now(utc_offset_hours: i8, mode: ClockMode) -> Self {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Self {
            timestamp: secs as u32,
            utc_offset_hours,
            mode,
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(SET_TIME_LEN);
        buf.put_u32(self.timestamp);
        buf.put_i8(self.utc_offset_hours);
        buf.put_u8(self.mode as u8);
        buf.freeze()
    }
}
