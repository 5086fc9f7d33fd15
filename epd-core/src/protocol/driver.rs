//! Per-driver capability table.
//!
//! Panel controllers disagree on which RAM-write command takes which
//! plane, whether the red plane is active-low, and what `REFRESH`
//! parameter they need. Those differences live here so the transfer
//! path stays driver-agnostic.

use std::fmt;

use crate::raster::{DitherMode, Plane};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DriverProfile {
    /// Driver identifier byte, as stored in the device configuration.
    pub id: u8,
    pub panel: &'static str,
    /// RAM-write command for a monochrome image.
    pub bw_cmd: u8,
    /// RAM-write commands (black, red) for tri-color images. `None` on
    /// black/white-only panels.
    pub bwr_cmds: Option<(u8, u8)>,
    /// The controller expects the red plane complemented.
    pub invert_red: bool,
    /// Parameter byte sent with `REFRESH`.
    pub refresh_param: Option<u8>,
}

const KNOWN: [DriverProfile; 5] = [
    DriverProfile {
        id: 0x01,
        panel: "UC8176",
        bw_cmd: 0x13,
        bwr_cmds: None,
        invert_red: false,
        refresh_param: Some(0x01),
    },
    DriverProfile {
        id: 0x02,
        panel: "SSD1619",
        bw_cmd: 0x24,
        bwr_cmds: Some((0x24, 0x26)),
        invert_red: true,
        refresh_param: Some(0x03),
    },
    DriverProfile {
        id: 0x03,
        panel: "UC8176",
        bw_cmd: 0x13,
        bwr_cmds: Some((0x10, 0x13)),
        invert_red: false,
        refresh_param: Some(0x01),
    },
    DriverProfile {
        id: 0x04,
        panel: "SSD1619/SSD1683",
        bw_cmd: 0x24,
        bwr_cmds: None,
        invert_red: false,
        refresh_param: Some(0x03),
    },
    DriverProfile {
        id: 0x05,
        panel: "UC8276",
        bw_cmd: 0x13,
        bwr_cmds: Some((0x10, 0x13)),
        invert_red: true,
        refresh_param: Some(0x01),
    },
];

impl DriverProfile {
    /// Profile for `id`; unknown ids get a permissive generic profile.
    pub fn lookup(id: u8) -> Self {
        KNOWN
            .iter()
            .find(|p| p.id == id)
            .copied()
            .unwrap_or(Self::generic(id))
    }

    pub fn generic(id: u8) -> Self {
        Self {
            id,
            panel: "generic",
            bw_cmd: 0x13,
            bwr_cmds: Some((0x10, 0x13)),
            invert_red: false,
            refresh_param: None,
        }
    }

    pub fn is_known(&self) -> bool {
        KNOWN.iter().any(|p| p.id == self.id)
    }

    pub fn has_red(&self) -> bool {
        self.bwr_cmds.is_some()
    }

    pub fn supports(&self, mode: DitherMode) -> bool {
        !mode.is_tri_color() || self.has_red()
    }

    /// Legacy `SEND_CMD` byte for `plane` of an image drawn in `mode`.
    pub fn ram_command(&self, plane: Plane, mode: DitherMode) -> Option<u8> {
        match (mode.is_tri_color(), plane) {
            (false, Plane::Bw) => Some(self.bw_cmd),
            (false, Plane::Red) => None,
            (true, Plane::Bw) => self.bwr_cmds.map(|(bw, _)| bw),
            (true, Plane::Red) => self.bwr_cmds.map(|(_, red)| red),
        }
    }

    /// Dither modes this panel can display.
    pub fn modes(&self) -> impl Iterator<Item = DitherMode> + '_ {
        let all: &'static [DitherMode] = &DitherMode::ALL;
        all.iter().copied().filter(|m| self.supports(*m))
    }
}

impl fmt::Display for DriverProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let colors = if self.has_red() { "BWR" } else { "BW" };
        write!(f, "{:02x} {} ({colors})", self.id, self.panel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ssd1619_bwr_uses_24_26_and_inverts() {
        let p = DriverProfile::lookup(0x02);
        assert!(p.invert_red);
        assert_eq!(p.ram_command(Plane::Bw, DitherMode::TriColor), Some(0x24));
        assert_eq!(p.ram_command(Plane::Red, DitherMode::TriColor), Some(0x26));
        assert_eq!(p.refresh_param, Some(0x03));
    }

    #[test]
    fn mono_panels_reject_tri_color() {
        for id in [0x01, 0x04] {
            let p = DriverProfile::lookup(id);
            assert!(!p.supports(DitherMode::TriColorAtkinson));
            assert!(p.supports(DitherMode::Atkinson));
            assert_eq!(p.ram_command(Plane::Red, DitherMode::Threshold), None);
        }
        assert_eq!(
            DriverProfile::lookup(0x04).ram_command(Plane::Bw, DitherMode::Bayer),
            Some(0x24)
        );
    }

    #[test]
    fn uc8176_bwr_commands() {
        let p = DriverProfile::lookup(0x03);
        assert!(!p.invert_red);
        assert_eq!(p.ram_command(Plane::Bw, DitherMode::TriColor), Some(0x10));
        assert_eq!(p.ram_command(Plane::Red, DitherMode::TriColor), Some(0x13));
        assert_eq!(p.ram_command(Plane::Bw, DitherMode::Threshold), Some(0x13));
    }

    #[test]
    fn unknown_driver_is_generic() {
        let p = DriverProfile::lookup(0x7E);
        assert_eq!(p.id, 0x7E);
        assert!(!p.is_known());
        assert!(DriverProfile::lookup(0x02).is_known());
        assert!(p.supports(DitherMode::TriColor));
        assert_eq!(p.refresh_param, None);
        assert!(p.to_string().contains("generic"));
    }

    #[test]
    fn mode_lists() {
        assert_eq!(
            DriverProfile::lookup(0x01).modes().count(),
            DitherMode::ALL.iter().filter(|m| !m.is_tri_color()).count()
        );
        assert_eq!(DriverProfile::lookup(0x05).modes().count(), DitherMode::ALL.len());
    }
}
