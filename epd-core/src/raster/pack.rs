//! Bit packing of reduced rasters into the panel's native plane layout.
//!
//! One bit per pixel, row-major, most significant bit first. A `0` bit
//! marks an "ink" pixel (black in the `bw` plane, red in the `red`
//! plane); everything else is `1`. A trailing partial byte is padded
//! with `1` bits.

use std::fmt;

use bytes::Bytes;

use crate::raster::types::{PixelBuffer, Rgb};

// ── Plane ────────────────────────────────────────────────────────

/// Which color plane a packed byte sequence represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Plane {
    /// Black/white plane.
    Bw,
    /// Red plane of tri-color panels.
    Red,
}

impl Plane {
    /// The palette color that packs to a `0` bit in this plane.
    pub fn ink(self) -> Rgb {
        match self {
            Plane::Bw => Rgb::BLACK,
            Plane::Red => Rgb::RED,
        }
    }
}

impl fmt::Display for Plane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Plane::Bw => write!(f, "bw"),
            Plane::Red => write!(f, "red"),
        }
    }
}

// ── EncodedPlane ─────────────────────────────────────────────────

/// A bit-packed color plane ready for transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedPlane {
    pub plane: Plane,
    pub bytes: Bytes,
}

impl EncodedPlane {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// The same plane with every byte complemented.
    pub fn inverted(&self) -> EncodedPlane {
        EncodedPlane {
            plane: self.plane,
            bytes: self.bytes.iter().map(|b| !b).collect(),
        }
    }

    /// Number of `1` bits across the whole plane (padding included).
    pub fn ones(&self) -> u32 {
        self.bytes.iter().map(|b| b.count_ones()).sum()
    }
}

/// Number of bytes a plane of `pixel_count` pixels occupies.
pub fn packed_len(pixel_count: usize) -> usize {
    pixel_count.div_ceil(8)
}

// ── pack ─────────────────────────────────────────────────────────

/// Pack `pixels` into `plane`, complementing every byte when `invert`
/// is set (some panel revisions expect an inverted red plane).
pub fn pack(pixels: &PixelBuffer, plane: Plane, invert: bool) -> EncodedPlane {
    let ink = plane.ink();
    let mut out = Vec::with_capacity(packed_len(pixels.pixel_count()));
    let mut acc: u8 = 0;
    let mut filled = 0u32;

    let mut emit = |byte: u8| out.push(if invert { !byte } else { byte });

    for color in pixels.pixels() {
        acc = (acc << 1) | (color != ink) as u8;
        filled += 1;
        if filled == 8 {
            emit(acc);
            acc = 0;
            filled = 0;
        }
    }

    if filled > 0 {
        let pad = 8 - filled;
        emit((acc << pad) | ((1u8 << pad) - 1));
    }

    EncodedPlane {
        plane,
        bytes: Bytes::from(out),
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_pixel_is_msb() {
        let mut buf = PixelBuffer::filled(8, 1, Rgb::WHITE).unwrap();
        buf.put_pixel(0, 0, Rgb::BLACK);
        let p = pack(&buf, Plane::Bw, false);
        assert_eq!(p.bytes.as_ref(), &[0x7F]);
    }

    #[test]
    fn partial_byte_padded_with_ones() {
        let buf = PixelBuffer::filled(3, 1, Rgb::BLACK).unwrap();
        let p = pack(&buf, Plane::Bw, false);
        assert_eq!(p.bytes.as_ref(), &[0b0001_1111]);
    }

    #[test]
    fn red_plane_marks_red_only() {
        let mut buf = PixelBuffer::filled(8, 1, Rgb::WHITE).unwrap();
        buf.put_pixel(1, 0, Rgb::RED);
        buf.put_pixel(2, 0, Rgb::BLACK);
        assert_eq!(pack(&buf, Plane::Red, false).bytes.as_ref(), &[0b1011_1111]);
        assert_eq!(pack(&buf, Plane::Bw, false).bytes.as_ref(), &[0b1101_1111]);
    }

    #[test]
    fn invert_complements_bytes() {
        let mut buf = PixelBuffer::filled(10, 1, Rgb::WHITE).unwrap();
        buf.put_pixel(9, 0, Rgb::RED);
        let plain = pack(&buf, Plane::Red, false);
        let inverted = pack(&buf, Plane::Red, true);
        assert_eq!(plain.bytes.as_ref(), &[0xFF, 0b1011_1111]);
        assert_eq!(inverted.bytes.as_ref(), &[0x00, 0b0100_0000]);
        assert_eq!(plain.inverted(), inverted);
    }

    #[test]
    fn light_image_packs_all_ones() {
        let buf = PixelBuffer::filled(16, 2, Rgb::WHITE).unwrap();
        let p = pack(&buf, Plane::Bw, false);
        assert_eq!(p.len(), 4);
        assert!(p.bytes.iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn packed_len_rounds_up() {
        assert_eq!(packed_len(400 * 300), 15_000);
        assert_eq!(packed_len(9), 2);
        assert_eq!(packed_len(8), 1);
    }
}
