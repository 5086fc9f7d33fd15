//! Shared pixel and palette types used across the encoding pipeline.

use crate::error::EpdError;

/// Bytes per pixel in a [`PixelBuffer`] (R, G, B, A).
pub const CHANNELS: usize = 4;

// ── Rgb ──────────────────────────────────────────────────────────

/// An opaque 8-bit RGB color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const BLACK: Rgb = Rgb::new(0, 0, 0);
    pub const WHITE: Rgb = Rgb::new(255, 255, 255);
    pub const RED: Rgb = Rgb::new(255, 0, 0);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    pub const fn gray(v: u8) -> Self {
        Self { r: v, g: v, b: v }
    }

    /// Rec. 601 luma, floored to an integer level.
    pub fn luminance(self) -> u8 {
        let y = self.r as f64 * 0.299 + self.g as f64 * 0.587 + self.b as f64 * 0.114;
        y.floor() as u8
    }
}

// ── Palette ──────────────────────────────────────────────────────

/// The fixed set of colors a panel can show.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Palette {
    entries: &'static [Rgb],
}

impl Palette {
    /// Black and white panels.
    pub const MONOCHROME: Palette = Palette {
        entries: &[Rgb::BLACK, Rgb::WHITE],
    };

    /// Black, white and red panels.
    pub const TRI_COLOR: Palette = Palette {
        entries: &[Rgb::BLACK, Rgb::WHITE, Rgb::RED],
    };

    pub fn contains(&self, color: Rgb) -> bool {
        self.entries.contains(&color)
    }

    /// Closest palette entry under the "redmean" weighted distance.
    ///
    /// The red and blue weights shift with the mean red level of the two
    /// colors, which pulls warm tones toward the red entry far more than a
    /// plain RGB distance would. Ties resolve to the earlier entry.
    pub fn nearest(&self, color: [i32; 3]) -> Rgb {
        let mut best = self.entries[0];
        let mut best_distance = f64::INFINITY;
        for &entry in self.entries {
            let d = redmean_distance(color, entry);
            if d < best_distance {
                best_distance = d;
                best = entry;
            }
        }
        best
    }
}

/// Squared redmean distance (the square root is irrelevant for ranking).
fn redmean_distance(c: [i32; 3], p: Rgb) -> f64 {
    let rm = (c[0] + p.r as i32) as f64 / 2.0;
    let r = (c[0] - p.r as i32) as f64;
    let g = (c[1] - p.g as i32) as f64;
    let b = (c[2] - p.b as i32) as f64;
    (2.0 + rm / 256.0) * r * r + 4.0 * g * g + (2.0 + (255.0 - rm) / 256.0) * b * b
}

// ── PixelBuffer ──────────────────────────────────────────────────

/// Row-major RGBA8 raster sized to the target panel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl PixelBuffer {
    /// Wrap raw RGBA bytes, checking the length against the dimensions.
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Result<Self, EpdError> {
        let expected = width as usize * height as usize * CHANNELS;
        if width == 0 || height == 0 || data.len() != expected {
            return Err(EpdError::InvalidDimensions {
                width,
                height,
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// A buffer where every pixel is `color` with full opacity.
    pub fn filled(width: u32, height: u32, color: Rgb) -> Result<Self, EpdError> {
        let count = width as usize * height as usize;
        let mut data = Vec::with_capacity(count * CHANNELS);
        for _ in 0..count {
            data.extend_from_slice(&[color.r, color.g, color.b, 0xFF]);
        }
        Self::new(width, height, data)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// Color of the pixel at row-major index `idx`.
    pub fn rgb(&self, idx: usize) -> Rgb {
        let o = idx * CHANNELS;
        Rgb::new(self.data[o], self.data[o + 1], self.data[o + 2])
    }

    pub fn set_rgb(&mut self, idx: usize, color: Rgb) {
        let o = idx * CHANNELS;
        self.data[o] = color.r;
        self.data[o + 1] = color.g;
        self.data[o + 2] = color.b;
    }

    pub fn put_pixel(&mut self, x: u32, y: u32, color: Rgb) {
        let idx = y as usize * self.width as usize + x as usize;
        self.set_rgb(idx, color);
    }

    /// Iterate pixel colors in row-major order.
    pub fn pixels(&self) -> impl Iterator<Item = Rgb> + '_ {
        self.data
            .chunks_exact(CHANNELS)
            .map(|p| Rgb::new(p[0], p[1], p[2]))
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_mismatched_length() {
        let err = PixelBuffer::new(4, 4, vec![0; 10]).unwrap_err();
        assert!(matches!(
            err,
            EpdError::InvalidDimensions {
                expected: 64,
                actual: 10,
                ..
            }
        ));
    }

    #[test]
    fn rejects_zero_dimensions() {
        assert!(PixelBuffer::new(0, 4, Vec::new()).is_err());
    }

    #[test]
    fn luminance_floors() {
        // 128 * (0.299 + 0.587 + 0.114) lands a hair under 128.0 in f64.
        assert_eq!(Rgb::gray(128).luminance(), 127);
        assert_eq!(Rgb::WHITE.luminance(), 255);
        assert_eq!(Rgb::BLACK.luminance(), 0);
        assert_eq!(Rgb::gray(200).luminance(), 200);
    }

    #[test]
    fn nearest_prefers_red_for_warm_tones() {
        assert_eq!(Palette::TRI_COLOR.nearest([200, 60, 60]), Rgb::RED);
        assert_eq!(Palette::TRI_COLOR.nearest([140, 20, 20]), Rgb::RED);
        assert_eq!(Palette::TRI_COLOR.nearest([128, 128, 128]), Rgb::WHITE);
        assert_eq!(Palette::TRI_COLOR.nearest([10, 10, 10]), Rgb::BLACK);
    }

    #[test]
    fn monochrome_never_picks_red() {
        assert_eq!(Palette::MONOCHROME.nearest([255, 0, 0]), Rgb::BLACK);
        assert!(!Palette::MONOCHROME.contains(Rgb::RED));
    }

    #[test]
    fn filled_and_put_pixel() {
        let mut buf = PixelBuffer::filled(3, 2, Rgb::WHITE).unwrap();
        buf.put_pixel(2, 1, Rgb::RED);
        assert_eq!(buf.rgb(5), Rgb::RED);
        assert_eq!(buf.pixels().filter(|&c| c == Rgb::WHITE).count(), 5);
        assert_eq!(buf.as_bytes()[3], 0xFF);
    }
}
