//! Color-depth reduction for e-paper panels.
//!
//! Converts an RGBA [`PixelBuffer`] into one whose RGB channels are all
//! palette entries. Monochrome modes work on a floored Rec. 601 gray
//! level; tri-color modes pick the nearest of black, white and red.
//!
//! Error diffusion walks the raster strictly row-major and clamps every
//! neighbor write to `0..=255`, so results are reproducible bit for bit.
//! Diffusion taps that would land outside the canvas are skipped, never
//! wrapped onto the next row.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::EpdError;
use crate::raster::types::{Palette, PixelBuffer, Rgb};

/// Threshold used when the caller does not supply one.
pub const DEFAULT_THRESHOLD: u8 = 125;

/// 4×4 ordered-dither matrix, indexed `[x % 4][y % 4]`.
const BAYER_4X4: [[i32; 4]; 4] = [
    [15, 135, 45, 165],
    [195, 75, 225, 105],
    [60, 180, 30, 150],
    [240, 120, 210, 90],
];

// ── DitherMode ───────────────────────────────────────────────────

/// Reduction algorithm. String names match what the front-ends send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DitherMode {
    /// Plain luminance threshold.
    #[serde(rename = "none")]
    Threshold,
    /// 4×4 ordered dither.
    #[serde(rename = "bayer")]
    Bayer,
    /// Floyd-Steinberg error diffusion.
    #[serde(rename = "floydsteinberg")]
    FloydSteinberg,
    /// Atkinson error diffusion (75% of the error is propagated).
    #[serde(rename = "Atkinson", alias = "atkinson")]
    Atkinson,
    /// Nearest of black/white/red, no diffusion.
    #[serde(rename = "bwr", alias = "bwr_none")]
    TriColor,
    /// Tri-color with Floyd-Steinberg diffusion of the RGB residual.
    #[serde(rename = "bwr_floydsteinberg")]
    TriColorFloydSteinberg,
    /// Tri-color with Atkinson diffusion of the RGB residual.
    #[serde(rename = "bwr_Atkinson", alias = "bwr_atkinson")]
    TriColorAtkinson,
}

impl DitherMode {
    pub const ALL: [DitherMode; 7] = [
        DitherMode::Threshold,
        DitherMode::Bayer,
        DitherMode::FloydSteinberg,
        DitherMode::Atkinson,
        DitherMode::TriColor,
        DitherMode::TriColorFloydSteinberg,
        DitherMode::TriColorAtkinson,
    ];

    /// Whether this mode produces a red plane.
    pub fn is_tri_color(self) -> bool {
        matches!(
            self,
            Self::TriColor | Self::TriColorFloydSteinberg | Self::TriColorAtkinson
        )
    }

    pub fn palette(self) -> Palette {
        if self.is_tri_color() {
            Palette::TRI_COLOR
        } else {
            Palette::MONOCHROME
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Threshold => "none",
            Self::Bayer => "bayer",
            Self::FloydSteinberg => "floydsteinberg",
            Self::Atkinson => "Atkinson",
            Self::TriColor => "bwr",
            Self::TriColorFloydSteinberg => "bwr_floydsteinberg",
            Self::TriColorAtkinson => "bwr_Atkinson",
        }
    }

    fn kernel(self) -> Option<&'static Kernel> {
        match self {
            Self::FloydSteinberg | Self::TriColorFloydSteinberg => Some(&FLOYD_STEINBERG),
            Self::Atkinson | Self::TriColorAtkinson => Some(&ATKINSON),
            _ => None,
        }
    }
}

impl fmt::Display for DitherMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DitherMode {
    type Err = EpdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        match lower.as_str() {
            "none" => Ok(Self::Threshold),
            "bayer" => Ok(Self::Bayer),
            "floydsteinberg" => Ok(Self::FloydSteinberg),
            "atkinson" => Ok(Self::Atkinson),
            "bwr" | "bwr_none" => Ok(Self::TriColor),
            "bwr_floydsteinberg" => Ok(Self::TriColorFloydSteinberg),
            "bwr_atkinson" => Ok(Self::TriColorAtkinson),
            _ => Err(EpdError::UnknownDitherMode(s.to_string())),
        }
    }
}

// ── Diffusion kernels ────────────────────────────────────────────

/// One neighbor that receives `weight` shares of the quantization error.
struct Tap {
    dx: i64,
    dy: i64,
    weight: i32,
}

struct Kernel {
    divisor: i32,
    taps: &'static [Tap],
}

const FLOYD_STEINBERG: Kernel = Kernel {
    divisor: 16,
    taps: &[
        Tap { dx: 1, dy: 0, weight: 7 },
        Tap { dx: -1, dy: 1, weight: 3 },
        Tap { dx: 0, dy: 1, weight: 5 },
        Tap { dx: 1, dy: 1, weight: 1 },
    ],
};

const ATKINSON: Kernel = Kernel {
    divisor: 8,
    taps: &[
        Tap { dx: 1, dy: 0, weight: 1 },
        Tap { dx: 2, dy: 0, weight: 1 },
        Tap { dx: -1, dy: 1, weight: 1 },
        Tap { dx: 0, dy: 1, weight: 1 },
        Tap { dx: 1, dy: 1, weight: 1 },
        Tap { dx: 0, dy: 2, weight: 1 },
    ],
};

impl Kernel {
    /// Row-major indices of the in-bounds neighbors of `(x, y)`.
    fn targets(
        &self,
        x: usize,
        y: usize,
        width: usize,
        height: usize,
    ) -> impl Iterator<Item = (usize, i32)> + '_ {
        self.taps.iter().filter_map(move |tap| {
            let tx = x as i64 + tap.dx;
            let ty = y as i64 + tap.dy;
            if tx < 0 || tx >= width as i64 || ty >= height as i64 {
                return None;
            }
            Some((ty as usize * width + tx as usize, tap.weight))
        })
    }

    /// Floor division, matching how the residual is split on the device side.
    fn share(&self, residual: i32) -> i32 {
        residual.div_euclid(self.divisor)
    }
}

fn clamp_level(v: i32) -> i32 {
    v.clamp(0, 255)
}

// ── dither ───────────────────────────────────────────────────────

/// Reduce `pixels` to the palette of `mode`.
///
/// `threshold` only affects the monochrome modes and defaults to
/// [`DEFAULT_THRESHOLD`]. The alpha channel is passed through untouched.
pub fn dither(pixels: &PixelBuffer, mode: DitherMode, threshold: Option<u8>) -> PixelBuffer {
    let threshold = threshold.unwrap_or(DEFAULT_THRESHOLD) as i32;
    let mut out = pixels.clone();
    if mode.is_tri_color() {
        dither_tri_color(&mut out, mode);
    } else {
        dither_monochrome(&mut out, mode, threshold);
    }
    out
}

/// Quantize the gray level of every pixel to `levels` evenly spaced steps.
///
/// Preview only: the result is not in any panel palette and is never
/// packed. Needs at least two levels.
pub fn posterize_gray(pixels: &PixelBuffer, levels: u8) -> Result<PixelBuffer, EpdError> {
    if levels < 2 {
        return Err(EpdError::InvalidArgument("gray preview needs at least 2 levels"));
    }
    let step = 255.0 / (levels - 1) as f64;
    let mut out = pixels.clone();
    for idx in 0..out.pixel_count() {
        let gray = out.rgb(idx).luminance() as f64;
        let level = ((gray / step).round() * step).round().min(255.0) as u8;
        out.set_rgb(idx, Rgb::gray(level));
    }
    Ok(out)
}

fn dither_monochrome(buf: &mut PixelBuffer, mode: DitherMode, threshold: i32) {
    let width = buf.width() as usize;
    let height = buf.height() as usize;
    let mut levels: Vec<i32> = buf.pixels().map(|c| c.luminance() as i32).collect();
    let quantize = |v: i32| if v < threshold { 0 } else { 255 };

    for idx in 0..levels.len() {
        let (x, y) = (idx % width, idx / width);
        let old = levels[idx];
        let new = match mode {
            DitherMode::Bayer => quantize((old + BAYER_4X4[x % 4][y % 4]) / 2),
            _ => quantize(old),
        };
        levels[idx] = new;

        if let Some(kernel) = mode.kernel() {
            let err = kernel.share(old - new);
            for (target, weight) in kernel.targets(x, y, width, height) {
                levels[target] = clamp_level(levels[target] + err * weight);
            }
        }
    }

    for (idx, level) in levels.into_iter().enumerate() {
        buf.set_rgb(idx, Rgb::gray(level as u8));
    }
}

fn dither_tri_color(buf: &mut PixelBuffer, mode: DitherMode) {
    let width = buf.width() as usize;
    let height = buf.height() as usize;
    let palette = mode.palette();
    let mut work: Vec<[i32; 3]> = buf
        .pixels()
        .map(|c| [c.r as i32, c.g as i32, c.b as i32])
        .collect();

    for idx in 0..work.len() {
        let current = work[idx];
        let chosen = palette.nearest(current);
        buf.set_rgb(idx, chosen);

        let Some(kernel) = mode.kernel() else {
            continue;
        };
        let target_rgb = [chosen.r as i32, chosen.g as i32, chosen.b as i32];
        let err: [i32; 3] = std::array::from_fn(|c| kernel.share(current[c] - target_rgb[c]));
        let (x, y) = (idx % width, idx / width);
        for (target, weight) in kernel.targets(x, y, width, height) {
            for c in 0..3 {
                work[target][c] = clamp_level(work[target][c] + err[c] * weight);
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
