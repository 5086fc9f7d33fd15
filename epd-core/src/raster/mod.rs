//! # raster: image to bitstream encoder
//!
//! ```text
//! PixelBuffer (RGBA8) ──► dither ──► pack(bw) ──► EncodedPlane
//!                                └─► pack(red) ─► EncodedPlane   (tri-color only)
//! ```
//!
//! | Module   | Purpose                                        |
//! |----------|------------------------------------------------|
//! | `types`  | `PixelBuffer`, `Rgb`, `Palette`                |
//! | `dither` | Threshold, Bayer and error-diffusion reduction |
//! | `pack`   | 1-bpp MSB-first plane packing                  |

pub mod dither;
pub mod pack;
pub mod types;

pub use dither::{DEFAULT_THRESHOLD, DitherMode, dither, posterize_gray};
pub use pack::{EncodedPlane, Plane, pack, packed_len};
pub use types::{CHANNELS, Palette, PixelBuffer, Rgb};

use crate::error::EpdError;
use crate::protocol::driver::DriverProfile;

/// The planes produced for one image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    pub mode: DitherMode,
    pub width: u32,
    pub height: u32,
    pub bw: EncodedPlane,
    /// Present only for tri-color modes.
    pub red: Option<EncodedPlane>,
}

impl EncodedImage {
    /// Planes in transmission order.
    pub fn planes(&self) -> impl Iterator<Item = &EncodedPlane> {
        std::iter::once(&self.bw).chain(self.red.as_ref())
    }

    pub fn is_tri_color(&self) -> bool {
        self.red.is_some()
    }

    /// Total payload bytes across all planes.
    pub fn payload_len(&self) -> usize {
        self.planes().map(EncodedPlane::len).sum()
    }
}

/// Dither and pack `pixels`.
///
/// Planes are produced in their canonical polarity; a driver that wants
/// the red plane complemented gets it inverted on the legacy transfer
/// path (see [`EncodedPlane::inverted`]).
pub fn encode_image(pixels: &PixelBuffer, mode: DitherMode, threshold: Option<u8>) -> EncodedImage {
    let reduced = dither(pixels, mode, threshold);
    let bw = pack(&reduced, Plane::Bw, false);
    let red = mode
        .is_tri_color()
        .then(|| pack(&reduced, Plane::Red, false));
    tracing::debug!(
        mode = %mode,
        width = pixels.width(),
        height = pixels.height(),
        bytes = bw.len() + red.as_ref().map_or(0, EncodedPlane::len),
        "encoded image"
    );
    EncodedImage {
        mode,
        width: pixels.width(),
        height: pixels.height(),
        bw,
        red,
    }
}

/// Like [`encode_image`], but rejects modes the panel cannot show.
pub fn encode_image_for(
    pixels: &PixelBuffer,
    mode: DitherMode,
    threshold: Option<u8>,
    profile: &DriverProfile,
) -> Result<EncodedImage, EpdError> {
    if !profile.supports(mode) {
        return Err(EpdError::InvalidArgument(
            "dither mode not supported by this panel driver",
        ));
    }
    Ok(encode_image(pixels, mode, threshold))
}
