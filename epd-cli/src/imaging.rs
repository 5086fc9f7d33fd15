//! Image file I/O around the encoder.

use std::path::{Path, PathBuf};

use image::imageops::FilterType;
use image::{DynamicImage, RgbaImage};

use epd_core::{EncodedImage, PixelBuffer};

/// Decode `path` and resize it to the panel resolution.
pub fn load(path: &Path, width: u32, height: u32) -> Result<PixelBuffer, Box<dyn std::error::Error>> {
    let img = image::open(path)?;
    Ok(fit(img, width, height)?)
}

/// Resize to exactly `width × height`, ignoring aspect ratio like the
/// panel canvas does.
pub fn fit(img: DynamicImage, width: u32, height: u32) -> Result<PixelBuffer, epd_core::EpdError> {
    let rgba = if img.width() == width && img.height() == height {
        img.into_rgba8()
    } else {
        img.resize_exact(width, height, FilterType::Triangle).into_rgba8()
    };
    PixelBuffer::new(width, height, rgba.into_raw())
}

/// Write the packed planes (`bw.bin`, `red.bin`) and a PNG preview of
/// the reduced raster to `dir`. Returns the files written.
pub fn write_outputs(
    dir: &Path,
    encoded: &EncodedImage,
    reduced: &PixelBuffer,
) -> Result<Vec<PathBuf>, Box<dyn std::error::Error>> {
    std::fs::create_dir_all(dir)?;
    let mut written = Vec::new();

    for plane in encoded.planes() {
        let path = dir.join(format!("{}.bin", plane.plane));
        std::fs::write(&path, &plane.bytes)?;
        written.push(path);
    }

    written.push(write_png(dir, "preview.png", reduced)?);
    Ok(written)
}

/// Save `pixels` as `dir/name`.
pub fn write_png(
    dir: &Path,
    name: &str,
    pixels: &PixelBuffer,
) -> Result<PathBuf, Box<dyn std::error::Error>> {
    std::fs::create_dir_all(dir)?;
    let img = RgbaImage::from_raw(pixels.width(), pixels.height(), pixels.as_bytes().to_vec())
        .ok_or("preview buffer size mismatch")?;
    let path = dir.join(name);
    img.save(&path)?;
    Ok(path)
}
