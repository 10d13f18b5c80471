use std::io::Cursor;
use std::path::{Path, PathBuf};

use image::imageops::FilterType;
use image::metadata::Orientation;
use image::{DynamicImage, ImageDecoder, ImageFormat, ImageReader};

use super::error::DecodeError;

/// Bounding box for gallery listing previews.
pub const LISTING_BOUNDS: (u32, u32) = (300, 300);
/// Bounding box for the page viewer.
pub const FULL_VIEW_BOUNDS: (u32, u32) = (400, 400);

/// Decode, correct EXIF rotation and shrink to fit `bounds`.
pub fn to_displayable(bytes: &[u8], bounds: (u32, u32)) -> Result<DynamicImage, DecodeError> {
    let reader = reader(bytes)?;
    decode(reader, bounds)
}

/// Listing previews only accept JPEG and PNG.
pub fn to_listing_preview(bytes: &[u8]) -> Result<DynamicImage, DecodeError> {
    let reader = reader(bytes)?;

    match reader.format() {
        Some(ImageFormat::Jpeg) | Some(ImageFormat::Png) => decode(reader, LISTING_BOUNDS),
        _ => Err(DecodeError::UnsupportedFormat),
    }
}

pub fn load_displayable(path: &Path, bounds: (u32, u32)) -> Result<DynamicImage, DecodeError> {
    let bytes = std::fs::read(path).map_err(|source| DecodeError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    to_displayable(&bytes, bounds)
}

pub fn load_listing_preview(path: &Path) -> Result<DynamicImage, DecodeError> {
    let bytes = std::fs::read(path).map_err(|source| DecodeError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    to_listing_preview(&bytes)
}

/// Render `source` as a listing-size JPEG at `dest`.
pub fn write_thumbnail(source: &Path, dest: &Path) -> Result<(), DecodeError> {
    let preview = load_listing_preview(source)?;

    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent).map_err(|source| DecodeError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    DynamicImage::ImageRgb8(preview.to_rgb8()).save_with_format(dest, ImageFormat::Jpeg)?;
    Ok(())
}

fn reader(bytes: &[u8]) -> Result<ImageReader<Cursor<&[u8]>>, DecodeError> {
    ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|source| DecodeError::Io {
            path: PathBuf::from("<memory>"),
            source,
        })
}

fn decode(
    reader: ImageReader<Cursor<&[u8]>>,
    bounds: (u32, u32),
) -> Result<DynamicImage, DecodeError> {
    let mut decoder = reader.into_decoder()?;
    let orientation = decoder.orientation().unwrap_or_else(|e| {
        log::warn!("Error reading EXIF data: {}", e);
        Orientation::NoTransforms
    });
    let image = DynamicImage::from_decoder(decoder)?;

    Ok(fit_within(correct_orientation(image, orientation), bounds))
}

/// Only the pure rotations (EXIF 3, 6 and 8) are corrected.
fn correct_orientation(image: DynamicImage, orientation: Orientation) -> DynamicImage {
    match orientation {
        Orientation::Rotate180 => image.rotate180(),
        Orientation::Rotate90 => image.rotate90(),
        Orientation::Rotate270 => image.rotate270(),
        _ => image,
    }
}

/// Shrinks to fit, keeping aspect ratio. Never enlarges.
fn fit_within(image: DynamicImage, (max_w, max_h): (u32, u32)) -> DynamicImage {
    if image.width() <= max_w && image.height() <= max_h {
        return image;
    }
    image.resize(max_w, max_h, FilterType::Lanczos3)
}
