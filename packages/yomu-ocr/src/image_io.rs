//! Image acquisition: loading from disk, region cropping and preview scaling.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageReader};
use thiserror::Error;
use tracing::{debug, warn};

/// File extensions offered when walking directories or picking files.
pub const IMAGE_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "bmp", "tif", "tiff", "gif", "webp",
];

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("image file not found: {0}")]
    NotFound(PathBuf),
    #[error("image file is empty: {0}")]
    Empty(PathBuf),
    #[error("failed to decode {path} (by extension: {primary}; by content: {fallback})")]
    Decode {
        path: PathBuf,
        primary: String,
        fallback: String,
    },
    #[error("region {region} lies outside the {width}x{height} image")]
    RegionOutOfBounds {
        region: Roi,
        width: u32,
        height: u32,
    },
    #[error("failed to write {path}: {message}")]
    Encode { path: PathBuf, message: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Loads an image, first trusting the file extension and then sniffing the
/// file contents.
pub fn load_image(path: &Path) -> Result<DynamicImage, ImageError> {
    if !path.exists() {
        return Err(ImageError::NotFound(path.to_path_buf()));
    }

    let size = std::fs::metadata(path)?.len();
    if size == 0 {
        return Err(ImageError::Empty(path.to_path_buf()));
    }
    debug!("Loading image {} ({} bytes)", path.display(), size);

    let primary = match ImageReader::open(path)?.decode() {
        Ok(image) => {
            debug!("Decoded {} as {:?}", path.display(), image.color());
            return Ok(image);
        }
        Err(e) => e.to_string(),
    };

    warn!(
        "Decoding {} by extension failed ({}), retrying by content",
        path.display(),
        primary
    );
    let bytes = std::fs::read(path)?;
    image::load_from_memory(&bytes).map_err(|e| ImageError::Decode {
        path: path.to_path_buf(),
        primary,
        fallback: e.to_string(),
    })
}

/// Writes an image, choosing the encoder from the path's extension.
pub fn save_image(image: &DynamicImage, path: &Path) -> Result<(), ImageError> {
    image.save(path).map_err(|e| ImageError::Encode {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

pub fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Region of interest as `x,y,width,height` in source pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Roi {
    pub x: i64,
    pub y: i64,
    pub width: u32,
    pub height: u32,
}

impl fmt::Display for Roi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{},{}", self.x, self.y, self.width, self.height)
    }
}

impl FromStr for Roi {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(',').map(|p| p.trim()).collect();
        if parts.len() != 4 {
            return Err(format!("expected x,y,width,height but got '{}'", s));
        }
        let x = parts[0].parse().map_err(|_| format!("invalid x: {}", parts[0]))?;
        let y = parts[1].parse().map_err(|_| format!("invalid y: {}", parts[1]))?;
        let width = parts[2]
            .parse()
            .map_err(|_| format!("invalid width: {}", parts[2]))?;
        let height = parts[3]
            .parse()
            .map_err(|_| format!("invalid height: {}", parts[3]))?;
        Ok(Roi {
            x,
            y,
            width,
            height,
        })
    }
}

/// Crops `image` to `roi`, clamping the rectangle to the image bounds.
pub fn crop_to_region(image: &DynamicImage, roi: Roi) -> Result<DynamicImage, ImageError> {
    let (width, height) = image.dimensions();

    let x2 = roi.x.saturating_add(roi.width as i64).min(width as i64);
    let y2 = roi.y.saturating_add(roi.height as i64).min(height as i64);
    let x = roi.x.max(0);
    let y = roi.y.max(0);

    if x >= x2 || y >= y2 {
        return Err(ImageError::RegionOutOfBounds {
            region: roi,
            width,
            height,
        });
    }

    Ok(image.crop_imm(x as u32, y as u32, (x2 - x) as u32, (y2 - y) as u32))
}

/// Scales the image down so neither side exceeds `max_side`. Never upscales.
pub fn fit_within(image: &DynamicImage, max_side: u32) -> DynamicImage {
    let (width, height) = image.dimensions();
    if width <= max_side && height <= max_side {
        return image.clone();
    }
    image.resize(max_side, max_side, FilterType::Triangle)
}
