//! Fixed filter chains that make text easier for the recognizer to read.
//!
//! Every chain starts by converting to 8-bit grayscale and then applies its
//! stages in order. Stages are stateless and deterministic, so the same input
//! and parameters always give byte-identical output.

use std::fmt;
use std::str::FromStr;

use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, Luma};
use imageproc::distance_transform::Norm;
use imageproc::filter::{gaussian_blur_f32, median_filter};
use imageproc::morphology::close;
use thiserror::Error;
use tracing::{debug, trace, warn};

#[derive(Debug, Error)]
pub enum PreprocessError {
    #[error("invalid {stage} parameters: {message}")]
    InvalidParameters {
        stage: &'static str,
        message: String,
    },
}

/// Largest buffer the upscale stage will allocate, in pixels.
pub const MAX_UPSCALED_PIXELS: u64 = 128 * 1024 * 1024;

fn invalid(stage: &'static str, message: impl Into<String>) -> PreprocessError {
    PreprocessError::InvalidParameters {
        stage,
        message: message.into(),
    }
}

/// A single transform applied to a grayscale buffer.
#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    /// Median filter with the given radius.
    Denoise { radius: u32 },
    /// Contrast limited adaptive histogram equalization over a `grid`x`grid`
    /// tile layout.
    Clahe { clip_limit: f32, grid: u32 },
    GaussianBlur { sigma: f32 },
    /// Pixel is white when it exceeds the Gaussian-weighted mean of its
    /// `block_size` neighbourhood minus `offset`.
    AdaptiveThreshold { block_size: u32, offset: i32 },
    OtsuThreshold,
    /// Morphological closing (dilate then erode) with an L-infinity kernel.
    Close { radius: u8 },
    /// Cubic resampling by `factor` on both axes.
    Upscale { factor: f32 },
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Denoise { .. } => "denoise",
            Stage::Clahe { .. } => "clahe",
            Stage::GaussianBlur { .. } => "gaussian-blur",
            Stage::AdaptiveThreshold { .. } => "adaptive-threshold",
            Stage::OtsuThreshold => "otsu-threshold",
            Stage::Close { .. } => "close",
            Stage::Upscale { .. } => "upscale",
        }
    }

    fn apply(&self, image: &GrayImage) -> Result<GrayImage, PreprocessError> {
        match *self {
            Stage::Denoise { radius } => Ok(median_filter(image, radius, radius)),
            Stage::Clahe { clip_limit, grid } => clahe(image, clip_limit, grid),
            Stage::GaussianBlur { sigma } => {
                if !(sigma > 0.0) {
                    return Err(invalid(self.name(), format!("sigma must be positive, got {}", sigma)));
                }
                Ok(gaussian_blur_f32(image, sigma))
            }
            Stage::AdaptiveThreshold { block_size, offset } => {
                adaptive_threshold(image, block_size, offset)
            }
            Stage::OtsuThreshold => {
                let level = imageproc::contrast::otsu_level(image);
                trace!("Otsu level {}", level);
                Ok(binarize(image, |_, _, value| value > level))
            }
            Stage::Close { radius } => Ok(close(image, Norm::LInf, radius)),
            Stage::Upscale { factor } => upscale(image, factor),
        }
    }
}

/// Binarization choice for the simple chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Binarize {
    #[default]
    None,
    Otsu,
    Adaptive,
}

impl FromStr for Binarize {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "off" => Ok(Binarize::None),
            "otsu" => Ok(Binarize::Otsu),
            "adaptive" => Ok(Binarize::Adaptive),
            other => Err(format!("unknown threshold method '{}' (none, otsu, adaptive)", other)),
        }
    }
}

impl fmt::Display for Binarize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Binarize::None => "none",
            Binarize::Otsu => "otsu",
            Binarize::Adaptive => "adaptive",
        };
        f.write_str(name)
    }
}

/// Knobs of the simple chain used by batch reads.
#[derive(Debug, Clone, PartialEq)]
pub struct SimpleOptions {
    /// Gaussian kernel size; even sizes are bumped to the next odd one and 1
    /// disables the blur.
    pub blur_kernel: u32,
    /// Resize factor; 1.0 or non-positive disables resizing.
    pub scale: f32,
    pub binarize: Binarize,
}

impl Default for SimpleOptions {
    fn default() -> Self {
        Self {
            blur_kernel: 3,
            scale: 2.0,
            binarize: Binarize::None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

impl Pipeline {
    pub fn new(stages: Vec<Stage>) -> Self {
        Self { stages }
    }

    /// The chain used before interactive recognition.
    pub fn enhanced() -> Self {
        Self::new(vec![
            Stage::Denoise { radius: 1 },
            Stage::Clahe {
                clip_limit: 3.0,
                grid: 8,
            },
            Stage::GaussianBlur { sigma: 0.5 },
            Stage::AdaptiveThreshold {
                block_size: 11,
                offset: 2,
            },
            Stage::Close { radius: 1 },
            Stage::Upscale { factor: 2.0 },
        ])
    }

    /// The lighter chain used by batch reads.
    pub fn simple(options: &SimpleOptions) -> Self {
        let mut stages = Vec::new();

        let kernel = ensure_odd(options.blur_kernel);
        if kernel > 1 {
            stages.push(Stage::GaussianBlur {
                sigma: kernel_sigma(kernel),
            });
        }

        if options.scale > 0.0 && options.scale != 1.0 {
            stages.push(Stage::Upscale {
                factor: options.scale,
            });
        }

        match options.binarize {
            Binarize::None => {}
            Binarize::Otsu => stages.push(Stage::OtsuThreshold),
            Binarize::Adaptive => stages.push(Stage::AdaptiveThreshold {
                block_size: 31,
                offset: 5,
            }),
        }

        Self::new(stages)
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn run(&self, image: &DynamicImage) -> Result<GrayImage, PreprocessError> {
        let mut current = image.to_luma8();
        debug!(
            "Preprocessing {}x{} image through {} stages",
            current.width(),
            current.height(),
            self.stages.len()
        );

        for stage in &self.stages {
            current = stage.apply(&current)?;
            trace!(
                "Stage {} -> {}x{}",
                stage.name(),
                current.width(),
                current.height()
            );
        }

        Ok(current)
    }

    /// Runs the chain, falling back to the untouched image when a stage fails.
    pub fn apply_or_original(&self, image: &DynamicImage) -> DynamicImage {
        match self.run(image) {
            Ok(processed) => DynamicImage::ImageLuma8(processed),
            Err(e) => {
                warn!("Preprocessing failed, using the original image: {}", e);
                image.clone()
            }
        }
    }
}

pub fn ensure_odd(n: u32) -> u32 {
    if n % 2 == 1 {
        n
    } else {
        n + 1
    }
}

/// Sigma that a Gaussian kernel of `size` taps implies when none is given.
fn kernel_sigma(size: u32) -> f32 {
    0.3 * ((size as f32 - 1.0) * 0.5 - 1.0) + 0.8
}

fn binarize(image: &GrayImage, keep: impl Fn(u32, u32, u8) -> bool) -> GrayImage {
    GrayImage::from_fn(image.width(), image.height(), |x, y| {
        let value = image.get_pixel(x, y)[0];
        Luma([if keep(x, y, value) { 255 } else { 0 }])
    })
}

fn adaptive_threshold(
    image: &GrayImage,
    block_size: u32,
    offset: i32,
) -> Result<GrayImage, PreprocessError> {
    if block_size < 3 || block_size % 2 == 0 {
        return Err(invalid(
            "adaptive-threshold",
            format!("block size must be odd and at least 3, got {}", block_size),
        ));
    }

    let local_mean = gaussian_blur_f32(image, kernel_sigma(block_size));
    Ok(binarize(image, |x, y, value| {
        value as i32 > local_mean.get_pixel(x, y)[0] as i32 - offset
    }))
}

fn upscale(image: &GrayImage, factor: f32) -> Result<GrayImage, PreprocessError> {
    if !(factor > 0.0) || !factor.is_finite() {
        return Err(invalid("upscale", format!("factor must be positive, got {}", factor)));
    }

    let width = (image.width() as f64 * factor as f64).max(1.0);
    let height = (image.height() as f64 * factor as f64).max(1.0);
    if width * height > MAX_UPSCALED_PIXELS as f64 {
        return Err(invalid(
            "upscale",
            format!(
                "factor {} gives {:.0}x{:.0}, over the {} pixel limit",
                factor, width, height, MAX_UPSCALED_PIXELS
            ),
        ));
    }

    let (width, height) = (width as u32, height as u32);
    Ok(image::imageops::resize(
        image,
        width,
        height,
        FilterType::CatmullRom,
    ))
}

/// Contrast limited adaptive histogram equalization.
///
/// The image is split into a `grid`x`grid` layout of tiles. Each tile gets a
/// clipped, equalized lookup table, and every pixel blends the tables of the
/// four nearest tile centres bilinearly.
fn clahe(image: &GrayImage, clip_limit: f32, grid: u32) -> Result<GrayImage, PreprocessError> {
    if grid == 0 || !(clip_limit > 0.0) {
        return Err(invalid(
            "clahe",
            format!("clip limit {} / grid {}", clip_limit, grid),
        ));
    }

    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Ok(image.clone());
    }

    let tile_w = width.div_ceil(grid.min(width));
    let tile_h = height.div_ceil(grid.min(height));
    let tiles_x = width.div_ceil(tile_w) as usize;
    let tiles_y = height.div_ceil(tile_h) as usize;

    let mut luts = Vec::with_capacity(tiles_x * tiles_y);
    for ty in 0..tiles_y as u32 {
        for tx in 0..tiles_x as u32 {
            let x0 = tx * tile_w;
            let y0 = ty * tile_h;
            let x1 = (x0 + tile_w).min(width);
            let y1 = (y0 + tile_h).min(height);
            luts.push(tile_lut(image, x0, y0, x1, y1, clip_limit));
        }
    }

    let position = |coord: u32, tile: u32, tiles: usize| -> (usize, usize, f32) {
        let centre = (coord as f32 + 0.5) / tile as f32 - 0.5;
        let clamped = centre.clamp(0.0, (tiles - 1) as f32);
        let lower = clamped.floor() as usize;
        let upper = (lower + 1).min(tiles - 1);
        (lower, upper, clamped - lower as f32)
    };

    Ok(GrayImage::from_fn(width, height, |x, y| {
        let value = image.get_pixel(x, y)[0] as usize;
        let (x0, x1, ax) = position(x, tile_w, tiles_x);
        let (y0, y1, ay) = position(y, tile_h, tiles_y);

        let at = |tx: usize, ty: usize| luts[ty * tiles_x + tx][value] as f32;
        let top = at(x0, y0) * (1.0 - ax) + at(x1, y0) * ax;
        let bottom = at(x0, y1) * (1.0 - ax) + at(x1, y1) * ax;
        let blended = top * (1.0 - ay) + bottom * ay;

        Luma([blended.round().clamp(0.0, 255.0) as u8])
    }))
}

fn tile_lut(image: &GrayImage, x0: u32, y0: u32, x1: u32, y1: u32, clip_limit: f32) -> [u8; 256] {
    let mut histogram = [0u32; 256];
    for y in y0..y1 {
        for x in x0..x1 {
            histogram[image.get_pixel(x, y)[0] as usize] += 1;
        }
    }

    let area = (x1 - x0) * (y1 - y0);
    let mut lut = [0u8; 256];
    if area == 0 {
        return lut;
    }

    let limit = ((clip_limit * area as f32 / 256.0) as u32).max(1);
    let mut excess = 0u32;
    for bin in histogram.iter_mut() {
        if *bin > limit {
            excess += *bin - limit;
            *bin = limit;
        }
    }

    let share = excess / 256;
    let remainder = (excess % 256) as usize;
    for (i, bin) in histogram.iter_mut().enumerate() {
        *bin += share;
        if i < remainder {
            *bin += 1;
        }
    }

    let scale = 255.0 / area as f32;
    let mut cumulative = 0u32;
    for (i, &count) in histogram.iter().enumerate() {
        cumulative += count;
        lut[i] = (cumulative as f32 * scale).round().min(255.0) as u8;
    }
    lut
}
