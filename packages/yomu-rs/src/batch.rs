//! Non-interactive reads: load, crop, preprocess, recognize, print.

use std::io::Write;
use std::path::{Path, PathBuf};

use image::DynamicImage;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;
use yomu_ocr::image_io::is_image_file;
use yomu_ocr::recognition::NO_TEXT_MESSAGE;
use yomu_ocr::{
    accept, crop_to_region, load_image, save_image, AcceptancePolicy, ImageError, OcrEngine,
    OcrInput, OutputFormat, Pipeline, Recognition, Roi, SimpleOptions,
};

use crate::error::{AppError, Result};

/// Settings of a batch read; the defaults mirror the one-shot script setup.
#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub roi: Option<Roi>,
    pub preprocess: bool,
    pub simple: SimpleOptions,
    pub policy: AcceptancePolicy,
    pub format: OutputFormat,
    pub debug_image: Option<PathBuf>,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            roi: None,
            preprocess: true,
            simple: SimpleOptions::default(),
            policy: AcceptancePolicy::default(),
            format: OutputFormat::Lines,
            debug_image: None,
        }
    }
}

impl BatchOptions {
    /// Where the preprocessed `input` is dumped. With several inputs each
    /// file gets its own copy, suffixed with the input's stem. Nothing is
    /// dumped when preprocessing is off.
    pub fn debug_image_for(&self, input: &Path, several: bool) -> Option<PathBuf> {
        let base = self.debug_image.as_ref().filter(|_| self.preprocess)?;
        if !several {
            return Some(base.clone());
        }

        let stem = base.file_stem().unwrap_or_default().to_string_lossy();
        let input_stem = input.file_stem().unwrap_or_default().to_string_lossy();
        let mut name = format!("{}-{}", stem, input_stem);
        if let Some(extension) = base.extension() {
            name.push('.');
            name.push_str(&extension.to_string_lossy());
        }
        Some(base.with_file_name(name))
    }
}

/// Result of a batch run over one or more files.
#[derive(Debug, Clone, Default)]
pub struct BatchSummary {
    pub files: usize,
    pub failed: usize,
    pub lines: usize,
}

/// Expands `path` into the image files to read, sorted by path.
pub fn collect_inputs(path: &Path) -> Result<Vec<PathBuf>> {
    if !path.exists() {
        return Err(ImageError::NotFound(path.to_path_buf()).into());
    }
    if !path.is_dir() {
        return Ok(vec![path.to_path_buf()]);
    }

    let mut inputs: Vec<PathBuf> = WalkDir::new(path)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && is_image_file(e.path()))
        .map(|e| e.into_path())
        .collect();
    inputs.sort();

    if inputs.is_empty() {
        return Err(AppError::NoInputs(path.to_path_buf()));
    }
    debug!("Found {} images under {}", inputs.len(), path.display());
    Ok(inputs)
}

/// Loads, crops and preprocesses one image. Blocking.
pub fn prepare_image(path: &Path, options: &BatchOptions) -> Result<DynamicImage> {
    let mut image = load_image(path)?;

    if let Some(roi) = options.roi {
        image = crop_to_region(&image, roi)?;
        debug!("Cropped {} to {}", path.display(), roi);
    }

    if options.preprocess {
        image = Pipeline::simple(&options.simple).apply_or_original(&image);
        if let Some(debug_path) = options.debug_image_for(path, false) {
            save_image(&image, &debug_path)?;
            info!("Wrote preprocessed image to {}", debug_path.display());
        }
    }

    Ok(image)
}

pub async fn recognize(
    engine: &dyn OcrEngine,
    image: DynamicImage,
    policy: &AcceptancePolicy,
) -> Result<Recognition> {
    let output = engine.recognize(&OcrInput::Pixels(image)).await?;
    Ok(accept(output.regions, policy))
}

pub fn write_recognition<W: Write>(
    out: &mut W,
    recognition: &Recognition,
    format: OutputFormat,
) -> std::io::Result<()> {
    if recognition.is_empty() && format != OutputFormat::Json {
        return writeln!(out, "{}", NO_TEXT_MESSAGE);
    }
    let rendered = recognition.render(format);
    writeln!(out, "{}", rendered.trim_end_matches('\n'))
}

/// Reads every input in order.
///
/// Images are prepared before the engine is requested, so acquisition errors
/// surface without paying for engine start-up. `engine` is called at most once.
/// A single input propagates its error; with several inputs failures are
/// reported and counted.
pub async fn run<W, F, Fut, E>(
    inputs: &[PathBuf],
    options: &BatchOptions,
    engine: F,
    out: &mut W,
) -> Result<BatchSummary>
where
    W: Write,
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<E>>,
    E: OcrEngine,
{
    let mut summary = BatchSummary::default();
    let mut engine_init = Some(engine);
    let mut engine: Option<E> = None;
    let with_headers = inputs.len() > 1;
    if options.debug_image.is_some() && !options.preprocess {
        warn!("--debug-image has no effect when preprocessing is disabled");
    }

    for path in inputs {
        summary.files += 1;

        let outcome = async {
            let prepared = {
                let path = path.clone();
                let mut options = options.clone();
                options.debug_image = options.debug_image_for(&path, with_headers);
                tokio::task::spawn_blocking(move || prepare_image(&path, &options))
                    .await
                    .map_err(|e| AppError::Io(std::io::Error::other(e)))??
            };

            if engine.is_none() {
                if let Some(init) = engine_init.take() {
                    engine = Some(init().await?);
                }
            }
            let engine = engine.as_ref().ok_or(AppError::EngineUnavailable("OCR"))?;
            recognize(engine, prepared, &options.policy).await
        }
        .await;

        match outcome {
            Ok(recognition) => {
                if with_headers {
                    writeln!(out, "## {}", path.display())?;
                }
                summary.lines += recognition.accepted();
                write_recognition(out, &recognition, options.format)?;
            }
            Err(e) if !with_headers => return Err(e),
            Err(e) => {
                error!("{}: {}", path.display(), e);
                summary.failed += 1;
            }
        }
    }

    Ok(summary)
}
