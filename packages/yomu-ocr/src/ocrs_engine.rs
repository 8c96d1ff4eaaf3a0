//! OCR engine backed by the ocrs library.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use image::DynamicImage;
use ocrs::{ImageSource, OcrEngine as OcrsCore, OcrEngineParams, TextItem};
use rten::Model;
use tracing::{debug, trace};

use crate::engine::{OcrEngine, OcrError, OcrInput, OcrOutput};
use crate::models::ModelStore;
use crate::region::{BoundingBox, TextRegion};

/// Detection, line grouping and recognition on CPU.
///
/// ocrs does not score lines, so every region leaves `confidence` empty.
#[derive(Clone)]
pub struct OcrsEngine {
    core: Arc<OcrsCore>,
}

impl OcrsEngine {
    /// Loads both models from the store. The store must already be populated,
    /// see [`ModelStore::ensure`].
    pub fn from_store(store: &ModelStore) -> Result<Self, OcrError> {
        let detection_model = load_model(&store.detection_path())?;
        let recognition_model = load_model(&store.recognition_path())?;

        let core = OcrsCore::new(OcrEngineParams {
            detection_model: Some(detection_model),
            recognition_model: Some(recognition_model),
            alphabet: store.alphabet().map(str::to_string),
            ..Default::default()
        })
        .map_err(|e| OcrError::EngineError(format!("failed to create OCR engine: {}", e)))?;

        debug!("OCR engine initialized from {}", store.dir().display());
        Ok(Self {
            core: Arc::new(core),
        })
    }

    /// Ensures the models are cached, then loads them off the async runtime.
    pub async fn initialize(store: ModelStore) -> Result<Self, OcrError> {
        store.ensure().await?;
        tokio::task::spawn_blocking(move || Self::from_store(&store))
            .await
            .map_err(|e| OcrError::EngineError(e.to_string()))?
    }
}

fn load_model(path: &Path) -> Result<Model, OcrError> {
    if !path.is_file() {
        return Err(OcrError::ModelNotFound(path.to_path_buf()));
    }
    debug!("Loading OCR model from {}", path.display());
    Model::load_file(path)
        .map_err(|e| OcrError::EngineError(format!("failed to load {}: {}", path.display(), e)))
}

fn recognize_image(core: &OcrsCore, image: &DynamicImage) -> Result<Vec<TextRegion>, OcrError> {
    let engine_error = |stage: &str, e: &dyn std::fmt::Display| {
        OcrError::EngineError(format!("failed to {}: {}", stage, e))
    };

    let rgb = image.to_rgb8();
    let (width, height) = rgb.dimensions();
    trace!("Recognizing {}x{} image", width, height);

    let source = ImageSource::from_bytes(rgb.as_raw(), (width, height))
        .map_err(|e| engine_error("create image source", &e))?;
    let input = core
        .prepare_input(source)
        .map_err(|e| engine_error("prepare input", &e))?;
    let word_rects = core
        .detect_words(&input)
        .map_err(|e| engine_error("detect words", &e))?;
    trace!("Detected {} word regions", word_rects.len());

    let line_rects = core.find_text_lines(&input, &word_rects);
    let line_texts = core
        .recognize_text(&input, &line_rects)
        .map_err(|e| engine_error("recognize text", &e))?;

    let mut regions = Vec::new();
    for line in line_texts.iter().flatten() {
        let text = line.to_string();
        let words: Vec<_> = line.words().collect();
        if words.is_empty() {
            regions.push(TextRegion::new(text, None));
            continue;
        }

        let mut min_x = f32::MAX;
        let mut min_y = f32::MAX;
        let mut max_x = f32::MIN;
        let mut max_y = f32::MIN;
        for word in &words {
            let rect = word.bounding_rect();
            min_x = min_x.min(rect.left() as f32);
            min_y = min_y.min(rect.top() as f32);
            max_x = max_x.max((rect.left() + rect.width()) as f32);
            max_y = max_y.max((rect.top() + rect.height()) as f32);
        }

        regions.push(TextRegion::new(text, None).with_bounding_box(BoundingBox {
            x: min_x,
            y: min_y,
            width: max_x - min_x,
            height: max_y - min_y,
        }));
    }

    debug!("Recognized {} text lines", regions.len());
    Ok(regions)
}

#[async_trait]
impl OcrEngine for OcrsEngine {
    async fn recognize(&self, input: &OcrInput) -> Result<OcrOutput, OcrError> {
        let input = input.clone();
        let core = Arc::clone(&self.core);
        let regions = tokio::task::spawn_blocking(move || {
            let image = input.to_image()?;
            recognize_image(&core, &image)
        })
        .await
        .map_err(|e| OcrError::EngineError(e.to_string()))??;
        Ok(OcrOutput::from_regions(regions))
    }
}
