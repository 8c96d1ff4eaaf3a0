use std::path::PathBuf;

use async_trait::async_trait;
use image::DynamicImage;
use thiserror::Error;

use crate::region::TextRegion;

#[derive(Debug, Clone)]
pub enum OcrInput {
    FilePath(PathBuf),
    Bytes(Vec<u8>),
    Pixels(DynamicImage),
}

impl OcrInput {
    /// Decodes the input into a pixel buffer.
    pub fn to_image(&self) -> Result<DynamicImage, OcrError> {
        match self {
            OcrInput::FilePath(path) => image::open(path)
                .map_err(|e| OcrError::InvalidInput(format!("{}: {}", path.display(), e))),
            OcrInput::Bytes(data) => {
                image::load_from_memory(data).map_err(|e| OcrError::InvalidInput(e.to_string()))
            }
            OcrInput::Pixels(image) => Ok(image.clone()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OcrOutput {
    pub text: String,
    pub regions: Vec<TextRegion>,
}

impl OcrOutput {
    pub fn from_regions(regions: Vec<TextRegion>) -> Self {
        let text = regions
            .iter()
            .map(|r| r.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        Self { text, regions }
    }
}

#[derive(Debug, Error)]
pub enum OcrError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("model not found: {0}")]
    ModelNotFound(PathBuf),
    #[error("model download failed for {url}: {message}")]
    Download { url: String, message: String },
    #[error("engine error: {0}")]
    EngineError(String),
}

#[async_trait]
pub trait OcrEngine: Send + Sync {
    async fn recognize(&self, input: &OcrInput) -> Result<OcrOutput, OcrError>;
}
