use std::path::PathBuf;

use thiserror::Error;
use yomu_ocr::{ImageError, OcrError};

use crate::speech::SpeechError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Image(#[from] ImageError),
    #[error(transparent)]
    Ocr(#[from] OcrError),
    #[error(transparent)]
    Speech(#[from] SpeechError),
    #[error("no image loaded, load an image first")]
    NoImage,
    #[error("the {0} engine is still initializing")]
    EngineNotReady(&'static str),
    #[error("the {0} engine is unavailable")]
    EngineUnavailable(&'static str),
    #[error("nothing to read")]
    NothingToRead,
    #[error("no image files found under {0}")]
    NoInputs(PathBuf),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = AppError> = std::result::Result<T, E>;
