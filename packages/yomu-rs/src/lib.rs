//! # yomu-rs
//!
//! Reads text out of images and speaks it aloud.
//!
//! ## Features
//!
//! - **Batch reads**: crop, preprocess and recognize one image or a whole directory
//! - **Interactive shell**: load, recognize, speak and stop from a terminal session
//! - **Speech**: playback through an espeak-ng compatible program with live rate and volume
//! - **Self-check**: verify decoders, OCR models and the speech program
//!
//! Image handling, preprocessing and recognition live in [`yomu_ocr`].
//!
//! ## Quick Start
//!
//! ```ignore
//! use yomu_rs::prelude::*;
//!
//! let inputs = collect_inputs(Path::new("scans/"))?;
//! let store = ModelStore::default();
//! let summary = batch::run(
//!     &inputs,
//!     &BatchOptions::default(),
//!     || async { Ok(OcrsEngine::initialize(store).await?) },
//!     &mut std::io::stdout(),
//! )
//! .await?;
//! println!("{} lines from {} files", summary.lines, summary.files);
//! ```

pub mod batch;
pub mod check;
pub mod cli;
pub mod error;
pub mod executor;
pub mod session;
pub mod shell;
pub mod speech;

// Re-export commonly used types at the root level
pub use batch::{collect_inputs, prepare_image, BatchOptions, BatchSummary};
pub use check::{run_checks, CheckItem, CheckReport};
pub use error::AppError;
pub use executor::{CancelToken, SingleFlight};
pub use session::{Applied, ImageSource, LoadedImage, Session};
pub use shell::Shell;
pub use speech::{EspeakEngine, SpeechEngine, SpeechError, SpeechOutcome, VoiceSettings};

/// Prelude module for convenient imports
///
/// Import everything you need with:
/// ```ignore
/// use yomu_rs::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        batch, collect_inputs, prepare_image, run_checks, AppError, BatchOptions, BatchSummary,
        CancelToken, EspeakEngine, Session, Shell, SpeechEngine, VoiceSettings,
    };
    pub use yomu_ocr::{
        accept, load_image, AcceptancePolicy, ModelStore, OcrEngine, OcrsEngine, OutputFormat,
        Pipeline, Recognition, TextRegion,
    };
}
