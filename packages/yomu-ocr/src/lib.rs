pub mod engine;
pub mod image_io;
pub mod models;
pub mod ocrs_engine;
pub mod preprocess;
pub mod recognition;
pub mod region;

pub use engine::{OcrEngine, OcrError, OcrInput, OcrOutput};
pub use image_io::{crop_to_region, fit_within, load_image, save_image, ImageError, Roi};
pub use models::ModelStore;
pub use ocrs_engine::OcrsEngine;
pub use preprocess::{Binarize, Pipeline, PreprocessError, SimpleOptions, Stage};
pub use recognition::{accept, AcceptancePolicy, AcceptedLine, OutputFormat, Recognition};
pub use region::{BoundingBox, TextRegion};
