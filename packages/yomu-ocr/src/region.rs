use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// One row reported by an engine.
///
/// Engines that only report text leave `confidence` empty; callers decide the
/// fallback through [`TextRegion::confidence_or`].
#[derive(Debug, Clone, PartialEq)]
pub struct TextRegion {
    pub text: String,
    pub bounding_box: Option<BoundingBox>,
    pub confidence: Option<f32>,
}

impl TextRegion {
    pub fn new(text: impl Into<String>, confidence: Option<f32>) -> Self {
        Self {
            text: text.into(),
            bounding_box: None,
            confidence,
        }
    }

    pub fn with_bounding_box(mut self, bounding_box: BoundingBox) -> Self {
        self.bounding_box = Some(bounding_box);
        self
    }

    pub fn confidence_or(&self, default: f32) -> f32 {
        self.confidence.unwrap_or(default)
    }
}
