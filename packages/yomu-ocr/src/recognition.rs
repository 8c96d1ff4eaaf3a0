//! Post-processing of engine rows: confidence filtering and text formatting.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use tracing::{debug, warn};

use crate::region::{BoundingBox, TextRegion};

/// Label printed next to each accepted line's score.
pub const CONFIDENCE_LABEL: &str = "信頼度";

/// Printed when nothing survives filtering.
pub const NO_TEXT_MESSAGE: &str = "(no text found)";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AcceptancePolicy {
    /// Rows scoring below this floor are dropped.
    pub min_confidence: f32,
    /// Score assumed for rows whose engine reported none.
    pub default_confidence: f32,
}

impl AcceptancePolicy {
    pub const DEFAULT_MIN_CONFIDENCE: f32 = 0.1;
    pub const DEFAULT_CONFIDENCE: f32 = 0.5;

    pub fn with_min_confidence(min_confidence: f32) -> Self {
        Self {
            min_confidence,
            ..Self::default()
        }
    }
}

impl Default for AcceptancePolicy {
    fn default() -> Self {
        Self {
            min_confidence: Self::DEFAULT_MIN_CONFIDENCE,
            default_confidence: Self::DEFAULT_CONFIDENCE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AcceptedLine {
    pub text: String,
    pub confidence: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bounding_box: Option<BoundingBox>,
}

/// Outcome of filtering one engine run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Recognition {
    pub lines: Vec<AcceptedLine>,
    pub rejected: usize,
    pub malformed: usize,
}

impl Recognition {
    pub fn accepted(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn average_confidence(&self) -> Option<f32> {
        if self.lines.is_empty() {
            return None;
        }
        let total: f32 = self.lines.iter().map(|l| l.confidence).sum();
        Some(total / self.lines.len() as f32)
    }

    /// One `text (信頼度: 0.90)` line per accepted row, each newline terminated.
    pub fn annotated_text(&self) -> String {
        self.lines
            .iter()
            .map(|l| format!("{} ({}: {:.2})\n", l.text, CONFIDENCE_LABEL, l.confidence))
            .collect()
    }

    pub fn texts(&self) -> Vec<&str> {
        self.lines.iter().map(|l| l.text.trim()).collect()
    }

    pub fn render(&self, format: OutputFormat) -> String {
        match format {
            OutputFormat::Annotated => self.annotated_text(),
            OutputFormat::Lines => self.texts().join("\n"),
            OutputFormat::Joined => self.texts().join(" "),
            OutputFormat::Json => to_json(self),
        }
    }

    /// Human readable summary for status lines.
    pub fn summary(&self) -> String {
        match self.average_confidence() {
            Some(avg) => format!(
                "{} text lines detected, average confidence {:.2}",
                self.accepted(),
                avg
            ),
            None => "0 text lines detected".to_string(),
        }
    }
}

fn to_json(recognition: &Recognition) -> String {
    #[derive(Serialize)]
    struct Document<'a> {
        lines: &'a [AcceptedLine],
        accepted: usize,
        rejected: usize,
        malformed: usize,
        average_confidence: Option<f32>,
    }

    let document = Document {
        lines: &recognition.lines,
        accepted: recognition.accepted(),
        rejected: recognition.rejected,
        malformed: recognition.malformed,
        average_confidence: recognition.average_confidence(),
    };
    serde_json::to_string_pretty(&document).unwrap_or_else(|e| format!("{{\"error\": \"{}\"}}", e))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Annotated,
    Lines,
    Joined,
    Json,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "annotated" => Ok(OutputFormat::Annotated),
            "lines" => Ok(OutputFormat::Lines),
            "joined" => Ok(OutputFormat::Joined),
            "json" => Ok(OutputFormat::Json),
            other => Err(format!(
                "unknown format '{}' (annotated, lines, joined, json)",
                other
            )),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OutputFormat::Annotated => "annotated",
            OutputFormat::Lines => "lines",
            OutputFormat::Joined => "joined",
            OutputFormat::Json => "json",
        };
        f.write_str(name)
    }
}

/// Filters engine rows into a [`Recognition`], keeping detection order.
///
/// Blank rows and rows with an impossible score are skipped as malformed.
pub fn accept(regions: Vec<TextRegion>, policy: &AcceptancePolicy) -> Recognition {
    let mut recognition = Recognition::default();

    for region in regions {
        let text = region.text.trim();
        if text.is_empty() {
            warn!("Skipping malformed row without text: {:?}", region);
            recognition.malformed += 1;
            continue;
        }

        let confidence = region.confidence_or(policy.default_confidence);
        if !confidence.is_finite() || !(0.0..=1.0).contains(&confidence) {
            warn!(
                "Skipping malformed row '{}' with confidence {}",
                text, confidence
            );
            recognition.malformed += 1;
            continue;
        }

        if confidence < policy.min_confidence {
            debug!(
                "Dropping low confidence row '{}' ({:.2} < {:.2})",
                text, confidence, policy.min_confidence
            );
            recognition.rejected += 1;
            continue;
        }

        recognition.lines.push(AcceptedLine {
            text: text.to_string(),
            confidence,
            bounding_box: region.bounding_box,
        });
    }

    if let Some(avg) = recognition.average_confidence() {
        debug!(
            "Accepted {} rows, average confidence {:.2}",
            recognition.accepted(),
            avg
        );
    }

    recognition
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_boundary_output() {
        let regions = vec![
            TextRegion::new("Hello", Some(0.9)),
            TextRegion::new("x", Some(0.05)),
        ];
        let recognition = accept(regions, &AcceptancePolicy::with_min_confidence(0.1));
        assert_eq!(recognition.annotated_text(), "Hello (信頼度: 0.90)\n");
        assert_eq!(recognition.rejected, 1);
    }

    #[test]
    fn test_score_equal_to_floor_is_kept() {
        let regions = vec![TextRegion::new("edge", Some(0.1))];
        let recognition = accept(regions, &AcceptancePolicy::with_min_confidence(0.1));
        assert_eq!(recognition.accepted(), 1);
    }

    #[test]
    fn test_order_is_preserved() {
        let regions = vec![
            TextRegion::new("one", Some(0.4)),
            TextRegion::new("drop", Some(0.01)),
            TextRegion::new("two", Some(0.99)),
            TextRegion::new("three", Some(0.2)),
        ];
        let recognition = accept(regions, &AcceptancePolicy::default());
        assert_eq!(recognition.texts(), vec!["one", "two", "three"]);
    }

    #[test]
    fn test_missing_confidence_uses_default() {
        let recognition = accept(
            vec![TextRegion::new("bare", None)],
            &AcceptancePolicy::default(),
        );
        assert_eq!(recognition.lines[0].confidence, 0.5);

        let strict = AcceptancePolicy::with_min_confidence(0.6);
        assert!(accept(vec![TextRegion::new("bare", None)], &strict).is_empty());
    }

    #[test]
    fn test_malformed_rows_are_skipped() {
        let regions = vec![
            TextRegion::new("   ", Some(0.9)),
            TextRegion::new("nan", Some(f32::NAN)),
            TextRegion::new("big", Some(1.5)),
            TextRegion::new("fine", Some(0.7)),
        ];
        let recognition = accept(regions, &AcceptancePolicy::default());
        assert_eq!(recognition.malformed, 3);
        assert_eq!(recognition.texts(), vec!["fine"]);
    }

    #[test]
    fn test_average_and_summary() {
        let regions = vec![
            TextRegion::new("a", Some(0.4)),
            TextRegion::new("b", Some(0.8)),
        ];
        let recognition = accept(regions, &AcceptancePolicy::default());
        let avg = recognition.average_confidence().unwrap();
        assert!((avg - 0.6).abs() < 1e-6);
        assert_eq!(
            recognition.summary(),
            "2 text lines detected, average confidence 0.60"
        );
        assert_eq!(Recognition::default().average_confidence(), None);
    }

    #[test]
    fn test_render_formats() {
        let regions = vec![
            TextRegion::new(" 東京 ", Some(0.8)),
            TextRegion::new("Tokyo", Some(0.7)),
        ];
        let recognition = accept(regions, &AcceptancePolicy::default());
        assert_eq!(recognition.render(OutputFormat::Lines), "東京\nTokyo");
        assert_eq!(recognition.render(OutputFormat::Joined), "東京 Tokyo");

        let json: serde_json::Value =
            serde_json::from_str(&recognition.render(OutputFormat::Json)).unwrap();
        assert_eq!(json["accepted"], 2);
        assert_eq!(json["lines"][1]["text"], "Tokyo");
    }

    #[test]
    fn test_output_format_parse() {
        assert_eq!("JSON".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert!("yaml".parse::<OutputFormat>().is_err());
    }
}
