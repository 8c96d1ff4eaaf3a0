//! Environment self-check behind `yomu check`.

use std::fmt;
use std::io::{Cursor, Write};

use image::{DynamicImage, GrayImage, ImageFormat, Luma};
use tracing::debug;
use yomu_ocr::{ModelStore, OcrsEngine, Pipeline};

use crate::speech::EspeakEngine;

#[derive(Debug, Clone)]
pub struct CheckItem {
    pub name: String,
    pub passed: bool,
    /// Optional items are reported but do not fail the check.
    pub required: bool,
    pub detail: String,
}

impl CheckItem {
    fn pass(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: true,
            required: true,
            detail: detail.into(),
        }
    }

    fn fail(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: false,
            required: true,
            detail: detail.into(),
        }
    }

    fn optional(mut self) -> Self {
        self.required = false;
        self
    }
}

impl fmt::Display for CheckItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mark = if self.passed { "✓" } else { "✗" };
        write!(f, "{} {}: {}", mark, self.name, self.detail)?;
        if !self.passed && !self.required {
            write!(f, " (optional)")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct CheckReport {
    pub items: Vec<CheckItem>,
}

impl CheckReport {
    /// True when every required item passed.
    pub fn passed(&self) -> bool {
        self.items.iter().all(|item| item.passed || !item.required)
    }

    pub fn write_to<W: Write>(&self, out: &mut W) -> std::io::Result<()> {
        for item in &self.items {
            writeln!(out, "{}", item)?;
        }
        let failed = self
            .items
            .iter()
            .filter(|item| !item.passed && item.required)
            .count();
        if failed == 0 {
            writeln!(out, "all required checks passed")
        } else {
            writeln!(out, "{} required check(s) failed", failed)
        }
    }
}

fn sample_image() -> DynamicImage {
    let gray = GrayImage::from_fn(32, 16, |x, y| {
        if (x / 4 + y / 4) % 2 == 0 {
            Luma([30])
        } else {
            Luma([220])
        }
    });
    DynamicImage::ImageLuma8(gray)
}

fn check_codecs() -> CheckItem {
    let name = "image codecs";
    let mut encoded = Vec::new();
    if let Err(e) = sample_image().write_to(&mut Cursor::new(&mut encoded), ImageFormat::Png) {
        return CheckItem::fail(name, format!("PNG encoding failed: {}", e));
    }
    match image::load_from_memory(&encoded) {
        Ok(decoded) if decoded.width() == 32 && decoded.height() == 16 => {
            CheckItem::pass(name, "PNG round trip")
        }
        Ok(decoded) => CheckItem::fail(
            name,
            format!("decoded size {}x{}", decoded.width(), decoded.height()),
        ),
        Err(e) => CheckItem::fail(name, format!("PNG decoding failed: {}", e)),
    }
}

fn check_preprocessing() -> CheckItem {
    let name = "preprocessing";
    let pipeline = Pipeline::enhanced();
    match pipeline.run(&sample_image()) {
        Ok(processed) => CheckItem::pass(
            name,
            format!(
                "{} stages, output {}x{}",
                pipeline.stages().len(),
                processed.width(),
                processed.height()
            ),
        ),
        Err(e) => CheckItem::fail(name, e.to_string()),
    }
}

/// Runs every check. Never downloads models.
pub async fn run_checks(store: &ModelStore, speech: &EspeakEngine) -> CheckReport {
    let mut report = CheckReport::default();
    report.items.push(check_codecs());
    report.items.push(check_preprocessing());

    let models = "OCR models";
    let missing = store.missing();
    if missing.is_empty() {
        report.items.push(CheckItem::pass(
            models,
            format!("present in {}", store.dir().display()),
        ));

        let engine_store = store.clone();
        let loaded =
            tokio::task::spawn_blocking(move || OcrsEngine::from_store(&engine_store)).await;
        report.items.push(match loaded {
            Ok(Ok(_)) => CheckItem::pass("OCR engine", "models load"),
            Ok(Err(e)) => CheckItem::fail("OCR engine", e.to_string()),
            Err(e) => CheckItem::fail("OCR engine", e.to_string()),
        });
    } else if store.downloads_enabled() {
        report.items.push(CheckItem::pass(
            models,
            format!(
                "{} missing from {}, downloaded on first use",
                missing.join(", "),
                store.dir().display()
            ),
        ));
    } else {
        report.items.push(CheckItem::fail(
            models,
            format!(
                "{} missing from {} and downloads are disabled",
                missing.join(", "),
                store.dir().display()
            ),
        ));
    }

    let speech_name = format!("speech program {}", speech.program());
    report.items.push(match speech.probe().await {
        Ok(version) if version.is_empty() => CheckItem::pass(speech_name, "available"),
        Ok(version) => CheckItem::pass(speech_name, version),
        Err(e) => CheckItem::fail(speech_name, e.to_string()).optional(),
    });

    debug!("Check finished, passed: {}", report.passed());
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_checks_pass() {
        assert!(check_codecs().passed);
        let preprocessing = check_preprocessing();
        assert!(preprocessing.passed);
        assert!(preprocessing.detail.contains("output 64x32"));
    }

    #[test]
    fn test_optional_failure_does_not_fail_report() {
        let report = CheckReport {
            items: vec![
                CheckItem::pass("a", "fine"),
                CheckItem::fail("b", "missing").optional(),
            ],
        };
        assert!(report.passed());

        let mut out = Vec::new();
        report.write_to(&mut out).unwrap();
        let printed = String::from_utf8(out).unwrap();
        assert!(printed.contains("✓ a: fine\n"));
        assert!(printed.contains("✗ b: missing (optional)\n"));
        assert!(printed.ends_with("all required checks passed\n"));
    }

    #[tokio::test]
    async fn test_missing_models_without_download_fail() {
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::new(dir.path()).with_download(false);
        let speech = EspeakEngine::new("/nonexistent/yomu-speech");

        let report = run_checks(&store, &speech).await;
        assert!(!report.passed());
        let models = report.items.iter().find(|i| i.name == "OCR models").unwrap();
        assert!(!models.passed);
        let speech = report.items.last().unwrap();
        assert!(!speech.passed && !speech.required);
    }

    #[tokio::test]
    async fn test_missing_custom_recognition_model_is_named() {
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::new(dir.path())
            .with_download(false)
            .with_recognition_model("japanese.rten");
        let speech = EspeakEngine::new("/nonexistent/yomu-speech");

        let report = run_checks(&store, &speech).await;
        let models = report.items.iter().find(|i| i.name == "OCR models").unwrap();
        assert!(models.detail.starts_with("text-detection.rten, japanese.rten missing"));
    }

    #[tokio::test]
    async fn test_missing_models_with_download_pass() {
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::new(dir.path());
        let speech = EspeakEngine::new("/nonexistent/yomu-speech");

        let report = run_checks(&store, &speech).await;
        assert!(report.passed());
    }
}
