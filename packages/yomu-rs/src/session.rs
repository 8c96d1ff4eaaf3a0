//! State owned by the interactive shell.
//!
//! The shell loop is the only writer. Background work is tagged with the
//! request id handed out when it started; completions carrying an older id
//! than the latest request are stale and must not touch the session.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::{DynamicImage, GenericImageView};
use tracing::debug;
use yomu_ocr::{load_image, AcceptancePolicy, Pipeline, Recognition};

use crate::error::{AppError, Result};
use crate::speech::VoiceSettings;

/// An image as loaded from disk together with its preprocessed form.
#[derive(Debug, Clone)]
pub struct LoadedImage {
    pub path: PathBuf,
    pub original: DynamicImage,
    pub processed: DynamicImage,
}

impl LoadedImage {
    /// Loads `path` and runs `pipeline` over it. Blocking.
    pub fn open(path: &Path, pipeline: &Pipeline) -> Result<Self> {
        let original = load_image(path)?;
        let processed = pipeline.apply_or_original(&original);
        Ok(Self {
            path: path.to_path_buf(),
            original,
            processed,
        })
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }

    pub fn select(&self, source: ImageSource) -> &DynamicImage {
        match source {
            ImageSource::Processed => &self.processed,
            ImageSource::Original => &self.original,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageSource {
    Processed,
    Original,
}

/// Whether a completion was applied or discarded as stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Applied,
    Stale,
}

/// Everything needed to start a recognition off the shell loop.
#[derive(Debug, Clone)]
pub struct RecognitionTicket {
    pub id: u64,
    pub source: ImageSource,
    pub image: DynamicImage,
    pub policy: AcceptancePolicy,
}

#[derive(Debug, Clone)]
pub struct SpeechTicket {
    pub id: u64,
    pub text: String,
    pub voice: VoiceSettings,
}

#[derive(Debug)]
pub struct Session {
    image: Option<Arc<LoadedImage>>,
    text: String,
    recognition: Option<Recognition>,
    voice: VoiceSettings,
    policy: AcceptancePolicy,
    latest_request: u64,
    latest_speech: u64,
}

impl Session {
    pub fn new(policy: AcceptancePolicy) -> Self {
        Self {
            image: None,
            text: String::new(),
            recognition: None,
            voice: VoiceSettings::default(),
            policy,
            latest_request: 0,
            latest_speech: 0,
        }
    }

    pub fn image(&self) -> Option<&LoadedImage> {
        self.image.as_deref()
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn recognition(&self) -> Option<&Recognition> {
        self.recognition.as_ref()
    }

    pub fn voice(&self) -> VoiceSettings {
        self.voice
    }

    pub fn voice_mut(&mut self) -> &mut VoiceSettings {
        &mut self.voice
    }

    pub fn policy(&self) -> AcceptancePolicy {
        self.policy
    }

    pub fn latest_request(&self) -> u64 {
        self.latest_request
    }

    fn issue(&mut self) -> u64 {
        self.latest_request += 1;
        self.latest_request
    }

    /// Loads and preprocesses `path`; on failure the session is unchanged.
    pub fn load(&mut self, path: &Path, pipeline: &Pipeline) -> Result<&LoadedImage> {
        let loaded = LoadedImage::open(path, pipeline)?;
        Ok(self.replace_image(loaded))
    }

    /// Installs a freshly loaded image, invalidating in-flight recognitions.
    pub fn replace_image(&mut self, loaded: LoadedImage) -> &LoadedImage {
        let id = self.issue();
        let (width, height) = loaded.original.dimensions();
        debug!(
            "Request {}: loaded {} ({}x{})",
            id,
            loaded.path.display(),
            width,
            height
        );
        &**self.image.insert(Arc::new(loaded))
    }

    pub fn begin_recognition(&mut self, source: ImageSource) -> Result<RecognitionTicket> {
        let image = self
            .image
            .as_ref()
            .map(|loaded| loaded.select(source).clone())
            .ok_or(AppError::NoImage)?;
        let id = self.issue();
        debug!("Request {}: recognition of {:?} image", id, source);
        Ok(RecognitionTicket {
            id,
            source,
            image,
            policy: self.policy,
        })
    }

    pub fn is_current(&self, id: u64) -> bool {
        id == self.latest_request
    }

    pub fn complete_recognition(&mut self, id: u64, recognition: Recognition) -> Applied {
        if !self.is_current(id) {
            debug!(
                "Discarding stale recognition {} (latest is {})",
                id, self.latest_request
            );
            return Applied::Stale;
        }
        self.text = recognition.annotated_text();
        self.recognition = Some(recognition);
        Applied::Applied
    }

    /// Empties the displayed text so later speech requests have nothing to read.
    pub fn clear_text(&mut self) {
        self.text.clear();
        self.recognition = None;
    }

    pub fn begin_speech(&mut self) -> Result<SpeechTicket> {
        if self.text.trim().is_empty() {
            return Err(AppError::NothingToRead);
        }
        self.latest_speech += 1;
        Ok(SpeechTicket {
            id: self.latest_speech,
            text: self.text.clone(),
            voice: self.voice,
        })
    }

    pub fn is_current_speech(&self, id: u64) -> bool {
        id == self.latest_speech
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new(AcceptancePolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use yomu_ocr::{accept, ImageError, TextRegion};

    fn write_sample(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        DynamicImage::ImageRgb8(RgbImage::from_pixel(20, 10, Rgb([200, 200, 200])))
            .save(&path)
            .unwrap();
        path
    }

    fn recognition(text: &str, confidence: f32) -> Recognition {
        accept(
            vec![TextRegion::new(text, Some(confidence))],
            &AcceptancePolicy::default(),
        )
    }

    #[test]
    fn test_failed_load_keeps_previous_image() {
        let dir = tempfile::tempdir().unwrap();
        let good = write_sample(dir.path(), "good.png");
        let mut session = Session::default();
        session.load(&good, &Pipeline::enhanced()).unwrap();

        let err = session
            .load(&dir.path().join("missing.png"), &Pipeline::enhanced())
            .unwrap_err();
        assert!(matches!(err, AppError::Image(ImageError::NotFound(_))));
        assert_eq!(session.image().unwrap().path, good);
    }

    #[test]
    fn test_loaded_image_keeps_both_buffers() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_sample(dir.path(), "page.png");
        let mut session = Session::default();
        let loaded = session.load(&path, &Pipeline::enhanced()).unwrap();
        assert_eq!(loaded.original.dimensions(), (20, 10));
        assert_eq!(loaded.processed.dimensions(), (40, 20));
        assert_eq!(loaded.file_name(), "page.png");
    }

    #[test]
    fn test_recognition_requires_image() {
        let mut session = Session::default();
        assert!(matches!(
            session.begin_recognition(ImageSource::Processed),
            Err(AppError::NoImage)
        ));
    }

    #[test]
    fn test_stale_recognition_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_sample(dir.path(), "page.png");
        let mut session = Session::default();
        session.load(&path, &Pipeline::enhanced()).unwrap();

        let first = session.begin_recognition(ImageSource::Processed).unwrap();
        let second = session.begin_recognition(ImageSource::Original).unwrap();
        assert!(second.id > first.id);

        assert_eq!(
            session.complete_recognition(first.id, recognition("old", 0.9)),
            Applied::Stale
        );
        assert_eq!(session.text(), "");

        assert_eq!(
            session.complete_recognition(second.id, recognition("new", 0.9)),
            Applied::Applied
        );
        assert_eq!(session.text(), "new (信頼度: 0.90)\n");
    }

    #[test]
    fn test_new_load_invalidates_running_recognition() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_sample(dir.path(), "page.png");
        let mut session = Session::default();
        session.load(&path, &Pipeline::enhanced()).unwrap();

        let ticket = session.begin_recognition(ImageSource::Processed).unwrap();
        session.load(&path, &Pipeline::enhanced()).unwrap();
        assert_eq!(
            session.complete_recognition(ticket.id, recognition("late", 0.9)),
            Applied::Stale
        );
    }

    #[test]
    fn test_clear_makes_speech_impossible() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_sample(dir.path(), "page.png");
        let mut session = Session::default();
        session.load(&path, &Pipeline::enhanced()).unwrap();
        let ticket = session.begin_recognition(ImageSource::Processed).unwrap();
        session.complete_recognition(ticket.id, recognition("読む", 0.8));

        let speech = session.begin_speech().unwrap();
        assert_eq!(speech.text, "読む (信頼度: 0.80)\n");

        session.clear_text();
        assert_eq!(session.text(), "");
        assert!(matches!(session.begin_speech(), Err(AppError::NothingToRead)));
    }

    #[test]
    fn test_speech_ids_advance() {
        let mut session = Session::default();
        session.text = "hello".to_string();
        let first = session.begin_speech().unwrap();
        let second = session.begin_speech().unwrap();
        assert!(!session.is_current_speech(first.id));
        assert!(session.is_current_speech(second.id));
    }
}
