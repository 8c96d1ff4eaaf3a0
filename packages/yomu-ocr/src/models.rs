//! Local cache of the recognition models.
//!
//! The directory is created on first use and missing files are downloaded
//! once; files already present are reused as-is.

use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{debug, info};

use crate::engine::OcrError;

pub const DETECTION_MODEL: &str = "text-detection.rten";
pub const RECOGNITION_MODEL: &str = "text-recognition.rten";
pub const DEFAULT_MODEL_DIR: &str = "./models";

const MODEL_BASE_URL: &str = "https://ocrs-models.s3-accelerate.amazonaws.com";

#[derive(Debug, Clone)]
pub struct ModelStore {
    dir: PathBuf,
    base_url: String,
    download: bool,
    /// File name under `dir`, or a full URL to fetch it from.
    recognition_model: String,
    alphabet: Option<String>,
}

impl ModelStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            base_url: MODEL_BASE_URL.to_string(),
            download: true,
            recognition_model: RECOGNITION_MODEL.to_string(),
            alphabet: None,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Disables fetching; missing models become [`OcrError::ModelNotFound`].
    pub fn with_download(mut self, download: bool) -> Self {
        self.download = download;
        self
    }

    /// Swaps the recognition network, e.g. for one trained on another
    /// script. A URL is downloaded into the model directory under its last
    /// path segment.
    pub fn with_recognition_model(mut self, model: impl Into<String>) -> Self {
        self.recognition_model = model.into();
        self
    }

    /// Characters the recognition model emits, in class order. Required when
    /// the model was trained on something other than the default alphabet.
    pub fn with_alphabet(mut self, alphabet: Option<String>) -> Self {
        self.alphabet = alphabet.filter(|a| !a.is_empty());
        self
    }

    pub fn alphabet(&self) -> Option<&str> {
        self.alphabet.as_deref()
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn downloads_enabled(&self) -> bool {
        self.download
    }

    pub fn detection_path(&self) -> PathBuf {
        self.dir.join(DETECTION_MODEL)
    }

    pub fn recognition_path(&self) -> PathBuf {
        self.dir.join(file_name(&self.recognition_model))
    }

    fn url_for(&self, model: &str) -> String {
        if is_url(model) {
            model.to_string()
        } else {
            format!("{}/{}", self.base_url.trim_end_matches('/'), model)
        }
    }

    /// File names of the models not yet in the directory.
    pub fn missing(&self) -> Vec<String> {
        [DETECTION_MODEL, self.recognition_model.as_str()]
            .into_iter()
            .filter(|model| !self.dir.join(file_name(model)).is_file())
            .map(|model| file_name(model).to_string())
            .collect()
    }

    /// Makes sure both model files exist locally.
    pub async fn ensure(&self) -> Result<(), OcrError> {
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| OcrError::EngineError(format!("{}: {}", self.dir.display(), e)))?;

        for model in [DETECTION_MODEL, self.recognition_model.as_str()] {
            let dest = self.dir.join(file_name(model));
            if dest.is_file() {
                continue;
            }
            if !self.download {
                return Err(OcrError::ModelNotFound(dest));
            }
            let url = self.url_for(model);
            info!("Downloading {} to {}", url, dest.display());
            download(&url, &dest).await?;
        }

        debug!("Models available in {}", self.dir.display());
        Ok(())
    }
}

impl Default for ModelStore {
    fn default() -> Self {
        Self::new(DEFAULT_MODEL_DIR)
    }
}

fn is_url(model: &str) -> bool {
    model.starts_with("http://") || model.starts_with("https://")
}

fn file_name(model: &str) -> &str {
    if !is_url(model) {
        return model;
    }
    model
        .split(['?', '#'])
        .next()
        .and_then(|path| path.rsplit('/').next())
        .filter(|name| !name.is_empty())
        .unwrap_or(RECOGNITION_MODEL)
}

async fn download(url: &str, dest: &Path) -> Result<(), OcrError> {
    let failed = |message: String| OcrError::Download {
        url: url.to_string(),
        message,
    };

    let response = reqwest::get(url)
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| failed(e.to_string()))?;
    let bytes = response.bytes().await.map_err(|e| failed(e.to_string()))?;

    let partial = dest.with_extension("part");
    fs::write(&partial, &bytes)
        .await
        .map_err(|e| failed(e.to_string()))?;
    fs::rename(&partial, dest)
        .await
        .map_err(|e| failed(e.to_string()))?;

    debug!("Wrote {} bytes to {}", bytes.len(), dest.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_offline_store_creates_dir_and_reports_missing() {
        let root = tempfile::tempdir().unwrap();
        let store = ModelStore::new(root.path().join("models")).with_download(false);

        let err = store.ensure().await.unwrap_err();
        assert!(matches!(err, OcrError::ModelNotFound(ref p) if p.ends_with(DETECTION_MODEL)));
        assert!(store.dir().is_dir());
    }

    #[tokio::test]
    async fn test_existing_models_are_reused() {
        let root = tempfile::tempdir().unwrap();
        std::fs::write(root.path().join(DETECTION_MODEL), b"det").unwrap();
        std::fs::write(root.path().join(RECOGNITION_MODEL), b"rec").unwrap();

        let store = ModelStore::new(root.path())
            .with_download(true)
            .with_base_url("http://127.0.0.1:9");
        assert!(store.missing().is_empty());
        store.ensure().await.unwrap();
        assert_eq!(std::fs::read(store.detection_path()).unwrap(), b"det");
    }

    #[test]
    fn test_recognition_model_by_name_or_url() {
        let store = ModelStore::new("/models").with_recognition_model("japanese.rten");
        assert_eq!(store.recognition_path(), Path::new("/models/japanese.rten"));
        assert_eq!(
            store.url_for("japanese.rten"),
            format!("{}/japanese.rten", MODEL_BASE_URL)
        );

        let url = "https://example.com/nets/japanese-rec.rten?v=2";
        let store = ModelStore::new("/models").with_recognition_model(url);
        assert_eq!(
            store.recognition_path(),
            Path::new("/models/japanese-rec.rten")
        );
        assert_eq!(store.url_for(url), url);
    }

    #[test]
    fn test_empty_alphabet_means_default() {
        let store = ModelStore::default().with_alphabet(Some(String::new()));
        assert_eq!(store.alphabet(), None);
        let store = ModelStore::default().with_alphabet(Some("あいう".to_string()));
        assert_eq!(store.alphabet(), Some("あいう"));
    }

    #[tokio::test]
    async fn test_custom_recognition_model_is_required_offline() {
        let root = tempfile::tempdir().unwrap();
        std::fs::write(root.path().join(DETECTION_MODEL), b"det").unwrap();
        std::fs::write(root.path().join(RECOGNITION_MODEL), b"rec").unwrap();

        let store = ModelStore::new(root.path())
            .with_download(false)
            .with_recognition_model("japanese.rten");
        assert_eq!(store.missing(), vec!["japanese.rten".to_string()]);

        let err = store.ensure().await.unwrap_err();
        assert!(matches!(err, OcrError::ModelNotFound(ref p) if p.ends_with("japanese.rten")));
    }

    #[tokio::test]
    async fn test_unreachable_mirror_is_a_download_error() {
        let root = tempfile::tempdir().unwrap();
        let store = ModelStore::new(root.path()).with_base_url("http://127.0.0.1:9/");

        let err = store.ensure().await.unwrap_err();
        match err {
            OcrError::Download { url, .. } => {
                assert_eq!(url, format!("http://127.0.0.1:9/{}", DETECTION_MODEL))
            }
            other => panic!("unexpected error: {}", other),
        }
    }
}
