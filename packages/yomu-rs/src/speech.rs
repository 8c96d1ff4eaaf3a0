//! Text-to-speech playback through an external synthesizer program.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::executor::CancelToken;

/// Speaking rate at a multiplier of 1.0.
pub const BASE_WORDS_PER_MINUTE: f32 = 150.0;
pub const DEFAULT_SPEECH_PROGRAM: &str = "espeak-ng";

/// Bytes of synthesizer stderr kept for error messages.
const STDERR_LIMIT: usize = 4096;

/// Rate multiplier and volume, applied when playback starts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoiceSettings {
    rate: f32,
    volume: f32,
}

impl VoiceSettings {
    pub const MIN_RATE: f32 = 0.5;
    pub const MAX_RATE: f32 = 2.0;

    pub fn new(rate: f32, volume: f32) -> Self {
        let mut voice = Self::default();
        voice.set_rate(rate);
        voice.set_volume(volume);
        voice
    }

    pub fn rate(&self) -> f32 {
        self.rate
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    /// Clamps into [0.5, 2.0] and returns the applied value.
    pub fn set_rate(&mut self, rate: f32) -> f32 {
        if rate.is_finite() {
            self.rate = rate.clamp(Self::MIN_RATE, Self::MAX_RATE);
        }
        self.rate
    }

    /// Clamps into [0.0, 1.0] and returns the applied value.
    pub fn set_volume(&mut self, volume: f32) -> f32 {
        if volume.is_finite() {
            self.volume = volume.clamp(0.0, 1.0);
        }
        self.volume
    }

    pub fn words_per_minute(&self) -> u32 {
        (BASE_WORDS_PER_MINUTE * self.rate).round() as u32
    }
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self {
            rate: 1.0,
            volume: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeechOutcome {
    Finished,
    Stopped,
}

#[derive(Debug, Error)]
pub enum SpeechError {
    #[error("speech program {program} is unavailable: {message}")]
    Unavailable { program: String, message: String },
    #[error("failed to start speech playback: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("speech playback failed: {0}")]
    Playback(String),
}

#[async_trait]
pub trait SpeechEngine: Send + Sync {
    /// Speaks `text` until it finishes or `cancel` fires.
    async fn speak(
        &self,
        text: &str,
        voice: VoiceSettings,
        cancel: CancelToken,
    ) -> Result<SpeechOutcome, SpeechError>;
}

/// Drives `espeak-ng` or any program accepting its flags.
#[derive(Debug, Clone)]
pub struct EspeakEngine {
    program: PathBuf,
    voice: Option<String>,
}

impl EspeakEngine {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            voice: None,
        }
    }

    pub fn with_voice(mut self, voice: Option<String>) -> Self {
        self.voice = voice;
        self
    }

    pub fn program(&self) -> String {
        self.program.display().to_string()
    }

    /// Runs `<program> --version` and returns its first output line.
    pub async fn probe(&self) -> Result<String, SpeechError> {
        let unavailable = |message: String| SpeechError::Unavailable {
            program: self.program(),
            message,
        };

        let output = Command::new(&self.program)
            .arg("--version")
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| unavailable(e.to_string()))?;

        if !output.status.success() {
            return Err(unavailable(format!("exited with {}", output.status)));
        }

        let version = String::from_utf8_lossy(&output.stdout)
            .lines()
            .next()
            .unwrap_or_default()
            .trim()
            .to_string();
        debug!("Speech program {} reports '{}'", self.program(), version);
        Ok(version)
    }

    /// Volume 1.0 maps to espeak's default amplitude of 100.
    fn args(&self, voice: &VoiceSettings) -> Vec<String> {
        let mut args = vec![
            "-s".to_string(),
            voice.words_per_minute().to_string(),
            "-a".to_string(),
            ((voice.volume() * 100.0).round() as u32).to_string(),
        ];
        if let Some(name) = &self.voice {
            args.push("-v".to_string());
            args.push(name.clone());
        }
        args.push("--stdin".to_string());
        args
    }
}

impl Default for EspeakEngine {
    fn default() -> Self {
        Self::new(DEFAULT_SPEECH_PROGRAM)
    }
}

#[async_trait]
impl SpeechEngine for EspeakEngine {
    async fn speak(
        &self,
        text: &str,
        voice: VoiceSettings,
        cancel: CancelToken,
    ) -> Result<SpeechOutcome, SpeechError> {
        let mut child = Command::new(&self.program)
            .args(self.args(&voice))
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(SpeechError::Spawn)?;

        // The writer runs on its own so a synthesizer that reads slowly
        // cannot hold off cancellation.
        let writer = child.stdin.take().map(|mut stdin| {
            let text = text.to_string();
            let program = self.program();
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(text.as_bytes()).await {
                    warn!("Failed to pass text to {}: {}", program, e);
                }
                // dropping stdin signals end of input
            })
        });
        let stderr = child.stderr.take().map(|stderr| tokio::spawn(drain(stderr)));

        let status = tokio::select! {
            status = child.wait() => status,
            _ = cancel.cancelled() => {
                if let Some(writer) = writer {
                    writer.abort();
                }
                if let Err(e) = child.kill().await {
                    warn!("Failed to stop {}: {}", self.program(), e);
                }
                debug!("Speech playback stopped");
                return Ok(SpeechOutcome::Stopped);
            }
        };

        if let Some(writer) = writer {
            writer.abort();
        }
        let status = status.map_err(|e| SpeechError::Playback(e.to_string()))?;
        if status.success() {
            return Ok(SpeechOutcome::Finished);
        }

        let mut message = format!("{} exited with {}", self.program(), status);
        if let Some(stderr) = stderr {
            // a leftover grandchild may keep the pipe open
            let diagnostic = tokio::time::timeout(Duration::from_millis(500), stderr).await;
            if let Ok(Ok(diagnostic)) = diagnostic {
                if !diagnostic.is_empty() {
                    message.push_str(": ");
                    message.push_str(&diagnostic);
                }
            }
        }
        Err(SpeechError::Playback(message))
    }
}

/// Reads `reader` to the end, keeping the first [`STDERR_LIMIT`] bytes.
async fn drain<R: AsyncRead + Unpin>(mut reader: R) -> String {
    let mut kept = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let room = STDERR_LIMIT.saturating_sub(kept.len());
                kept.extend_from_slice(&chunk[..n.min(room)]);
            }
        }
    }
    String::from_utf8_lossy(&kept).trim().to_string()
}
