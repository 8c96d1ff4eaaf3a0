//! Line-oriented interactive front end.
//!
//! The loop reads one command per line and is the only code that mutates the
//! [`Session`]. Engine start-up, recognition and playback run on background
//! tasks and report back through an unbounded channel; the loop applies each
//! completion only if it still belongs to the latest request.

use std::future::Future;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use image::GenericImageView;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use yomu_ocr::recognition::NO_TEXT_MESSAGE;
use yomu_ocr::{
    accept, fit_within, save_image, AcceptancePolicy, OcrEngine, OcrInput, Pipeline, Recognition,
};

use crate::error::{AppError, Result};
use crate::executor::SingleFlight;
use crate::session::{Applied, ImageSource, LoadedImage, Session};
use crate::speech::{SpeechEngine, SpeechError, SpeechOutcome};

/// Longest side of an exported preview.
pub const PREVIEW_MAX_SIDE: u32 = 400;
pub const DEFAULT_PREVIEW_PATH: &str = "preview.png";

const HELP: &str = "\
commands:
  load <path>          load an image and preprocess it
  recognize            read text from the preprocessed image
  recognize-original   read text from the image as loaded
  preview [path]       export a small preview of the preprocessed image
  speak                read the recognized text aloud
  stop                 stop speaking
  clear                clear the recognized text
  rate <0.5-2.0>       set the speaking rate multiplier
  volume <0.0-1.0>     set the speaking volume
  text                 print the recognized text
  status               show the session state
  wait                 wait for running work to finish
  help                 show this help
  quit                 leave the shell";

/// Completion messages sent from background tasks to the shell loop.
pub enum Event {
    OcrReady(Result<Arc<dyn OcrEngine>>),
    SpeechReady(Result<Arc<dyn SpeechEngine>>),
    /// `result` is `None` when the job was cancelled before finishing.
    Recognized {
        id: u64,
        source: ImageSource,
        result: Option<Result<Recognition>>,
    },
    SpeechDone {
        id: u64,
        result: Result<SpeechOutcome, SpeechError>,
    },
}

enum EngineSlot<T: ?Sized> {
    Initializing,
    Ready(Arc<T>),
    Failed(String),
}

impl<T: ?Sized> EngineSlot<T> {
    fn get(&self, kind: &'static str) -> Result<Arc<T>> {
        match self {
            EngineSlot::Ready(engine) => Ok(Arc::clone(engine)),
            EngineSlot::Initializing => Err(AppError::EngineNotReady(kind)),
            EngineSlot::Failed(_) => Err(AppError::EngineUnavailable(kind)),
        }
    }

    fn describe(&self) -> String {
        match self {
            EngineSlot::Ready(_) => "ready".to_string(),
            EngineSlot::Initializing => "initializing".to_string(),
            EngineSlot::Failed(reason) => format!("unavailable ({})", reason),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Wait,
    Quit,
}

pub struct Shell<W: Write> {
    session: Session,
    pipeline: Pipeline,
    ocr: EngineSlot<dyn OcrEngine>,
    speech: EngineSlot<dyn SpeechEngine>,
    recognizer: SingleFlight,
    speaker: SingleFlight,
    events_tx: mpsc::UnboundedSender<Event>,
    events_rx: Option<mpsc::UnboundedReceiver<Event>>,
    pending: usize,
    out: W,
}

impl<W: Write> Shell<W> {
    /// Creates a shell with both engines still initializing.
    pub fn new(out: W, policy: AcceptancePolicy) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            session: Session::new(policy),
            pipeline: Pipeline::enhanced(),
            ocr: EngineSlot::Initializing,
            speech: EngineSlot::Initializing,
            recognizer: SingleFlight::new("recognition"),
            speaker: SingleFlight::new("speech"),
            events_tx,
            events_rx: Some(events_rx),
            pending: 0,
            out,
        }
    }

    pub fn with_pipeline(mut self, pipeline: Pipeline) -> Self {
        self.pipeline = pipeline;
        self
    }

    pub fn set_ocr_engine(&mut self, engine: Arc<dyn OcrEngine>) {
        self.ocr = EngineSlot::Ready(engine);
    }

    pub fn set_speech_engine(&mut self, engine: Arc<dyn SpeechEngine>) {
        self.speech = EngineSlot::Ready(engine);
    }

    /// Starts OCR engine initialization in the background.
    pub fn init_ocr<F>(&mut self, init: F)
    where
        F: Future<Output = Result<Arc<dyn OcrEngine>>> + Send + 'static,
    {
        self.ocr = EngineSlot::Initializing;
        self.spawn_event(async move { Event::OcrReady(init.await) });
    }

    /// Starts speech engine initialization in the background.
    pub fn init_speech<F>(&mut self, init: F)
    where
        F: Future<Output = Result<Arc<dyn SpeechEngine>>> + Send + 'static,
    {
        self.speech = EngineSlot::Initializing;
        self.spawn_event(async move { Event::SpeechReady(init.await) });
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn into_output(self) -> W {
        self.out
    }

    fn spawn_event<F>(&mut self, job: F)
    where
        F: Future<Output = Event> + Send + 'static,
    {
        let tx = self.events_tx.clone();
        self.pending += 1;
        tokio::spawn(async move {
            let _ = tx.send(job.await);
        });
    }

    /// Processes commands from `input` until `quit` or end of input.
    ///
    /// At end of input the shell waits for running work before returning;
    /// `quit` returns immediately and cancels it.
    pub async fn run<R>(&mut self, input: R) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut events = match self.events_rx.take() {
            Some(events) => events,
            None => return Ok(()),
        };
        let result = self.run_loop(input, &mut events).await;
        self.events_rx = Some(events);
        self.recognizer.cancel();
        self.speaker.cancel();
        result
    }

    async fn run_loop<R>(
        &mut self,
        input: R,
        events: &mut mpsc::UnboundedReceiver<Event>,
    ) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = input.lines();
        writeln!(self.out, "status: yomu shell ready, type 'help' for commands")?;

        loop {
            tokio::select! {
                line = lines.next_line() => match line? {
                    Some(line) => match self.execute(&line).await? {
                        Flow::Continue => {}
                        Flow::Wait => self.drain(events).await?,
                        Flow::Quit => return Ok(()),
                    },
                    None => {
                        debug!("End of input, waiting for {} pending jobs", self.pending);
                        return self.drain(events).await;
                    }
                },
                Some(event) = events.recv() => self.handle_event(event)?,
            }
        }
    }

    async fn drain(&mut self, events: &mut mpsc::UnboundedReceiver<Event>) -> Result<()> {
        while self.pending > 0 {
            match events.recv().await {
                Some(event) => self.handle_event(event)?,
                None => break,
            }
        }
        self.out.flush()?;
        Ok(())
    }

    async fn execute(&mut self, line: &str) -> Result<Flow> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return Ok(Flow::Continue);
        }
        let (command, arg) = match line.split_once(char::is_whitespace) {
            Some((command, arg)) => (command, arg.trim()),
            None => (line, ""),
        };
        debug!("Command '{}' arg '{}'", command, arg);

        match command {
            "load" => self.load(arg).await?,
            "recognize" => self.recognize(ImageSource::Processed)?,
            "recognize-original" => self.recognize(ImageSource::Original)?,
            "preview" => self.preview(arg).await?,
            "speak" => self.speak()?,
            "stop" => self.stop()?,
            "clear" => {
                self.session.clear_text();
                writeln!(self.out, "status: text cleared")?;
            }
            "rate" => self.set_voice("rate", arg)?,
            "volume" => self.set_voice("volume", arg)?,
            "text" => self.print_text()?,
            "status" => self.status()?,
            "wait" => return Ok(Flow::Wait),
            "help" => writeln!(self.out, "{}", HELP)?,
            "quit" | "exit" => return Ok(Flow::Quit),
            other => writeln!(
                self.out,
                "error: unknown command '{}', type 'help' for commands",
                other
            )?,
        }
        Ok(Flow::Continue)
    }

    /// Prints `err` as a warning when the user can fix it by another command.
    fn report(&mut self, err: &AppError) -> Result<()> {
        match err {
            AppError::NoImage | AppError::EngineNotReady(_) | AppError::NothingToRead => {
                writeln!(self.out, "warning: {}", err)?
            }
            _ => writeln!(self.out, "error: {}", err)?,
        }
        Ok(())
    }

    async fn load(&mut self, arg: &str) -> Result<()> {
        if arg.is_empty() {
            writeln!(self.out, "warning: usage: load <path>")?;
            return Ok(());
        }

        let path = PathBuf::from(arg);
        let pipeline = self.pipeline.clone();
        let opened = tokio::task::spawn_blocking(move || {
            let loaded = LoadedImage::open(&path, &pipeline)?;
            let size = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
            Ok::<_, AppError>((loaded, size))
        })
        .await
        .unwrap_or_else(|e| Err(AppError::Io(std::io::Error::other(e))));

        match opened {
            Ok((loaded, size)) => {
                self.recognizer.cancel();
                let loaded = self.session.replace_image(loaded);
                let (width, height) = loaded.original.dimensions();
                let name = loaded.file_name();
                info!("Loaded {} ({} bytes, {}x{})", name, size, width, height);
                writeln!(self.out, "status: loaded {} ({}x{})", name, width, height)?;
            }
            Err(e) => self.report(&e)?,
        }
        Ok(())
    }

    fn recognize(&mut self, source: ImageSource) -> Result<()> {
        let started = self
            .ocr
            .get("OCR")
            .and_then(|engine| Ok((engine, self.session.begin_recognition(source)?)));
        let (engine, ticket) = match started {
            Ok(started) => started,
            Err(e) => return self.report(&e),
        };

        let tx = self.events_tx.clone();
        let id = ticket.id;
        self.pending += 1;
        self.recognizer.replace(move |token| async move {
            let input = OcrInput::Pixels(ticket.image);
            let result = tokio::select! {
                output = engine.recognize(&input) => Some(
                    output
                        .map(|output| accept(output.regions, &ticket.policy))
                        .map_err(AppError::from),
                ),
                _ = token.cancelled() => None,
            };
            let _ = tx.send(Event::Recognized {
                id,
                source: ticket.source,
                result,
            });
        });

        let label = match source {
            ImageSource::Processed => "preprocessed",
            ImageSource::Original => "original",
        };
        writeln!(self.out, "status: recognizing {} image...", label)?;
        Ok(())
    }

    async fn preview(&mut self, arg: &str) -> Result<()> {
        let Some(loaded) = self.session.image() else {
            return self.report(&AppError::NoImage);
        };
        let processed = loaded.processed.clone();
        let path = if arg.is_empty() {
            PathBuf::from(DEFAULT_PREVIEW_PATH)
        } else {
            PathBuf::from(arg)
        };

        let target = path.clone();
        let written = tokio::task::spawn_blocking(move || {
            let preview = fit_within(&processed, PREVIEW_MAX_SIDE);
            save_image(&preview, &target).map(|_| preview.dimensions())
        })
        .await
        .map_err(|e| AppError::Io(std::io::Error::other(e)))?;

        match written {
            Ok((width, height)) => writeln!(
                self.out,
                "status: preview written to {} ({}x{})",
                path.display(),
                width,
                height
            )?,
            Err(e) => self.report(&AppError::from(e))?,
        }
        Ok(())
    }

    fn speak(&mut self) -> Result<()> {
        let started = self
            .speech
            .get("speech")
            .and_then(|engine| Ok((engine, self.session.begin_speech()?)));
        let (engine, ticket) = match started {
            Ok(started) => started,
            Err(e) => return self.report(&e),
        };

        let tx = self.events_tx.clone();
        let id = ticket.id;
        self.pending += 1;
        self.speaker.replace(move |token| async move {
            let result = engine.speak(&ticket.text, ticket.voice, token).await;
            let _ = tx.send(Event::SpeechDone { id, result });
        });

        let voice = ticket.voice;
        writeln!(
            self.out,
            "status: speaking (rate {:.2}, volume {:.2})",
            voice.rate(),
            voice.volume()
        )?;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if self.speaker.cancel() {
            writeln!(self.out, "status: speech stopped")?;
        } else {
            writeln!(self.out, "status: nothing is playing")?;
        }
        Ok(())
    }

    fn set_voice(&mut self, setting: &str, arg: &str) -> Result<()> {
        let value: f32 = match arg.parse() {
            Ok(value) if f32::is_finite(value) => value,
            _ => {
                writeln!(self.out, "error: invalid {} '{}'", setting, arg)?;
                return Ok(());
            }
        };

        let voice = self.session.voice_mut();
        let applied = match setting {
            "rate" => voice.set_rate(value),
            _ => voice.set_volume(value),
        };
        if applied != value {
            writeln!(self.out, "warning: {} clamped to {:.2}", setting, applied)?;
        }
        writeln!(self.out, "status: {} set to {:.2}", setting, applied)?;
        Ok(())
    }

    fn print_text(&mut self) -> Result<()> {
        if self.session.text().is_empty() {
            writeln!(self.out, "{}", NO_TEXT_MESSAGE)?;
        } else {
            let text = self.session.text().trim_end().to_string();
            writeln!(self.out, "{}", text)?;
        }
        Ok(())
    }

    fn status(&mut self) -> Result<()> {
        let image = match self.session.image() {
            Some(loaded) => {
                let (width, height) = loaded.original.dimensions();
                format!("{} ({}x{})", loaded.file_name(), width, height)
            }
            None => "none".to_string(),
        };
        let lines = self.session.recognition().map(|r| r.accepted()).unwrap_or(0);
        let voice = self.session.voice();
        let policy = self.session.policy();
        let busy = |flight: &SingleFlight| if flight.is_busy() { "running" } else { "idle" };

        writeln!(self.out, "status: image {}", image)?;
        writeln!(self.out, "status: OCR engine {}", self.ocr.describe())?;
        writeln!(self.out, "status: speech engine {}", self.speech.describe())?;
        writeln!(
            self.out,
            "status: recognition {}, speech {}",
            busy(&self.recognizer),
            busy(&self.speaker)
        )?;
        writeln!(
            self.out,
            "status: {} lines shown, minimum confidence {:.2}",
            lines, policy.min_confidence
        )?;
        writeln!(
            self.out,
            "status: rate {:.2} ({} wpm), volume {:.2}",
            voice.rate(),
            voice.words_per_minute(),
            voice.volume()
        )?;
        Ok(())
    }

    fn handle_event(&mut self, event: Event) -> Result<()> {
        self.pending = self.pending.saturating_sub(1);

        match event {
            Event::OcrReady(Ok(engine)) => {
                self.ocr = EngineSlot::Ready(engine);
                writeln!(self.out, "status: OCR engine ready")?;
            }
            Event::OcrReady(Err(e)) => {
                warn!("OCR engine failed to initialize: {}", e);
                writeln!(self.out, "error: OCR engine failed to initialize: {}", e)?;
                self.ocr = EngineSlot::Failed(e.to_string());
            }
            Event::SpeechReady(Ok(engine)) => {
                self.speech = EngineSlot::Ready(engine);
                writeln!(self.out, "status: speech engine ready")?;
            }
            Event::SpeechReady(Err(e)) => {
                warn!("Speech engine unavailable: {}", e);
                writeln!(self.out, "warning: speech unavailable: {}", e)?;
                self.speech = EngineSlot::Failed(e.to_string());
            }
            Event::Recognized {
                id, result: None, ..
            } => debug!("Recognition {} cancelled", id),
            Event::Recognized {
                id,
                source,
                result: Some(Ok(recognition)),
            } => {
                let summary = recognition.summary();
                if self.session.complete_recognition(id, recognition) == Applied::Applied {
                    info!("Recognition {} of {:?} image: {}", id, source, summary);
                    writeln!(self.out, "status: {}", summary)?;
                    self.print_text()?;
                }
            }
            Event::Recognized {
                id,
                result: Some(Err(e)),
                ..
            } => {
                if self.session.is_current(id) {
                    writeln!(self.out, "error: recognition failed: {}", e)?;
                } else {
                    debug!("Ignoring failure of stale recognition {}: {}", id, e);
                }
            }
            Event::SpeechDone { id, result } => {
                if !self.session.is_current_speech(id) {
                    debug!("Ignoring completion of replaced playback {}", id);
                    return Ok(());
                }
                match result {
                    Ok(SpeechOutcome::Finished) => writeln!(self.out, "status: finished speaking")?,
                    Ok(SpeechOutcome::Stopped) => debug!("Playback {} stopped", id),
                    Err(e) => writeln!(self.out, "error: {}", e)?,
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::CancelToken;
    use crate::speech::VoiceSettings;
    use async_trait::async_trait;
    use image::{DynamicImage, Rgb, RgbImage};
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use yomu_ocr::{OcrError, OcrOutput, TextRegion};

    struct FixedEngine(Vec<TextRegion>);

    #[async_trait]
    impl OcrEngine for FixedEngine {
        async fn recognize(&self, _input: &OcrInput) -> Result<OcrOutput, OcrError> {
            Ok(OcrOutput::from_regions(self.0.clone()))
        }
    }

    #[derive(Default)]
    struct CountingSpeech {
        spoken: parking_lot::Mutex<Vec<String>>,
        stopped: AtomicUsize,
    }

    #[async_trait]
    impl SpeechEngine for CountingSpeech {
        async fn speak(
            &self,
            text: &str,
            _voice: VoiceSettings,
            cancel: CancelToken,
        ) -> Result<SpeechOutcome, SpeechError> {
            self.spoken.lock().push(text.to_string());
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(50)) => Ok(SpeechOutcome::Finished),
                _ = cancel.cancelled() => {
                    self.stopped.fetch_add(1, Ordering::SeqCst);
                    Ok(SpeechOutcome::Stopped)
                }
            }
        }
    }

    fn write_sample(dir: &Path) -> PathBuf {
        let path = dir.join("page.png");
        DynamicImage::ImageRgb8(RgbImage::from_pixel(16, 8, Rgb([255, 255, 255])))
            .save(&path)
            .unwrap();
        path
    }

    fn shell_with_engines() -> Shell<Vec<u8>> {
        let mut shell = Shell::new(Vec::new(), AcceptancePolicy::default());
        shell.set_ocr_engine(Arc::new(FixedEngine(vec![
            TextRegion::new("Hello", Some(0.9)),
            TextRegion::new("x", Some(0.05)),
        ])));
        shell
    }

    async fn run_script(shell: &mut Shell<Vec<u8>>, script: &str) {
        shell.run(script.as_bytes()).await.unwrap();
    }

    fn output(shell: Shell<Vec<u8>>) -> String {
        String::from_utf8(shell.into_output()).unwrap()
    }

    #[tokio::test]
    async fn test_load_recognize_and_show_text() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_sample(dir.path());
        let mut shell = shell_with_engines();

        run_script(
            &mut shell,
            &format!("load {}\nrecognize\nwait\ntext\n", path.display()),
        )
        .await;

        assert_eq!(shell.session().text(), "Hello (信頼度: 0.90)\n");
        let printed = output(shell);
        assert!(printed.contains("status: loaded page.png (16x8)"));
        assert!(printed.contains("status: 1 text lines detected, average confidence 0.90"));
        assert!(printed.contains("Hello (信頼度: 0.90)"));
        assert!(!printed.contains("x (信頼度"));
    }

    #[tokio::test]
    async fn test_missing_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let mut shell = shell_with_engines();
        run_script(
            &mut shell,
            &format!("load {}\n", dir.path().join("missing.png").display()),
        )
        .await;

        assert!(shell.session().image().is_none());
        assert!(output(shell).contains("error: image file not found"));
    }

    #[tokio::test]
    async fn test_recognize_without_image_warns() {
        let mut shell = shell_with_engines();
        run_script(&mut shell, "recognize\n").await;
        assert!(output(shell).contains("warning: no image loaded"));
    }

    #[tokio::test]
    async fn test_requests_before_engine_ready_are_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_sample(dir.path());
        let mut shell = Shell::new(Vec::new(), AcceptancePolicy::default());

        run_script(
            &mut shell,
            &format!("load {}\nrecognize\nspeak\n", path.display()),
        )
        .await;

        let printed = output(shell);
        assert!(printed.contains("warning: the OCR engine is still initializing"));
        assert!(printed.contains("warning: the speech engine is still initializing"));
    }

    #[tokio::test]
    async fn test_failed_engine_init_is_reported() {
        let mut shell = Shell::new(Vec::new(), AcceptancePolicy::default());
        shell.init_ocr(async {
            Err::<Arc<dyn OcrEngine>, _>(AppError::Ocr(OcrError::ModelNotFound(PathBuf::from(
                "models/text-detection.rten",
            ))))
        });
        run_script(&mut shell, "wait\nstatus\n").await;

        let printed = output(shell);
        assert!(printed.contains("error: OCR engine failed to initialize"));
        assert!(printed.contains("status: OCR engine unavailable"));
    }

    #[tokio::test]
    async fn test_clear_then_speak_has_nothing_to_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_sample(dir.path());
        let mut shell = shell_with_engines();
        let speech = Arc::new(CountingSpeech::default());
        shell.set_speech_engine(speech.clone());

        run_script(
            &mut shell,
            &format!("load {}\nrecognize\nwait\nclear\nspeak\n", path.display()),
        )
        .await;

        assert_eq!(shell.session().text(), "");
        assert!(speech.spoken.lock().is_empty());
        assert!(output(shell).contains("warning: nothing to read"));
    }

    #[tokio::test]
    async fn test_speak_reads_displayed_text() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_sample(dir.path());
        let mut shell = shell_with_engines();
        let speech = Arc::new(CountingSpeech::default());
        shell.set_speech_engine(speech.clone());

        run_script(
            &mut shell,
            &format!("load {}\nrecognize\nwait\nspeak\nwait\n", path.display()),
        )
        .await;

        assert_eq!(*speech.spoken.lock(), vec!["Hello (信頼度: 0.90)\n".to_string()]);
        assert!(output(shell).contains("status: finished speaking"));
    }

    #[tokio::test]
    async fn test_stop_halts_playback_without_error() {
        struct EndlessSpeech;

        #[async_trait]
        impl SpeechEngine for EndlessSpeech {
            async fn speak(
                &self,
                _text: &str,
                _voice: VoiceSettings,
                cancel: CancelToken,
            ) -> Result<SpeechOutcome, SpeechError> {
                cancel.cancelled().await;
                Ok(SpeechOutcome::Stopped)
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let path = write_sample(dir.path());
        let mut shell = shell_with_engines();
        shell.set_speech_engine(Arc::new(EndlessSpeech));

        let script = format!("load {}\nrecognize\nwait\nspeak\nstop\n", path.display());
        tokio::time::timeout(Duration::from_secs(5), shell.run(script.as_bytes()))
            .await
            .expect("stop did not end playback")
            .unwrap();

        let printed = output(shell);
        assert!(printed.contains("status: speech stopped"));
        assert!(!printed.contains("error:"));
    }

    #[tokio::test]
    async fn test_new_speech_replaces_running_one() {
        let mut shell = shell_with_engines();
        let speech = Arc::new(CountingSpeech::default());
        shell.set_speech_engine(speech.clone());
        let dir = tempfile::tempdir().unwrap();
        let path = write_sample(dir.path());

        run_script(
            &mut shell,
            &format!("load {}\nrecognize\nwait\nspeak\nspeak\nwait\n", path.display()),
        )
        .await;

        assert_eq!(speech.spoken.lock().len(), 2);
        assert_eq!(speech.stopped.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_load_discards_running_recognition() {
        struct SlowEngine;

        #[async_trait]
        impl OcrEngine for SlowEngine {
            async fn recognize(&self, _input: &OcrInput) -> Result<OcrOutput, OcrError> {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok(OcrOutput::from_regions(vec![TextRegion::new("late", Some(0.9))]))
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let path = write_sample(dir.path());
        let mut shell = Shell::new(Vec::new(), AcceptancePolicy::default());
        shell.set_ocr_engine(Arc::new(SlowEngine));

        run_script(
            &mut shell,
            &format!("load {0}\nrecognize\nload {0}\nwait\n", path.display()),
        )
        .await;

        assert_eq!(shell.session().text(), "");
        assert!(!output(shell).contains("late"));
    }

    #[tokio::test]
    async fn test_voice_settings_are_clamped() {
        let mut shell = shell_with_engines();
        run_script(&mut shell, "rate 3\nvolume 0.25\nrate fast\n").await;

        let voice = shell.session().voice();
        assert_eq!(voice.rate(), 2.0);
        assert_eq!(voice.volume(), 0.25);
        let printed = output(shell);
        assert!(printed.contains("warning: rate clamped to 2.00"));
        assert!(printed.contains("error: invalid rate 'fast'"));
    }

    #[tokio::test]
    async fn test_preview_export() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_sample(dir.path());
        let preview = dir.path().join("preview.png");
        let mut shell = shell_with_engines();

        run_script(
            &mut shell,
            &format!("load {}\npreview {}\n", path.display(), preview.display()),
        )
        .await;

        assert!(preview.is_file());
        assert!(output(shell).contains("status: preview written to"));
    }

    #[tokio::test]
    async fn test_quit_and_unknown_commands() {
        let mut shell = shell_with_engines();
        run_script(&mut shell, "frobnicate\nquit\nstatus\n").await;
        let printed = output(shell);
        assert!(printed.contains("error: unknown command 'frobnicate'"));
        assert!(!printed.contains("status: image"));
    }
}
