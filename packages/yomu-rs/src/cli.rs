//! Command line arguments backing the `yomu` binary.
use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;
use yomu_ocr::models::{DEFAULT_MODEL_DIR, RECOGNITION_MODEL};
use yomu_ocr::{AcceptancePolicy, Binarize, ModelStore, OutputFormat, Roi, SimpleOptions};

use crate::batch::BatchOptions;
use crate::speech::{EspeakEngine, DEFAULT_SPEECH_PROGRAM};

#[derive(Parser, Debug)]
#[command(
  name = "yomu",
  about = "Read text out of images with OCR and optionally speak it aloud",
  version
)]
pub struct Args {
  /// Increase log output (-v debug, -vv trace); RUST_LOG takes precedence
  #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
  pub verbose: u8,

  #[command(subcommand)]
  pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
  /// Print version information
  Version,
  /// Recognize text in an image, or every image under a directory
  Read(ReadArgs),
  /// Interactive shell: load, recognize, speak
  Shell(ShellArgs),
  /// Check decoders, models and the speech program
  Check(CheckArgs),
}

#[derive(ClapArgs, Debug, Clone)]
pub struct ModelArgs {
  /// Directory holding the OCR models
  #[arg(long, env = "YOMU_MODEL_DIR", default_value = DEFAULT_MODEL_DIR)]
  pub model_dir: PathBuf,

  /// Never download missing models
  #[arg(long, env = "YOMU_NO_DOWNLOAD")]
  pub no_download: bool,

  /// Recognition network: a file name in the model directory or a URL to fetch it from
  #[arg(long, env = "YOMU_RECOGNITION_MODEL", default_value = RECOGNITION_MODEL)]
  pub recognition_model: String,

  /// Characters the recognition network emits, in class order (needed for non-Latin networks)
  #[arg(long, env = "YOMU_ALPHABET")]
  pub alphabet: Option<String>,
}

impl ModelArgs {
  pub fn store(&self) -> ModelStore {
    ModelStore::new(&self.model_dir)
      .with_download(!self.no_download)
      .with_recognition_model(&self.recognition_model)
      .with_alphabet(self.alphabet.clone())
  }
}

fn parse_confidence(value: &str) -> Result<f32, String> {
  let confidence: f32 = value.parse().map_err(|e| format!("{}", e))?;
  if (0.0..=1.0).contains(&confidence) {
    Ok(confidence)
  } else {
    Err(format!("{} is not between 0 and 1", value))
  }
}

fn parse_scale(value: &str) -> Result<f32, String> {
  let scale: f32 = value.parse().map_err(|e| format!("{}", e))?;
  if (0.0..=MAX_SCALE).contains(&scale) {
    Ok(scale)
  } else {
    Err(format!("{} is not between 0 and {}", value, MAX_SCALE))
  }
}

const MAX_SCALE: f32 = 8.0;

#[derive(ClapArgs, Debug, Clone)]
pub struct SpeechArgs {
  /// espeak-ng compatible program used for speech
  #[arg(long, env = "YOMU_SPEECH_PROGRAM", default_value = DEFAULT_SPEECH_PROGRAM)]
  pub speech_program: PathBuf,

  /// Voice name passed to the speech program
  #[arg(long, env = "YOMU_VOICE")]
  pub voice: Option<String>,
}

impl SpeechArgs {
  pub fn engine(&self) -> EspeakEngine {
    EspeakEngine::new(&self.speech_program).with_voice(self.voice.clone())
  }
}

#[derive(ClapArgs, Debug)]
pub struct ReadArgs {
  /// Image file or directory of images
  pub path: PathBuf,

  /// Region of interest as x,y,width,height
  #[arg(long, env = "YOMU_ROI")]
  pub roi: Option<Roi>,

  /// Skip preprocessing and recognize the image as loaded
  #[arg(long)]
  pub no_preprocess: bool,

  /// Gaussian blur kernel size (even sizes are rounded up, 1 disables)
  #[arg(long, env = "YOMU_BLUR", default_value_t = 3)]
  pub blur: u32,

  /// Resize factor applied before recognition, up to 8 (0 or 1 disables)
  #[arg(long, env = "YOMU_SCALE", default_value_t = 2.0, value_parser = parse_scale)]
  pub scale: f32,

  /// Binarization: none, otsu or adaptive
  #[arg(long, env = "YOMU_THRESHOLD", default_value_t = Binarize::None)]
  pub threshold: Binarize,

  /// Lines scoring below this confidence (0 to 1) are dropped. The ocrs engine
  /// does not score lines, so every line counts as 0.5 and the threshold
  /// either keeps or drops everything
  #[arg(
    long,
    env = "YOMU_MIN_CONFIDENCE",
    default_value_t = AcceptancePolicy::DEFAULT_MIN_CONFIDENCE,
    value_parser = parse_confidence
  )]
  pub min_confidence: f32,

  /// Output format: annotated, lines, joined or json
  #[arg(long, short = 'f', env = "YOMU_FORMAT", default_value_t = OutputFormat::Lines)]
  pub format: OutputFormat,

  /// Write the preprocessed image here for inspection
  #[arg(long, env = "YOMU_DEBUG_IMAGE")]
  pub debug_image: Option<PathBuf>,

  #[command(flatten)]
  pub models: ModelArgs,
}

impl ReadArgs {
  pub fn batch_options(&self) -> BatchOptions {
    BatchOptions {
      roi: self.roi,
      preprocess: !self.no_preprocess,
      simple: SimpleOptions {
        blur_kernel: self.blur,
        scale: self.scale,
        binarize: self.threshold,
      },
      policy: AcceptancePolicy::with_min_confidence(self.min_confidence),
      format: self.format,
      debug_image: self.debug_image.clone(),
    }
  }
}

#[derive(ClapArgs, Debug)]
pub struct ShellArgs {
  /// Lines scoring below this confidence (0 to 1) are dropped. The ocrs engine
  /// does not score lines, so every line counts as 0.5 and the threshold
  /// either keeps or drops everything
  #[arg(
    long,
    env = "YOMU_MIN_CONFIDENCE",
    default_value_t = AcceptancePolicy::DEFAULT_MIN_CONFIDENCE,
    value_parser = parse_confidence
  )]
  pub min_confidence: f32,

  #[command(flatten)]
  pub models: ModelArgs,

  #[command(flatten)]
  pub speech: SpeechArgs,
}

#[derive(ClapArgs, Debug)]
pub struct CheckArgs {
  #[command(flatten)]
  pub models: ModelArgs,

  #[command(flatten)]
  pub speech: SpeechArgs,
}
