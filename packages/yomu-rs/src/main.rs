use std::io::{BufRead, Write};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufRead, AsyncWriteExt, BufReader};
use tracing_subscriber::EnvFilter;
use yomu_ocr::{AcceptancePolicy, OcrEngine, OcrsEngine};
use yomu_rs::batch;
use yomu_rs::check::run_checks;
use yomu_rs::cli::{Args, CheckArgs, Commands, ReadArgs, ShellArgs};
use yomu_rs::error::AppError;
use yomu_rs::shell::Shell;
use yomu_rs::speech::SpeechEngine;

#[tokio::main]
async fn main() {
  let args = Args::parse();
  init_tracing(args.verbose);

  if let Err(e) = run(args).await {
    eprintln!("Error: {:#}", e);
    std::process::exit(1);
  }
}

fn init_tracing(verbose: u8) {
  let level = match verbose {
    0 => "warn",
    1 => "debug",
    _ => "trace",
  };
  let filter = EnvFilter::try_from_default_env()
    .unwrap_or_else(|_| EnvFilter::new(format!("warn,yomu_rs={0},yomu_ocr={0}", level)));

  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .with_target(false)
    .init();
}

async fn run(args: Args) -> Result<()> {
  match args.command {
    Commands::Version => {
      println!("yomu {}", env!("CARGO_PKG_VERSION"));
      Ok(())
    }
    Commands::Read(read) => read_images(read).await,
    Commands::Shell(shell) => run_shell(shell).await,
    Commands::Check(check) => run_check(check).await,
  }
}

async fn read_images(args: ReadArgs) -> Result<()> {
  let inputs = batch::collect_inputs(&args.path)?;
  let options = args.batch_options();
  let store = args.models.store();

  let stdout = std::io::stdout();
  let mut out = stdout.lock();
  let summary = batch::run(
    &inputs,
    &options,
    move || async move { OcrsEngine::initialize(store).await.map_err(AppError::from) },
    &mut out,
  )
  .await
  .with_context(|| format!("failed to read {}", args.path.display()))?;
  out.flush()?;

  if summary.failed > 0 {
    bail!(
      "{} of {} images could not be read",
      summary.failed,
      summary.files
    );
  }
  Ok(())
}

async fn run_shell(args: ShellArgs) -> Result<()> {
  let store = args.models.store();
  let speech = args.speech.engine();

  let mut shell = Shell::new(
    std::io::stdout(),
    AcceptancePolicy::with_min_confidence(args.min_confidence),
  );
  shell.init_ocr(async move {
    let engine = OcrsEngine::initialize(store).await?;
    Ok::<_, AppError>(Arc::new(engine) as Arc<dyn OcrEngine>)
  });
  shell.init_speech(async move {
    speech.probe().await?;
    Ok::<_, AppError>(Arc::new(speech) as Arc<dyn SpeechEngine>)
  });

  shell
    .run(stdin_lines())
    .await
    .context("shell terminated")?;
  Ok(())
}

/// Feeds stdin through a plain thread so that a pending read never holds up
/// runtime shutdown after `quit`.
fn stdin_lines() -> impl AsyncBufRead + Unpin {
  let (mut writer, reader) = tokio::io::duplex(64 * 1024);
  let handle = tokio::runtime::Handle::current();
  std::thread::spawn(move || {
    for line in std::io::stdin().lock().lines() {
      let Ok(mut line) = line else { break };
      line.push('\n');
      if handle.block_on(writer.write_all(line.as_bytes())).is_err() {
        break;
      }
    }
  });
  BufReader::new(reader)
}

async fn run_check(args: CheckArgs) -> Result<()> {
  let report = run_checks(&args.models.store(), &args.speech.engine()).await;
  report.write_to(&mut std::io::stdout())?;

  if !report.passed() {
    bail!("required checks failed");
  }
  Ok(())
}
