//! Command line recorder
//!
//! Records a target until `q` + Enter or Ctrl-C. While recording, `p` toggles
//! pause and `s` saves the current frame.

use anyhow::{bail, Context, Result};
use clap::Parser;
use open_screenrec_lib::capture::{camera, microphone, SyntheticBackend};
use open_screenrec_lib::writer::FfmpegBackend;
use open_screenrec_lib::{
    init_tracing, CaptureTarget, Recorder, RecorderSettings, RecordingEvent, RecordingOutcome, SessionState,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser, Debug)]
#[command(name = "open-screenrec")]
#[command(version)]
#[command(about = "Record a display, windows, applications, an area, audio or a camera")]
struct Cli {
    /// Target: display:<id>, window:<id,..>, app:<bundle,..>, area:<display>:<x,y,w,h>,
    /// audio, device:<id> or camera[:<id>]
    #[arg(value_name = "TARGET", required_unless_present = "list_devices")]
    target: Option<String>,

    /// Settings file (JSON); missing keys take their defaults
    #[arg(short, long, value_name = "FILE")]
    settings: Option<PathBuf>,

    /// Output directory, overriding the settings file
    #[arg(short, long, value_name = "DIR")]
    output: Option<PathBuf>,

    /// Record generated test media instead of the real devices
    #[arg(long)]
    synthetic: bool,

    /// List cameras and microphones and exit
    #[arg(long)]
    list_devices: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    if cli.list_devices {
        print_devices();
        return Ok(());
    }

    let spec = cli.target.as_deref().unwrap_or_default();
    let Some(target) = CaptureTarget::parse(spec) else {
        bail!("Unrecognized target {:?}", spec);
    };

    let mut settings = match &cli.settings {
        Some(path) => RecorderSettings::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => RecorderSettings::default(),
    };
    if let Some(output) = cli.output {
        settings.output_dir = output;
    }

    let recorder = if cli.synthetic {
        Recorder::new(Arc::new(SyntheticBackend::new(1280, 720)), Arc::new(FfmpegBackend::new()))
    } else {
        Recorder::native()
    };

    let mut events = recorder.subscribe();
    let id = recorder.start(target, settings).await.context("starting recording")?;
    println!("Recording {} (p: pause/resume, s: save frame, q: stop)", id);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let outcome = loop {
        tokio::select! {
            line = lines.next_line() => {
                match line?.as_deref().map(str::trim) {
                    Some("p") => toggle_pause(&recorder).await?,
                    Some("s") => recorder.save_current_frame().await?,
                    Some("q") | None => break recorder.stop().await?,
                    Some(other) => println!("Unknown command {:?}", other),
                }
            }
            _ = tokio::signal::ctrl_c() => break recorder.stop().await?,
            event = events.recv() => match event {
                Ok(RecordingEvent::FrameSaved { path }) => println!("Saved frame {}", path.display()),
                Ok(RecordingEvent::StreamError(message)) => eprintln!("Stream error: {}", message),
                Ok(RecordingEvent::Completed { path, preview_png }) => {
                    break RecordingOutcome::Completed { path, preview_png };
                }
                Ok(RecordingEvent::Failed { message }) => {
                    break RecordingOutcome::Failed { message, preserved: None };
                }
                Ok(other) => tracing::debug!("Event: {:?}", other),
                Err(e) => tracing::warn!("Event stream: {}", e),
            },
        }
    };

    match outcome {
        RecordingOutcome::Completed { path, preview_png } => {
            println!("Saved {}", path.display());
            if let Some(png) = preview_png {
                println!("Preview {}", png.display());
            }
            Ok(())
        }
        RecordingOutcome::Failed { message, preserved } => {
            if let Some(path) = preserved {
                eprintln!("Recording kept at {}", path.display());
            }
            bail!("Recording failed: {}", message)
        }
    }
}

async fn toggle_pause(recorder: &Recorder) -> Result<()> {
    if recorder.state().await == SessionState::Paused {
        recorder.resume().await?;
        println!("Resumed ({} recorded)", recorder.elapsed().await);
    } else {
        recorder.pause().await?;
        println!("Paused ({} recorded)", recorder.elapsed().await);
    }
    Ok(())
}

fn print_devices() {
    println!("Cameras:");
    for device in camera::list_devices() {
        println!("  {}  {}", device.id, device.name);
    }
    println!("Microphones:");
    for device in microphone::list_devices() {
        let marker = if device.is_default { " (default)" } else { "" };
        println!("  {}{}", device.name, marker);
    }
}
