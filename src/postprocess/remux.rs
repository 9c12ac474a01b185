//! Audio track remux
//!
//! Mixes every audio track of a finished recording into one track:
//! 1. export the mixed audio into a temporary `.m4a` next to the recording
//! 2. compose the original video (if any) with the exported audio into a
//!    second temporary file, stream copied
//! 3. replace the recording with the composition
//!
//! The recording is only replaced after step 2 succeeded. Temporaries are
//! removed on every path.

use crate::recorder::config::AudioFormat;
use crate::writer::{MediaBackend, MediaJob};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RemuxError {
    #[error("Remux needs at least 2 audio tracks, found {0}")]
    InsufficientTracks(usize),

    #[error("{stage} failed: {message}")]
    Export { stage: &'static str, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Merge the audio tracks of `path` in place.
///
/// `volumes` holds one gain per audio track, in track order. The mix is
/// always AAC, whatever the recorded track format. Blocking.
pub fn remux_audio_tracks(
    media: &dyn MediaBackend,
    path: &Path,
    has_video: bool,
    volumes: &[f32],
) -> Result<(), RemuxError> {
    if volumes.len() < 2 {
        return Err(RemuxError::InsufficientTracks(volumes.len()));
    }
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let extension = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    tracing::info!("Remuxing {} audio tracks of {:?}", volumes.len(), path);

    let mixed = tempfile::Builder::new()
        .prefix(".mixdown-")
        .suffix(".m4a")
        .tempfile_in(dir)?
        .into_temp_path();
    media
        .run(&MediaJob::MixdownAudio {
            input: path.to_path_buf(),
            volumes: volumes.to_vec(),
            format: AudioFormat::Aac,
            output: mixed.to_path_buf(),
        })
        .map_err(|e| RemuxError::Export {
            stage: "audio export",
            message: e.to_string(),
        })?;

    let composed = tempfile::Builder::new()
        .prefix(".remux-")
        .suffix(&extension)
        .tempfile_in(dir)?
        .into_temp_path();
    media
        .run(&MediaJob::Compose {
            video: has_video.then(|| path.to_path_buf()),
            audio: mixed.to_path_buf(),
            output: composed.to_path_buf(),
        })
        .map_err(|e| RemuxError::Export {
            stage: "composition export",
            message: e.to_string(),
        })?;

    composed.persist(path).map_err(|e| RemuxError::Io(e.error))?;
    tracing::info!("Remux complete: {:?}", path);
    Ok(())
}
