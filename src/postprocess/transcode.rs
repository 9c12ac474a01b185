//! MP3 transcode of finished audio recordings

use crate::writer::pool::unique_path;
use crate::writer::{MediaBackend, MediaJob};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TranscodeError {
    #[error("MP3 export failed: {0}")]
    Export(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Re-encode `input` to an `.mp3` beside it.
///
/// On success the input is removed and the MP3 path returned; on failure the
/// input is left in place. Blocking.
pub fn transcode_to_mp3(media: &dyn MediaBackend, input: &Path) -> Result<PathBuf, TranscodeError> {
    let dir = input.parent().unwrap_or_else(|| Path::new("."));
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "Recording".to_string());
    let output = unique_path(dir, &stem, "mp3");

    tracing::info!("Transcoding {:?} to MP3", input);
    let job = MediaJob::Transcode {
        input: input.to_path_buf(),
        output: output.clone(),
    };
    if let Err(e) = media.run(&job) {
        if output.exists() {
            let _ = fs::remove_file(&output);
        }
        return Err(TranscodeError::Export(e.to_string()));
    }

    fs::remove_file(input)?;
    tracing::info!("MP3 written to {:?}", output);
    Ok(output)
}
