//! Dual-track audio package read/write operations
//!
//! A package is a directory holding exactly three members:
//! - info.json: format, encoder, MP3 export flag and per-track volumes
//! - sys.<ext>: system audio track
//! - mic.<ext>: microphone track
//!
//! Readers keep unknown `info.json` keys and require all three members.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Package directory extension
pub const PACKAGE_EXTENSION: &str = "recmix";

const INFO_FILE: &str = "info.json";

/// Package-related errors
#[derive(Error, Debug)]
pub enum PackageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid package: {0}")]
    InvalidPackage(String),

    #[error("Missing required file: {0}")]
    MissingFile(String),
}

/// Contents of info.json
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageInfo {
    /// Extension shared by both audio members
    pub format: String,
    /// Codec the members were encoded with
    pub encoder: String,
    /// Whether the mixed result should be exported as MP3
    #[serde(rename = "exportMP3")]
    pub export_mp3: bool,
    pub sys_vol: f32,
    pub mic_vol: f32,
    /// Keys written by newer versions, preserved on rewrite
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl PackageInfo {
    pub fn new(format: &str, encoder: &str, export_mp3: bool, sys_vol: f32, mic_vol: f32) -> Self {
        Self {
            format: format.to_string(),
            encoder: encoder.to_string(),
            export_mp3,
            sys_vol,
            mic_vol,
            extra: serde_json::Map::new(),
        }
    }
}

/// Which audio member of a package
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageTrack {
    System,
    Microphone,
}

impl PackageTrack {
    fn stem(&self) -> &'static str {
        match self {
            PackageTrack::System => "sys",
            PackageTrack::Microphone => "mic",
        }
    }
}

/// A package read from disk
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingPackage {
    pub path: PathBuf,
    pub info: PackageInfo,
    pub sys_path: PathBuf,
    pub mic_path: PathBuf,
}

/// Path of an audio member inside a package
pub fn member_path(package_path: &Path, track: PackageTrack, format: &str) -> PathBuf {
    package_path.join(format!("{}.{}", track.stem(), format))
}

/// Write info.json into an existing package directory
pub fn write_info(package_path: &Path, info: &PackageInfo) -> Result<(), PackageError> {
    if !package_path.is_dir() {
        return Err(PackageError::InvalidPackage(
            "Path is not a directory".to_string(),
        ));
    }

    let content = serde_json::to_string_pretty(info)?;
    fs::write(package_path.join(INFO_FILE), content)?;

    tracing::debug!("Wrote package info to {:?}", package_path);
    Ok(())
}

/// Create a package from two finished audio files, moving them inside
#[cfg(test)]
pub fn write_package(
    package_path: &Path,
    info: &PackageInfo,
    sys_source: &Path,
    mic_source: &Path,
) -> Result<RecordingPackage, PackageError> {
    if !package_path.exists() {
        fs::create_dir_all(package_path)?;
    }

    let sys_path = member_path(package_path, PackageTrack::System, &info.format);
    let mic_path = member_path(package_path, PackageTrack::Microphone, &info.format);
    move_file(sys_source, &sys_path)?;
    move_file(mic_source, &mic_path)?;
    write_info(package_path, info)?;

    Ok(RecordingPackage {
        path: package_path.to_path_buf(),
        info: info.clone(),
        sys_path,
        mic_path,
    })
}

/// Read a package, requiring all three members
pub fn read_package(package_path: &Path) -> Result<RecordingPackage, PackageError> {
    if !package_path.is_dir() {
        return Err(PackageError::InvalidPackage(
            "Path is not a directory".to_string(),
        ));
    }

    let info_path = package_path.join(INFO_FILE);
    if !info_path.exists() {
        return Err(PackageError::MissingFile(INFO_FILE.to_string()));
    }

    let content = fs::read_to_string(&info_path)?;
    let info: PackageInfo = serde_json::from_str(&content)?;

    let sys_path = member_path(package_path, PackageTrack::System, &info.format);
    let mic_path = member_path(package_path, PackageTrack::Microphone, &info.format);
    for member in [&sys_path, &mic_path] {
        if !member.is_file() {
            let name = member
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            return Err(PackageError::MissingFile(name));
        }
    }

    tracing::debug!("Loaded package {:?} ({} / {})", package_path, info.format, info.encoder);

    Ok(RecordingPackage {
        path: package_path.to_path_buf(),
        info,
        sys_path,
        mic_path,
    })
}

/// Check if a path is a complete package
#[cfg(test)]
pub fn is_valid_package(path: &Path) -> bool {
    read_package(path).is_ok()
}

#[cfg(test)]
fn move_file(from: &Path, to: &Path) -> Result<(), PackageError> {
    if from == to {
        return Ok(());
    }
    if fs::rename(from, to).is_err() {
        // Source may live on another volume
        fs::copy(from, to)?;
        fs::remove_file(from)?;
    }
    Ok(())
}
