//! On-disk recording artifacts
//!
//! The dual-track audio package is the one bespoke format the recorder
//! writes; every other output is a standard media container.

pub mod package;

pub use package::{PackageError, PackageInfo, RecordingPackage, PACKAGE_EXTENSION};
