//! Still image output for saved frames and recording previews

use super::sample::{VideoFrame, BYTES_PER_PIXEL};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StillError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("PNG encode error: {0}")]
    Encoding(#[from] png::EncodingError),

    #[error("Malformed frame: {0}x{1}")]
    MalformedFrame(u32, u32),
}

/// Write a BGRA frame to `path` as an RGBA PNG
pub fn write_png(frame: &VideoFrame, path: &Path) -> Result<(), StillError> {
    if !frame.is_well_formed() {
        return Err(StillError::MalformedFrame(frame.width, frame.height));
    }

    let mut rgba = frame.packed_bytes();
    for px in rgba.chunks_exact_mut(BYTES_PER_PIXEL) {
        px.swap(0, 2);
    }

    let file = std::fs::File::create(path)?;
    let mut encoder = png::Encoder::new(BufWriter::new(file), frame.width, frame.height);
    encoder.set_color(png::ColorType::Rgba);
    encoder.set_depth(png::BitDepth::Eight);
    let mut writer = encoder.write_header()?;
    writer.write_image_data(&rgba)?;
    writer.finish()?;

    tracing::debug!("Wrote {}x{} still to {:?}", frame.width, frame.height, path);
    Ok(())
}

/// Write the preview image for a finished recording into the temp directory.
///
/// The file is kept after return; the preview consumer owns it.
pub fn write_preview(frame: &VideoFrame) -> Result<PathBuf, StillError> {
    let temp = tempfile::Builder::new()
        .prefix("open-screenrec-preview-")
        .suffix(".png")
        .tempfile()?;
    write_png(frame, temp.path())?;
    let (_, path) = temp.keep().map_err(|e| StillError::Io(e.error))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_png_round_trip_colors() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("frame.png");

        // One blue pixel and one red pixel in BGRA
        let frame = VideoFrame::packed(2, 1, vec![255, 0, 0, 255, 0, 0, 255, 255]);
        write_png(&frame, &path).unwrap();

        let decoder = png::Decoder::new(std::fs::File::open(&path).unwrap());
        let mut reader = decoder.read_info().unwrap();
        let mut buf = vec![0; reader.output_buffer_size()];
        let info = reader.next_frame(&mut buf).unwrap();

        assert_eq!((info.width, info.height), (2, 1));
        assert_eq!(info.color_type, png::ColorType::Rgba);
        assert_eq!(&buf[..8], &[0, 0, 255, 255, 255, 0, 0, 255]);
    }

    #[test]
    fn test_malformed_frame_rejected() {
        let dir = tempdir().unwrap();
        let frame = VideoFrame::packed(4, 4, vec![0; 8]);
        let result = write_png(&frame, &dir.path().join("bad.png"));
        assert!(matches!(result, Err(StillError::MalformedFrame(4, 4))));
    }

    #[test]
    fn test_preview_is_kept() {
        let frame = VideoFrame::packed(1, 1, vec![0, 0, 0, 255]);
        let path = write_preview(&frame).unwrap();
        assert!(path.exists());
        std::fs::remove_file(path).unwrap();
    }
}
