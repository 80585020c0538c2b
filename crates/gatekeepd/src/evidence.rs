//! Evidence images attached to facial decisions.

use image::ImageFormat;
use std::io::Cursor;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EvidenceError {
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
}

/// Load a captured frame and re-encode it as a JPEG no larger than
/// `max_dim` on its longest side.
pub fn encode_jpeg(path: &Path, max_dim: u32) -> Result<Vec<u8>, EvidenceError> {
    let frame = image::open(path)?;
    let bounded = if frame.width() > max_dim || frame.height() > max_dim {
        frame.thumbnail(max_dim, max_dim)
    } else {
        frame
    };
    // JPEG has no alpha channel.
    let rgb = image::DynamicImage::ImageRgb8(bounded.to_rgb8());

    let mut out = Cursor::new(Vec::new());
    rgb.write_to(&mut out, ImageFormat::Jpeg)?;
    Ok(out.into_inner())
}

/// Like [`encode_jpeg`] but never fails the caller: evidence is best effort.
pub fn load_evidence(path: Option<&Path>, max_dim: u32) -> Option<Vec<u8>> {
    let path = path?;
    match encode_jpeg(path, max_dim) {
        Ok(bytes) => Some(bytes),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "could not encode evidence frame");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};

    fn temp_frame(width: u32, height: u32) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("gatekeep-frame-{}.png", uuid::Uuid::new_v4()));
        let img = GrayImage::from_fn(width, height, |x, y| Luma([((x + y) % 256) as u8]));
        img.save(&path).unwrap();
        path
    }

    #[test]
    fn test_encodes_bounded_jpeg() {
        let path = temp_frame(640, 360);
        let bytes = encode_jpeg(&path, 320).unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);

        let decoded = image::load_from_memory(&bytes).unwrap();
        assert_eq!(decoded.width(), 320);
        assert_eq!(decoded.height(), 180);
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_small_frame_keeps_size() {
        let path = temp_frame(100, 80);
        let decoded = image::load_from_memory(&encode_jpeg(&path, 320).unwrap()).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (100, 80));
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_missing_frame_yields_no_evidence() {
        assert!(load_evidence(Some(Path::new("/nonexistent/frame.png")), 320).is_none());
        assert!(load_evidence(None, 320).is_none());
    }
}
