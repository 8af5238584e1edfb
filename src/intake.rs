//! Image intake: validates an uploaded file before it reaches the OCR stage.

use image::ImageFormat;
use thiserror::Error;
use tracing::{debug, warn};

use crate::error::ApiError;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IntakeError {
    #[error("No file uploaded")]
    Empty,
    #[error("Unsupported image type for {0}: only JPEG and PNG are accepted")]
    UnsupportedFormat(String),
}

impl From<IntakeError> for ApiError {
    fn from(e: IntakeError) -> Self {
        ApiError::BadRequest(e.to_string())
    }
}

/// An uploaded image held in memory for the lifetime of the session.
#[derive(Debug, Clone)]
pub struct UploadedImage {
    pub filename: String,
    pub mime: &'static str,
    pub data: Vec<u8>,
}

impl UploadedImage {
    /// Validate raw upload bytes.
    ///
    /// The format is decided by the file's magic bytes; the declared
    /// content type is only compared against it for logging.
    pub fn from_upload(
        filename: Option<&str>,
        declared_mime: Option<&str>,
        data: Vec<u8>,
    ) -> Result<Self, IntakeError> {
        let display_name = filename.unwrap_or("upload");
        if data.is_empty() {
            return Err(IntakeError::Empty);
        }

        let (mime, ext) = match image::guess_format(&data) {
            Ok(ImageFormat::Png) => ("image/png", "png"),
            Ok(ImageFormat::Jpeg) => ("image/jpeg", "jpg"),
            Ok(other) => {
                debug!("Rejected {} sniffed as {:?}", display_name, other);
                return Err(IntakeError::UnsupportedFormat(display_name.to_string()));
            }
            Err(_) => return Err(IntakeError::UnsupportedFormat(display_name.to_string())),
        };

        if let Some(declared) = declared_mime {
            if declared != mime && !(declared == "image/jpg" && mime == "image/jpeg") {
                warn!(
                    "{} declared as {} but content is {}; using {}",
                    display_name, declared, mime, mime
                );
            }
        }

        let filename = match filename {
            Some(name) if !name.trim().is_empty() => name.to_string(),
            _ => format!("image.{}", ext),
        };

        Ok(Self {
            filename,
            mime,
            data,
        })
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0x0D];
    pub(crate) const JPEG_MAGIC: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0, 0x10, b'J', b'F', b'I', b'F'];

    #[test]
    fn test_accepts_png_and_jpeg() {
        let png = UploadedImage::from_upload(Some("shot.png"), Some("image/png"), PNG_MAGIC.to_vec()).unwrap();
        assert_eq!(png.mime, "image/png");
        assert_eq!(png.filename, "shot.png");

        let jpg = UploadedImage::from_upload(Some("shot.jpeg"), Some("image/jpeg"), JPEG_MAGIC.to_vec()).unwrap();
        assert_eq!(jpg.mime, "image/jpeg");
        assert_eq!(jpg.size(), JPEG_MAGIC.len());
    }

    #[test]
    fn test_rejects_empty() {
        let err = UploadedImage::from_upload(Some("a.png"), None, Vec::new()).unwrap_err();
        assert_eq!(err, IntakeError::Empty);
    }

    #[test]
    fn test_rejects_non_image_bytes() {
        let err = UploadedImage::from_upload(Some("notes.png"), Some("image/png"), b"print('hi')".to_vec())
            .unwrap_err();
        assert!(matches!(err, IntakeError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_rejects_other_image_formats() {
        let gif = b"GIF89a\x01\x00\x01\x00".to_vec();
        let err = UploadedImage::from_upload(Some("anim.gif"), Some("image/gif"), gif).unwrap_err();
        assert_eq!(err, IntakeError::UnsupportedFormat("anim.gif".to_string()));
    }

    #[test]
    fn test_content_wins_over_declared_type() {
        let img = UploadedImage::from_upload(Some("mislabeled.jpg"), Some("image/jpeg"), PNG_MAGIC.to_vec()).unwrap();
        assert_eq!(img.mime, "image/png");
    }

    #[test]
    fn test_default_filename() {
        let img = UploadedImage::from_upload(None, None, JPEG_MAGIC.to_vec()).unwrap();
        assert_eq!(img.filename, "image.jpg");
    }
}
