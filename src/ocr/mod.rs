//! OCR provider abstraction.
//!
//! Defines the [`OcrProvider`] trait so the text-recognition backend can be
//! swapped (or faked in tests) without touching the handlers.

pub mod ocr_space;

use crate::error::StageResult;
use crate::intake::UploadedImage;

/// Literal shown when the service succeeds but recognises nothing.
pub const NO_TEXT_FOUND: &str = "No text found in image.";

/// Async trait implemented by each OCR backend.
///
/// Failures are returned in the `Err` arm of [`StageResult`] rather than as
/// a separate error channel: the caller stores either arm in the session.
#[async_trait::async_trait]
pub trait OcrProvider: Send + Sync {
    fn name(&self) -> &str;
    async fn extract_text(&self, image: &UploadedImage) -> StageResult;
}
