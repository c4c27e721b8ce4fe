use crate::error::ApiError;
use serde::Serialize;
use std::path::Path;

/// A single region of text detected on a page.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TextRegion {
    pub text: String,
    pub confidence: f32,
}

/// Detections for one page of input.
#[derive(Debug, Clone, Default)]
pub struct PageDetections {
    pub regions: Vec<TextRegion>,
}

/// Per-request knobs forwarded to the engine.
#[derive(Debug, Clone)]
pub struct OcrOptions {
    pub language: String,
    pub use_gpu: bool,
}

/// Trait that OCR engines must implement.
///
/// An engine turns a file (image or PDF) into per-page text detections.
/// Aggregation into a task-level result happens in the OCR stage, not here.
pub trait OcrEngine: Send + Sync {
    /// Returns the engine identifier (e.g., "ocrs")
    fn name(&self) -> &'static str;

    /// Process a file and return detections for each page, in page order
    fn process(&self, path: &Path, options: &OcrOptions) -> Result<Vec<PageDetections>, ApiError>;

    /// Get supported MIME types
    fn supported_formats(&self) -> Vec<String>;

    /// Get supported languages
    fn supported_languages(&self) -> Vec<String>;
}
