//! OCR stage: runs the engine against a staged upload and aggregates the
//! per-page detections into one task-level result.

use crate::engine::{OcrEngine, OcrOptions, PageDetections, TextRegion};
use crate::error::ApiError;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// The result payload recorded on a completed task. Immutable once written.
#[derive(Debug, Clone, Serialize)]
pub struct OcrResults {
    pub detected_texts: Vec<TextRegion>,
    pub all_text: String,
    pub pages_processed: usize,
}

/// Flatten per-page detections into the task-level result.
///
/// `pages_processed` counts pages, including ones with no detections;
/// `all_text` joins page texts with a newline, skipping empty pages.
pub fn aggregate(pages: Vec<PageDetections>) -> OcrResults {
    let pages_processed = pages.len();
    let mut detected_texts = Vec::new();
    let mut page_texts = Vec::new();

    for page in pages {
        let page_text = page
            .regions
            .iter()
            .map(|region| region.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        if !page_text.is_empty() {
            page_texts.push(page_text);
        }
        detected_texts.extend(page.regions);
    }

    OcrResults {
        detected_texts,
        all_text: page_texts.join("\n"),
        pages_processed,
    }
}

/// Run the engine on a blocking thread, bounded by `timeout`.
///
/// Engine work is CPU-bound; a hung or slow document must not wedge the
/// runtime or leave the task in `processing` forever.
pub async fn run_ocr(
    engine: Arc<dyn OcrEngine>,
    path: PathBuf,
    options: OcrOptions,
    timeout: Duration,
) -> Result<OcrResults, ApiError> {
    let work = tokio::task::spawn_blocking(move || engine.process(&path, &options));

    match tokio::time::timeout(timeout, work).await {
        Err(_) => Err(ApiError::ProcessingError(format!(
            "OCR timed out after {}s",
            timeout.as_secs()
        ))),
        Ok(Err(join_error)) => Err(ApiError::Internal(format!(
            "OCR worker panicked: {join_error}"
        ))),
        Ok(Ok(outcome)) => outcome.map(aggregate),
    }
}
