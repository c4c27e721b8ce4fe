//! Asynchronous OCR and invoice-field extraction service.
//!
//! Submissions return a task id immediately while OCR runs in the
//! background; callers poll status, fetch the recorded result, and then
//! request structured invoice extraction over it. The OCR engine and the
//! LLM backend sit behind seams so either can be swapped or stubbed.

pub mod config;
pub mod engine;
pub mod engines;
pub mod error;
pub mod extract;
pub mod ocr;
pub mod registry;
pub mod server;
