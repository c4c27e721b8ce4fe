//! OCR engine implementations.
//!
//! The service talks to engines through the [`crate::engine::OcrEngine`]
//! trait; [`ocrs::OcrsEngine`] is the default and only built-in backend.

pub mod confidence;
pub mod ocrs;
