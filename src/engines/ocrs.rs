//! Default OCR engine wrapping the ocrs library.
//!
//! Pure Rust, no system dependencies; neural network models are downloaded
//! automatically on first use. PDFs with embedded text skip the OCR pass
//! entirely; scanned PDFs are processed page by page from their image
//! XObjects so the task result keeps a faithful page count.

use super::confidence::score_region;
use crate::engine::{OcrEngine, OcrOptions, PageDetections, TextRegion};
use crate::error::ApiError;
use image::DynamicImage;
use lopdf::{Dictionary, Document, Object, ObjectId};
use ocrs::{DecodeMethod, ImageSource, OcrEngine as OcrsOcrEngine, OcrEngineParams};
use rten::Model;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

/// Default model URLs from the ocrs project
const DETECTION_MODEL_URL: &str =
    "https://ocrs-models.s3-accelerate.amazonaws.com/text-detection.rten";
const RECOGNITION_MODEL_URL: &str =
    "https://ocrs-models.s3-accelerate.amazonaws.com/text-recognition.rten";

/// Confidence assigned to text lifted directly out of a born-digital PDF.
const DIRECT_TEXT_CONFIDENCE: f32 = 0.95;

/// Minimum trimmed length for direct PDF text to count as meaningful.
const DIRECT_TEXT_THRESHOLD: usize = 10;

pub struct OcrsEngine {
    engine: OcrsOcrEngine,
}

impl OcrsEngine {
    /// Create the engine, downloading models if needed.
    pub fn new() -> Result<Self, ApiError> {
        tracing::info!("Initializing ocrs OCR engine...");

        let detection_model_path =
            ensure_model_downloaded(DETECTION_MODEL_URL, "text-detection.rten")?;
        let recognition_model_path =
            ensure_model_downloaded(RECOGNITION_MODEL_URL, "text-recognition.rten")?;

        let detection_model = Model::load_file(&detection_model_path).map_err(|e| {
            ApiError::InitializationError(format!("Failed to load detection model: {}", e))
        })?;
        let recognition_model = Model::load_file(&recognition_model_path).map_err(|e| {
            ApiError::InitializationError(format!("Failed to load recognition model: {}", e))
        })?;

        let engine = OcrsOcrEngine::new(OcrEngineParams {
            detection_model: Some(detection_model),
            recognition_model: Some(recognition_model),
            decode_method: DecodeMethod::Greedy,
            ..Default::default()
        })
        .map_err(|e| {
            ApiError::InitializationError(format!("Failed to create OCR engine: {}", e))
        })?;

        tracing::info!("ocrs engine initialized successfully");

        Ok(Self { engine })
    }

    /// Run detection and recognition over one page image.
    fn detect_page(&self, img: &DynamicImage) -> Result<PageDetections, ApiError> {
        let rgb = img.to_rgb8();
        let dimensions = rgb.dimensions();

        let source = ImageSource::from_bytes(rgb.as_raw(), dimensions).map_err(|e| {
            ApiError::ProcessingError(format!("Failed to create image source: {}", e))
        })?;

        let input = self
            .engine
            .prepare_input(source)
            .map_err(|e| ApiError::ProcessingError(format!("Failed to prepare input: {}", e)))?;

        let word_rects = self
            .engine
            .detect_words(&input)
            .map_err(|e| ApiError::ProcessingError(format!("Failed to detect words: {}", e)))?;

        let line_rects = self.engine.find_text_lines(&input, &word_rects);

        let line_texts = self
            .engine
            .recognize_text(&input, &line_rects)
            .map_err(|e| ApiError::ProcessingError(format!("Failed to recognize text: {}", e)))?;

        let regions = line_texts
            .iter()
            .filter_map(|line| line.as_ref())
            .map(|line| {
                let text = line
                    .words()
                    .map(|word| word.to_string())
                    .collect::<Vec<_>>()
                    .join(" ");
                let confidence = score_region(&text);
                TextRegion { text, confidence }
            })
            .filter(|region| !region.text.is_empty())
            .collect();

        Ok(PageDetections { regions })
    }

    fn process_image_file(&self, path: &Path) -> Result<Vec<PageDetections>, ApiError> {
        let img = image::open(path)
            .map_err(|e| ApiError::ProcessingError(format!("Failed to load image: {}", e)))?;
        Ok(vec![self.detect_page(&img)?])
    }

    fn process_pdf(&self, path: &Path) -> Result<Vec<PageDetections>, ApiError> {
        // Born-digital PDFs carry their text; no OCR pass needed.
        let page_texts = pdf_extract::extract_text_by_pages(path)
            .map_err(|e| ApiError::ProcessingError(format!("Failed to parse PDF: {}", e)))?;

        let total_chars: usize = page_texts.iter().map(|text| text.trim().len()).sum();
        if total_chars > DIRECT_TEXT_THRESHOLD {
            tracing::info!(
                "Extracted {} chars of embedded text from {} PDF pages",
                total_chars,
                page_texts.len()
            );
            return Ok(page_texts.iter().map(|text| direct_text_page(text)).collect());
        }

        tracing::info!("PDF has no embedded text, extracting page images for OCR");
        let doc = Document::load(path)
            .map_err(|e| ApiError::ProcessingError(format!("Failed to load PDF: {}", e)))?;

        let mut pages = Vec::new();
        for (page_no, page_id) in doc.get_pages() {
            let mut regions = Vec::new();
            for img in page_images(&doc, page_id) {
                match self.detect_page(&img) {
                    Ok(mut detected) => regions.append(&mut detected.regions),
                    Err(e) => {
                        tracing::warn!("Failed to OCR image on page {}: {}", page_no, e);
                    }
                }
            }
            pages.push(PageDetections { regions });
        }

        Ok(pages)
    }
}

impl OcrEngine for OcrsEngine {
    fn name(&self) -> &'static str {
        "ocrs"
    }

    fn process(&self, path: &Path, options: &OcrOptions) -> Result<Vec<PageDetections>, ApiError> {
        if options.use_gpu {
            tracing::debug!("GPU acceleration requested but not available for the ocrs engine");
        }
        if options.language != "en" {
            tracing::warn!(
                "Language '{}' not supported by the ocrs engine, recognizing as English",
                options.language
            );
        }

        if is_pdf(path)? {
            return self.process_pdf(path);
        }
        self.process_image_file(path)
    }

    fn supported_formats(&self) -> Vec<String> {
        vec![
            "image/png".to_string(),
            "image/jpeg".to_string(),
            "image/bmp".to_string(),
            "image/webp".to_string(),
            "image/tiff".to_string(),
            "application/pdf".to_string(),
        ]
    }

    fn supported_languages(&self) -> Vec<String> {
        // ocrs currently only supports English/Latin alphabet
        vec!["en".to_string()]
    }
}

/// One region per non-empty line of embedded PDF text.
fn direct_text_page(text: &str) -> PageDetections {
    let regions = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| TextRegion {
            text: line.to_string(),
            confidence: DIRECT_TEXT_CONFIDENCE,
        })
        .collect();
    PageDetections { regions }
}

/// Check if a file is a PDF by extension or magic bytes
fn is_pdf(path: &Path) -> Result<bool, ApiError> {
    if let Some(ext) = path.extension() {
        if ext.to_string_lossy().to_lowercase() == "pdf" {
            return Ok(true);
        }
    }

    let mut file = File::open(path)
        .map_err(|e| ApiError::ProcessingError(format!("Failed to open file: {}", e)))?;

    let mut magic = [0u8; 5];
    if file.read_exact(&mut magic).is_ok() {
        return Ok(&magic == b"%PDF-");
    }

    Ok(false)
}

/// Decode the image XObjects referenced by one page's resources.
fn page_images(doc: &Document, page_id: ObjectId) -> Vec<DynamicImage> {
    let mut images = Vec::new();

    let (resources, resource_ids) = match doc.get_page_resources(page_id) {
        Ok(found) => found,
        Err(e) => {
            tracing::warn!("Failed to resolve page resources: {}", e);
            return images;
        }
    };

    let mut xobject_ids = Vec::new();
    if let Some(dict) = resources {
        collect_xobject_ids(dict, &mut xobject_ids);
    }
    for id in resource_ids {
        if let Ok(dict) = doc.get_object(id).and_then(Object::as_dict) {
            collect_xobject_ids(dict, &mut xobject_ids);
        }
    }

    for id in xobject_ids {
        let stream = match doc.get_object(id).and_then(Object::as_stream) {
            Ok(stream) => stream,
            Err(_) => continue,
        };
        let is_image = stream
            .dict
            .get(b"Subtype")
            .and_then(Object::as_name)
            .map(|name| name == b"Image")
            .unwrap_or(false);
        if !is_image {
            continue;
        }
        match decode_image_stream(doc, stream) {
            Ok(img) => images.push(img),
            Err(e) => {
                tracing::warn!("Failed to decode image XObject {:?}: {}", id, e);
            }
        }
    }

    images
}

fn collect_xobject_ids(resources: &Dictionary, out: &mut Vec<ObjectId>) {
    if let Ok(xobjects) = resources.get(b"XObject").and_then(Object::as_dict) {
        for (_name, value) in xobjects.iter() {
            if let Ok(id) = value.as_reference() {
                out.push(id);
            }
        }
    }
}

/// Decode a raw image stream into a [`DynamicImage`].
///
/// Supports the 8-bit color spaces that show up in scanned invoices:
/// DeviceGray, DeviceRGB/ICCBased, and DeviceCMYK (converted to RGB).
fn decode_image_stream(doc: &Document, stream: &lopdf::Stream) -> Result<DynamicImage, ApiError> {
    let width = stream
        .dict
        .get(b"Width")
        .ok()
        .and_then(|w| w.as_i64().ok())
        .ok_or_else(|| ApiError::ProcessingError("Missing image width".to_string()))?
        as u32;

    let height = stream
        .dict
        .get(b"Height")
        .ok()
        .and_then(|h| h.as_i64().ok())
        .ok_or_else(|| ApiError::ProcessingError("Missing image height".to_string()))?
        as u32;

    let bits_per_component = stream
        .dict
        .get(b"BitsPerComponent")
        .ok()
        .and_then(|b| b.as_i64().ok())
        .unwrap_or(8);
    if bits_per_component != 8 {
        return Err(ApiError::ProcessingError(format!(
            "Unsupported bit depth: {}",
            bits_per_component
        )));
    }

    let data = stream
        .decompressed_content()
        .map_err(|e| ApiError::ProcessingError(format!("Failed to decompress image: {}", e)))?;

    let color_space = resolve_color_space(doc, stream);

    match color_space.as_str() {
        "DeviceGray" => {
            let expected = (width * height) as usize;
            if data.len() < expected {
                return Err(ApiError::ProcessingError(format!(
                    "Truncated grayscale data: {} < {}",
                    data.len(),
                    expected
                )));
            }
            image::GrayImage::from_raw(width, height, data)
                .map(DynamicImage::ImageLuma8)
                .ok_or_else(|| {
                    ApiError::ProcessingError("Invalid grayscale image data".to_string())
                })
        }
        "DeviceRGB" | "ICCBased" => {
            let expected = (width * height * 3) as usize;
            if data.len() < expected {
                return Err(ApiError::ProcessingError(format!(
                    "Truncated RGB data: {} < {}",
                    data.len(),
                    expected
                )));
            }
            image::RgbImage::from_raw(width, height, data)
                .map(DynamicImage::ImageRgb8)
                .ok_or_else(|| ApiError::ProcessingError("Invalid RGB image data".to_string()))
        }
        "DeviceCMYK" => {
            let expected = (width * height * 4) as usize;
            if data.len() < expected {
                return Err(ApiError::ProcessingError(format!(
                    "Truncated CMYK data: {} < {}",
                    data.len(),
                    expected
                )));
            }
            let mut rgb_data = Vec::with_capacity((width * height * 3) as usize);
            for chunk in data.chunks_exact(4) {
                let c = chunk[0] as f32 / 255.0;
                let m = chunk[1] as f32 / 255.0;
                let y = chunk[2] as f32 / 255.0;
                let k = chunk[3] as f32 / 255.0;
                rgb_data.push(((1.0 - c) * (1.0 - k) * 255.0) as u8);
                rgb_data.push(((1.0 - m) * (1.0 - k) * 255.0) as u8);
                rgb_data.push(((1.0 - y) * (1.0 - k) * 255.0) as u8);
            }
            image::RgbImage::from_raw(width, height, rgb_data)
                .map(DynamicImage::ImageRgb8)
                .ok_or_else(|| {
                    ApiError::ProcessingError("Invalid CMYK->RGB conversion".to_string())
                })
        }
        other => Err(ApiError::ProcessingError(format!(
            "Unsupported color space: {}",
            other
        ))),
    }
}

/// Get the color space name from a stream, resolving indirect references
/// and array forms like `[/ICCBased ref]`.
fn resolve_color_space(doc: &Document, stream: &lopdf::Stream) -> String {
    let cs_obj = match stream.dict.get(b"ColorSpace") {
        Ok(obj) => obj,
        Err(_) => return "DeviceRGB".to_string(),
    };

    fn name_of(object: &Object) -> Option<String> {
        if let Ok(name) = object.as_name() {
            return Some(String::from_utf8_lossy(name).to_string());
        }
        if let Ok(array) = object.as_array() {
            if let Some(first) = array.first() {
                if let Ok(name) = first.as_name() {
                    return Some(String::from_utf8_lossy(name).to_string());
                }
            }
        }
        None
    }

    if let Some(name) = name_of(cs_obj) {
        return name;
    }

    if let Ok(reference) = cs_obj.as_reference() {
        if let Ok(resolved) = doc.get_object(reference) {
            if let Some(name) = name_of(resolved) {
                return name;
            }
        }
    }

    "DeviceRGB".to_string()
}

/// Ensure a model is downloaded and return its path
fn ensure_model_downloaded(url: &str, filename: &str) -> Result<std::path::PathBuf, ApiError> {
    let cache_dir = dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("invoice-ocr-server");

    std::fs::create_dir_all(&cache_dir).map_err(|e| {
        ApiError::InitializationError(format!("Failed to create cache directory: {}", e))
    })?;

    let model_path = cache_dir.join(filename);

    if !model_path.exists() {
        tracing::info!("Downloading {} (this may take a moment)...", filename);
        download_file(url, &model_path)?;
        tracing::info!("Downloaded {} to {:?}", filename, model_path);
    } else {
        tracing::info!("Using cached model from {:?}", model_path);
    }

    Ok(model_path)
}

/// Download a file from URL to path using ureq
fn download_file(url: &str, path: &Path) -> Result<(), ApiError> {
    let response = ureq::get(url)
        .call()
        .map_err(|e| ApiError::InitializationError(format!("Failed to download model: {}", e)))?;

    let mut file = File::create(path).map_err(|e| {
        ApiError::InitializationError(format!("Failed to create model file: {}", e))
    })?;

    let buffer = response.into_body().read_to_vec().map_err(|e| {
        ApiError::InitializationError(format!("Failed to read response body: {}", e))
    })?;

    file.write_all(&buffer)
        .map_err(|e| ApiError::InitializationError(format!("Failed to write model file: {}", e)))?;

    Ok(())
}
