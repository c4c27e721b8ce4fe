//! Invoice-field extraction over a completed task's OCR text.
//!
//! The LLM backend is tried first; any failure there (including it simply
//! not being configured) drops to the deterministic regex fallback. The
//! provenance markers on the record tell callers which path produced it.

pub mod fallback;
pub mod llm;

use serde::Serialize;

/// The six invoice fields the service extracts. Missing fields stay null.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct InvoiceFields {
    pub invoice_number: Option<String>,
    pub invoice_date: Option<String>,
    pub vendor_name: Option<String>,
    pub customer_name: Option<String>,
    pub total_amount: Option<String>,
    pub tax_amount: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    AzureLlm,
    RegexFallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionStatus {
    Success,
    Fallback,
}

/// Invoice fields plus provenance, serialized flat as the `invoice_data`
/// payload of the extraction endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct InvoiceRecord {
    #[serde(flatten)]
    pub fields: InvoiceFields,
    #[serde(rename = "_extraction_method")]
    pub method: ExtractionMethod,
    #[serde(rename = "_extraction_status")]
    pub status: ExtractionStatus,
}

/// Derive an invoice record from OCR full text.
pub async fn run_extraction(extractor: &llm::AzureExtractor, text: &str) -> InvoiceRecord {
    match extractor.extract(text).await {
        Ok(fields) => InvoiceRecord {
            fields,
            method: ExtractionMethod::AzureLlm,
            status: ExtractionStatus::Success,
        },
        Err(err) => {
            tracing::warn!("LLM extraction unavailable, using regex fallback: {}", err);
            InvoiceRecord {
                fields: fallback::extract(text),
                method: ExtractionMethod::RegexFallback,
                status: ExtractionStatus::Fallback,
            }
        }
    }
}
