//! Azure OpenAI chat-completions client for structured extraction.

use super::InvoiceFields;
use crate::config::AzureConfig;
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("LLM backend is not configured")]
    NotConfigured,

    #[error("LLM request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("LLM returned an unusable completion: {0}")]
    BadCompletion(String),
}

pub struct AzureExtractor {
    http: reqwest::Client,
    config: AzureConfig,
}

impl AzureExtractor {
    pub fn new(config: AzureConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.config.is_configured()
    }

    /// Ask the deployment for the six invoice fields as strict JSON.
    pub async fn extract(&self, text: &str) -> Result<InvoiceFields, ExtractError> {
        let (endpoint, api_key) = match (&self.config.endpoint, &self.config.api_key) {
            (Some(endpoint), Some(key)) if !endpoint.is_empty() && !key.is_empty() => {
                (endpoint, key)
            }
            _ => return Err(ExtractError::NotConfigured),
        };

        let url = completions_url(endpoint, &self.config.deployment, &self.config.api_version);
        let payload = json!({
            "messages": [{"role": "user", "content": build_prompt(text)}],
            "temperature": 0.0,
            "response_format": {"type": "json_object"},
        });

        let response = self
            .http
            .post(url)
            .header("api-key", api_key)
            .timeout(Duration::from_secs(self.config.request_timeout_secs))
            .json(&payload)
            .send()
            .await?
            .error_for_status()?;

        let body: Value = response.json().await?;
        let content = body
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .ok_or_else(|| ExtractError::BadCompletion("missing message content".to_string()))?;

        parse_fields(content)
    }
}

fn completions_url(endpoint: &str, deployment: &str, api_version: &str) -> String {
    format!(
        "{}/openai/deployments/{}/chat/completions?api-version={}",
        endpoint.trim_end_matches('/'),
        deployment,
        api_version
    )
}

fn build_prompt(text: &str) -> String {
    format!(
        "You are an information extraction assistant. Given OCR text from an invoice, \
         extract the following fields as concise strings. If missing, return null. \
         Fields: Invoice Number, Invoice Date, Vendor Name, Customer Name, Total Amount, Tax Amount.\n\n\
         OCR Text:\n{}\n\n\
         Return strict JSON with keys: invoice_number, invoice_date, vendor_name, \
         customer_name, total_amount, tax_amount.",
        text
    )
}

/// Parse the completion into fields, salvaging the JSON object from
/// completions that wrap it in prose or code fences.
fn parse_fields(content: &str) -> Result<InvoiceFields, ExtractError> {
    let value: Value = match serde_json::from_str(content) {
        Ok(value) => value,
        Err(_) => {
            let start = content.find('{');
            let end = content.rfind('}');
            match (start, end) {
                (Some(start), Some(end)) if start < end => {
                    serde_json::from_str(&content[start..=end])
                        .map_err(|e| ExtractError::BadCompletion(e.to_string()))?
                }
                _ => {
                    return Err(ExtractError::BadCompletion(
                        "no JSON object in completion".to_string(),
                    ))
                }
            }
        }
    };

    Ok(InvoiceFields {
        invoice_number: field(&value, "invoice_number"),
        invoice_date: field(&value, "invoice_date"),
        vendor_name: field(&value, "vendor_name"),
        customer_name: field(&value, "customer_name"),
        total_amount: field(&value, "total_amount"),
        tax_amount: field(&value, "tax_amount"),
    })
}

fn field(value: &Value, key: &str) -> Option<String> {
    match value.get(key) {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}
