//! Deterministic regex extraction used when the LLM backend is unavailable.
//!
//! Best-effort by design: each field has a short list of labeled patterns
//! tried in order, and anything not matched stays null. Callers see
//! `regex_fallback` provenance and can treat the values accordingly.

use super::InvoiceFields;
use once_cell::sync::Lazy;
use regex::Regex;

fn patterns(raw: &[&str]) -> Vec<Regex> {
    raw.iter()
        .map(|p| Regex::new(p).expect("invalid fallback pattern"))
        .collect()
}

static INVOICE_NUMBER: Lazy<Vec<Regex>> = Lazy::new(|| {
    patterns(&[
        r"(?i)Invoice\s*No\.?\s*[:#]?\s*([A-Za-z0-9][A-Za-z0-9/_-]*)",
        r"(?i)Invoice\s*#\s*([A-Za-z0-9][A-Za-z0-9/_-]*)",
        r"(?i)Invoice\s*Number\s*:?\s*([A-Za-z0-9][A-Za-z0-9/_-]*)",
    ])
});

static INVOICE_DATE: Lazy<Vec<Regex>> = Lazy::new(|| {
    patterns(&[
        r"(?i)Invoice\s*Date\s*:?\s*([0-9]{1,2}[-/.][0-9]{1,2}[-/.][0-9]{2,4})",
        r"(?i)Invoice\s*Date\s*:?\s*([0-9]{4}[-/.][0-9]{1,2}[-/.][0-9]{1,2})",
        r"(?i)Date\s*:\s*([0-9]{1,2}[-/.][0-9]{1,2}[-/.][0-9]{2,4})",
        r"(?i)Date\s*:\s*([0-9]{4}[-/.][0-9]{1,2}[-/.][0-9]{1,2})",
    ])
});

static TOTAL_AMOUNT: Lazy<Vec<Regex>> = Lazy::new(|| {
    patterns(&[
        r"(?i)\bTotal\s*Amount\s*:?\s*\$?\s*([0-9][0-9.,]*)",
        r"(?i)\bAmount\s*Due\s*:?\s*\$?\s*([0-9][0-9.,]*)",
        r"(?i)\bTotal\s*:?\s*\$?\s*([0-9][0-9.,]*)",
    ])
});

static TAX_AMOUNT: Lazy<Vec<Regex>> = Lazy::new(|| {
    patterns(&[
        r"(?i)\bTax\s*(?:Amount)?\s*:?\s*\$?\s*([0-9][0-9.,]*)",
        r"(?i)\bGST\s*:?\s*\$?\s*([0-9][0-9.,]*)",
        r"(?i)\bVAT\s*:?\s*\$?\s*([0-9][0-9.,]*)",
    ])
});

static VENDOR_NAME: Lazy<Vec<Regex>> = Lazy::new(|| {
    patterns(&[
        r"(?i)Vendor\s*:?\s*([A-Za-z0-9][A-Za-z0-9 &.,'-]{2,})",
        r"(?i)Seller\s*:?\s*([A-Za-z0-9][A-Za-z0-9 &.,'-]{2,})",
        r"(?i)From\s*:\s*([A-Za-z0-9][A-Za-z0-9 &.,'-]{2,})",
    ])
});

static CUSTOMER_NAME: Lazy<Vec<Regex>> = Lazy::new(|| {
    patterns(&[
        r"(?i)Bill\s*To\s*:?\s*([A-Za-z0-9][A-Za-z0-9 &.,'-]{2,})",
        r"(?i)Customer\s*:?\s*([A-Za-z0-9][A-Za-z0-9 &.,'-]{2,})",
        r"(?i)Buyer\s*:?\s*([A-Za-z0-9][A-Za-z0-9 &.,'-]{2,})",
    ])
});

/// Extract whatever labeled fields the text carries.
pub fn extract(text: &str) -> InvoiceFields {
    InvoiceFields {
        invoice_number: find_first(&INVOICE_NUMBER, text),
        invoice_date: find_first(&INVOICE_DATE, text),
        vendor_name: find_first(&VENDOR_NAME, text),
        customer_name: find_first(&CUSTOMER_NAME, text),
        total_amount: find_first(&TOTAL_AMOUNT, text),
        tax_amount: find_first(&TAX_AMOUNT, text),
    }
}

fn find_first(patterns: &[Regex], text: &str) -> Option<String> {
    patterns
        .iter()
        .find_map(|pattern| {
            pattern
                .captures(text)
                .and_then(|captures| captures.get(1))
                .map(|m| m.as_str().trim().to_string())
        })
        .filter(|value| !value.is_empty())
}
