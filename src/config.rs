use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "invoice-ocr-server")]
#[command(about = "Asynchronous OCR and invoice-field extraction service")]
#[command(version)]
pub struct Args {
    /// Host address to bind to
    #[arg(long, env = "OCR_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Port to listen on
    #[arg(long, env = "OCR_PORT", default_value = "5100")]
    pub port: u16,

    /// Default language for OCR (e.g. "en")
    #[arg(long, env = "OCR_DEFAULT_LANGUAGE", default_value = "en")]
    pub default_language: String,

    /// Maximum file size in bytes (default: 50MB)
    #[arg(long, env = "OCR_MAX_FILE_SIZE", default_value = "52428800")]
    pub max_file_size: usize,

    /// Directory where uploads are staged
    #[arg(long, env = "OCR_UPLOAD_DIR", default_value = "uploads")]
    pub upload_dir: PathBuf,

    /// Upper bound on a single OCR run, in seconds
    #[arg(long, env = "OCR_TIMEOUT_SECS", default_value = "300")]
    pub ocr_timeout_secs: u64,

    /// Azure OpenAI endpoint, e.g. https://myresource.openai.azure.com
    #[arg(long, env = "AZURE_OPENAI_ENDPOINT")]
    pub azure_endpoint: Option<String>,

    /// Azure OpenAI API key
    #[arg(long, env = "AZURE_OPENAI_KEY", hide_env_values = true)]
    pub azure_api_key: Option<String>,

    /// Azure OpenAI deployment name
    #[arg(long, env = "AZURE_DEPLOYMENT_NAME", default_value = "gpt-4o")]
    pub azure_deployment: String,

    /// Azure OpenAI API version
    #[arg(long, env = "AZURE_OPENAI_API_VERSION", default_value = "2024-08-01-preview")]
    pub azure_api_version: String,

    /// Upper bound on a single extraction request, in seconds
    #[arg(long, env = "EXTRACT_TIMEOUT_SECS", default_value = "60")]
    pub extract_timeout_secs: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    pub log_level: String,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub default_language: String,
    pub max_file_size: usize,
    pub upload_dir: PathBuf,
    pub ocr_timeout_secs: u64,
    pub azure: AzureConfig,
}

/// Credentials and knobs for the Azure OpenAI extraction backend.
///
/// The backend is optional: when endpoint or key is absent the extraction
/// stage falls back to regex heuristics instead of failing.
#[derive(Debug, Clone)]
pub struct AzureConfig {
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub deployment: String,
    pub api_version: String,
    pub request_timeout_secs: u64,
}

impl AzureConfig {
    pub fn is_configured(&self) -> bool {
        matches!(
            (&self.endpoint, &self.api_key),
            (Some(endpoint), Some(key)) if !endpoint.is_empty() && !key.is_empty()
        )
    }
}

impl From<Args> for Config {
    fn from(args: Args) -> Self {
        Self {
            host: args.host,
            port: args.port,
            default_language: args.default_language,
            max_file_size: args.max_file_size,
            upload_dir: args.upload_dir,
            ocr_timeout_secs: args.ocr_timeout_secs,
            azure: AzureConfig {
                endpoint: args.azure_endpoint,
                api_key: args.azure_api_key,
                deployment: args.azure_deployment,
                api_version: args.azure_api_version,
                request_timeout_secs: args.extract_timeout_secs,
            },
        }
    }
}
