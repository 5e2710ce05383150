use thiserror::Error;

#[derive(Error, Debug)]
pub enum Jp2SubsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    /// Malformed master record or an unrenderable timestamp.
    #[error("Validation error{}: {}", segment_suffix(.segment_id), .message)]
    Validation {
        segment_id: Option<u32>,
        message: String,
    },

    #[error("Translation provider error: {0}")]
    Provider(String),

    /// The provider refused the request itself (bad key, bad payload); retrying cannot help.
    #[error("Translation provider rejected the request ({status}): {message}")]
    ProviderRejected { status: u16, message: String },

    #[error("Translation provider timed out after {0}s")]
    ProviderTimeout(u64),

    #[error("Provider returned {actual} lines for {expected} input lines")]
    LineCountMismatch { expected: usize, actual: usize },

    #[error("External tool error: {0}")]
    ExternalTool(String),

    #[error("Transcription error: {0}")]
    Transcription(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Operation cancelled")]
    Cancelled,
}

impl Jp2SubsError {
    pub fn validation<S: Into<String>>(segment_id: Option<u32>, message: S) -> Self {
        Self::Validation {
            segment_id,
            message: message.into(),
        }
    }

    /// Map a non-success HTTP status from a provider. Client errors other than
    /// 408 and 429 are rejections; everything else is transient.
    pub fn from_provider_status(status: u16, message: String) -> Self {
        if (400..500).contains(&status) && status != 408 && status != 429 {
            Self::ProviderRejected { status, message }
        } else {
            Self::Provider(format!("HTTP {}: {}", status, message))
        }
    }

    /// Errors worth another provider attempt after backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Http(_) | Self::Provider(_) | Self::ProviderTimeout(_) | Self::Json(_) | Self::Io(_)
        )
    }
}

fn segment_suffix(segment_id: &Option<u32>) -> String {
    segment_id
        .map(|id| format!(" (segment {})", id))
        .unwrap_or_default()
}

pub type Result<T> = std::result::Result<T, Jp2SubsError>;
