// MIT License - Copyright (c) 2026 Peter Wright
// Error types for the Ajax cloud bridge

/// All errors that can occur in the ajax-cloud-bridge library.
///
/// Read operations against the cloud API never surface these to the
/// reconciler: they are logged and mapped to an absent/empty result.
/// Writes (arm/disarm) and setup propagate them.
#[derive(Debug, thiserror::Error)]
pub enum AjaxError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("API returned HTTP {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Failed to decode API payload: {details}")]
    Decode { details: String },

    #[error("Invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("No hubs found for this account")]
    NoHubs,

    #[error("Unknown hub: {hub_id}")]
    UnknownHub { hub_id: String },

    #[error("Invalid resource id: {id:?}")]
    InvalidId { id: String },
}

impl AjaxError {
    /// Whether this error is transient and the operation may be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            AjaxError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            AjaxError::Api { status, .. } => *status == 429 || *status >= 500,
            AjaxError::InvalidUrl(_)
            | AjaxError::Decode { .. }
            | AjaxError::InvalidConfig { .. }
            | AjaxError::NoHubs
            | AjaxError::UnknownHub { .. }
            | AjaxError::InvalidId { .. } => false,
        }
    }

    /// Whether the API reported the resource as missing.
    pub fn is_not_found(&self) -> bool {
        matches!(self, AjaxError::Api { status: 404, .. })
    }
}

pub type Result<T> = std::result::Result<T, AjaxError>;
