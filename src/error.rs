use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::models::{ErrorDetail, ErrorResponse};

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("Please upload an image of the invoice first.")]
    NoFileUploaded,

    #[error("Please enter a prompt to ask about the invoice.")]
    EmptyPrompt,

    #[error("Unsupported image type '{mime_type}'. Upload a JPG, JPEG or PNG file.")]
    UnsupportedImageType { mime_type: String },

    #[error("Upload is too large: {reason}")]
    PayloadTooLarge { reason: String },

    /// The multipart form itself could not be read.
    #[error("Malformed upload: {reason}")]
    MalformedUpload { reason: String },

    #[error("The extraction service failed: {0}")]
    Service(#[from] ServiceError),
}

/// Failures of the remote `generateContent` call.
///
/// The variants exist for logs; callers treat them all as one user-visible error.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Carries no URL; see the `From` impl below.
    #[error("request to the model failed: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("the configured API key is not a valid header value")]
    InvalidApiKey,

    #[error("model rejected the credentials ({status}): {body}")]
    Unauthorized { status: u16, body: String },

    #[error("model quota exhausted ({status}): {body}")]
    RateLimited { status: u16, body: String },

    #[error("model returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("could not decode the model reply: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("the prompt was blocked by the model ({reason})")]
    Blocked { reason: String },

    #[error("the model returned no text (finish reason: {finish_reason})")]
    EmptyAnswer { finish_reason: String },
}

impl From<reqwest::Error> for ServiceError {
    fn from(e: reqwest::Error) -> Self {
        ServiceError::Transport(e.without_url())
    }
}

impl ServiceError {
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => ServiceError::Unauthorized { status, body },
            429 => ServiceError::RateLimited { status, body },
            _ => ServiceError::Status { status, body },
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("GOOGLE_API_KEY is not set.\nExport it or add `api_key` to the config file.")]
    MissingApiKey,

    #[error("Failed to read config file '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file '{path}': {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Failed to read .env file: {source}")]
    DotEnv {
        #[source]
        source: dotenvy::Error,
    },

    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ExtractError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ExtractError::NoFileUploaded
            | ExtractError::EmptyPrompt
            | ExtractError::UnsupportedImageType { .. }
            | ExtractError::MalformedUpload { .. } => StatusCode::BAD_REQUEST,
            ExtractError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ExtractError::Service(_) => StatusCode::BAD_GATEWAY,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ExtractError::NoFileUploaded => "no_file_uploaded",
            ExtractError::EmptyPrompt => "empty_prompt",
            ExtractError::UnsupportedImageType { .. } => "unsupported_image_type",
            ExtractError::PayloadTooLarge { .. } => "payload_too_large",
            ExtractError::MalformedUpload { .. } => "malformed_upload",
            ExtractError::Service(_) => "service_error",
        }
    }

    /// Input errors are warnings for the user; only service failures are errors.
    pub fn is_input_error(&self) -> bool {
        !matches!(self, ExtractError::Service(_))
    }
}

impl IntoResponse for ExtractError {
    fn into_response(self) -> Response {
        let error_response = ErrorResponse {
            error: ErrorDetail {
                message: self.to_string(),
                r#type: if self.is_input_error() { "invalid_request_error" } else { "api_error" }
                    .to_string(),
                code: Some(self.code().to_string()),
            },
        };
        (self.status_code(), Json(error_response)).into_response()
    }
}
