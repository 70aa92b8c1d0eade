//! Music service API
//!
//! Typed access to the remote generation service. [`MusicApi`] is the seam
//! the coordinator and app controller depend on; [`client::ApiClient`] is
//! the HTTP implementation.

pub mod client;
#[cfg(test)]
pub(crate) mod fake;
pub mod types;

use std::future::Future;

use types::{
    DeleteResponse, ErrorBody, GenerateRequest, LoginRequest, RegisterRequest, RegisterResponse,
    Track, TrackId, User,
};

/// Error type for API operations
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("Server error {status}: {detail}")]
    Server { status: u16, detail: String },
    #[error("Invalid response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            return Self::Network(format!("failed to read response body: {}", err));
        }
        Self::Network(err.to_string())
    }
}

impl ApiError {
    /// Build the error for a non-success status, pulling `detail` out of the
    /// body when the server sent one.
    pub fn from_status(status: u16, body: &[u8]) -> Self {
        let detail = serde_json::from_slice::<ErrorBody>(body)
            .ok()
            .and_then(|b| b.message())
            .unwrap_or_else(|| String::from_utf8_lossy(body).trim().to_string());
        Self::Server { status, detail }
    }

    /// Message for the user: the server's own detail when there is one,
    /// otherwise `fallback`.
    pub fn user_message(&self, fallback: &str) -> String {
        match self {
            Self::Server { detail, .. } if !detail.is_empty() => detail.clone(),
            _ => fallback.to_string(),
        }
    }
}

/// Operations the client performs against the music service.
pub trait MusicApi: Send + Sync {
    fn generate(&self, request: &GenerateRequest) -> impl Future<Output = Result<Track, ApiError>> + Send;

    fn list(&self) -> impl Future<Output = Result<Vec<Track>, ApiError>> + Send;

    fn delete(&self, id: TrackId) -> impl Future<Output = Result<DeleteResponse, ApiError>> + Send;

    fn register(
        &self,
        request: &RegisterRequest,
    ) -> impl Future<Output = Result<RegisterResponse, ApiError>> + Send;

    fn login(&self, request: &LoginRequest) -> impl Future<Output = Result<User, ApiError>> + Send;

    /// Direct link to a track's WAV; also used as the audio source.
    fn download_wav_url(&self, id: TrackId) -> String;
}
