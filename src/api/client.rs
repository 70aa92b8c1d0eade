//! API Client
//!
//! HTTP implementation of [`MusicApi`] on top of `reqwest`.

use futures_util::{Stream, StreamExt};
use reqwest::RequestBuilder;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;

use super::types::{
    DeleteResponse, GenerateRequest, LoginRequest, RegisterRequest, RegisterResponse, Track,
    TrackId, User,
};
use super::{ApiError, MusicApi};
use crate::config::ClientConfig;
use crate::playback::ByteSource;
use crate::services::path_service::PARTIAL_SUFFIX;

/// Client for the music generation service
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: &str, timeout: Option<Duration>) -> Result<Self, ApiError> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &ClientConfig) -> Result<Self, ApiError> {
        Self::new(&config.api_base_url, config.request_timeout())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn music_url(&self, path: &str) -> String {
        format!("{}/music{}", self.base_url, path)
    }

    fn auth_url(&self, path: &str) -> String {
        format!("{}/auth{}", self.base_url, path)
    }

    /// Send a request and decode a JSON body, mapping non-2xx statuses to
    /// [`ApiError::Server`].
    async fn send_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        what: &str,
    ) -> Result<T, ApiError> {
        let response = request.send().await.map_err(|e| {
            log::warn!("{} failed: {}", what, e);
            ApiError::from(e)
        })?;

        let status = response.status();
        let body = response.bytes().await?;

        if !status.is_success() {
            let err = ApiError::from_status(status.as_u16(), &body);
            log::warn!("{} failed: {}", what, err);
            return Err(err);
        }

        Ok(serde_json::from_slice(&body)?)
    }

    /// Download a track's WAV into `dir`, returning the written path.
    /// The body is streamed into a `.part` file that is renamed on completion.
    pub async fn download_wav(&self, id: TrackId, dir: &Path) -> Result<PathBuf, ApiError> {
        let url = self.download_wav_url(id);
        let target_path = dir.join(format!("track_{}.wav", id));
        let partial_path = dir.join(format!("track_{}.wav.{}", id, PARTIAL_SUFFIX));
        log::info!("Downloading {} to {:?}", url, target_path);

        tokio::fs::create_dir_all(dir).await?;

        let response = self.http.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.bytes().await.unwrap_or_default();
            return Err(ApiError::from_status(status.as_u16(), &body));
        }

        let written = save_stream(response.bytes_stream(), &partial_path, &target_path).await?;
        log::info!("Download complete: {:?} ({} bytes)", target_path, written);
        Ok(target_path)
    }
}

/// Stream `body` into `partial`, then rename it to `target`. On any failure
/// the partial file is removed before the error is returned.
async fn save_stream<S, B, E>(body: S, partial: &Path, target: &Path) -> Result<u64, ApiError>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    ApiError: From<E>,
{
    let result = async {
        let mut file = tokio::fs::File::create(partial).await?;
        let mut body = std::pin::pin!(body);
        let mut written = 0u64;
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            file.write_all(chunk.as_ref()).await?;
            written += chunk.as_ref().len() as u64;
        }
        file.flush().await?;
        drop(file);
        tokio::fs::rename(partial, target).await?;
        Ok::<_, ApiError>(written)
    }
    .await;

    if let Err(e) = &result {
        log::warn!("Download to {:?} failed: {}", target, e);
        match tokio::fs::remove_file(partial).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => log::warn!("Failed to remove partial download {:?}: {}", partial, e),
        }
    }
    result
}

impl MusicApi for ApiClient {
    async fn generate(&self, request: &GenerateRequest) -> Result<Track, ApiError> {
        log::info!(
            "Generating track (genre={}, voice={}, prompt={} chars)",
            request.genre,
            request.voice,
            request.prompt.chars().count()
        );
        let track: Track = self
            .send_json(self.http.post(self.music_url("/generate")).json(request), "Generate")
            .await?;
        log::info!("Generated track {}", track.id);
        Ok(track)
    }

    async fn list(&self) -> Result<Vec<Track>, ApiError> {
        let tracks: Option<Vec<Track>> = self
            .send_json(self.http.get(self.music_url("/")), "List tracks")
            .await?;
        let tracks = tracks.unwrap_or_default();
        log::debug!("Listed {} tracks", tracks.len());
        Ok(tracks)
    }

    async fn delete(&self, id: TrackId) -> Result<DeleteResponse, ApiError> {
        let response: DeleteResponse = self
            .send_json(self.http.delete(self.music_url(&format!("/{}", id))), "Delete track")
            .await?;
        log::info!("Deleted track {}", id);
        Ok(response)
    }

    async fn register(&self, request: &RegisterRequest) -> Result<RegisterResponse, ApiError> {
        let response: RegisterResponse = self
            .send_json(self.http.post(self.auth_url("/register")).json(request), "Register")
            .await?;
        log::info!("Registered user {}", response.id);
        Ok(response)
    }

    async fn login(&self, request: &LoginRequest) -> Result<User, ApiError> {
        let user: User = self
            .send_json(self.http.post(self.auth_url("/login")).json(request), "Login")
            .await?;
        log::info!("Logged in as user {}", user.id);
        Ok(user)
    }

    fn download_wav_url(&self, id: TrackId) -> String {
        self.music_url(&format!("/download/wav/{}", id))
    }
}

impl ByteSource for ApiClient {
    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, ApiError> {
        let response = self.http.get(url).send().await?;
        let status = response.status();
        let body = response.bytes().await?;
        if !status.is_success() {
            return Err(ApiError::from_status(status.as_u16(), &body));
        }
        log::debug!("Fetched {} bytes from {}", body.len(), url);
        Ok(body.to_vec())
    }
}
