//! In-process stand-in for the music service.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use super::types::{
    DeleteResponse, GenerateRequest, LoginRequest, RegisterRequest, RegisterResponse, Track,
    TrackId, User,
};
use super::{ApiError, MusicApi};
use crate::playback::ByteSource;

pub const BASE_URL: &str = "http://fake.local";

#[derive(Debug, Default)]
pub struct FakeState {
    pub tracks: Vec<Track>,
    pub next_id: TrackId,
    /// email -> (password, user)
    pub accounts: HashMap<String, (String, User)>,
    pub files: HashMap<String, Vec<u8>>,
    pub generated: Vec<GenerateRequest>,
    pub calls: Vec<String>,
    pub fail_generate: bool,
    pub fail_list: bool,
    pub fail_delete: bool,
    pub offline: bool,
}

#[derive(Debug, Default)]
pub struct FakeApi {
    state: Mutex<FakeState>,
}

fn offline() -> ApiError {
    ApiError::Network("connection refused".to_string())
}

impl FakeApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tracks(tracks: Vec<Track>) -> Self {
        let api = Self::new();
        {
            let mut state = api.state();
            state.next_id = tracks.iter().map(|t| t.id).max().unwrap_or(0);
            state.tracks = tracks;
        }
        api
    }

    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn add_account(&self, user: User, password: &str) {
        self.state()
            .accounts
            .insert(user.email.clone(), (password.to_string(), user));
    }

    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }
}

impl MusicApi for FakeApi {
    async fn generate(&self, request: &GenerateRequest) -> Result<Track, ApiError> {
        let mut state = self.state();
        state.calls.push("generate".to_string());
        state.generated.push(request.clone());
        if state.offline {
            return Err(offline());
        }
        if state.fail_generate {
            return Err(ApiError::Server {
                status: 500,
                detail: "Music generation failed".to_string(),
            });
        }
        state.next_id += 1;
        let mut track = Track::new(state.next_id, request.prompt.clone(), 30.0)
            .with_lyrics(format!("{}\nla la la", request.prompt));
        track.genre = Some(request.genre.to_string());
        state.tracks.push(track.clone());
        Ok(track)
    }

    async fn list(&self) -> Result<Vec<Track>, ApiError> {
        let mut state = self.state();
        state.calls.push("list".to_string());
        if state.offline || state.fail_list {
            return Err(offline());
        }
        Ok(state.tracks.clone())
    }

    async fn delete(&self, id: TrackId) -> Result<DeleteResponse, ApiError> {
        let mut state = self.state();
        state.calls.push(format!("delete {}", id));
        if state.offline || state.fail_delete {
            return Err(offline());
        }
        let before = state.tracks.len();
        state.tracks.retain(|t| t.id != id);
        if state.tracks.len() == before {
            return Err(ApiError::Server {
                status: 404,
                detail: "Music not found".to_string(),
            });
        }
        Ok(DeleteResponse {
            message: Some("Music deleted successfully".to_string()),
        })
    }

    async fn register(&self, request: &RegisterRequest) -> Result<RegisterResponse, ApiError> {
        let mut state = self.state();
        state.calls.push("register".to_string());
        if state.offline {
            return Err(offline());
        }
        if state.accounts.contains_key(&request.email) {
            return Err(ApiError::Server {
                status: 400,
                detail: "Email already registered".to_string(),
            });
        }
        let id = state.accounts.len() as i64 + 1;
        let user = User::new(id, Some(request.username.as_str()), request.email.clone());
        state
            .accounts
            .insert(request.email.clone(), (request.password.clone(), user));
        Ok(RegisterResponse {
            id,
            username: Some(request.username.clone()),
            email: Some(request.email.clone()),
            message: Some("User registered successfully".to_string()),
        })
    }

    async fn login(&self, request: &LoginRequest) -> Result<User, ApiError> {
        let mut state = self.state();
        state.calls.push("login".to_string());
        if state.offline {
            return Err(offline());
        }
        match state.accounts.get(&request.email) {
            Some((password, user)) if *password == request.password => Ok(user.clone()),
            _ => Err(ApiError::Server {
                status: 400,
                detail: "Invalid email or password".to_string(),
            }),
        }
    }

    fn download_wav_url(&self, id: TrackId) -> String {
        format!("{}/music/download/wav/{}", BASE_URL, id)
    }
}

impl ByteSource for FakeApi {
    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, ApiError> {
        let mut state = self.state();
        state.calls.push(format!("fetch {}", url));
        if state.offline {
            return Err(offline());
        }
        state.files.get(url).cloned().ok_or_else(|| ApiError::Server {
            status: 404,
            detail: "Not Found".to_string(),
        })
    }
}
