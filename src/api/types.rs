//! API types
//!
//! Request and response bodies exchanged with the music service.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Server-assigned track identifier
pub type TrackId = i64;

/// A generated track as listed by the service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: TrackId,
    #[serde(default)]
    pub prompt: String,
    #[serde(rename = "duration", default)]
    pub duration_seconds: f64,
    #[serde(default)]
    pub lyrics: Option<String>,
    #[serde(default)]
    pub genre: Option<String>,
    #[serde(default)]
    pub emotion: Option<String>,
    #[serde(default)]
    pub tempo: Option<f64>,
    #[serde(default)]
    pub scale: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

impl Track {
    pub fn new(id: TrackId, prompt: impl Into<String>, duration_seconds: f64) -> Self {
        Self {
            id,
            prompt: prompt.into(),
            duration_seconds,
            lyrics: None,
            genre: None,
            emotion: None,
            tempo: None,
            scale: None,
            created_at: None,
        }
    }

    pub fn with_lyrics(mut self, lyrics: impl Into<String>) -> Self {
        self.lyrics = Some(lyrics.into());
        self
    }

    /// Creation time, when the server sent one we can parse.
    /// Timestamps without an offset are taken as UTC.
    pub fn created_at_utc(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        let raw = self.created_at.as_deref()?;
        if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(raw) {
            return Some(dt.with_timezone(&chrono::Utc));
        }
        chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()
            .map(|naive| naive.and_utc())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Genre {
    #[default]
    Lofi,
    Pop,
    Classical,
}

impl Genre {
    pub const ALL: [Genre; 3] = [Genre::Lofi, Genre::Pop, Genre::Classical];

    pub fn as_str(&self) -> &'static str {
        match self {
            Genre::Lofi => "lofi",
            Genre::Pop => "pop",
            Genre::Classical => "classical",
        }
    }
}

impl fmt::Display for Genre {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Genre {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Genre::ALL
            .into_iter()
            .find(|g| g.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown genre '{}' (expected lofi, pop or classical)", s))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Voice {
    #[default]
    Male,
    Female,
}

impl Voice {
    pub fn as_str(&self) -> &'static str {
        match self {
            Voice::Male => "male",
            Voice::Female => "female",
        }
    }
}

impl fmt::Display for Voice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Voice {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "male" => Ok(Voice::Male),
            "female" => Ok(Voice::Female),
            other => Err(format!("unknown voice '{}' (expected male or female)", other)),
        }
    }
}

/// POST /music/generate
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerateRequest {
    pub prompt: String,
    pub genre: Genre,
    pub voice: Voice,
}

/// POST /auth/register
#[derive(Clone, Serialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

impl fmt::Debug for RegisterRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisterRequest")
            .field("username", &self.username)
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RegisterResponse {
    pub id: TrackId,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// POST /auth/login
#[derive(Clone, Serialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

impl fmt::Debug for LoginRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginRequest")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Logged-in user as returned by the service.
/// Unknown profile fields are kept so they survive a save/restore.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default)]
    pub email: String,
    #[serde(flatten)]
    pub profile: Map<String, Value>,
}

impl User {
    pub fn new(id: i64, username: Option<&str>, email: impl Into<String>) -> Self {
        Self {
            id,
            username: username.map(str::to_string),
            email: email.into(),
            profile: Map::new(),
        }
    }

    pub fn display_name(&self) -> &str {
        self.username
            .as_deref()
            .filter(|name| !name.is_empty())
            .unwrap_or("User")
    }
}

/// DELETE /music/{id}
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct DeleteResponse {
    #[serde(default)]
    pub message: Option<String>,
}

/// Error body (`{"detail": ...}`)
#[derive(Debug, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub detail: Option<Value>,
}

impl ErrorBody {
    /// Flatten `detail` into one message. String details are used as-is;
    /// validation lists are joined by their `msg` fields.
    pub fn message(&self) -> Option<String> {
        match self.detail.as_ref()? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Array(items) => {
                let parts: Vec<String> = items
                    .iter()
                    .filter_map(|item| match item {
                        Value::String(s) => Some(s.clone()),
                        Value::Object(obj) => obj.get("msg").and_then(Value::as_str).map(str::to_string),
                        _ => None,
                    })
                    .collect();
                if parts.is_empty() {
                    None
                } else {
                    Some(parts.join("; "))
                }
            }
            _ => None,
        }
    }
}
