use serde_json::Value;

use crate::api::types::User;

/// What the profile page shows, with defaults for fields the service
/// does not send yet.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileView {
    pub display_name: String,
    pub email: String,
    pub active_since: String,
    pub tracks_created: u64,
    pub preferred_genre: String,
    pub preferred_voice: String,
    pub last_track: String,
}

fn text_field(user: &User, key: &str) -> Option<String> {
    match user.profile.get(key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

impl ProfileView {
    pub fn from_user(user: &User) -> Self {
        Self {
            display_name: user.display_name().to_string(),
            email: user.email.clone(),
            active_since: text_field(user, "createdAt").unwrap_or_else(|| "2026".to_string()),
            tracks_created: user
                .profile
                .get("tracksCreated")
                .and_then(Value::as_u64)
                .unwrap_or(0),
            preferred_genre: text_field(user, "preferredGenre").unwrap_or_else(|| "Lofi".to_string()),
            preferred_voice: text_field(user, "preferredVoice")
                .unwrap_or_else(|| "Male Voice".to_string()),
            last_track: text_field(user, "lastTrack")
                .unwrap_or_else(|| "No track generated yet".to_string()),
        }
    }

    pub fn render(&self) -> String {
        let mut out = format!(
            "{}\n{}\nActive Since: {}\n\nTracks Created: {}\nPreferred Genre: {}\nVoice Type: {}\n\nLast Generated Track: {}",
            self.display_name,
            self.email,
            self.active_since,
            self.tracks_created,
            self.preferred_genre,
            self.preferred_voice,
            self.last_track
        );
        if self.tracks_created == 0 {
            out.push_str("\nNo tracks created yet. Start generating music!");
        }
        out
    }
}
