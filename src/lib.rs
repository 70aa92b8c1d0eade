//! Songloom client library
//!
//! Client side of a text-to-music generation service: the API gateway,
//! persisted login session, MIDI playback with lyric sync, the track list
//! audio coordinator, the audio output they both sound through and the page
//! router that ties them together.

pub mod api;
pub mod app;
pub mod config;
pub mod coordinator;
pub mod output;
pub mod playback;
pub mod services;
pub mod session;
pub mod shell;

pub use api::client::ApiClient;
pub use api::types::*;
pub use app::App;
pub use config::ClientConfig;
pub use coordinator::Coordinator;
pub use playback::engine::PlaybackEngine;
pub use session::SessionStore;
