//! MIDI playback with lyric sync
//!
//! A fetched MIDI file is decoded into [`midi::Note`]s, scheduled against a
//! transport clock and sounded by a [`synth::Synth`], while a fixed-cadence
//! timer walks through the lyric lines.

pub mod engine;
pub mod lyrics;
pub mod midi;
pub mod synth;
pub mod transport;

use std::future::Future;

use crate::api::ApiError;

/// Typed playback errors
#[derive(Debug, thiserror::Error)]
pub enum PlaybackError {
    #[error("Failed to fetch MIDI: {0}")]
    Fetch(#[from] ApiError),
    #[error("Failed to decode MIDI: {0}")]
    Decode(String),
    #[error("Audio engine unavailable: {0}")]
    AudioEngine(String),
    #[error("Failed to write audio: {0}")]
    Render(String),
}

impl From<midly::Error> for PlaybackError {
    fn from(err: midly::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

/// Where MIDI bytes come from.
pub trait ByteSource: Send + Sync + 'static {
    fn fetch_bytes(&self, url: &str) -> impl Future<Output = Result<Vec<u8>, ApiError>> + Send;
}
