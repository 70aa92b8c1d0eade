//! List/Audio Coordinator
//!
//! Owns the track list and one [`slot::AudioSlot`] per track, and keeps at
//! most one of those slots playing at a time. Slots are created the first
//! time a track is played and live until the track leaves the list or the
//! coordinator is disposed.

pub mod slot;

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::api::types::{Track, TrackId};
use crate::api::{ApiError, MusicApi};
use slot::{AudioSlot, SlotEvent, SlotFactory};

#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error("Track {0} is not in the list")]
    UnknownTrack(TrackId),
    #[error("Audio playback failed: {0}")]
    Slot(String),
    #[error(transparent)]
    Api(#[from] ApiError),
}

/// What a toggle left the track doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Toggle {
    Playing,
    Stopped,
}

pub struct Coordinator<A> {
    api: Arc<A>,
    factory: Box<dyn SlotFactory>,
    tracks: Vec<Track>,
    slots: HashMap<TrackId, Box<dyn AudioSlot>>,
    /// Track currently marked as playing, with the epoch of that play
    playing: Option<(TrackId, u64)>,
    epoch: u64,
    open_lyrics: Option<TrackId>,
    events_tx: UnboundedSender<SlotEvent>,
    events_rx: UnboundedReceiver<SlotEvent>,
}

impl<A: MusicApi> Coordinator<A> {
    pub fn new(api: Arc<A>, factory: impl SlotFactory + 'static) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            api,
            factory: Box::new(factory),
            tracks: Vec::new(),
            slots: HashMap::new(),
            playing: None,
            epoch: 0,
            open_lyrics: None,
            events_tx,
            events_rx,
        }
    }

    /// Play `id` from `source_url`, or stop it if it is the one playing.
    ///
    /// Starting a track pauses and rewinds whichever other slot is playing.
    pub fn toggle(&mut self, id: TrackId, source_url: &str) -> Result<Toggle, CoordinatorError> {
        self.drain_events();

        if self.playing_id() == Some(id) {
            if let Some(slot) = self.slots.get_mut(&id) {
                slot.pause();
                slot.rewind();
            }
            self.playing = None;
            log::info!("Stopped track {}", id);
            return Ok(Toggle::Stopped);
        }

        let track = self
            .tracks
            .iter()
            .find(|t| t.id == id)
            .ok_or(CoordinatorError::UnknownTrack(id))?;

        for (other, slot) in self.slots.iter_mut() {
            if *other != id && slot.is_playing() {
                slot.pause();
                slot.rewind();
                log::debug!("Paused track {} for track {}", other, id);
            }
        }
        self.playing = None;

        let factory = &self.factory;
        let events = &self.events_tx;
        let slot = self
            .slots
            .entry(id)
            .or_insert_with(|| factory.create(track, events.clone()));
        if slot.source().is_none() {
            slot.set_source(source_url);
        }

        self.epoch += 1;
        slot.play(self.epoch)?;
        self.playing = Some((id, self.epoch));
        log::info!("Playing track {}", id);
        Ok(Toggle::Playing)
    }

    /// Toggle using the track's WAV download link as the source.
    pub fn toggle_track(&mut self, id: TrackId) -> Result<Toggle, CoordinatorError> {
        let url = self.api.download_wav_url(id);
        self.toggle(id, &url)
    }

    /// Ask the service to delete `id`, then reload the list.
    ///
    /// On failure the list is left exactly as it was.
    pub async fn delete(&mut self, id: TrackId) -> Result<(), CoordinatorError> {
        if let Err(e) = self.api.delete(id).await {
            log::warn!("Failed to delete track {}: {}", id, e);
            return Err(e.into());
        }
        log::info!("Deleted track {}", id);
        self.refresh().await?;
        Ok(())
    }

    /// Replace the list with the service's current one.
    pub async fn refresh(&mut self) -> Result<&[Track], CoordinatorError> {
        let tracks = match self.api.list().await {
            Ok(tracks) => tracks,
            Err(e) => {
                log::warn!("Failed to refresh track list: {}", e);
                return Err(e.into());
            }
        };
        self.replace_tracks(tracks);
        Ok(&self.tracks)
    }

    /// Swap in a new list, disposing slots whose tracks are gone.
    pub fn replace_tracks(&mut self, tracks: Vec<Track>) {
        self.slots.retain(|id, slot| {
            let keep = tracks.iter().any(|t| t.id == *id);
            if !keep {
                slot.dispose();
            }
            keep
        });
        if let Some(id) = self.playing_id() {
            if !self.slots.contains_key(&id) {
                self.playing = None;
            }
        }
        if let Some(id) = self.open_lyrics {
            if !tracks.iter().any(|t| t.id == id) {
                self.open_lyrics = None;
            }
        }

        log::info!("Track list refreshed: {} tracks", tracks.len());
        self.tracks = tracks;
    }
}

impl<A> Coordinator<A> {
    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn track(&self, id: TrackId) -> Option<&Track> {
        self.tracks.iter().find(|t| t.id == id)
    }

    pub fn playing_id(&self) -> Option<TrackId> {
        self.playing.map(|(id, _)| id)
    }

    pub fn is_playing(&self, id: TrackId) -> bool {
        self.playing_id() == Some(id)
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn position(&self, id: TrackId) -> Option<std::time::Duration> {
        self.slots.get(&id).map(|slot| slot.position())
    }

    /// Open the lyrics panel for `id`, closing any other. Toggling the open
    /// panel closes it. Returns whether `id` is open afterwards.
    pub fn toggle_lyrics(&mut self, id: TrackId) -> bool {
        if self.open_lyrics == Some(id) {
            self.open_lyrics = None;
        } else {
            self.open_lyrics = Some(id);
        }
        self.open_lyrics.is_some()
    }

    pub fn open_lyrics(&self) -> Option<TrackId> {
        self.open_lyrics
    }

    pub fn handle_event(&mut self, event: &SlotEvent) {
        let (track_id, epoch) = (event.track_id(), event.epoch());
        if self.playing != Some((track_id, epoch)) {
            log::debug!("Ignoring stale slot event for track {}", track_id);
            return;
        }
        if let Some(slot) = self.slots.get_mut(&track_id) {
            slot.pause();
        }
        self.playing = None;
        match event {
            SlotEvent::Ended { .. } => log::info!("Track {} finished", track_id),
            SlotEvent::Failed { message, .. } => {
                log::warn!("Track {} stopped: {}", track_id, message)
            }
        }
    }

    /// Apply every slot report that has arrived so far.
    pub fn drain_events(&mut self) -> Vec<SlotEvent> {
        let mut applied = Vec::new();
        while let Ok(event) = self.events_rx.try_recv() {
            self.handle_event(&event);
            applied.push(event);
        }
        applied
    }

    /// Wait for the next slot report and apply it.
    pub async fn next_event(&mut self) -> Option<SlotEvent> {
        let event = self.events_rx.recv().await?;
        self.handle_event(&event);
        Some(event)
    }

    /// Pause and release every slot.
    pub fn dispose(&mut self) {
        for (_, mut slot) in self.slots.drain() {
            slot.pause();
            slot.dispose();
        }
        self.playing = None;
        self.open_lyrics = None;
        log::debug!("Disposed all audio slots");
    }
}

impl<A> Drop for Coordinator<A> {
    fn drop(&mut self) {
        for slot in self.slots.values_mut() {
            slot.dispose();
        }
    }
}
