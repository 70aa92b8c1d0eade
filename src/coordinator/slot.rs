use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

use super::CoordinatorError;
use crate::api::types::{Track, TrackId};
use crate::output::clip::{Clip, ClipSource, PlayHead};
use crate::output::{AudioOutput, SourceId};
use crate::playback::ByteSource;

/// Reported by a slot when its audio stops on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotEvent {
    /// The last sample was played.
    Ended { track_id: TrackId, epoch: u64 },
    /// The source could not be fetched, decoded or played.
    Failed {
        track_id: TrackId,
        epoch: u64,
        message: String,
    },
}

impl SlotEvent {
    pub fn track_id(&self) -> TrackId {
        match self {
            SlotEvent::Ended { track_id, .. } | SlotEvent::Failed { track_id, .. } => *track_id,
        }
    }

    pub fn epoch(&self) -> u64 {
        match self {
            SlotEvent::Ended { epoch, .. } | SlotEvent::Failed { epoch, .. } => *epoch,
        }
    }
}

/// One track's audio output. Created on first play and reused after that.
pub trait AudioSlot: Send {
    fn source(&self) -> Option<&str>;

    fn set_source(&mut self, url: &str);

    /// Start or resume. `epoch` is echoed back in every [`SlotEvent`] this
    /// play produces.
    fn play(&mut self, epoch: u64) -> Result<(), CoordinatorError>;

    fn pause(&mut self);

    /// Seek back to the start without changing the play state.
    fn rewind(&mut self);

    fn position(&self) -> Duration;

    fn is_playing(&self) -> bool;

    fn dispose(&mut self);
}

pub trait SlotFactory: Send + Sync {
    fn create(&self, track: &Track, events: UnboundedSender<SlotEvent>) -> Box<dyn AudioSlot>;
}

// ── Streaming WAV slot ──

struct StreamState {
    clip: Option<Arc<Clip>>,
    /// Epoch of the play request being served; None while paused
    wanted: Option<u64>,
    voice: Option<SourceId>,
    disposed: bool,
}

/// Everything the slot shares with its loader task.
struct SlotShared {
    track_id: TrackId,
    head: PlayHead,
    output: Arc<AudioOutput>,
    events: UnboundedSender<SlotEvent>,
    state: Mutex<StreamState>,
}

impl SlotShared {
    fn lock(&self) -> MutexGuard<'_, StreamState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn start_voice(&self, state: &mut StreamState, clip: Arc<Clip>, epoch: u64) {
        let events = self.events.clone();
        let track_id = self.track_id;
        let source = ClipSource::new(clip, self.head.clone()).on_end(move || {
            let _ = events.send(SlotEvent::Ended { track_id, epoch });
        });
        state.voice = Some(self.output.mixer().add(Box::new(source)));
    }

    fn stop_voice(&self, state: &mut StreamState) {
        if let Some(voice) = state.voice.take() {
            self.output.mixer().remove(voice);
        }
    }

    fn is_sounding(&self, state: &StreamState) -> bool {
        state.voice.is_some_and(|voice| self.output.mixer().contains(voice))
    }
}

/// Fetches a track's WAV on first play, decodes it with `hound` and plays
/// it through the shared mixer. Position and end-of-stream follow the
/// frames actually rendered.
pub struct StreamSlot<S> {
    shared: Arc<SlotShared>,
    source: Option<String>,
    fetcher: Arc<S>,
    loader: Option<JoinHandle<()>>,
}

impl<S: ByteSource> StreamSlot<S> {
    pub fn new(
        track_id: TrackId,
        fetcher: Arc<S>,
        output: Arc<AudioOutput>,
        events: UnboundedSender<SlotEvent>,
    ) -> Self {
        Self {
            shared: Arc::new(SlotShared {
                track_id,
                head: PlayHead::default(),
                output,
                events,
                state: Mutex::new(StreamState {
                    clip: None,
                    wanted: None,
                    voice: None,
                    disposed: false,
                }),
            }),
            source: None,
            fetcher,
            loader: None,
        }
    }
}

/// Load the clip if needed, bring the output up, then start the voice if
/// the slot still wants to play.
async fn prepare<S: ByteSource>(shared: Arc<SlotShared>, fetcher: Arc<S>, url: String) {
    let result = async {
        let loaded = shared.lock().clip.is_some();
        if !loaded {
            let bytes = fetcher.fetch_bytes(&url).await.map_err(|e| e.to_string())?;
            let clip = Clip::decode_wav(&bytes).map_err(|e| e.to_string())?;
            log::info!(
                "Loaded track {}: {}Hz, {} frames ({:.1}s)",
                shared.track_id,
                clip.sample_rate(),
                clip.frames(),
                clip.duration()
            );
            shared.lock().clip = Some(Arc::new(clip));
        }
        shared.output.start().await.map_err(|e| e.to_string())
    }
    .await;

    let mut state = shared.lock();
    let Some(epoch) = state.wanted.filter(|_| !state.disposed) else {
        return;
    };
    match (result, state.clip.clone()) {
        (Ok(()), Some(clip)) => {
            if state.voice.is_none() {
                shared.start_voice(&mut state, clip, epoch);
            }
        }
        (Ok(()), None) => {}
        (Err(message), _) => {
            log::warn!("Track {} failed to play: {}", shared.track_id, message);
            state.wanted = None;
            let _ = shared.events.send(SlotEvent::Failed {
                track_id: shared.track_id,
                epoch,
                message,
            });
        }
    }
}

impl<S: ByteSource> AudioSlot for StreamSlot<S> {
    fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    fn set_source(&mut self, url: &str) {
        self.source = Some(url.to_string());
    }

    fn play(&mut self, epoch: u64) -> Result<(), CoordinatorError> {
        let track_id = self.shared.track_id;
        let url = self
            .source
            .clone()
            .ok_or_else(|| CoordinatorError::Slot(format!("no source for track {}", track_id)))?;

        let shared = self.shared.clone();
        let mut state = shared.lock();
        if state.disposed {
            return Err(CoordinatorError::Slot(format!("slot for track {} was disposed", track_id)));
        }
        shared.stop_voice(&mut state);
        state.wanted = Some(epoch);

        if let Some(clip) = state.clip.clone() {
            // Playing a finished slot starts it over
            if shared.head.get() >= clip.duration() {
                shared.head.set(0.0);
            }
            if shared.output.is_running() {
                shared.start_voice(&mut state, clip, epoch);
                return Ok(());
            }
        }
        drop(state);

        if let Some(old) = self.loader.take() {
            old.abort();
        }
        self.loader = Some(tokio::spawn(prepare(self.shared.clone(), self.fetcher.clone(), url)));
        Ok(())
    }

    fn pause(&mut self) {
        let mut state = self.shared.lock();
        state.wanted = None;
        self.shared.stop_voice(&mut state);
    }

    fn rewind(&mut self) {
        let mut state = self.shared.lock();
        let sounding = self.shared.is_sounding(&state);
        self.shared.stop_voice(&mut state);
        self.shared.head.set(0.0);
        if let (true, Some(epoch), Some(clip)) = (sounding, state.wanted, state.clip.clone()) {
            self.shared.start_voice(&mut state, clip, epoch);
        }
    }

    fn position(&self) -> Duration {
        Duration::from_secs_f64(self.shared.head.get().max(0.0))
    }

    fn is_playing(&self) -> bool {
        let state = self.shared.lock();
        let finished = state
            .clip
            .as_ref()
            .is_some_and(|clip| self.shared.head.get() >= clip.duration());
        state.wanted.is_some() && !finished
    }

    fn dispose(&mut self) {
        if let Some(loader) = self.loader.take() {
            loader.abort();
        }
        let mut state = self.shared.lock();
        state.disposed = true;
        state.wanted = None;
        self.shared.stop_voice(&mut state);
    }
}

impl<S> Drop for StreamSlot<S> {
    fn drop(&mut self) {
        if let Some(loader) = self.loader.take() {
            loader.abort();
        }
        let mut state = self.shared.lock();
        self.shared.stop_voice(&mut state);
    }
}

/// Builds [`StreamSlot`]s that fetch through `fetcher` and play on `output`.
pub struct StreamSlotFactory<S> {
    fetcher: Arc<S>,
    output: Arc<AudioOutput>,
}

impl<S> StreamSlotFactory<S> {
    pub fn new(fetcher: Arc<S>, output: Arc<AudioOutput>) -> Self {
        Self { fetcher, output }
    }
}

impl<S: ByteSource> SlotFactory for StreamSlotFactory<S> {
    fn create(&self, track: &Track, events: UnboundedSender<SlotEvent>) -> Box<dyn AudioSlot> {
        Box::new(StreamSlot::new(
            track.id,
            self.fetcher.clone(),
            self.output.clone(),
            events,
        ))
    }
}

// ── Clock-only slot for coordinator tests ──

#[cfg(test)]
pub(crate) use timed::TimedSlotFactory;
