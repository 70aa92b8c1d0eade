//! Playback Engine
//!
//! Owns at most one playback session: a synth, the scheduled note sequence
//! and the lyric timer. `start` always tears the previous session down
//! first; `stop` is idempotent.
//!
//! Every session is tagged with a generation number. `stop` bumps the
//! generation under the engine lock, and every timer callback checks its
//! generation under that same lock before touching the synth or the lyric
//! line, so nothing fires once `stop` has returned. A `start` that was
//! suspended (activating the engine or fetching) when a `stop` arrived sees
//! the newer generation on resume and discards what it built.

use std::ops::ControlFlow;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::watch;

use super::lyrics::LyricCursor;
use super::midi::{decode_notes, Note};
use super::synth::{AudioEngine, Synth};
use super::transport::{Interval, Part, TransportClock};
use super::{ByteSource, PlaybackError};
use crate::config::DEFAULT_LYRIC_INTERVAL_MS;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started { notes: usize, lyric_lines: usize },
    /// A `stop` or newer `start` arrived while this one was suspended.
    Superseded,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackStatus {
    pub active: bool,
    pub notes_scheduled: usize,
    pub notes_triggered: usize,
    /// False once every scheduled note has been triggered
    pub transport_running: bool,
    pub lyric_index: Option<usize>,
    /// False once the lyric timer has run out of lines
    pub lyrics_running: bool,
    pub position: f64,
}

impl PlaybackStatus {
    fn idle() -> Self {
        Self {
            active: false,
            notes_scheduled: 0,
            notes_triggered: 0,
            transport_running: false,
            lyric_index: None,
            lyrics_running: false,
            position: 0.0,
        }
    }
}

struct PlaybackSession {
    generation: u64,
    synth: Box<dyn Synth>,
    part: Part,
    lyric_timer: Option<Interval>,
    lyrics: LyricCursor,
    clock: TransportClock,
    notes_triggered: usize,
}

struct EngineInner {
    generation: u64,
    session: Option<PlaybackSession>,
}

pub struct PlaybackEngine<S, A> {
    source: Arc<S>,
    audio: A,
    lyric_interval: Duration,
    inner: Arc<Mutex<EngineInner>>,
    lyric_line: Arc<watch::Sender<Option<String>>>,
}

fn lock_inner(inner: &Mutex<EngineInner>) -> MutexGuard<'_, EngineInner> {
    inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl<S: ByteSource, A: AudioEngine> PlaybackEngine<S, A> {
    pub fn new(source: Arc<S>, audio: A) -> Self {
        let (lyric_line, _) = watch::channel(None);
        Self {
            source,
            audio,
            lyric_interval: Duration::from_millis(DEFAULT_LYRIC_INTERVAL_MS),
            inner: Arc::new(Mutex::new(EngineInner {
                generation: 0,
                session: None,
            })),
            lyric_line: Arc::new(lyric_line),
        }
    }

    pub fn with_lyric_interval(mut self, interval: Duration) -> Self {
        self.lyric_interval = interval;
        self
    }

    pub fn audio(&self) -> &A {
        &self.audio
    }

    /// Fetch and play the MIDI file at `source_url`, showing `lyrics` one
    /// line per lyric interval.
    ///
    /// On error the engine is left inactive.
    pub async fn start(
        &self,
        source_url: &str,
        lyrics: Option<&str>,
    ) -> Result<StartOutcome, PlaybackError> {
        let generation = self.stop_and_advance();

        let result = self.start_session(generation, source_url, lyrics).await;
        match &result {
            Ok(StartOutcome::Superseded) => {
                log::info!("Playback start for {} superseded", source_url);
            }
            Ok(StartOutcome::Started { notes, lyric_lines }) => {
                log::info!(
                    "Playback started: {} notes, {} lyric lines from {}",
                    notes,
                    lyric_lines,
                    source_url
                );
            }
            Err(e) => log::error!("Failed to play MIDI from {}: {}", source_url, e),
        }
        result
    }

    async fn start_session(
        &self,
        generation: u64,
        source_url: &str,
        lyrics: Option<&str>,
    ) -> Result<StartOutcome, PlaybackError> {
        self.audio.activate().await?;
        if self.is_stale(generation) {
            return Ok(StartOutcome::Superseded);
        }

        let bytes = self.source.fetch_bytes(source_url).await?;
        if self.is_stale(generation) {
            return Ok(StartOutcome::Superseded);
        }

        let notes = decode_notes(&bytes)?;
        let mut synth = self.audio.create_synth()?;
        let lyrics = LyricCursor::new(lyrics);

        let mut inner = lock_inner(&self.inner);
        if inner.generation != generation {
            synth.dispose();
            return Ok(StartOutcome::Superseded);
        }

        let outcome = StartOutcome::Started {
            notes: notes.len(),
            lyric_lines: lyrics.len(),
        };

        let clock = TransportClock::start();
        self.lyric_line.send_replace(lyrics.current().map(str::to_string));
        let part = Part::start(clock, notes, self.note_trigger(generation));
        let lyric_timer = (lyrics.len() > 1)
            .then(|| Interval::start(self.lyric_interval, self.lyric_advance(generation)));

        inner.session = Some(PlaybackSession {
            generation,
            synth,
            part,
            lyric_timer,
            lyrics,
            clock,
            notes_triggered: 0,
        });

        Ok(outcome)
    }

    fn note_trigger(&self, generation: u64) -> impl FnMut(&Note) -> ControlFlow<()> + Send + 'static {
        let inner = self.inner.clone();
        move |note| {
            let mut guard = lock_inner(&inner);
            match guard.session.as_mut() {
                Some(session) if session.generation == generation => {
                    session.synth.trigger_attack_release(note, note.time);
                    session.notes_triggered += 1;
                    ControlFlow::Continue(())
                }
                _ => ControlFlow::Break(()),
            }
        }
    }

    fn lyric_advance(&self, generation: u64) -> impl FnMut() -> ControlFlow<()> + Send + 'static {
        let inner = self.inner.clone();
        let lyric_line = self.lyric_line.clone();
        move || {
            let mut guard = lock_inner(&inner);
            let Some(session) = guard.session.as_mut().filter(|s| s.generation == generation) else {
                return ControlFlow::Break(());
            };
            match session.lyrics.advance() {
                Some(line) => {
                    lyric_line.send_replace(Some(line.to_string()));
                    ControlFlow::Continue(())
                }
                // Out of lines: the timer ends, the last line stays up
                None => ControlFlow::Break(()),
            }
        }
    }
}

impl<S, A> PlaybackEngine<S, A> {
    /// Halt the transport, release the synth, cancel the lyric timer and
    /// clear the lyric line. Safe to call at any time.
    pub fn stop(&self) {
        self.stop_and_advance();
    }

    /// Stop, returning the generation that a following start may claim.
    fn stop_and_advance(&self) -> u64 {
        let (session, generation) = {
            let mut inner = lock_inner(&self.inner);
            inner.generation += 1;
            self.lyric_line.send_if_modified(|line| line.take().is_some());
            (inner.session.take(), inner.generation)
        };

        if let Some(mut session) = session {
            session.part.dispose();
            if let Some(mut timer) = session.lyric_timer.take() {
                timer.cancel();
            }
            session.synth.dispose();
            log::info!(
                "Playback stopped after {:.2}s ({} of {} notes triggered)",
                session.clock.position(),
                session.notes_triggered,
                session.part.len()
            );
        }

        generation
    }

    fn is_stale(&self, generation: u64) -> bool {
        lock_inner(&self.inner).generation != generation
    }

    pub fn is_active(&self) -> bool {
        lock_inner(&self.inner).session.is_some()
    }

    pub fn status(&self) -> PlaybackStatus {
        let inner = lock_inner(&self.inner);
        let Some(session) = inner.session.as_ref() else {
            return PlaybackStatus::idle();
        };
        PlaybackStatus {
            active: true,
            notes_scheduled: session.part.len(),
            notes_triggered: session.notes_triggered,
            transport_running: !session.part.is_finished(),
            lyric_index: (!session.lyrics.is_empty()).then(|| session.lyrics.index()),
            lyrics_running: session.lyric_timer.as_ref().is_some_and(|t| !t.is_finished()),
            position: session.clock.position(),
        }
    }

    /// The lyric line currently on display.
    pub fn current_line(&self) -> Option<String> {
        self.lyric_line.borrow().clone()
    }

    pub fn subscribe_lyrics(&self) -> watch::Receiver<Option<String>> {
        self.lyric_line.subscribe()
    }
}

impl<S, A> Drop for PlaybackEngine<S, A> {
    fn drop(&mut self) {
        self.stop_and_advance();
    }
}
