//! Audio output
//!
//! Everything audible goes through one [`Mixer`]: synth voice banks and WAV
//! clips register as [`Source`]s and are rendered block by block into mono
//! frames. A driver pulls those blocks. With [`OutputKind::Device`] that is
//! the `cpal` output callback; with [`OutputKind::Clock`] a tokio task
//! renders at real-time pace without a sound card.

pub mod clip;
#[cfg(feature = "device-output")]
mod device;

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Block length the clock driver renders per tick.
const CLOCK_BLOCK: Duration = Duration::from_millis(10);

#[derive(Error, Debug)]
pub enum OutputError {
    #[error("No output device available")]
    NoDevice,
    #[error("Audio device error: {0}")]
    Device(String),
    #[error("Failed to decode WAV: {0}")]
    Decode(#[from] hound::Error),
}

/// Which driver pulls audio out of the mixer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    /// The system's default output device.
    #[default]
    Device,
    /// Rendered against the tokio clock and discarded.
    Clock,
}

/// Something the mixer can sound.
pub trait Source: Send {
    /// Add the next `out.len()` mono frames into `out`. Returning false
    /// removes the source from the mixer.
    fn render(&mut self, out: &mut [f32], sample_rate: u32) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceId(u64);

struct MixerInner {
    sample_rate: u32,
    sources: Vec<(SourceId, Box<dyn Source>)>,
    next_id: u64,
    block: Vec<f32>,
}

/// Shared mono mix bus.
#[derive(Clone)]
pub struct Mixer {
    inner: Arc<Mutex<MixerInner>>,
}

impl Mixer {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            inner: Arc::new(Mutex::new(MixerInner {
                sample_rate: sample_rate.max(1),
                sources: Vec::new(),
                next_id: 0,
                block: Vec::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MixerInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn sample_rate(&self) -> u32 {
        self.lock().sample_rate
    }

    fn set_sample_rate(&self, sample_rate: u32) {
        self.lock().sample_rate = sample_rate.max(1);
    }

    pub fn add(&self, source: Box<dyn Source>) -> SourceId {
        let mut inner = self.lock();
        inner.next_id += 1;
        let id = SourceId(inner.next_id);
        inner.sources.push((id, source));
        id
    }

    /// Drop a source. Once this returns the source renders no more frames.
    pub fn remove(&self, id: SourceId) -> bool {
        let mut inner = self.lock();
        let before = inner.sources.len();
        inner.sources.retain(|(sid, _)| *sid != id);
        inner.sources.len() != before
    }

    pub fn contains(&self, id: SourceId) -> bool {
        self.lock().sources.iter().any(|(sid, _)| *sid == id)
    }

    #[cfg(test)]
    pub(crate) fn source_count(&self) -> usize {
        self.lock().sources.len()
    }

    /// Render the next `frames` mono frames.
    pub fn render(&self, frames: usize) -> Vec<f32> {
        let mut out = vec![0.0; frames];
        render_into(&mut self.lock(), &mut out);
        out
    }

    /// Fill an interleaved device buffer, copying the mono mix to every
    /// channel.
    fn fill_interleaved(&self, data: &mut [f32], channels: u16) {
        let channels = channels.max(1) as usize;
        let Ok(mut inner) = self.inner.lock() else {
            data.fill(0.0);
            return;
        };

        let frames = data.len() / channels;
        let mut block = std::mem::take(&mut inner.block);
        block.clear();
        block.resize(frames, 0.0);
        render_into(&mut inner, &mut block);

        for (frame, value) in data.chunks_mut(channels).zip(block.iter()) {
            frame.fill(value.clamp(-1.0, 1.0));
        }
        inner.block = block;
    }
}

fn render_into(inner: &mut MixerInner, out: &mut [f32]) {
    let sample_rate = inner.sample_rate;
    inner.sources.retain_mut(|(_, source)| source.render(out, sample_rate));
}

enum Driver {
    Clock(JoinHandle<()>),
    #[cfg(feature = "device-output")]
    Device(device::DeviceStream),
}

impl Drop for Driver {
    fn drop(&mut self) {
        if let Driver::Clock(handle) = self {
            handle.abort();
        }
    }
}

/// The mixer plus whatever is pulling audio out of it. Started lazily by
/// the first thing that wants to make a sound.
pub struct AudioOutput {
    mixer: Mixer,
    kind: OutputKind,
    driver: Mutex<Option<Driver>>,
}

impl AudioOutput {
    pub fn new(kind: OutputKind, sample_rate: u32) -> Self {
        Self {
            mixer: Mixer::new(sample_rate),
            kind,
            driver: Mutex::new(None),
        }
    }

    /// Clock-driven output, for headless runs.
    pub fn clock(sample_rate: u32) -> Self {
        Self::new(OutputKind::Clock, sample_rate)
    }

    pub fn mixer(&self) -> &Mixer {
        &self.mixer
    }

    pub fn kind(&self) -> OutputKind {
        self.kind
    }

    fn lock_driver(&self) -> MutexGuard<'_, Option<Driver>> {
        self.driver.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn is_running(&self) -> bool {
        self.lock_driver().is_some()
    }

    /// Start pulling audio. Idempotent.
    pub async fn start(&self) -> Result<(), OutputError> {
        if self.is_running() {
            return Ok(());
        }

        let driver = match self.kind {
            OutputKind::Clock => Driver::Clock(spawn_clock(self.mixer.clone())),
            OutputKind::Device => self.open_device().await?,
        };

        let mut slot = self.lock_driver();
        if slot.is_none() {
            log::info!(
                "Audio output started ({:?}, {}Hz)",
                self.kind,
                self.mixer.sample_rate()
            );
            *slot = Some(driver);
        }
        // else another start won the race; ours is dropped here
        Ok(())
    }

    #[cfg(feature = "device-output")]
    async fn open_device(&self) -> Result<Driver, OutputError> {
        let mixer = self.mixer.clone();
        let stream = tokio::task::spawn_blocking(move || device::DeviceStream::open(mixer))
            .await
            .map_err(|e| OutputError::Device(e.to_string()))??;
        Ok(Driver::Device(stream))
    }

    #[cfg(not(feature = "device-output"))]
    async fn open_device(&self) -> Result<Driver, OutputError> {
        Err(OutputError::Device(
            "built without device output, use the clock output".to_string(),
        ))
    }

    /// Stop pulling audio. Sources stay registered.
    pub fn stop(&self) {
        if self.lock_driver().take().is_some() {
            log::info!("Audio output stopped");
        }
    }
}

impl Drop for AudioOutput {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Render the mixer at real-time pace against the tokio clock.
fn spawn_clock(mixer: Mixer) -> JoinHandle<()> {
    tokio::spawn(async move {
        let origin = Instant::now();
        let mut ticker = tokio::time::interval(CLOCK_BLOCK);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut rendered = 0u64;
        loop {
            ticker.tick().await;
            let due = (origin.elapsed().as_secs_f64() * mixer.sample_rate() as f64) as u64;
            if due > rendered {
                mixer.render((due - rendered) as usize);
                rendered = due;
            }
        }
    })
}
