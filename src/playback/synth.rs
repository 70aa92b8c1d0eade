use std::future::Future;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use hound::{SampleFormat, WavSpec, WavWriter};

use super::midi::Note;
use super::PlaybackError;
use crate::config::ClientConfig;
use crate::output::{AudioOutput, Mixer, Source, SourceId};

// Envelope (seconds / level)
const ATTACK_S: f64 = 0.005;
const DECAY_S: f64 = 0.1;
const SUSTAIN_LEVEL: f64 = 0.3;
const RELEASE_S: f64 = 0.3;

/// Per-voice gain so a handful of overlapping voices stay below full scale
const VOICE_GAIN: f64 = 0.25;

/// Longest take a synth keeps for bouncing
const MAX_TAKE_SECONDS: u64 = 600;

// ── Synth / AudioEngine traits ──

/// A polyphonic instrument owned by one playback session.
pub trait Synth: Send {
    /// Sound `note` now, holding it for `note.duration` before releasing.
    /// `at` is the transport time the note was scheduled for.
    fn trigger_attack_release(&mut self, note: &Note, at: f64);

    /// Silence all voices and free the instrument. Idempotent; triggers
    /// after dispose are ignored.
    fn dispose(&mut self);
}

/// The audio output that synths are created on.
pub trait AudioEngine: Send + Sync + 'static {
    /// Bring the output up. Must succeed before [`AudioEngine::create_synth`].
    fn activate(&self) -> impl Future<Output = Result<(), PlaybackError>> + Send;

    fn create_synth(&self) -> Result<Box<dyn Synth>, PlaybackError>;
}

// ── Voices ──

struct Voice {
    freq: f64,
    amp: f64,
    hold: f64,
    elapsed: u64,
}

impl Voice {
    fn new(note: &Note) -> Self {
        Self {
            freq: frequency(note.midi),
            amp: note.velocity.clamp(0.0, 1.0) as f64 * VOICE_GAIN,
            hold: note.duration.max(0.0),
            elapsed: 0,
        }
    }

    /// Add the next frames of this voice into `out`. False once released.
    fn render(&mut self, out: &mut [f32], sample_rate: u32) -> bool {
        let sr = sample_rate as f64;
        let end = self.hold + RELEASE_S;
        for s in out.iter_mut() {
            let t = self.elapsed as f64 / sr;
            if t >= end {
                return false;
            }
            let phase = (t * self.freq).fract();
            let tri = 1.0 - 4.0 * (phase - 0.5).abs();
            *s += (tri * envelope(t, self.hold) * self.amp) as f32;
            self.elapsed += 1;
        }
        (self.elapsed as f64 / sr) < end
    }
}

/// What one synth has played so far.
#[derive(Default)]
struct Take {
    samples: Vec<f32>,
    sample_rate: u32,
    notes_played: u64,
    notes_dropped: u64,
}

struct VoiceBank {
    voices: Vec<Voice>,
    max_polyphony: usize,
    disposed: bool,
    take: Take,
}

type SharedBank = Arc<Mutex<VoiceBank>>;

fn lock_bank(bank: &Mutex<VoiceBank>) -> MutexGuard<'_, VoiceBank> {
    bank.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Mixer side of a synth: renders its voices and records the result.
struct BankSource {
    bank: SharedBank,
    scratch: Vec<f32>,
}

impl Source for BankSource {
    fn render(&mut self, out: &mut [f32], sample_rate: u32) -> bool {
        let Self { bank, scratch } = self;
        let mut bank = lock_bank(bank);
        if bank.disposed {
            return false;
        }

        scratch.clear();
        scratch.resize(out.len(), 0.0);
        bank.voices.retain_mut(|voice| voice.render(scratch, sample_rate));

        for (o, s) in out.iter_mut().zip(scratch.iter()) {
            *o += *s;
        }

        let take = &mut bank.take;
        take.sample_rate = sample_rate;
        let room = (MAX_TAKE_SECONDS * sample_rate as u64) as usize;
        if take.samples.len() < room {
            let n = scratch.len().min(room - take.samples.len());
            take.samples.extend_from_slice(&scratch[..n]);
        }
        true
    }
}

// ── Software render engine ──

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderStats {
    pub notes_played: u64,
    pub notes_dropped: u64,
    pub frames: usize,
    pub peak: f32,
}

/// Triangle-voice synth engine on top of an [`AudioOutput`].
///
/// Each synth it creates gets a fresh voice bank and take; `stats` and
/// `bounce_to_wav` report on the most recent one.
#[derive(Clone)]
pub struct RenderEngine {
    output: Arc<AudioOutput>,
    max_polyphony: usize,
    current: Arc<Mutex<Option<SharedBank>>>,
}

impl RenderEngine {
    pub fn new(output: Arc<AudioOutput>, max_polyphony: usize) -> Self {
        Self {
            output,
            max_polyphony: max_polyphony.max(1),
            current: Arc::new(Mutex::new(None)),
        }
    }

    pub fn from_config(output: Arc<AudioOutput>, config: &ClientConfig) -> Self {
        Self::new(output, config.max_polyphony)
    }

    #[cfg(test)]
    pub(crate) fn output(&self) -> &Arc<AudioOutput> {
        &self.output
    }

    pub fn sample_rate(&self) -> u32 {
        self.output.mixer().sample_rate()
    }

    pub fn is_active(&self) -> bool {
        self.output.is_running()
    }

    fn current(&self) -> Option<SharedBank> {
        self.current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn stats(&self) -> RenderStats {
        let Some(bank) = self.current() else {
            return RenderStats {
                notes_played: 0,
                notes_dropped: 0,
                frames: 0,
                peak: 0.0,
            };
        };
        let bank = lock_bank(&bank);
        RenderStats {
            notes_played: bank.take.notes_played,
            notes_dropped: bank.take.notes_dropped,
            frames: bank.take.samples.len(),
            peak: bank.take.samples.iter().fold(0.0f32, |m, s| m.max(s.abs())),
        }
    }

    /// Write the latest synth's take as 16-bit mono WAV. Returns frames written.
    pub fn bounce_to_wav(&self, path: &Path) -> Result<usize, PlaybackError> {
        let (samples, sample_rate) = match self.current() {
            Some(bank) => {
                let bank = lock_bank(&bank);
                (bank.take.samples.clone(), bank.take.sample_rate)
            }
            None => (Vec::new(), 0),
        };
        let spec = WavSpec {
            channels: 1,
            sample_rate: if sample_rate == 0 { self.sample_rate() } else { sample_rate },
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };

        let mut writer = WavWriter::create(path, spec)
            .map_err(|e| PlaybackError::Render(format!("Failed to create WAV: {}", e)))?;
        for s in &samples {
            let v = (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
            writer
                .write_sample(v)
                .map_err(|e| PlaybackError::Render(format!("Failed to write sample: {}", e)))?;
        }
        writer
            .finalize()
            .map_err(|e| PlaybackError::Render(format!("Failed to finalize WAV: {}", e)))?;

        log::info!("Bounced {} frames to {:?}", samples.len(), path);
        Ok(samples.len())
    }
}

impl AudioEngine for RenderEngine {
    async fn activate(&self) -> Result<(), PlaybackError> {
        self.output
            .start()
            .await
            .map_err(|e| PlaybackError::AudioEngine(e.to_string()))
    }

    fn create_synth(&self) -> Result<Box<dyn Synth>, PlaybackError> {
        if !self.is_active() {
            return Err(PlaybackError::AudioEngine("engine not activated".to_string()));
        }

        let bank = Arc::new(Mutex::new(VoiceBank {
            voices: Vec::new(),
            max_polyphony: self.max_polyphony,
            disposed: false,
            take: Take::default(),
        }));
        let mixer = self.output.mixer().clone();
        let source = mixer.add(Box::new(BankSource {
            bank: bank.clone(),
            scratch: Vec::new(),
        }));
        *self.current.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(bank.clone());

        Ok(Box::new(PolySynth {
            bank,
            mixer,
            source: Some(source),
        }))
    }
}

/// Session-side handle on a voice bank. Triggering only queues a voice;
/// the mixer does the rendering.
pub struct PolySynth {
    bank: SharedBank,
    mixer: Mixer,
    source: Option<SourceId>,
}

impl Synth for PolySynth {
    fn trigger_attack_release(&mut self, note: &Note, at: f64) {
        let mut bank = lock_bank(&self.bank);
        if bank.disposed {
            return;
        }
        if bank.voices.len() >= bank.max_polyphony {
            bank.take.notes_dropped += 1;
            log::debug!("Max polyphony exceeded, dropped {} at {:.3}s", note.name, at);
            return;
        }
        bank.voices.push(Voice::new(note));
        bank.take.notes_played += 1;
    }

    fn dispose(&mut self) {
        if let Some(source) = self.source.take() {
            self.mixer.remove(source);
        }
        let mut bank = lock_bank(&self.bank);
        bank.disposed = true;
        bank.voices.clear();
    }
}

impl Drop for PolySynth {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn frequency(midi: u8) -> f64 {
    440.0 * 2f64.powf((midi as f64 - 69.0) / 12.0)
}

/// ADSR level at `t` seconds into a voice held for `hold` seconds.
fn envelope(t: f64, hold: f64) -> f64 {
    let held_level = |t: f64| {
        if t < ATTACK_S {
            t / ATTACK_S
        } else if t < ATTACK_S + DECAY_S {
            1.0 - (1.0 - SUSTAIN_LEVEL) * (t - ATTACK_S) / DECAY_S
        } else {
            SUSTAIN_LEVEL
        }
    };

    if t < hold {
        held_level(t)
    } else {
        let released = t - hold;
        if released >= RELEASE_S {
            0.0
        } else {
            held_level(hold) * (1.0 - released / RELEASE_S)
        }
    }
}
