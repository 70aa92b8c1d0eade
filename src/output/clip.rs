//! Decoded WAV clips and the mixer source that plays them.

use std::io::Cursor;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use hound::{SampleFormat, WavReader};

use super::{OutputError, Source};

/// Mono PCM decoded from a WAV file.
#[derive(Debug, Clone, PartialEq)]
pub struct Clip {
    samples: Vec<f32>,
    sample_rate: u32,
}

impl Clip {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate: sample_rate.max(1),
        }
    }

    /// Decode a WAV file held in memory, folding all channels to mono.
    pub fn decode_wav(bytes: &[u8]) -> Result<Self, OutputError> {
        let reader = WavReader::new(Cursor::new(bytes))?;
        let spec = reader.spec();
        let channels = spec.channels.max(1) as usize;

        let interleaved: Vec<f32> = match spec.sample_format {
            SampleFormat::Float => reader.into_samples::<f32>().collect::<Result<_, _>>()?,
            SampleFormat::Int => {
                let bits = spec.bits_per_sample.clamp(1, 32) as i32;
                let scale = 1.0 / 2f32.powi(bits - 1);
                reader
                    .into_samples::<i32>()
                    .map(|s| s.map(|v| v as f32 * scale))
                    .collect::<Result<_, _>>()?
            }
        };

        let samples = interleaved
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect();
        Ok(Self::new(samples, spec.sample_rate))
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn frames(&self) -> usize {
        self.samples.len()
    }

    pub fn duration(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Play position in seconds, shared lock-free between the slot and the
/// audio thread (f64 bits stored as u64).
#[derive(Debug, Clone, Default)]
pub struct PlayHead(Arc<AtomicU64>);

impl PlayHead {
    pub fn get(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }

    pub fn set(&self, seconds: f64) {
        self.0.store(seconds.to_bits(), Ordering::Relaxed);
    }
}

/// Plays a [`Clip`] from the play head's position, resampling by nearest
/// frame to the mixer's rate.
pub struct ClipSource {
    clip: Arc<Clip>,
    head: PlayHead,
    on_end: Option<Box<dyn FnOnce() + Send>>,
}

impl ClipSource {
    pub fn new(clip: Arc<Clip>, head: PlayHead) -> Self {
        Self {
            clip,
            head,
            on_end: None,
        }
    }

    /// Run `f` on the audio thread once the last frame has been played.
    pub fn on_end(mut self, f: impl FnOnce() + Send + 'static) -> Self {
        self.on_end = Some(Box::new(f));
        self
    }
}

impl Source for ClipSource {
    fn render(&mut self, out: &mut [f32], sample_rate: u32) -> bool {
        let step = 1.0 / sample_rate.max(1) as f64;
        let src_rate = self.clip.sample_rate as f64;
        let mut pos = self.head.get();
        let mut finished = false;

        for s in out.iter_mut() {
            let index = (pos * src_rate) as usize;
            let Some(sample) = self.clip.samples.get(index) else {
                finished = true;
                break;
            };
            *s += *sample;
            pos += step;
        }

        if finished || (pos * src_rate) as usize >= self.clip.samples.len() {
            self.head.set(self.clip.duration());
            if let Some(f) = self.on_end.take() {
                f();
            }
            return false;
        }
        self.head.set(pos);
        true
    }
}
