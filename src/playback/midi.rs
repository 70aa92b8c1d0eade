use std::collections::{HashMap, VecDeque};

use midly::{MetaMessage, MidiMessage, Smf, Timing, TrackEventKind};

use super::PlaybackError;

/// Microseconds per quarter note when the file sets no tempo (120 bpm)
const DEFAULT_TEMPO_US: u32 = 500_000;

const NOTE_NAMES: [&str; 12] = ["C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B"];

/// One decoded note, timed in seconds from the start of the file
#[derive(Debug, Clone, PartialEq)]
pub struct Note {
    pub time: f64,
    pub name: String,
    pub midi: u8,
    pub duration: f64,
    /// 0.0 – 1.0
    pub velocity: f32,
    pub channel: u8,
    pub track: usize,
}

/// Scientific pitch name, e.g. 60 -> "C4", 61 -> "C#4"
pub fn pitch_name(midi: u8) -> String {
    let octave = (midi as i32 / 12) - 1;
    format!("{}{}", NOTE_NAMES[(midi % 12) as usize], octave)
}

#[derive(Debug, Clone, Copy)]
struct TempoSegment {
    tick: u64,
    seconds: f64,
    seconds_per_tick: f64,
}

/// Tick -> seconds conversion for one file.
#[derive(Debug)]
enum TickClock {
    Metrical(Vec<TempoSegment>),
    Timecode { seconds_per_tick: f64 },
}

impl TickClock {
    fn from_smf(smf: &Smf) -> Self {
        match smf.header.timing {
            Timing::Metrical(ppq) => {
                let ppq = ppq.as_int().max(1) as f64;
                Self::Metrical(tempo_segments(smf, ppq))
            }
            Timing::Timecode(fps, subframe) => {
                let ticks_per_second = fps.as_f32() as f64 * subframe.max(1) as f64;
                Self::Timecode {
                    seconds_per_tick: 1.0 / ticks_per_second,
                }
            }
        }
    }

    fn seconds(&self, tick: u64) -> f64 {
        match self {
            Self::Timecode { seconds_per_tick } => tick as f64 * seconds_per_tick,
            Self::Metrical(segments) => {
                let index = segments.partition_point(|s| s.tick <= tick).saturating_sub(1);
                let seg = segments[index];
                seg.seconds + (tick - seg.tick) as f64 * seg.seconds_per_tick
            }
        }
    }
}

/// Tempo changes from every track, merged into one timeline.
fn tempo_segments(smf: &Smf, ppq: f64) -> Vec<TempoSegment> {
    let mut changes: Vec<(u64, u32)> = Vec::new();
    for track in &smf.tracks {
        let mut tick = 0u64;
        for event in track {
            tick += event.delta.as_int() as u64;
            if let TrackEventKind::Meta(MetaMessage::Tempo(tempo)) = event.kind {
                changes.push((tick, tempo.as_int()));
            }
        }
    }
    changes.sort_by_key(|(tick, _)| *tick);

    let spt = |tempo_us: u32| tempo_us as f64 / 1_000_000.0 / ppq;
    let mut segments = vec![TempoSegment {
        tick: 0,
        seconds: 0.0,
        seconds_per_tick: spt(DEFAULT_TEMPO_US),
    }];

    for (tick, tempo) in changes {
        let last = segments[segments.len() - 1];
        let segment = TempoSegment {
            tick,
            seconds: last.seconds + (tick - last.tick) as f64 * last.seconds_per_tick,
            seconds_per_tick: spt(tempo),
        };
        // A later change at the same tick wins
        if last.tick == tick {
            let end = segments.len() - 1;
            segments[end] = TempoSegment {
                seconds: last.seconds,
                ..segment
            };
        } else {
            segments.push(segment);
        }
    }

    segments
}

/// Decode a Standard MIDI File into one time-ordered note list merged
/// across all tracks.
///
/// Note-offs (and note-ons with velocity 0) close the oldest open note of
/// the same channel and key. Notes still open at the end of their track are
/// closed there.
pub fn decode_notes(bytes: &[u8]) -> Result<Vec<Note>, PlaybackError> {
    let smf = Smf::parse(bytes)?;
    let clock = TickClock::from_smf(&smf);
    let mut notes = Vec::new();

    for (track_index, track) in smf.tracks.iter().enumerate() {
        let mut tick = 0u64;
        let mut open: HashMap<(u8, u8), VecDeque<(u64, u8)>> = HashMap::new();

        for event in track {
            tick += event.delta.as_int() as u64;
            let TrackEventKind::Midi { channel, message } = event.kind else {
                continue;
            };
            let channel = channel.as_int();

            match message {
                MidiMessage::NoteOn { key, vel } if vel.as_int() > 0 => {
                    open.entry((channel, key.as_int()))
                        .or_default()
                        .push_back((tick, vel.as_int()));
                }
                MidiMessage::NoteOn { key, .. } | MidiMessage::NoteOff { key, .. } => {
                    let key = key.as_int();
                    if let Some((start, vel)) = open.get_mut(&(channel, key)).and_then(|q| q.pop_front()) {
                        notes.push(make_note(&clock, track_index, channel, key, vel, start, tick));
                    }
                }
                _ => {}
            }
        }

        for ((channel, key), pending) in open {
            for (start, vel) in pending {
                notes.push(make_note(&clock, track_index, channel, key, vel, start, tick));
            }
        }
    }

    notes.sort_by(|a, b| {
        a.time
            .total_cmp(&b.time)
            .then(a.midi.cmp(&b.midi))
            .then(a.channel.cmp(&b.channel))
            .then(a.track.cmp(&b.track))
    });

    log::debug!("Decoded {} notes from {} tracks", notes.len(), smf.tracks.len());
    Ok(notes)
}

fn make_note(
    clock: &TickClock,
    track: usize,
    channel: u8,
    key: u8,
    vel: u8,
    start_tick: u64,
    end_tick: u64,
) -> Note {
    let time = clock.seconds(start_tick);
    Note {
        time,
        name: pitch_name(key),
        midi: key,
        duration: (clock.seconds(end_tick) - time).max(0.0),
        velocity: vel as f32 / 127.0,
        channel,
        track,
    }
}
