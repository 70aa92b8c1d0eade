//! End-to-end flows through the App controller with an in-process music
//! service and the software render engine.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use songloom::api::types::{
    DeleteResponse, GenerateRequest, Genre, LoginRequest, RegisterRequest, RegisterResponse,
    Track, TrackId, User, Voice,
};
use songloom::api::{ApiError, MusicApi};
use songloom::app::validation::LoginForm;
use songloom::app::{App, Notice, Page};
use songloom::config::ClientConfig;
use songloom::coordinator::slot::{SlotEvent, StreamSlotFactory};
use songloom::coordinator::Toggle;
use songloom::output::AudioOutput;
use songloom::playback::synth::RenderEngine;
use songloom::playback::ByteSource;
use songloom::session::{JsonFileStore, SessionStore};

const MIDI_URL: &str = "http://music.test/song.mid";

#[derive(Default)]
struct Service {
    tracks: Mutex<Vec<Track>>,
    requests: Mutex<Vec<GenerateRequest>>,
    calls: Mutex<Vec<String>>,
    files: HashMap<String, Vec<u8>>,
    delete_offline: bool,
}

impl Service {
    fn log(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl MusicApi for Service {
    async fn generate(&self, request: &GenerateRequest) -> Result<Track, ApiError> {
        self.log("generate");
        self.requests.lock().unwrap().push(request.clone());
        let mut tracks = self.tracks.lock().unwrap();
        let id = tracks.iter().map(|t| t.id).max().unwrap_or(0) + 1;
        let track = Track::new(id, request.prompt.clone(), 42.0);
        tracks.push(track.clone());
        Ok(track)
    }

    async fn list(&self) -> Result<Vec<Track>, ApiError> {
        self.log("list");
        Ok(self.tracks.lock().unwrap().clone())
    }

    async fn delete(&self, id: TrackId) -> Result<DeleteResponse, ApiError> {
        self.log(format!("delete {}", id));
        if self.delete_offline {
            return Err(ApiError::Network("connection reset".to_string()));
        }
        self.tracks.lock().unwrap().retain(|t| t.id != id);
        Ok(DeleteResponse::default())
    }

    async fn register(&self, request: &RegisterRequest) -> Result<RegisterResponse, ApiError> {
        self.log("register");
        Ok(RegisterResponse {
            id: 1,
            username: Some(request.username.clone()),
            email: Some(request.email.clone()),
            message: None,
        })
    }

    async fn login(&self, request: &LoginRequest) -> Result<User, ApiError> {
        self.log("login");
        Ok(User::new(1, Some("ann"), request.email.clone()))
    }

    fn download_wav_url(&self, id: TrackId) -> String {
        wav_url(id)
    }
}

impl ByteSource for Service {
    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, ApiError> {
        self.log(format!("fetch {}", url));
        self.files.get(url).cloned().ok_or(ApiError::Server {
            status: 404,
            detail: "Not Found".to_string(),
        })
    }
}

fn vlq(mut value: u32) -> Vec<u8> {
    let mut bytes = vec![(value & 0x7F) as u8];
    value >>= 7;
    while value > 0 {
        bytes.insert(0, ((value & 0x7F) as u8) | 0x80);
        value >>= 7;
    }
    bytes
}

/// Format-0 file at 480 ppq and the default tempo, one note per beat.
fn melody(keys: &[u8]) -> Vec<u8> {
    let mut data = Vec::new();
    for &key in keys {
        data.extend(vlq(0));
        data.extend([0x90, key, 96]);
        data.extend(vlq(480));
        data.extend([0x80, key, 0]);
    }
    data.extend([0x00, 0xFF, 0x2F, 0x00]);

    let mut bytes = b"MThd".to_vec();
    bytes.extend(6u32.to_be_bytes());
    bytes.extend(0u16.to_be_bytes());
    bytes.extend(1u16.to_be_bytes());
    bytes.extend(480u16.to_be_bytes());
    bytes.extend(b"MTrk");
    bytes.extend((data.len() as u32).to_be_bytes());
    bytes.extend(data);
    bytes
}

/// 16-bit mono WAV at 8 kHz holding `seconds` of a steady level.
fn wav(seconds: f64) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 8000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for _ in 0..(seconds * 8000.0) as usize {
            writer.write_sample(6000i16).unwrap();
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}

fn wav_url(id: TrackId) -> String {
    format!("http://music.test/music/download/wav/{}", id)
}

fn app(service: &Arc<Service>, session: SessionStore) -> App<Service, RenderEngine> {
    let output = Arc::new(AudioOutput::clock(8000));
    App::new(
        service.clone(),
        session,
        StreamSlotFactory::new(service.clone(), output.clone()),
        RenderEngine::new(output, 8),
        &ClientConfig::default(),
    )
}

async fn logged_in(service: &Arc<Service>) -> App<Service, RenderEngine> {
    let mut app = app(service, SessionStore::in_memory());
    let form = LoginForm {
        email: "ann@example.com".into(),
        password: "password1".into(),
    };
    assert!(app.submit_login(form).await);
    app
}

#[tokio::test]
async fn generate_sends_exact_payload_and_refreshes() {
    let service = Arc::new(Service::default());
    let mut app = logged_in(&service).await;

    app.generate_form.prompt = "sad piano song".into();
    app.generate_form.genre = Genre::Classical;
    app.generate_form.voice = Voice::Female;
    let track = app.submit_generate().await.unwrap();

    let sent = service.requests.lock().unwrap().clone();
    assert_eq!(sent.len(), 1);
    assert_eq!(
        serde_json::to_value(&sent[0]).unwrap(),
        serde_json::json!({"prompt": "sad piano song", "genre": "classical", "voice": "female"})
    );
    assert_eq!(service.calls(), vec!["login", "list", "generate", "list"]);
    assert!(app.coordinator().track(track.id).is_some());
}

#[tokio::test(start_paused = true)]
async fn lyrics_follow_two_second_cadence() {
    let service = Arc::new(Service {
        files: HashMap::from([(MIDI_URL.to_string(), melody(&[60, 64, 67]))]),
        ..Service::default()
    });
    let mut app = logged_in(&service).await;

    let mut rx = app.playback().subscribe_lyrics();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let origin = tokio::time::Instant::now();
    tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let line = rx.borrow_and_update().clone();
            sink.lock().unwrap().push((line, origin.elapsed()));
        }
    });

    assert!(app.play_midi(MIDI_URL, Some("line one\nline two\n\n")).await);
    tokio::time::sleep(Duration::from_secs(9)).await;

    assert_eq!(
        *seen.lock().unwrap(),
        vec![
            (Some("line one".to_string()), Duration::ZERO),
            (Some("line two".to_string()), Duration::from_secs(2)),
        ]
    );
    let stats = app.playback().audio().stats();
    assert_eq!(stats.notes_played, 3);
    assert!(stats.peak > 0.0);

    app.stop_midi();
    app.stop_midi();
    assert!(app.playback().current_line().is_none());
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(seen.lock().unwrap().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn stop_after_stop_renders_nothing_more() {
    let service = Arc::new(Service {
        files: HashMap::from([(MIDI_URL.to_string(), melody(&[60, 62, 64, 65, 67, 69]))]),
        ..Service::default()
    });
    let mut app = logged_in(&service).await;

    assert!(app.play_midi(MIDI_URL, None).await);
    tokio::time::sleep(Duration::from_millis(1200)).await;
    app.stop_midi();
    let stats = app.playback().audio().stats();
    assert_eq!(stats.notes_played, 3);
    assert!(stats.peak > 0.0);

    // the take stops growing the moment the synth is released
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(app.playback().audio().stats(), stats);
    assert!(!app.playback().is_active());
}

#[tokio::test(start_paused = true)]
async fn restart_starts_from_a_clean_take() {
    let service = Arc::new(Service {
        files: HashMap::from([(MIDI_URL.to_string(), melody(&[60, 62, 64, 65]))]),
        ..Service::default()
    });
    let mut app = logged_in(&service).await;

    assert!(app.play_midi(MIDI_URL, None).await);
    tokio::time::sleep(Duration::from_millis(100)).await;
    app.stop_midi();
    assert_eq!(app.playback().audio().stats().notes_played, 1);

    assert!(app.play_midi(MIDI_URL, None).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    let stats = app.playback().audio().stats();
    assert_eq!(stats.notes_played, 1);
    assert!(stats.frames <= 8000 * 60 / 1000, "{} frames", stats.frames);
}

#[tokio::test]
async fn failed_delete_keeps_track_42() {
    let service = Arc::new(Service {
        tracks: Mutex::new(vec![Track::new(41, "rain", 10.0), Track::new(42, "sad piano song", 30.0)]),
        delete_offline: true,
        ..Service::default()
    });
    let mut app = logged_in(&service).await;

    assert!(!app.delete_track(42).await);
    assert!(app.coordinator().track(42).is_some());
    assert_eq!(app.coordinator().tracks().len(), 2);
    assert!(matches!(app.state().notice, Some(Notice { .. })));
}

#[tokio::test]
async fn session_survives_reload() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("session.json");
    let service = Arc::new(Service::default());

    {
        let mut first = app(&service, SessionStore::new(JsonFileStore::new(&path)));
        let form = LoginForm {
            email: "ann@example.com".into(),
            password: "password1".into(),
        };
        assert!(first.submit_login(form).await);
    }

    let mut reloaded = app(&service, SessionStore::new(JsonFileStore::new(&path)));
    reloaded.boot();
    reloaded.navigate(Page::Generate).await;

    assert_eq!(reloaded.page(), Page::Generate);
    assert_eq!(reloaded.state().user.unwrap().email, "ann@example.com");
    assert_eq!(service.calls().iter().filter(|c| *c == "login").count(), 1);
}

#[tokio::test]
async fn generate_requires_login() {
    let service = Arc::new(Service::default());
    let mut app = app(&service, SessionStore::in_memory());
    app.navigate(Page::Generate).await;
    assert_eq!(app.page(), Page::Login);
    assert!(service.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn single_flight_wav_playback() {
    let service = Arc::new(Service {
        tracks: Mutex::new(vec![Track::new(1, "a", 30.0), Track::new(2, "b", 30.0)]),
        files: HashMap::from([(wav_url(1), wav(1.0)), (wav_url(2), wav(1.0))]),
        ..Service::default()
    });
    let mut app = logged_in(&service).await;

    assert_eq!(app.toggle_track(1), Some(Toggle::Playing));
    assert_eq!(app.toggle_track(2), Some(Toggle::Playing));
    assert_eq!(app.coordinator().playing_id(), Some(2));
    assert_eq!(app.toggle_track(2), Some(Toggle::Stopped));
    assert_eq!(app.coordinator().playing_id(), None);
}

#[tokio::test]
async fn empty_list_is_not_an_error() {
    let service = Arc::new(Service::default());
    let mut app = logged_in(&service).await;
    assert!(app.refresh_list().await);
    assert!(app.coordinator().tracks().is_empty());
    assert!(app.state().notice.is_none());
}

#[tokio::test(start_paused = true)]
async fn wav_track_ends_when_its_audio_does() {
    // listed as 42 seconds, the file holds half a second
    let service = Arc::new(Service {
        tracks: Mutex::new(vec![Track::new(7, "short", 42.0)]),
        files: HashMap::from([(wav_url(7), wav(0.5))]),
        ..Service::default()
    });
    let mut app = logged_in(&service).await;

    assert_eq!(app.toggle_track(7), Some(Toggle::Playing));
    let started = tokio::time::Instant::now();
    assert_eq!(
        app.next_slot_event().await,
        Some(SlotEvent::Ended { track_id: 7, epoch: 1 })
    );
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(490) && elapsed <= Duration::from_millis(520), "{:?}", elapsed);
    assert_eq!(app.coordinator().playing_id(), None);
    assert!(service.calls().contains(&format!("fetch {}", wav_url(7))));
}
