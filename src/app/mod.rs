//! Page router and application controller
//!
//! [`App`] owns the store, the persisted session, the track list
//! coordinator and the MIDI playback engine. Every user action goes
//! through one of its methods; failures are logged and turned into form
//! errors or a [`Notice`], never returned to the caller.

pub mod profile;
pub mod state;
pub mod store;
pub mod validation;

use std::sync::Arc;

use crate::api::types::{Track, TrackId};
use crate::api::MusicApi;
use crate::config::ClientConfig;
use crate::coordinator::slot::{SlotEvent, SlotFactory};
use crate::coordinator::{Coordinator, CoordinatorError, Toggle};
use crate::playback::engine::{PlaybackEngine, StartOutcome};
use crate::playback::synth::AudioEngine;
use crate::playback::ByteSource;
use crate::session::SessionStore;

use profile::ProfileView;
pub use state::{Action, AppState, Notice, NoticeKind, Page, Theme};
use store::Store;
use validation::{GenerateForm, LoginForm, RegisterForm};

pub const LOGIN_FAILED: &str = "Login failed. Please try again.";
pub const REGISTER_FAILED: &str = "Registration failed. Please try again.";
pub const GENERATE_FAILED: &str = "Failed to generate music. Please try again.";
pub const MIDI_FAILED: &str = "Failed to play MIDI";
pub const DELETE_FAILED: &str = "Failed to delete music";
pub const LIST_FAILED: &str = "Failed to fetch music";
pub const PLAY_FAILED: &str = "Failed to play track";

pub struct App<A, E> {
    api: Arc<A>,
    session: SessionStore,
    store: Store,
    coordinator: Coordinator<A>,
    playback: PlaybackEngine<A, E>,
    /// Kept across submissions; the prompt is cleared after each one
    pub generate_form: GenerateForm,
    form_error: Option<String>,
    /// Refresh signal value the list was last loaded for
    list_signal: Option<u64>,
}

impl<A, E> App<A, E>
where
    A: MusicApi + ByteSource,
    E: AudioEngine,
{
    pub fn new(
        api: Arc<A>,
        session: SessionStore,
        slots: impl SlotFactory + 'static,
        audio: E,
        config: &ClientConfig,
    ) -> Self {
        Self {
            coordinator: Coordinator::new(api.clone(), slots),
            playback: PlaybackEngine::new(api.clone(), audio).with_lyric_interval(config.lyric_interval()),
            api,
            session,
            store: Store::default(),
            generate_form: GenerateForm::default(),
            form_error: None,
            list_signal: None,
        }
    }

    /// Pick up a persisted login, if there is one.
    pub fn boot(&mut self) {
        match self.session.restore() {
            Ok(Some(user)) => self.store.dispatch(Action::Restored(user)),
            Ok(None) => log::debug!("No saved session"),
            Err(e) => log::warn!("Failed to restore session: {}", e),
        }
    }

    async fn apply(&mut self, action: Action) {
        let before = self.store.with(|s| s.page);
        self.store.dispatch(action);
        let after = self.store.with(|s| s.page);
        if before == after {
            return;
        }

        self.form_error = None;
        if before == Page::Generate {
            self.coordinator.dispose();
            self.list_signal = None;
        }
        if after == Page::Generate {
            self.sync_list().await;
        }
    }

    pub async fn navigate(&mut self, page: Page) {
        self.apply(Action::Navigate(page)).await;
    }

    pub async fn submit_login(&mut self, form: LoginForm) -> bool {
        self.form_error = None;
        let request = match form.validate() {
            Ok(request) => request,
            Err(e) => {
                self.form_error = Some(e.to_string());
                return false;
            }
        };

        match self.api.login(&request).await {
            Ok(user) => {
                if let Err(e) = self.session.save(&user) {
                    log::warn!("Logged in but failed to persist session: {}", e);
                }
                self.apply(Action::LoggedIn(user)).await;
                true
            }
            Err(e) => {
                log::warn!("Login failed: {}", e);
                self.form_error = Some(e.user_message(LOGIN_FAILED));
                false
            }
        }
    }

    pub async fn submit_register(&mut self, form: RegisterForm) -> bool {
        self.form_error = None;
        let request = match form.validate() {
            Ok(request) => request,
            Err(e) => {
                self.form_error = Some(e.to_string());
                return false;
            }
        };

        match self.api.register(&request).await {
            Ok(_) => {
                self.apply(Action::Registered).await;
                true
            }
            Err(e) => {
                log::warn!("Registration failed: {}", e);
                self.form_error = Some(e.user_message(REGISTER_FAILED));
                false
            }
        }
    }

    /// Clear the session and stop all audio.
    pub async fn logout(&mut self) {
        if let Err(e) = self.session.clear() {
            log::warn!("Failed to clear session: {}", e);
        }
        self.playback.stop();
        self.coordinator.dispose();
        self.apply(Action::LoggedOut).await;
    }

    /// Submit the generate form. On success the list reloads.
    pub async fn submit_generate(&mut self) -> Option<Track> {
        let request = match self.generate_form.validate() {
            Ok(request) => request,
            Err(e) => {
                self.notify(Notice::error(e.to_string()));
                return None;
            }
        };

        let result = self.api.generate(&request).await;
        self.generate_form.prompt.clear();

        match result {
            Ok(track) => {
                self.store.dispatch(Action::TrackGenerated);
                self.sync_list().await;
                Some(track)
            }
            Err(e) => {
                log::error!("Music generation failed: {}", e);
                self.notify(Notice::error(GENERATE_FAILED));
                None
            }
        }
    }

    /// Reload the list if a generation happened since the last load.
    async fn sync_list(&mut self) {
        let signal = self.store.with(|s| s.refresh_signal);
        if self.list_signal != Some(signal) {
            self.list_signal = Some(signal);
            self.refresh_list().await;
        }
    }

    pub async fn refresh_list(&mut self) -> bool {
        match self.coordinator.refresh().await {
            Ok(_) => true,
            Err(e) => {
                log::error!("{}: {}", LIST_FAILED, e);
                self.notify(Notice::error(LIST_FAILED));
                false
            }
        }
    }

    pub fn toggle_track(&mut self, id: TrackId) -> Option<Toggle> {
        match self.coordinator.toggle_track(id) {
            Ok(state) => Some(state),
            Err(e) => {
                log::error!("Failed to toggle track {}: {}", id, e);
                self.notify(Notice::error(e.to_string()));
                None
            }
        }
    }

    pub fn toggle_lyrics(&mut self, id: TrackId) -> bool {
        self.coordinator.toggle_lyrics(id)
    }

    pub async fn delete_track(&mut self, id: TrackId) -> bool {
        match self.coordinator.delete(id).await {
            Ok(()) => true,
            Err(e) => {
                let message = match &e {
                    CoordinatorError::Api(api) => api.user_message(DELETE_FAILED),
                    other => other.to_string(),
                };
                self.notify(Notice::error(message));
                false
            }
        }
    }

    /// Direct download link for a listed track.
    pub fn download_link(&self, id: TrackId) -> Option<String> {
        self.coordinator.track(id).map(|_| self.api.download_wav_url(id))
    }

    /// Play MIDI from `url` with the given lyric sheet.
    pub async fn play_midi(&mut self, url: &str, lyrics: Option<&str>) -> bool {
        match self.playback.start(url, lyrics).await {
            Ok(StartOutcome::Started { .. }) => true,
            Ok(StartOutcome::Superseded) => false,
            Err(_) => {
                self.notify(Notice::error(MIDI_FAILED));
                false
            }
        }
    }

    /// Play MIDI from `url`, showing the lyrics of listed track `id`.
    pub async fn play_track_midi(&mut self, url: &str, id: TrackId) -> bool {
        let lyrics = self.coordinator.track(id).and_then(|t| t.lyrics.clone());
        self.play_midi(url, lyrics.as_deref()).await
    }

    pub fn stop_midi(&mut self) {
        self.playback.stop();
    }

    pub fn toggle_theme(&mut self) {
        self.store.dispatch(Action::ToggleTheme);
    }

    pub fn notify(&mut self, notice: Notice) {
        self.store.dispatch(Action::Notify(notice));
    }

    pub fn dismiss_notice(&mut self) {
        self.store.dispatch(Action::DismissNotice);
    }

    /// Wait for a track to finish or fail on its own and apply it.
    pub async fn next_slot_event(&mut self) -> Option<SlotEvent> {
        let event = self.coordinator.next_event().await?;
        if let SlotEvent::Failed { track_id, .. } = &event {
            self.notify(Notice::error(format!("{} {}", PLAY_FAILED, track_id)));
        }
        Some(event)
    }
}

impl<A, E> App<A, E> {
    pub fn state(&self) -> AppState {
        self.store.state()
    }

    pub fn page(&self) -> Page {
        self.store.with(|s| s.page)
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn coordinator(&self) -> &Coordinator<A> {
        &self.coordinator
    }

    pub fn playback(&self) -> &PlaybackEngine<A, E> {
        &self.playback
    }

    pub fn form_error(&self) -> Option<&str> {
        self.form_error.as_deref()
    }

    pub fn profile(&self) -> Option<ProfileView> {
        self.store.with(|s| s.user.as_ref().map(ProfileView::from_user))
    }
}
