//! Application state and the reducer that evolves it.

use std::fmt;
use std::str::FromStr;

use crate::api::types::User;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Page {
    #[default]
    Home,
    Login,
    Register,
    Generate,
    Profile,
}

impl Page {
    /// Pages that redirect to login when nobody is signed in.
    pub fn requires_user(self) -> bool {
        matches!(self, Page::Generate | Page::Profile)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Page::Home => "home",
            Page::Login => "login",
            Page::Register => "register",
            Page::Generate => "generate",
            Page::Profile => "profile",
        }
    }
}

impl fmt::Display for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Page {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "home" => Ok(Page::Home),
            "login" => Ok(Page::Login),
            "register" | "signup" | "sign-up" => Ok(Page::Register),
            "generate" | "generation" => Ok(Page::Generate),
            "profile" => Ok(Page::Profile),
            other => Err(format!("unknown page: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

impl Theme {
    pub fn toggled(self) -> Self {
        match self {
            Theme::Light => Theme::Dark,
            Theme::Dark => Theme::Light,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    Info,
    Error,
}

/// A blocking notification; one at a time, replaced by the next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub kind: NoticeKind,
    pub message: String,
}

impl Notice {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            kind: NoticeKind::Info,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: NoticeKind::Error,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AppState {
    pub page: Page,
    pub user: Option<User>,
    pub theme: Theme,
    /// Bumped after every successful generation; list views reload on change
    pub refresh_signal: u64,
    pub notice: Option<Notice>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Navigate(Page),
    /// A user was restored from the persisted session at startup
    Restored(User),
    LoggedIn(User),
    LoggedOut,
    Registered,
    ToggleTheme,
    TrackGenerated,
    Notify(Notice),
    DismissNotice,
}

pub fn reduce(state: &AppState, action: &Action) -> AppState {
    let mut next = state.clone();
    match action {
        Action::Navigate(page) => {
            next.page = if page.requires_user() && next.user.is_none() {
                Page::Login
            } else {
                *page
            };
        }
        Action::Restored(user) => {
            next.user = Some(user.clone());
        }
        Action::LoggedIn(user) => {
            next.user = Some(user.clone());
            next.page = Page::Generate;
        }
        Action::LoggedOut => {
            next.user = None;
            next.page = Page::Home;
        }
        Action::Registered => {
            next.page = Page::Login;
        }
        Action::ToggleTheme => {
            next.theme = next.theme.toggled();
        }
        Action::TrackGenerated => {
            next.refresh_signal = next.refresh_signal.wrapping_add(1);
        }
        Action::Notify(notice) => {
            next.notice = Some(notice.clone());
        }
        Action::DismissNotice => {
            next.notice = None;
        }
    }
    next
}
