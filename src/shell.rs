//! Console front end
//!
//! Parses one input line into a [`ShellCommand`] and renders the current
//! page as text. Executing commands is the binary's job.

use std::path::PathBuf;

use thiserror::Error;

use crate::api::types::{Genre, TrackId, Voice};
use crate::app::state::{NoticeKind, Page, Theme};
use crate::app::validation::{LoginForm, RegisterForm};
use crate::app::App;

pub const HELP: &str = "\
Commands:
  home                              go to the home page
  start                             get started (generate page, or login)
  register                          open the sign-up page
  register <username> <email> <pw>  create an account
  login                             open the login page
  login <email> <password>          log in
  logout                            log out and stop all audio
  generate [-g genre] [-v voice] <prompt...>
                                    generate a track (genre: lofi|pop|classical, voice: male|female)
  list                              reload the track list
  play <id>                         play/stop a track
  lyrics <id>                       show/hide a track's lyrics
  delete <id>                       delete a track
  download <id>                     save a track's WAV to the download folder
  midi <url> [id]                   play MIDI, with the lyrics of track <id>
  stop                              stop MIDI playback
  bounce <path>                     write the rendered MIDI audio to a WAV file
  theme                             switch light/dark
  profile                           show your profile
  dismiss                           close the current notice
  help                              this text
  quit                              exit";

#[derive(Debug, Clone, PartialEq)]
pub enum ShellCommand {
    Go(Page),
    Register(RegisterForm),
    Login(LoginForm),
    Logout,
    Generate {
        prompt: String,
        genre: Option<Genre>,
        voice: Option<Voice>,
    },
    List,
    Play(TrackId),
    Lyrics(TrackId),
    Delete(TrackId),
    Download(TrackId),
    Midi {
        url: String,
        track: Option<TrackId>,
    },
    Stop,
    Bounce(PathBuf),
    Theme,
    Dismiss,
    Help,
    Quit,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ShellError {
    #[error("Unknown command '{0}' (try 'help')")]
    Unknown(String),
    #[error("Usage: {0}")]
    Usage(&'static str),
    #[error("{0}")]
    Invalid(String),
}

fn track_id(arg: Option<&str>, usage: &'static str) -> Result<TrackId, ShellError> {
    let arg = arg.ok_or(ShellError::Usage(usage))?;
    arg.parse()
        .map_err(|_| ShellError::Invalid(format!("'{}' is not a track id", arg)))
}

fn parse_generate(args: &[&str]) -> Result<ShellCommand, ShellError> {
    const USAGE: &str = "generate [-g genre] [-v voice] <prompt...>";

    let mut genre = None;
    let mut voice = None;
    let mut words = Vec::new();
    let mut iter = args.iter();
    while let Some(&arg) = iter.next() {
        match arg {
            "-g" | "--genre" => {
                let value = iter.next().ok_or(ShellError::Usage(USAGE))?;
                genre = Some(value.parse().map_err(ShellError::Invalid)?);
            }
            "-v" | "--voice" => {
                let value = iter.next().ok_or(ShellError::Usage(USAGE))?;
                voice = Some(value.parse().map_err(ShellError::Invalid)?);
            }
            word => words.push(word),
        }
    }

    if words.is_empty() && genre.is_none() && voice.is_none() {
        return Ok(ShellCommand::Go(Page::Generate));
    }
    Ok(ShellCommand::Generate {
        prompt: words.join(" "),
        genre,
        voice,
    })
}

/// Parse one line. Blank lines give `Ok(None)`.
pub fn parse_command(line: &str) -> Result<Option<ShellCommand>, ShellError> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let Some((&name, args)) = tokens.split_first() else {
        return Ok(None);
    };

    let command = match name.to_ascii_lowercase().as_str() {
        "home" => ShellCommand::Go(Page::Home),
        "start" => ShellCommand::Go(Page::Generate),
        "profile" => ShellCommand::Go(Page::Profile),
        "register" | "signup" => match args {
            [] => ShellCommand::Go(Page::Register),
            [username, email, password] => ShellCommand::Register(RegisterForm {
                username: username.to_string(),
                email: email.to_string(),
                password: password.to_string(),
            }),
            _ => return Err(ShellError::Usage("register <username> <email> <password>")),
        },
        "login" => match args {
            [] => ShellCommand::Go(Page::Login),
            [email, password] => ShellCommand::Login(LoginForm {
                email: email.to_string(),
                password: password.to_string(),
            }),
            _ => return Err(ShellError::Usage("login <email> <password>")),
        },
        "logout" => ShellCommand::Logout,
        "generate" => parse_generate(args)?,
        "list" => ShellCommand::List,
        "play" => ShellCommand::Play(track_id(args.first().copied(), "play <id>")?),
        "lyrics" => ShellCommand::Lyrics(track_id(args.first().copied(), "lyrics <id>")?),
        "delete" => ShellCommand::Delete(track_id(args.first().copied(), "delete <id>")?),
        "download" => ShellCommand::Download(track_id(args.first().copied(), "download <id>")?),
        "midi" => match args {
            [url] => ShellCommand::Midi {
                url: url.to_string(),
                track: None,
            },
            [url, id] => ShellCommand::Midi {
                url: url.to_string(),
                track: Some(track_id(Some(*id), "midi <url> [id]")?),
            },
            _ => return Err(ShellError::Usage("midi <url> [id]")),
        },
        "stop" => ShellCommand::Stop,
        "bounce" => match args {
            [path] => ShellCommand::Bounce(PathBuf::from(path)),
            _ => return Err(ShellError::Usage("bounce <path>")),
        },
        "theme" => ShellCommand::Theme,
        "dismiss" | "ok" => ShellCommand::Dismiss,
        "help" | "?" => ShellCommand::Help,
        "quit" | "exit" => ShellCommand::Quit,
        other => return Err(ShellError::Unknown(other.to_string())),
    };
    Ok(Some(command))
}

fn format_duration(seconds: f64) -> String {
    let total = seconds.max(0.0).round() as u64;
    format!("{}:{:02}", total / 60, total % 60)
}

/// Text rendering of the current page.
pub fn render<A, E>(app: &App<A, E>) -> String {
    let state = app.state();
    let mut out = String::new();

    let theme = match state.theme {
        Theme::Light => "light",
        Theme::Dark => "dark",
    };
    let who = state
        .user
        .as_ref()
        .map(|u| u.display_name().to_string())
        .unwrap_or_else(|| "signed out".to_string());
    out.push_str(&format!("[{}] {} | {} theme\n", state.page, who, theme));

    if let Some(notice) = &state.notice {
        let tag = match notice.kind {
            NoticeKind::Info => "info",
            NoticeKind::Error => "error",
        };
        out.push_str(&format!("  ({}) {}  [dismiss]\n", tag, notice.message));
    }
    if let Some(error) = app.form_error() {
        out.push_str(&format!("  ! {}\n", error));
    }

    match state.page {
        Page::Home => {
            out.push_str("Text-to-Music Generation System\n");
            out.push_str("Turn your words into music. Type 'start' to get started.\n");
        }
        Page::Login => out.push_str("Log In: login <email> <password>\n"),
        Page::Register => out.push_str("Sign Up: register <username> <email> <password>\n"),
        Page::Profile => {
            if let Some(profile) = app.profile() {
                out.push_str(&profile.render());
                out.push('\n');
            }
        }
        Page::Generate => {
            let form = &app.generate_form;
            out.push_str(&format!("Generate: genre={} voice={}\n", form.genre, form.voice));
            let coordinator = app.coordinator();
            if coordinator.tracks().is_empty() {
                out.push_str("No music generated yet.\n");
            }
            for track in coordinator.tracks() {
                let marker = if coordinator.is_playing(track.id) { "[stop]" } else { "[play]" };
                out.push_str(&format!(
                    "  {:>4}  {} {}  ({})\n",
                    track.id,
                    marker,
                    track.prompt,
                    format_duration(track.duration_seconds)
                ));
                if coordinator.open_lyrics() == Some(track.id) {
                    let lyrics = track.lyrics.as_deref().unwrap_or("(no lyrics)");
                    for line in lyrics.lines() {
                        out.push_str(&format!("        | {}\n", line));
                    }
                }
            }
        }
    }

    if let Some(line) = app.playback().current_line() {
        out.push_str(&format!("  ~ {}\n", line));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &str) -> ShellCommand {
        parse_command(line).unwrap().unwrap()
    }

    #[test]
    fn blank_line_is_nothing() {
        assert_eq!(parse_command("   "), Ok(None));
    }

    #[test]
    fn navigation_commands() {
        assert_eq!(parse("home"), ShellCommand::Go(Page::Home));
        assert_eq!(parse("start"), ShellCommand::Go(Page::Generate));
        assert_eq!(parse("LOGIN"), ShellCommand::Go(Page::Login));
        assert_eq!(parse("generate"), ShellCommand::Go(Page::Generate));
    }

    #[test]
    fn login_and_register_forms() {
        assert_eq!(
            parse("login ann@example.com hunter22"),
            ShellCommand::Login(LoginForm {
                email: "ann@example.com".into(),
                password: "hunter22".into(),
            })
        );
        assert!(matches!(parse("register ann a@b.co password1"), ShellCommand::Register(f) if f.username == "ann"));
        assert_eq!(
            parse_command("login only-email"),
            Err(ShellError::Usage("login <email> <password>"))
        );
    }

    #[test]
    fn generate_with_options() {
        assert_eq!(
            parse("generate -g classical --voice female sad piano song"),
            ShellCommand::Generate {
                prompt: "sad piano song".into(),
                genre: Some(Genre::Classical),
                voice: Some(Voice::Female),
            }
        );
        assert_eq!(
            parse("generate rainy   night"),
            ShellCommand::Generate {
                prompt: "rainy night".into(),
                genre: None,
                voice: None,
            }
        );
        assert!(matches!(parse_command("generate -g jazz x"), Err(ShellError::Invalid(_))));
        assert!(matches!(parse_command("generate -v"), Err(ShellError::Usage(_))));
    }

    #[test]
    fn track_commands_need_numeric_ids() {
        assert_eq!(parse("play 3"), ShellCommand::Play(3));
        assert_eq!(parse("delete 42"), ShellCommand::Delete(42));
        assert!(matches!(parse_command("lyrics x"), Err(ShellError::Invalid(_))));
        assert_eq!(parse_command("download"), Err(ShellError::Usage("download <id>")));
    }

    #[test]
    fn midi_with_optional_track() {
        assert_eq!(
            parse("midi http://h/song.mid 4"),
            ShellCommand::Midi {
                url: "http://h/song.mid".into(),
                track: Some(4),
            }
        );
        assert_eq!(
            parse("midi http://h/song.mid"),
            ShellCommand::Midi {
                url: "http://h/song.mid".into(),
                track: None,
            }
        );
    }

    #[test]
    fn unknown_command() {
        assert_eq!(parse_command("dance"), Err(ShellError::Unknown("dance".into())));
    }

    #[test]
    fn durations() {
        assert_eq!(format_duration(0.0), "0:00");
        assert_eq!(format_duration(75.4), "1:15");
    }
}
