use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};

use songloom::api::client::ApiClient;
use songloom::api::ApiError;
use songloom::app::{App, Notice, Page};
use songloom::config::ClientConfig;
use songloom::coordinator::slot::{SlotEvent, StreamSlotFactory};
use songloom::output::AudioOutput;
use songloom::playback::synth::RenderEngine;
use songloom::services::path_service::{self, PathError};
use songloom::session::{JsonFileStore, SessionStore};
use songloom::shell::{parse_command, render, ShellCommand, HELP};

type ConsoleApp = App<ApiClient, RenderEngine>;

#[derive(Error, Debug)]
enum StartupError {
    #[error(transparent)]
    Path(#[from] PathError),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("Failed to read input: {0}")]
    Io(#[from] std::io::Error),
}

fn data_dir_arg() -> Option<PathBuf> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--data-dir" {
            return args.next().map(PathBuf::from);
        }
    }
    None
}

fn show(app: &ConsoleApp) {
    print!("\n{}> ", render(app));
    let _ = std::io::stdout().flush();
}

async fn download(app: &mut ConsoleApp, client: &ApiClient, dir: &Path, id: i64) {
    if app.download_link(id).is_none() {
        app.notify(Notice::error(format!("Track {} is not in the list", id)));
        return;
    }
    match client.download_wav(id, dir).await {
        Ok(path) => app.notify(Notice::info(format!("Saved {}", path.display()))),
        Err(e) => {
            log::error!("Download of track {} failed: {}", id, e);
            app.notify(Notice::error(e.user_message("Download failed")));
        }
    }
}

/// Run one command. Returns false when the user asked to quit.
async fn execute(app: &mut ConsoleApp, client: &ApiClient, download_dir: &Path, command: ShellCommand) -> bool {
    match command {
        ShellCommand::Go(page) => app.navigate(page).await,
        ShellCommand::Register(form) => {
            app.submit_register(form).await;
        }
        ShellCommand::Login(form) => {
            app.submit_login(form).await;
        }
        ShellCommand::Logout => app.logout().await,
        ShellCommand::Generate { prompt, genre, voice } => {
            app.navigate(Page::Generate).await;
            if app.page() != Page::Generate {
                return true;
            }
            app.generate_form.prompt = prompt;
            if let Some(genre) = genre {
                app.generate_form.genre = genre;
            }
            if let Some(voice) = voice {
                app.generate_form.voice = voice;
            }
            println!("Generating...");
            app.submit_generate().await;
        }
        ShellCommand::List => {
            app.refresh_list().await;
        }
        ShellCommand::Play(id) => {
            app.toggle_track(id);
        }
        ShellCommand::Lyrics(id) => {
            app.toggle_lyrics(id);
        }
        ShellCommand::Delete(id) => {
            app.delete_track(id).await;
        }
        ShellCommand::Download(id) => download(app, client, download_dir, id).await,
        ShellCommand::Midi { url, track } => {
            match track {
                Some(id) => app.play_track_midi(&url, id).await,
                None => app.play_midi(&url, None).await,
            };
        }
        ShellCommand::Stop => app.stop_midi(),
        ShellCommand::Bounce(path) => match app.playback().audio().bounce_to_wav(&path) {
            Ok(frames) => {
                let stats = app.playback().audio().stats();
                app.notify(Notice::info(format!(
                    "Wrote {} frames to {} ({} notes, {} dropped)",
                    frames,
                    path.display(),
                    stats.notes_played,
                    stats.notes_dropped
                )))
            }
            Err(e) => {
                log::error!("Bounce failed: {}", e);
                app.notify(Notice::error(e.to_string()));
            }
        },
        ShellCommand::Theme => app.toggle_theme(),
        ShellCommand::Dismiss => app.dismiss_notice(),
        ShellCommand::Help => println!("{}", HELP),
        ShellCommand::Quit => return false,
    }
    true
}

async fn run() -> Result<(), StartupError> {
    let data_dir = path_service::init(data_dir_arg())?;
    let config = ClientConfig::load(&path_service::settings_path(&data_dir)).with_env_overrides();

    let download_dir = match &config.download_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir).map_err(PathError::from)?;
            dir.clone()
        }
        None => path_service::downloads_dir(&data_dir)?,
    };
    match path_service::cleanup_partial_downloads(&download_dir) {
        Ok(n) if n > 0 => log::info!("Removed {} interrupted downloads", n),
        Ok(_) => {}
        Err(e) => log::warn!("Download cleanup failed: {}", e),
    }

    let client = ApiClient::from_config(&config)?;
    log::info!("Using music service at {}", client.base_url());

    let output = Arc::new(AudioOutput::new(config.audio_output, config.sample_rate));
    log::info!("Audio output: {:?}", output.kind());

    let api = Arc::new(client.clone());
    let session = SessionStore::new(JsonFileStore::new(path_service::session_path(&data_dir)));
    let mut app: ConsoleApp = App::new(
        api.clone(),
        session,
        StreamSlotFactory::new(api, output.clone()),
        RenderEngine::from_config(output, &config),
        &config,
    );
    app.boot();

    let mut lyrics = app.playback().subscribe_lyrics();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    show(&app);

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match parse_command(&line) {
                    Ok(Some(command)) => {
                        if !execute(&mut app, &client, &download_dir, command).await {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => println!("{}", e),
                }
                show(&app);
            }
            Some(event) = app.next_slot_event() => {
                match event {
                    SlotEvent::Ended { track_id, .. } if !app.coordinator().is_playing(track_id) => {
                        println!("\nTrack {} finished", track_id);
                    }
                    SlotEvent::Failed { track_id, message, .. } => {
                        println!("\nTrack {} could not be played: {}", track_id, message);
                    }
                    SlotEvent::Ended { .. } => continue,
                }
                show(&app);
            }
            Ok(()) = lyrics.changed() => {
                if let Some(line) = lyrics.borrow_and_update().clone() {
                    println!("\n  ~ {}", line);
                    show(&app);
                }
            }
        }
    }

    app.stop_midi();
    log::info!("Goodbye");
    Ok(())
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = run().await {
        log::error!("{}", e);
        eprintln!("songloom: {}", e);
        std::process::exit(1);
    }
}
