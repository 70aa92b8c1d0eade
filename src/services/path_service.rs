use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use thiserror::Error;

static USER_DATA_DIR: OnceLock<PathBuf> = OnceLock::new();

/// Overrides the user data directory when set.
pub const DATA_DIR_ENV: &str = "SONGLOOM_DATA_DIR";

const APP_DIR_NAME: &str = "songloom";
const SETTINGS_FILENAME: &str = "settings.json";
const SESSION_FILENAME: &str = "session.json";
const DOWNLOADS_DIRNAME: &str = "downloads";

/// Suffix of in-flight downloads; renamed away once the body is complete.
pub const PARTIAL_SUFFIX: &str = "part";

#[derive(Error, Debug)]
pub enum PathError {
    #[error("User data directory not found")]
    UserDataNotFound,
    #[error("Path service already initialized")]
    AlreadyInitialized,
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Pick the data directory: explicit override, then the environment, then
/// the platform data dir.
pub fn resolve_user_data_dir(override_dir: Option<PathBuf>) -> Result<PathBuf, PathError> {
    if let Some(dir) = override_dir {
        return Ok(dir);
    }
    if let Some(dir) = std::env::var_os(DATA_DIR_ENV).filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(dir));
    }
    dirs::data_dir()
        .map(|base| base.join(APP_DIR_NAME))
        .ok_or(PathError::UserDataNotFound)
}

pub fn init(override_dir: Option<PathBuf>) -> Result<PathBuf, PathError> {
    let user_data = resolve_user_data_dir(override_dir)?;
    std::fs::create_dir_all(&user_data)?;
    USER_DATA_DIR
        .set(user_data.clone())
        .map_err(|_| PathError::AlreadyInitialized)?;
    log::info!("Path service initialized. User data: {:?}", user_data);
    Ok(user_data)
}

pub fn settings_path(data_dir: &Path) -> PathBuf {
    data_dir.join(SETTINGS_FILENAME)
}

pub fn session_path(data_dir: &Path) -> PathBuf {
    data_dir.join(SESSION_FILENAME)
}

pub fn downloads_dir(data_dir: &Path) -> Result<PathBuf, PathError> {
    let dir = data_dir.join(DOWNLOADS_DIRNAME);
    if !dir.exists() {
        std::fs::create_dir_all(&dir)?;
    }
    Ok(dir)
}

/// Remove downloads that were interrupted before completion.
/// Returns how many partial files were deleted.
pub fn cleanup_partial_downloads(download_dir: &Path) -> Result<usize, PathError> {
    if !download_dir.exists() {
        return Ok(0);
    }

    let mut removed = 0usize;
    for entry in std::fs::read_dir(download_dir)?.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some(PARTIAL_SUFFIX) {
            continue;
        }
        match std::fs::remove_file(&path) {
            Ok(()) => {
                log::info!("Download GC: removed partial file {:?}", path);
                removed += 1;
            }
            Err(e) => log::warn!("Download GC: failed to remove {:?}: {}", path, e),
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_override_wins() {
        let dir = resolve_user_data_dir(Some(PathBuf::from("/tmp/songloom-test"))).unwrap();
        assert_eq!(dir, PathBuf::from("/tmp/songloom-test"));
    }

    #[test]
    fn init_creates_dir_once() {
        let tmp = tempfile::tempdir().unwrap();
        let data = tmp.path().join("data");
        assert_eq!(init(Some(data.clone())).unwrap(), data);
        assert!(data.is_dir());
        assert!(matches!(init(Some(data)), Err(PathError::AlreadyInitialized)));
    }

    #[test]
    fn derived_paths_live_under_data_dir() {
        let tmp = tempfile::tempdir().unwrap();
        assert_eq!(settings_path(tmp.path()), tmp.path().join("settings.json"));
        assert_eq!(session_path(tmp.path()), tmp.path().join("session.json"));

        let downloads = downloads_dir(tmp.path()).unwrap();
        assert!(downloads.is_dir());
        assert!(downloads.starts_with(tmp.path()));
    }

    #[test]
    fn cleanup_only_touches_partial_files() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("track_1.wav"), b"RIFF").unwrap();
        std::fs::write(tmp.path().join("track_2.wav.part"), b"RI").unwrap();

        let removed = cleanup_partial_downloads(tmp.path()).unwrap();
        assert_eq!(removed, 1);
        assert!(tmp.path().join("track_1.wav").exists());
        assert!(!tmp.path().join("track_2.wav.part").exists());
    }

    #[test]
    fn cleanup_of_missing_dir_is_noop() {
        let tmp = tempfile::tempdir().unwrap();
        assert_eq!(cleanup_partial_downloads(&tmp.path().join("nope")).unwrap(), 0);
    }
}
