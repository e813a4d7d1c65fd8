//! Turning a registered folder into a playlist.
//!
//! Only regular, non-hidden audio files are collected. Playlist files
//! (`.m3u`, `.cue`, ...) are skipped since the player receives the tracks
//! directly. Subfolders are only walked when `recursive` is set.

use anyhow::{Context, Result};
use log::{debug, warn};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub const AUDIO_EXTENSIONS: &[&str] = &[
    "mp3", "flac", "ogg", "oga", "opus", "wav", "m4a", "aac", "wma", "aiff", "ape", "mka",
];

pub const PLAYLIST_EXTENSIONS: &[&str] = &["m3u", "m3u8", "asx", "xspf", "b4s", "cue", "pls"];

fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
}

pub fn is_playlist(path: &Path) -> bool {
    extension_of(path).is_some_and(|ext| PLAYLIST_EXTENSIONS.contains(&ext.as_str()))
}

pub fn is_audio_file(path: &Path) -> bool {
    extension_of(path).is_some_and(|ext| AUDIO_EXTENSIONS.contains(&ext.as_str()))
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.'))
}

/// Ordered list of playable tracks under `path`.
///
/// A path naming a single file yields just that file. Unreadable entries are
/// skipped with a warning; an unreadable top-level folder is an error.
pub fn collect_tracks(path: &Path, recursive: bool) -> Result<Vec<PathBuf>> {
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }

    let mut tracks = if recursive {
        collect_recursive(path)?
    } else {
        collect_flat(path)?
    };
    tracks.sort();

    debug!("Collected {} tracks from {}", tracks.len(), path.display());
    Ok(tracks)
}

fn collect_flat(path: &Path) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(path)
        .with_context(|| format!("Cannot read media folder {}", path.display()))?;

    let mut tracks = Vec::new();
    for entry in entries {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!("Skipping unreadable entry in {}: {}", path.display(), e);
                continue;
            }
        };
        let file = entry.path();
        if file.is_file() && is_track(&file) {
            tracks.push(file);
        }
    }
    Ok(tracks)
}

fn collect_recursive(path: &Path) -> Result<Vec<PathBuf>> {
    // Surface a missing root as an error instead of an empty walk
    fs::metadata(path)
        .with_context(|| format!("Cannot read media folder {}", path.display()))?;

    let mut tracks = Vec::new();
    let walker = WalkDir::new(path)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden(e.path()));

    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!("Skipping unreadable entry under {}: {}", path.display(), e);
                continue;
            }
        };
        if entry.file_type().is_file() && is_track(entry.path()) {
            tracks.push(entry.into_path());
        }
    }
    Ok(tracks)
}

fn is_track(path: &Path) -> bool {
    !is_hidden(path) && !is_playlist(path) && is_audio_file(path)
}

/// Expand a leading `~` using `$HOME`.
pub fn expand_path(path: &str) -> Result<PathBuf> {
    if path.starts_with('~') {
        let home = std::env::var("HOME").context("HOME environment variable not set")?;
        Ok(PathBuf::from(path.replacen('~', &home, 1)))
    } else {
        Ok(PathBuf::from(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn touch(path: &Path) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, b"").unwrap();
    }

    fn names(tracks: &[PathBuf], root: &Path) -> Vec<String> {
        tracks
            .iter()
            .map(|t| t.strip_prefix(root).unwrap().to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_extension_checks() {
        assert!(is_audio_file(Path::new("/a/b.FLAC")));
        assert!(is_audio_file(Path::new("song.mp3")));
        assert!(!is_audio_file(Path::new("cover.jpg")));
        assert!(!is_audio_file(Path::new("README")));
        assert!(is_playlist(Path::new("album.M3U")));
        assert!(!is_playlist(Path::new("album.mp3")));
    }

    #[test]
    fn test_flat_collection_skips_subfolders_and_extras() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        touch(&root.join("02 - b.flac"));
        touch(&root.join("01 - a.mp3"));
        touch(&root.join("cover.jpg"));
        touch(&root.join("album.m3u"));
        touch(&root.join(".hidden.mp3"));
        touch(&root.join("disc2/03 - c.mp3"));

        let tracks = collect_tracks(root, false).unwrap();
        assert_eq!(names(&tracks, root), vec!["01 - a.mp3", "02 - b.flac"]);
    }

    #[test]
    fn test_recursive_collection_includes_subfolders() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        touch(&root.join("01 - a.mp3"));
        touch(&root.join("disc2/03 - c.mp3"));
        touch(&root.join("disc2/notes.txt"));
        touch(&root.join(".trash/old.mp3"));

        let tracks = collect_tracks(root, true).unwrap();
        assert_eq!(
            names(&tracks, root),
            vec!["01 - a.mp3", "disc2/03 - c.mp3"]
        );
    }

    #[test]
    fn test_single_file_is_its_own_playlist() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("single.ogg");
        touch(&file);

        assert_eq!(collect_tracks(&file, false).unwrap(), vec![file]);
    }

    #[test]
    fn test_missing_folder_is_error() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("nope");

        assert!(collect_tracks(&missing, false).is_err());
        assert!(collect_tracks(&missing, true).is_err());
    }

    #[test]
    fn test_expand_path() {
        let path = expand_path("/tmp/music").unwrap();
        assert_eq!(path, PathBuf::from("/tmp/music"));

        if let Ok(home) = std::env::var("HOME") {
            assert_eq!(
                expand_path("~/music").unwrap(),
                PathBuf::from(format!("{}/music", home))
            );
        }
    }
}
