//! The scan → resolve → act loop.
//!
//! Playback mode runs until shutdown or until the reader's input closes.
//! Write mode ends after one tag has been associated with a folder, or when
//! the user cancels.

use anyhow::Result;
use log::{debug, error, info, warn};
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::time::Duration;

use crate::console::ShutdownFlag;
use crate::error::ReaderError;
use crate::media::{collect_tracks, expand_path};
use crate::player::MediaPlayer;
use crate::prompt::Prompter;
use crate::reader::TagReader;
use crate::registry::{Registry, TagRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    Playback,
    Write,
}

impl SessionMode {
    pub fn from_write_flag(write: bool) -> Self {
        if write {
            SessionMode::Write
        } else {
            SessionMode::Playback
        }
    }
}

#[derive(Debug, Clone)]
pub struct DispatchOptions {
    /// Include subfolders when building a playlist
    pub recursive: bool,

    /// Folder offered by the write-mode prompt
    pub default_directory: Option<PathBuf>,

    /// Longest single wait on the reader before checking for shutdown
    pub poll_interval: Duration,

    /// Pause after a failed read before polling again
    pub error_pause: Duration,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        DispatchOptions {
            recursive: false,
            default_directory: None,
            poll_interval: Duration::from_millis(500),
            error_pause: Duration::from_secs(2),
        }
    }
}

/// Counters for a finished playback session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaybackStats {
    pub scans: usize,
    pub started: usize,
    pub resumed: usize,
    /// Rescans of the tag whose playlist was still playing
    pub continued: usize,
    pub unknown_tags: usize,
    pub empty_folders: usize,
    pub read_errors: usize,
    pub player_errors: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    Stored(TagRecord),
    /// Input ended or the user gave up before anything was stored
    Cancelled { failed_attempts: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    Playback(PlaybackStats),
    Write(WriteOutcome),
}

enum Scan {
    Tag(String),
    Stop,
}

enum Association {
    Stored(TagRecord),
    Aborted,
    Cancelled,
}

pub struct Dispatcher<R, P, Q> {
    registry: Registry,
    reader: R,
    player: P,
    prompter: Q,
    options: DispatchOptions,
    shutdown: ShutdownFlag,
    /// Tag whose playlist the player currently holds
    current_tag: Option<String>,
}

impl<R: TagReader, P: MediaPlayer, Q: Prompter> Dispatcher<R, P, Q> {
    pub fn new(
        registry: Registry,
        reader: R,
        player: P,
        prompter: Q,
        options: DispatchOptions,
        shutdown: ShutdownFlag,
    ) -> Self {
        Dispatcher {
            registry,
            reader,
            player,
            prompter,
            options,
            shutdown,
            current_tag: None,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn player(&self) -> &P {
        &self.player
    }

    pub fn run(&mut self, mode: SessionMode) -> Result<SessionOutcome> {
        match mode {
            SessionMode::Playback => self.run_playback().map(SessionOutcome::Playback),
            SessionMode::Write => self.run_write().map(SessionOutcome::Write),
        }
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    fn wait_for_scan(&mut self, read_errors: &mut usize) -> Scan {
        info!("Waiting for tag...");
        loop {
            if self.shutdown_requested() {
                return Scan::Stop;
            }
            match self.reader.poll(self.options.poll_interval) {
                Ok(Some(tag)) => {
                    info!("Tag id: {}", tag);
                    return Scan::Tag(tag);
                }
                Ok(None) => continue,
                Err(ReaderError::Closed) => {
                    info!("Reader input closed");
                    return Scan::Stop;
                }
                Err(e) => {
                    error!("{}", e);
                    *read_errors += 1;
                    std::thread::sleep(self.options.error_pause);
                }
            }
        }
    }

    /// Block until the tag leaves the reader, when the reader can tell.
    fn wait_for_removal(&mut self) {
        if !self.reader.tracks_presence() {
            return;
        }
        while !self.shutdown_requested() {
            match self.reader.wait_removed(self.options.poll_interval) {
                Ok(true) => {
                    debug!("Tag removed");
                    return;
                }
                Ok(false) => continue,
                Err(e) => {
                    warn!("Lost track of tag presence: {}", e);
                    return;
                }
            }
        }
    }

    pub fn run_playback(&mut self) -> Result<PlaybackStats> {
        let mut stats = PlaybackStats::default();

        loop {
            let tag = match self.wait_for_scan(&mut stats.read_errors) {
                Scan::Tag(tag) => tag,
                Scan::Stop => break,
            };
            stats.scans += 1;

            let folder = match self.registry.lookup(&tag) {
                Ok(Some(folder)) => folder,
                Ok(None) => {
                    info!(
                        "No folder registered for tag {}, run with -w to associate one",
                        tag
                    );
                    stats.unknown_tags += 1;
                    continue;
                }
                Err(e) => {
                    error!("Registry lookup for {} failed: {}", tag, e);
                    continue;
                }
            };

            match self.start_playback(&tag, &folder, &mut stats) {
                Ok(true) => self.hold_while_present(),
                Ok(false) => {}
                Err(e) => {
                    error!("Playback of {} failed: {:#}", folder, e);
                    stats.player_errors += 1;
                }
            }
        }

        info!("Quitting...");
        self.player.stop()?;
        Ok(stats)
    }

    /// Returns whether something is now playing.
    fn start_playback(&mut self, tag: &str, folder: &str, stats: &mut PlaybackStats) -> Result<bool> {
        if self.current_tag.as_deref() == Some(tag) {
            if self.player.is_playing() {
                info!("Continuing.");
                stats.continued += 1;
                return Ok(true);
            }
            if self.player.resume()? {
                info!("Continuing.");
                stats.resumed += 1;
                return Ok(true);
            }
        }
        self.current_tag = None;

        let path = expand_path(folder)?;
        let tracks = collect_tracks(&path, self.options.recursive)?;
        if tracks.is_empty() {
            warn!("No tracks found in {}", path.display());
            stats.empty_folders += 1;
            return Ok(false);
        }

        info!("Added {} songs to playlist", tracks.len());
        self.player.play(&tracks)?;
        self.current_tag = Some(tag.to_string());
        stats.started += 1;
        Ok(true)
    }

    fn hold_while_present(&mut self) {
        if !self.reader.tracks_presence() {
            return;
        }
        self.wait_for_removal();
        if self.shutdown_requested() {
            return;
        }

        if let Err(e) = self.player.pause() {
            warn!("Pausing failed: {:#}", e);
        }
    }

    pub fn run_write(&mut self) -> Result<WriteOutcome> {
        let mut failed_attempts = 0;
        let mut read_errors = 0;

        loop {
            self.prompter.announce_scan();
            let tag = match self.wait_for_scan(&mut read_errors) {
                Scan::Tag(tag) => tag,
                Scan::Stop => return Ok(WriteOutcome::Cancelled { failed_attempts }),
            };

            match self.registry.lookup(&tag) {
                Ok(Some(existing)) => {
                    info!("Tag is already pointing to: {}", existing);
                    match self.prompter.confirm("Do you want to overwrite this tag?") {
                        Some(true) => {}
                        Some(false) => {
                            info!("Please remove tag.");
                            self.wait_for_removal();
                            continue;
                        }
                        None => return Ok(WriteOutcome::Cancelled { failed_attempts }),
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    error!("Registry lookup for {} failed: {}", tag, e);
                    failed_attempts += 1;
                    self.wait_for_removal();
                    continue;
                }
            }

            match self.associate(&tag, &mut failed_attempts) {
                Association::Stored(record) => {
                    info!("Done writing, please remove tag.");
                    self.wait_for_removal();
                    return Ok(WriteOutcome::Stored(record));
                }
                Association::Aborted => {
                    self.wait_for_removal();
                    continue;
                }
                Association::Cancelled => {
                    return Ok(WriteOutcome::Cancelled { failed_attempts });
                }
            }
        }
    }

    fn associate(&mut self, tag: &str, failed_attempts: &mut usize) -> Association {
        loop {
            info!("Select media folder...");
            let folder = match self.select_folder() {
                Some(folder) => folder,
                None => return Association::Cancelled,
            };

            match self.registry.store(tag, &folder) {
                Ok(record) => {
                    info!("Successfully added entry to registry: {}, {}", tag, folder);
                    return Association::Stored(record);
                }
                Err(e) => {
                    error!("Adding entry to registry failed: {}", e);
                    *failed_attempts += 1;
                    match self.prompter.confirm("Choose another folder?") {
                        Some(true) => continue,
                        Some(false) => {
                            warn!("Gave up associating tag {}", tag);
                            return Association::Aborted;
                        }
                        None => return Association::Cancelled,
                    }
                }
            }
        }
    }

    /// Prompt until the user names a folder with at least one track.
    fn select_folder(&mut self) -> Option<String> {
        loop {
            let answer = self
                .prompter
                .ask_folder(self.options.default_directory.as_deref())?;

            let candidate = if answer.is_empty() {
                match &self.options.default_directory {
                    Some(dir) => dir.clone(),
                    None => continue,
                }
            } else {
                match expand_path(&answer) {
                    Ok(path) => path,
                    Err(e) => {
                        warn!("{:#}", e);
                        continue;
                    }
                }
            };
            let candidate = absolute(&candidate);

            match collect_tracks(&candidate, self.options.recursive) {
                Ok(tracks) if !tracks.is_empty() => {
                    info!("Found {} tracks in folder.", tracks.len());
                    return Some(candidate.to_string_lossy().into_owned());
                }
                Ok(_) => warn!("No tracks found in {}", candidate.display()),
                Err(e) => warn!("{:#}", e),
            }
        }
    }
}

fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    match std::env::current_dir() {
        Ok(cwd) => cwd.join(path),
        Err(_) => path.to_path_buf(),
    }
}
