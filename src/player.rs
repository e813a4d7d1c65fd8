use anyhow::{Context, Result};
use log::{debug, info, warn};
use mpris::PlayerFinder;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};

/// Playback side of the dispatch loop.
pub trait MediaPlayer {
    /// Replace whatever is playing with `tracks`, in order.
    fn play(&mut self, tracks: &[PathBuf]) -> Result<()>;

    /// Pause playback. Returns false when playback had to be stopped instead
    /// and cannot be resumed.
    fn pause(&mut self) -> Result<bool>;

    /// Resume a paused playlist. Returns false when there is nothing to resume.
    fn resume(&mut self) -> Result<bool>;

    fn stop(&mut self) -> Result<()>;

    /// Whether a playlist is loaded and currently audible.
    fn is_playing(&mut self) -> bool;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerSettings {
    /// Player executable
    pub command: String,

    /// Arguments placed before the track list
    pub args: Vec<String>,

    /// MPRIS identity used for pause/resume (e.g. "VLC media player")
    pub mpris_identity: Option<String>,
}

impl Default for PlayerSettings {
    fn default() -> Self {
        PlayerSettings {
            command: "cvlc".to_string(),
            args: vec!["--play-and-exit".to_string()],
            mpris_identity: Some("VLC media player".to_string()),
        }
    }
}

/// Runs an external player process per playlist, controlled over MPRIS.
pub struct ProcessPlayer {
    settings: PlayerSettings,
    child: Option<Child>,
    paused: bool,
}

impl ProcessPlayer {
    pub fn new(settings: PlayerSettings) -> Self {
        ProcessPlayer {
            settings,
            child: None,
            paused: false,
        }
    }

    pub fn is_running(&mut self) -> bool {
        match self.child.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    fn with_mpris<F>(&self, action: &str, f: F) -> Result<bool>
    where
        F: FnOnce(&mpris::Player) -> Result<(), mpris::DBusError>,
    {
        let identity = match self.settings.mpris_identity.as_deref() {
            Some(identity) => identity,
            None => return Ok(false),
        };
        let pid = self.child.as_ref().map(|c| c.id());

        let finder = PlayerFinder::new().context("Failed to connect to D-Bus for MPRIS")?;
        let players = finder.find_all().context("Failed to find MPRIS players")?;
        let candidates: Vec<(&str, &str)> = players
            .iter()
            .map(|p| (p.bus_name(), p.identity()))
            .collect();

        match pick_player(&candidates, pid, identity).map(|i| &players[i]) {
            Some(player) => {
                debug!("MPRIS {} on {}", action, player.bus_name());
                f(player).with_context(|| format!("MPRIS {} failed", action))?;
                Ok(true)
            }
            None => {
                debug!("No MPRIS player with identity '{}'", identity);
                Ok(false)
            }
        }
    }
}

/// Index of the MPRIS player to control. A bus name carrying our child's
/// `instance<pid>` suffix wins over a plain identity match, so a desktop
/// player with the same identity is left alone when ours is visible.
fn pick_player(candidates: &[(&str, &str)], pid: Option<u32>, identity: &str) -> Option<usize> {
    if let Some(pid) = pid {
        let suffix = format!(".instance{}", pid);
        if let Some(i) = candidates
            .iter()
            .position(|(bus, _)| bus.ends_with(&suffix))
        {
            return Some(i);
        }
    }
    candidates
        .iter()
        .position(|(_, id)| id.eq_ignore_ascii_case(identity))
}

impl MediaPlayer for ProcessPlayer {
    fn play(&mut self, tracks: &[PathBuf]) -> Result<()> {
        self.stop()?;

        let child = Command::new(&self.settings.command)
            .args(&self.settings.args)
            .args(tracks)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("Failed to start player '{}'", self.settings.command))?;

        info!("Playing {} tracks (pid {})", tracks.len(), child.id());
        self.child = Some(child);
        self.paused = false;
        Ok(())
    }

    fn pause(&mut self) -> Result<bool> {
        if !self.is_running() {
            return Ok(false);
        }

        match self.with_mpris("pause", |p| p.pause()) {
            Ok(true) => {
                info!("Paused playlist");
                self.paused = true;
                Ok(true)
            }
            Ok(false) => {
                self.stop()?;
                Ok(false)
            }
            Err(e) => {
                warn!("{:#}, stopping player instead", e);
                self.stop()?;
                Ok(false)
            }
        }
    }

    fn resume(&mut self) -> Result<bool> {
        if !self.is_running() {
            return Ok(false);
        }
        let resumed = self.with_mpris("play", |p| p.play())?;
        if resumed {
            self.paused = false;
        }
        Ok(resumed)
    }

    fn stop(&mut self) -> Result<()> {
        self.paused = false;
        if let Some(mut child) = self.child.take() {
            if let Ok(None) = child.try_wait() {
                child.kill().context("Failed to stop player")?;
            }
            child.wait().context("Failed to reap player process")?;
            info!("Stopped");
        }
        Ok(())
    }

    fn is_playing(&mut self) -> bool {
        !self.paused && self.is_running()
    }
}

impl Drop for ProcessPlayer {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!("{:#}", e);
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sleeper() -> PlayerSettings {
        // Tracks land in $0.. of the shell script and are ignored
        PlayerSettings {
            command: "sh".to_string(),
            args: vec!["-c".to_string(), "sleep 30".to_string()],
            mpris_identity: None,
        }
    }

    #[test]
    fn test_play_spawns_and_stop_reaps() {
        let mut player = ProcessPlayer::new(sleeper());
        assert!(!player.is_playing());

        player.play(&[PathBuf::from("/music/a.mp3")]).unwrap();
        assert!(player.is_running());
        assert!(player.is_playing());

        player.stop().unwrap();
        assert!(!player.is_running());
        assert!(!player.is_playing());
    }

    #[test]
    fn test_pick_player_prefers_own_instance() {
        let candidates = [
            ("org.mpris.MediaPlayer2.vlc", "VLC media player"),
            ("org.mpris.MediaPlayer2.vlc.instance4242", "VLC media player"),
        ];
        assert_eq!(pick_player(&candidates, Some(4242), "VLC media player"), Some(1));
    }

    #[test]
    fn test_pick_player_falls_back_to_identity() {
        let candidates = [
            ("org.mpris.MediaPlayer2.spotify", "Spotify"),
            ("org.mpris.MediaPlayer2.vlc", "VLC media player"),
        ];
        assert_eq!(pick_player(&candidates, Some(4242), "vlc media player"), Some(1));
        assert_eq!(pick_player(&candidates, None, "mpv"), None);
    }

    #[test]
    fn test_new_playlist_replaces_old_process() {
        let mut player = ProcessPlayer::new(sleeper());
        player.play(&[PathBuf::from("/music/a.mp3")]).unwrap();
        let first = player.child.as_ref().unwrap().id();

        player.play(&[PathBuf::from("/music/b.mp3")]).unwrap();
        let second = player.child.as_ref().unwrap().id();

        assert_ne!(first, second);
        assert!(player.is_running());
    }

    #[test]
    fn test_pause_without_mpris_stops() {
        let mut player = ProcessPlayer::new(sleeper());
        player.play(&[PathBuf::from("/music/a.mp3")]).unwrap();

        assert!(!player.pause().unwrap());
        assert!(!player.is_running());
        assert!(!player.resume().unwrap());
    }

    #[test]
    fn test_missing_command_is_error() {
        let mut player = ProcessPlayer::new(PlayerSettings {
            command: "/nonexistent/player-binary".to_string(),
            args: Vec::new(),
            mpris_identity: None,
        });
        assert!(player.play(&[]).is_err());
    }
}
