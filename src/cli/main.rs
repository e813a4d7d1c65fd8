use anyhow::{bail, Context, Result};
use clap::Parser;
use log::{error, info, warn};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::atomic::Ordering;
use std::time::Duration;

mod config;
use config::Config;

use nfc_player::console::{self, LinePump};
use nfc_player::media::expand_path;
use nfc_player::{
    reader, ConsolePrompter, DispatchOptions, Dispatcher, ProcessPlayer, Registry, SessionMode,
    SessionOutcome, TagRecord, WriteOutcome,
};

#[derive(Parser)]
#[command(name = "nfc-player")]
#[command(about = "Physical interface for a digital library")]
#[command(version)]
struct Args {
    /// Reader location: usb, usb:<name>, stdin or tty:<path>
    #[arg(short, long)]
    location: Option<String>,

    /// Associate a scanned tag with a media folder instead of playing
    #[arg(short, long)]
    write: bool,

    /// Folder offered when associating a tag (write mode only)
    #[arg(short, long)]
    default_directory: Option<String>,

    /// Include files from subfolders when playing
    #[arg(short, long)]
    recursive: bool,

    /// Path to the SQLite registry file
    #[arg(long)]
    database: Option<String>,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// List registered tags and exit
    #[arg(long)]
    list: bool,

    /// Print the listing as JSON
    #[arg(long, requires = "list")]
    json: bool,

    /// Forget the folder registered for a tag and exit
    #[arg(long, value_name = "TAG", conflicts_with_all = ["list", "write"])]
    remove: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = match args.config.clone() {
        Some(path) => Some(path),
        None => default_config_path().filter(|p| p.exists()),
    };
    let config = Config::load(config_path.as_deref())?;

    init_logging(&config, args.verbose);
    info!("Started nfc-player v{}", nfc_player::VERSION);

    let db_path = expand_path(args.database.as_deref().unwrap_or(&config.registry.path))?;

    if args.list {
        return list_entries(&db_path, args.json);
    }

    if let Some(tag) = args.remove.as_deref() {
        if remove_entry(&db_path, tag)? {
            println!("Removed tag {}", tag.trim().to_uppercase());
        } else {
            println!("Tag {} was not registered", tag.trim().to_uppercase());
        }
        return Ok(());
    }

    if args.default_directory.is_some() && !args.write {
        warn!("--default-directory only applies in write mode (-w)");
    }

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent).context("Failed to create registry directory")?;
    }
    let registry = Registry::open(&db_path)
        .with_context(|| format!("Failed to open tag registry at {}", db_path.display()))?;
    info!("Registry opened at: {}", db_path.display());

    let shutdown = console::shutdown_flag();
    let flag = shutdown.clone();
    ctrlc::set_handler(move || {
        flag.store(true, Ordering::SeqCst);
    })
    .context("Failed to install Ctrl+C handler")?;

    let stdin = Rc::new(LinePump::stdin().context("Failed to read from stdin")?);

    let location = args.location.unwrap_or(config.reader.location.clone());
    let tag_reader = match reader::open(&location, &stdin) {
        Ok(r) => r,
        Err(e) => {
            error!("{}", e);
            error!("If a reader is present it may be occupied by another process.");
            bail!("no NFC reader available at {}", location);
        }
    };

    let default_directory = args
        .default_directory
        .or(config.library.default_directory.clone())
        .map(|d| expand_path(&d))
        .transpose()?;

    let options = DispatchOptions {
        recursive: args.recursive || config.library.recursive,
        default_directory,
        poll_interval: Duration::from_millis(config.reader.poll_interval_ms),
        error_pause: Duration::from_millis(config.reader.error_pause_ms),
    };

    let mut dispatcher = Dispatcher::new(
        registry,
        tag_reader,
        ProcessPlayer::new(config.player.clone()),
        ConsolePrompter::new(stdin, shutdown.clone()),
        options,
        shutdown,
    );

    let outcome = dispatcher.run(SessionMode::from_write_flag(args.write))?;
    finish_session(&outcome)?;

    info!("Done");
    Ok(())
}

/// Log how the session ended. A write session that stored nothing after
/// failed attempts is an error so the process exits non-zero.
fn finish_session(outcome: &SessionOutcome) -> Result<()> {
    match outcome {
        SessionOutcome::Playback(stats) => {
            info!(
                "Session ended: {} scans, {} started, {} resumed, {} unknown tags",
                stats.scans,
                stats.started,
                stats.resumed + stats.continued,
                stats.unknown_tags
            );
        }
        SessionOutcome::Write(WriteOutcome::Stored(record)) => {
            info!("Tag {} now plays {}", record.tag_id, record.folder_path);
        }
        SessionOutcome::Write(WriteOutcome::Cancelled { failed_attempts }) => {
            if *failed_attempts > 0 {
                bail!("no tag stored, {} attempt(s) failed", failed_attempts);
            }
            info!("No tag stored");
        }
    }
    Ok(())
}

fn init_logging(config: &Config, verbose: bool) {
    let log_level = if verbose {
        log::LevelFilter::Debug
    } else {
        config
            .logging
            .level
            .parse()
            .unwrap_or(log::LevelFilter::Info)
    };
    let timestamps = config.logging.timestamps;

    env_logger::Builder::new()
        .filter_level(log_level)
        .parse_default_env()
        .format(move |buf, record| {
            if timestamps {
                write!(buf, "{} | ", chrono::Local::now().format("%Y-%m-%d %H:%M:%S"))?;
            }
            writeln!(
                buf,
                "{} | {} | {}",
                record.target(),
                record.level(),
                record.args()
            )
        })
        .init();
}

fn default_config_path() -> Option<PathBuf> {
    expand_path(nfc_player::DEFAULT_CONFIG_DIR)
        .ok()
        .map(|dir| dir.join("config.toml"))
}

fn list_entries(db_path: &Path, json: bool) -> Result<()> {
    if !db_path.exists() {
        eprintln!("Registry not found at: {}", db_path.display());
        eprintln!("Register a tag first with: nfc-player -w");
        std::process::exit(1);
    }

    let registry = Registry::open_read_only(db_path)
        .with_context(|| format!("Failed to open tag registry at {}", db_path.display()))?;
    let entries = registry.entries()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
    } else {
        print_entries_human(&entries);
    }
    Ok(())
}

/// Drop the registry entry for `tag`. Ids are matched the way readers
/// report them (trimmed, uppercase).
fn remove_entry(db_path: &Path, tag: &str) -> Result<bool> {
    let tag_id = match reader::normalize_tag_id(tag) {
        Some(id) => id,
        None => bail!("empty tag id"),
    };
    if !db_path.exists() {
        return Ok(false);
    }

    let registry = Registry::open(db_path)
        .with_context(|| format!("Failed to open tag registry at {}", db_path.display()))?;
    let removed = registry.remove(&tag_id)?;
    if removed {
        info!("Removed registry entry for {}", tag_id);
    }
    Ok(removed)
}

fn print_entries_human(entries: &[TagRecord]) {
    if entries.is_empty() {
        println!("No tags registered.");
        return;
    }

    println!("Registered tags:");
    for record in entries {
        println!(
            "{}  {}  (updated {})",
            record.tag_id,
            record.folder_path,
            record
                .updated_at
                .with_timezone(&chrono::Local)
                .format("%Y-%m-%d %H:%M")
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nfc_player::PlaybackStats;

    #[test]
    fn test_args_parse_short_flags() {
        let args = Args::try_parse_from(["nfc-player", "-w", "-l", "stdin", "-d", "/music/rock"]).unwrap();
        assert!(args.write);
        assert_eq!(args.location.as_deref(), Some("stdin"));
        assert_eq!(args.default_directory.as_deref(), Some("/music/rock"));
        assert!(!args.recursive);
    }

    #[test]
    fn test_json_requires_list() {
        assert!(Args::try_parse_from(["nfc-player", "--json"]).is_err());
        assert!(Args::try_parse_from(["nfc-player", "--list", "--json"]).is_ok());
    }

    #[test]
    fn test_remove_flag_parses() {
        let args = Args::try_parse_from(["nfc-player", "--remove", "04:a1"]).unwrap();
        assert_eq!(args.remove.as_deref(), Some("04:a1"));
        assert!(Args::try_parse_from(["nfc-player", "--remove", "04:a1", "-w"]).is_err());
    }

    #[test]
    fn test_remove_entry_reports_whether_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("registry.db");
        Registry::open(&db_path)
            .unwrap()
            .store("04:A1:B2:C3", "/music/rock")
            .unwrap();

        assert!(remove_entry(&db_path, " 04:a1:b2:c3 ").unwrap());
        assert!(!remove_entry(&db_path, "04:A1:B2:C3").unwrap());
        assert!(Registry::open(&db_path)
            .unwrap()
            .lookup("04:A1:B2:C3")
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_remove_entry_without_registry() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("missing.db");

        assert!(!remove_entry(&db_path, "04:A1").unwrap());
        assert!(!db_path.exists());
        assert!(remove_entry(&db_path, "   ").is_err());
    }

    #[test]
    fn test_finish_session_exit_status() {
        let clean = SessionOutcome::Playback(PlaybackStats::default());
        assert!(finish_session(&clean).is_ok());

        let cancelled = SessionOutcome::Write(WriteOutcome::Cancelled { failed_attempts: 0 });
        assert!(finish_session(&cancelled).is_ok());

        let stored = SessionOutcome::Write(WriteOutcome::Stored(TagRecord {
            tag_id: "04:A1:B2:C3".to_string(),
            folder_path: "/music/rock".to_string(),
            updated_at: chrono::Utc::now(),
        }));
        assert!(finish_session(&stored).is_ok());

        let failed = SessionOutcome::Write(WriteOutcome::Cancelled { failed_attempts: 2 });
        assert!(finish_session(&failed).is_err());
    }

    #[test]
    fn test_default_config_path() {
        if std::env::var("HOME").is_ok() {
            let path = default_config_path().unwrap();
            assert!(path.ends_with("nfc-player/config.toml"));
        }
    }
}
