//! NFC Player Library
//!
//! Associates NFC tags with local media folders and starts playback when a
//! registered tag is scanned. The binary in `src/cli` wires the pieces
//! together; the dispatch loop owns the registry, reader and player.

pub mod console;
pub mod dispatch;
pub mod error;
pub mod media;
#[cfg(feature = "pcsc")]
pub mod pcsc_reader;
pub mod player;
pub mod prompt;
pub mod reader;
pub mod registry;

pub use dispatch::{DispatchOptions, Dispatcher, PlaybackStats, SessionMode, SessionOutcome, WriteOutcome};
pub use error::{ReaderError, RegistryError};
pub use player::{MediaPlayer, PlayerSettings, ProcessPlayer};
pub use prompt::{ConsolePrompter, Prompter};
pub use reader::TagReader;
pub use registry::{Registry, TagRecord};

/// Current version of nfc-player
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default registry path relative to home directory
pub const DEFAULT_DB_PATH: &str = "~/.local/share/nfc-player/registry.db";

/// Default configuration directory
pub const DEFAULT_CONFIG_DIR: &str = "~/.config/nfc-player";
