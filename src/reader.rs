use log::{debug, info};
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::rc::Rc;
use std::str::FromStr;
use std::time::Duration;

use crate::console::{LineEvent, LinePump};
use crate::error::ReaderError;

pub const DEFAULT_LOCATION: &str = "usb";

/// Source of tag scans.
pub trait TagReader {
    /// Human readable name used in log lines
    fn describe(&self) -> String;

    /// Wait up to `timeout` for a tag and return its identifier.
    fn poll(&mut self, timeout: Duration) -> Result<Option<String>, ReaderError>;

    /// Whether the reader can tell when the last tag leaves the field.
    fn tracks_presence(&self) -> bool {
        false
    }

    /// Wait up to `timeout` for the last scanned tag to be removed.
    /// Readers that cannot see the tag report it as gone immediately.
    fn wait_removed(&mut self, _timeout: Duration) -> Result<bool, ReaderError> {
        Ok(true)
    }
}

impl<T: TagReader + ?Sized> TagReader for Box<T> {
    fn describe(&self) -> String {
        (**self).describe()
    }

    fn poll(&mut self, timeout: Duration) -> Result<Option<String>, ReaderError> {
        (**self).poll(timeout)
    }

    fn tracks_presence(&self) -> bool {
        (**self).tracks_presence()
    }

    fn wait_removed(&mut self, timeout: Duration) -> Result<bool, ReaderError> {
        (**self).wait_removed(timeout)
    }
}

/// Where to find the reader, as given on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReaderLocation {
    /// PC/SC reader, optionally selected by a substring of its name
    Usb(Option<String>),
    /// Keyboard-wedge reader typing ids into the terminal
    Stdin,
    /// Serial reader printing one id per line
    Tty(PathBuf),
}

impl FromStr for ReaderLocation {
    type Err = ReaderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s.split_once(':') {
            None if s.eq_ignore_ascii_case("usb") => Ok(ReaderLocation::Usb(None)),
            None if s.eq_ignore_ascii_case("stdin") => Ok(ReaderLocation::Stdin),
            Some((kind, name)) if kind.eq_ignore_ascii_case("usb") && !name.is_empty() => {
                Ok(ReaderLocation::Usb(Some(name.to_string())))
            }
            Some((kind, path)) if kind.eq_ignore_ascii_case("tty") && !path.is_empty() => {
                Ok(ReaderLocation::Tty(PathBuf::from(path)))
            }
            _ => Err(ReaderError::not_found(
                s,
                "unknown location, expected usb, usb:<name>, stdin or tty:<path>",
            )),
        }
    }
}

/// Open the reader at `location`. `console` is the shared stdin pump, used
/// when the reader types into the terminal.
pub fn open(location: &str, console: &Rc<LinePump>) -> Result<Box<dyn TagReader>, ReaderError> {
    let parsed: ReaderLocation = location.parse()?;
    debug!("Opening reader at {:?}", parsed);

    let reader: Box<dyn TagReader> = match parsed {
        ReaderLocation::Usb(name) => open_usb(location, name.as_deref())?,
        ReaderLocation::Stdin => Box::new(LineReader::new(Rc::clone(console))),
        ReaderLocation::Tty(path) => {
            let file = File::open(&path)
                .map_err(|e| ReaderError::not_found(location, e.to_string()))?;
            let pump = LinePump::spawn(&path.display().to_string(), BufReader::new(file))
                .map_err(|e| ReaderError::not_found(location, e.to_string()))?;
            Box::new(LineReader::new(Rc::new(pump)))
        }
    };

    info!("Connected to NFC reader: {}", reader.describe());
    Ok(reader)
}

#[cfg(feature = "pcsc")]
fn open_usb(_location: &str, name: Option<&str>) -> Result<Box<dyn TagReader>, ReaderError> {
    Ok(Box::new(crate::pcsc_reader::PcscReader::open(name)?))
}

#[cfg(not(feature = "pcsc"))]
fn open_usb(location: &str, _name: Option<&str>) -> Result<Box<dyn TagReader>, ReaderError> {
    Err(ReaderError::not_found(
        location,
        "built without PC/SC support (enable the `pcsc` feature, or use -l stdin / -l tty:<path>)",
    ))
}

/// Render a tag UID as `04:A1:B2:C3`.
pub fn format_uid(uid: &[u8]) -> String {
    uid.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(":")
}

/// Normalize an id typed by a line-oriented reader.
pub fn normalize_tag_id(raw: &str) -> Option<String> {
    let id = raw.trim();
    if id.is_empty() {
        None
    } else {
        Some(id.to_uppercase())
    }
}

/// Reader for devices that print one tag id per line.
pub struct LineReader {
    lines: Rc<LinePump>,
}

impl LineReader {
    pub fn new(lines: Rc<LinePump>) -> Self {
        LineReader { lines }
    }
}

impl TagReader for LineReader {
    fn describe(&self) -> String {
        format!("line reader on {}", self.lines.name())
    }

    fn poll(&mut self, timeout: Duration) -> Result<Option<String>, ReaderError> {
        match self.lines.next_line(timeout) {
            LineEvent::Line(line) => Ok(normalize_tag_id(&line)),
            LineEvent::Timeout => Ok(None),
            LineEvent::Closed => Err(ReaderError::Closed),
        }
    }
}
