//! Line input pumped from a blocking source into a channel.
//!
//! Reading stdin or a serial device blocks without a timeout. A pump thread
//! does the blocking read so the dispatch thread can wait with a deadline
//! and notice a shutdown request in between.

use log::{debug, warn};
use std::io::{self, BufRead, BufReader};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineEvent {
    Line(String),
    Timeout,
    Closed,
}

pub struct LinePump {
    name: String,
    lines: Receiver<io::Result<String>>,
}

impl LinePump {
    pub fn spawn<R>(name: &str, source: R) -> io::Result<Self>
    where
        R: BufRead + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        let thread_name = format!("{}-lines", name);

        thread::Builder::new().name(thread_name).spawn(move || {
            for line in source.lines() {
                let failed = line.is_err();
                if tx.send(line).is_err() || failed {
                    break;
                }
            }
        })?;

        Ok(LinePump {
            name: name.to_string(),
            lines: rx,
        })
    }

    pub fn stdin() -> io::Result<Self> {
        Self::spawn("stdin", BufReader::new(io::stdin()))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wait up to `timeout` for the next line.
    pub fn next_line(&self, timeout: Duration) -> LineEvent {
        match self.lines.recv_timeout(timeout) {
            Ok(Ok(line)) => LineEvent::Line(line),
            Ok(Err(e)) => {
                warn!("Reading {} failed: {}", self.name, e);
                LineEvent::Closed
            }
            Err(RecvTimeoutError::Timeout) => LineEvent::Timeout,
            Err(RecvTimeoutError::Disconnected) => {
                debug!("{} reached end of input", self.name);
                LineEvent::Closed
            }
        }
    }

    /// Block for the next line, giving up when `shutdown` is raised.
    pub fn wait_line(&self, shutdown: &AtomicBool, tick: Duration) -> Option<String> {
        loop {
            if shutdown.load(Ordering::SeqCst) {
                return None;
            }
            match self.next_line(tick) {
                LineEvent::Line(line) => return Some(line),
                LineEvent::Timeout => continue,
                LineEvent::Closed => return None,
            }
        }
    }
}

/// Shared flag raised by the Ctrl+C handler.
pub type ShutdownFlag = Arc<AtomicBool>;

pub fn shutdown_flag() -> ShutdownFlag {
    Arc::new(AtomicBool::new(false))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const TICK: Duration = Duration::from_millis(500);

    #[test]
    fn test_lines_then_closed() {
        let pump = LinePump::spawn("test", Cursor::new(b"first\nsecond\n".to_vec())).unwrap();

        assert_eq!(pump.next_line(TICK), LineEvent::Line("first".into()));
        assert_eq!(pump.next_line(TICK), LineEvent::Line("second".into()));
        assert_eq!(pump.next_line(TICK), LineEvent::Closed);
    }

    #[test]
    fn test_wait_line_honours_shutdown() {
        let pump = LinePump::spawn("test", Cursor::new(b"ignored\n".to_vec())).unwrap();
        let flag = shutdown_flag();
        flag.store(true, Ordering::SeqCst);

        assert_eq!(pump.wait_line(&flag, TICK), None);
    }

    #[test]
    fn test_wait_line_returns_none_at_eof() {
        let pump = LinePump::spawn("test", Cursor::new(Vec::new())).unwrap();
        assert_eq!(pump.wait_line(&shutdown_flag(), TICK), None);
    }
}
