//! USB readers driven through the PC/SC stack (pcscd).
//!
//! The tag id is the card UID returned by the PC/SC `GET DATA` pseudo-APDU,
//! which contactless readers answer without talking any tag protocol.

use log::{debug, warn};
use pcsc::{Context, Error as PcscError, Protocols, ReaderState, Scope, ShareMode, State};
use std::ffi::CString;
use std::time::Duration;

use crate::error::ReaderError;
use crate::reader::{format_uid, TagReader};

const GET_UID_APDU: &[u8] = &[0xFF, 0xCA, 0x00, 0x00, 0x00];
const STATUS_OK: [u8; 2] = [0x90, 0x00];

pub struct PcscReader {
    ctx: Context,
    name: CString,
    states: [ReaderState; 1],
}

impl PcscReader {
    /// Connect to the first reader whose name contains `name`, or the first
    /// reader at all.
    pub fn open(name: Option<&str>) -> Result<Self, ReaderError> {
        let location = match name {
            Some(n) => format!("usb:{}", n),
            None => "usb".to_string(),
        };

        let ctx = Context::establish(Scope::User)
            .map_err(|e| ReaderError::not_found(&location, format!("PC/SC service: {}", e)))?;

        let readers = ctx
            .list_readers_owned()
            .map_err(|e| ReaderError::not_found(&location, e.to_string()))?;
        debug!("PC/SC readers: {:?}", readers);

        let reader = readers
            .into_iter()
            .find(|r| name.map_or(true, |n| r.to_string_lossy().contains(n)))
            .ok_or_else(|| ReaderError::not_found(&location, "no matching PC/SC reader"))?;

        let states = [ReaderState::new(reader.clone(), State::UNAWARE)];
        Ok(PcscReader {
            ctx,
            name: reader,
            states,
        })
    }

    /// Block until the reader state changes. `None` on timeout.
    fn next_state(&mut self, timeout: Duration) -> Result<Option<State>, ReaderError> {
        match self.ctx.get_status_change(timeout, &mut self.states) {
            Ok(()) => {}
            Err(PcscError::Timeout) => return Ok(None),
            Err(e) => return Err(ReaderError::Read(e.to_string())),
        }

        let state = self.states[0].event_state();
        self.states[0].sync_current_state();

        if state.intersects(State::UNKNOWN | State::UNAVAILABLE) {
            return Err(ReaderError::Read(format!(
                "reader {} unavailable",
                self.name.to_string_lossy()
            )));
        }
        Ok(Some(state))
    }

    fn read_uid(&self) -> Result<String, ReaderError> {
        let card = self
            .ctx
            .connect(&self.name, ShareMode::Shared, Protocols::ANY)
            .map_err(|e| ReaderError::Read(format!("connect: {}", e)))?;

        let mut buf = [0u8; pcsc::MAX_BUFFER_SIZE];
        let response = card
            .transmit(GET_UID_APDU, &mut buf)
            .map_err(|e| ReaderError::Read(format!("transmit: {}", e)))?;

        if response.len() < 2 {
            return Err(ReaderError::Read("short UID response".into()));
        }
        let (uid, status) = response.split_at(response.len() - 2);
        if status != STATUS_OK || uid.is_empty() {
            warn!("Tag refused UID request (status {:02X?})", status);
            return Err(ReaderError::Read("tag did not return a UID".into()));
        }

        Ok(format_uid(uid))
    }
}

impl TagReader for PcscReader {
    fn describe(&self) -> String {
        format!("PC/SC reader {}", self.name.to_string_lossy())
    }

    fn poll(&mut self, timeout: Duration) -> Result<Option<String>, ReaderError> {
        match self.next_state(timeout)? {
            Some(state) if state.contains(State::PRESENT) && !state.contains(State::MUTE) => {
                self.read_uid().map(Some)
            }
            _ => Ok(None),
        }
    }

    fn tracks_presence(&self) -> bool {
        true
    }

    fn wait_removed(&mut self, timeout: Duration) -> Result<bool, ReaderError> {
        if !self.states[0].current_state().contains(State::PRESENT) {
            return Ok(true);
        }
        Ok(self
            .next_state(timeout)?
            .is_some_and(|state| !state.contains(State::PRESENT)))
    }
}
