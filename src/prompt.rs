use log::debug;
use std::io::{self, Write};
use std::path::Path;
use std::rc::Rc;
use std::time::Duration;

use crate::console::{LinePump, ShutdownFlag};

const SCAN_BANNER: &str = r"  ___  ___   _   _  _   _____ _   ___
 / __|/ __| /_\ | \| | |_   _/_\ / __|
 \__ \ (__ / _ \| .` |   | |/ _ \ (_ |
 |___/\___/_/ \_\_|\_|   |_/_/ \_\___|";

/// Interaction with the person registering tags. `None` answers mean the
/// user cancelled or input ended.
pub trait Prompter {
    /// Invite the user to scan a tag.
    fn announce_scan(&mut self);

    /// Ask for a media folder. An empty answer selects `default`.
    fn ask_folder(&mut self, default: Option<&Path>) -> Option<String>;

    /// Ask a yes/no question.
    fn confirm(&mut self, question: &str) -> Option<bool>;
}

/// Terminal prompter sharing the stdin pump with a keyboard-wedge reader.
pub struct ConsolePrompter {
    input: Rc<LinePump>,
    shutdown: ShutdownFlag,
    tick: Duration,
}

impl ConsolePrompter {
    pub fn new(input: Rc<LinePump>, shutdown: ShutdownFlag) -> Self {
        ConsolePrompter {
            input,
            shutdown,
            tick: Duration::from_millis(250),
        }
    }

    fn ask(&mut self, prompt: &str) -> Option<String> {
        print!("{}", prompt);
        if let Err(e) = io::stdout().flush() {
            debug!("Flushing prompt failed: {}", e);
        }
        self.input
            .wait_line(&self.shutdown, self.tick)
            .map(|line| line.trim().to_string())
    }
}

impl Prompter for ConsolePrompter {
    fn announce_scan(&mut self) {
        println!("{}", SCAN_BANNER);
    }

    fn ask_folder(&mut self, default: Option<&Path>) -> Option<String> {
        let prompt = match default {
            Some(dir) => format!("Input path to media [{}]: ", dir.display()),
            None => "Input path to media: ".to_string(),
        };
        self.ask(&prompt)
    }

    fn confirm(&mut self, question: &str) -> Option<bool> {
        loop {
            let answer = self.ask(&format!("{} Y/N: ", question))?;
            match parse_yes_no(&answer) {
                Some(yes) => return Some(yes),
                None => continue,
            }
        }
    }
}

pub fn parse_yes_no(answer: &str) -> Option<bool> {
    match answer.trim().to_ascii_uppercase().as_str() {
        "Y" | "YES" => Some(true),
        "N" | "NO" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::shutdown_flag;
    use std::io::Cursor;

    fn prompter(input: &str) -> ConsolePrompter {
        let pump = LinePump::spawn("test", Cursor::new(input.as_bytes().to_vec())).unwrap();
        ConsolePrompter::new(Rc::new(pump), shutdown_flag())
    }

    #[test]
    fn test_parse_yes_no() {
        assert_eq!(parse_yes_no("y"), Some(true));
        assert_eq!(parse_yes_no(" No "), Some(false));
        assert_eq!(parse_yes_no("maybe"), None);
    }

    #[test]
    fn test_confirm_repeats_until_answered() {
        let mut p = prompter("maybe\n\nn\n");
        assert_eq!(p.confirm("Overwrite?"), Some(false));
    }

    #[test]
    fn test_confirm_cancelled_at_eof() {
        let mut p = prompter("what\n");
        assert_eq!(p.confirm("Overwrite?"), None);
    }

    #[test]
    fn test_ask_folder_trims_answer() {
        let mut p = prompter("  /music/rock  \n\n");
        assert_eq!(p.ask_folder(None), Some("/music/rock".into()));
        assert_eq!(p.ask_folder(Some(Path::new("/music"))), Some(String::new()));
        assert_eq!(p.ask_folder(None), None);
    }
}
