use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyInput {
    Char(char),
    Backspace,
    Quit,
}

/// Translate one line of stdin into keystrokes. `:bs` deletes, `:quit`
/// leaves; anything else is typed character by character, followed by a
/// newline when `keep_newline` is set.
pub fn parse_line(line: &str, keep_newline: bool) -> Vec<KeyInput> {
    match line.trim_end_matches(&['\r', '\n'][..]) {
        ":quit" | ":q" => vec![KeyInput::Quit],
        ":bs" => vec![KeyInput::Backspace],
        text => {
            let mut keys: Vec<KeyInput> = text.chars().map(KeyInput::Char).collect();
            if keep_newline {
                keys.push(KeyInput::Char('\n'));
            }
            keys
        }
    }
}

/// Read stdin on a background task until it closes or the receiver drops.
pub fn spawn_stdin(keep_newline: bool) -> (mpsc::UnboundedReceiver<KeyInput>, JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            for key in parse_line(&line, keep_newline) {
                if tx.send(key).is_err() {
                    return;
                }
            }
        }
        debug!("stdin closed");
    });
    (rx, task)
}

/// Value of the input control after `key`.
pub fn apply_key(buffer: &str, key: KeyInput) -> String {
    let mut next = buffer.to_string();
    match key {
        KeyInput::Char(c) => next.push(c),
        KeyInput::Backspace => {
            next.pop();
        }
        KeyInput::Quit => {}
    }
    next
}

/// Simulated local player typing at a steady speed with an occasional slip.
#[derive(Debug)]
pub struct AutoTypist {
    wpm: f64,
    error_rate: f64,
    rng: StdRng,
}

impl AutoTypist {
    pub fn new(wpm: f64, error_rate: f64, seed: Option<u64>) -> Self {
        Self {
            wpm: wpm.max(1.0),
            error_rate: error_rate.clamp(0.0, 1.0),
            rng: seed.map_or_else(StdRng::from_entropy, StdRng::seed_from_u64),
        }
    }

    /// Time between keystrokes: five characters per word.
    pub fn interval(&self) -> Duration {
        Duration::from_secs_f64(60.0 / (self.wpm * 5.0))
    }

    /// The key to press when `expected` is next.
    pub fn next_key(&mut self, expected: char) -> KeyInput {
        if self.error_rate > 0.0 && self.rng.gen_bool(self.error_rate) {
            let wrong = if expected == '#' { '~' } else { '#' };
            KeyInput::Char(wrong)
        } else {
            KeyInput::Char(expected)
        }
    }
}
