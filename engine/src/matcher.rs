use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::text::TargetText;

/// One accepted keystroke: milliseconds since race start and the cursor
/// position after it. Serialized as the replay payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeystrokeRecord {
    pub time: u64,
    pub index: usize,
}

/// Running typing state for the local player.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LocalProgress {
    pub cursor_index: usize,
    pub error_count: u32,
    /// Characters advanced by accepted keystrokes, auto-indent included.
    pub correct_count: u32,
    /// Consecutive accepted keystrokes; zero means the streak is broken.
    pub streak: u32,
    /// What the text-entry control should show.
    pub buffer: String,
    pub history: Vec<KeystrokeRecord>,
}

/// Rules the matcher enforces, fixed at race start from the active modifiers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct InputRules {
    pub no_backspace: bool,
    /// Error count at which the race is lost, when permadeath is on.
    pub permadeath_limit: Option<u32>,
    pub auto_indent: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MatchOutcome {
    /// The keystroke matched; `advanced` includes any skipped indentation.
    Accepted { advanced: usize },
    /// The keystroke matched and exhausted the text.
    Completed,
    Mismatch { errors: u32 },
    /// Mismatch that hit the permadeath limit.
    Failed,
    /// A deletion under no-backspace; nothing was stored.
    DeletionBlocked,
    /// The buffer changed without a new keystroke (an allowed deletion).
    Edited,
    /// The matcher is finished or failed and takes no more input.
    Ignored,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MatchResult {
    pub outcome: MatchOutcome,
    /// Buffer the input control should display after this submission.
    pub buffer: String,
}

/// Consumes the full contents of the text-entry control and advances the
/// cursor through the target text.
#[derive(Clone, Debug, Default)]
pub struct InputMatcher {
    progress: LocalProgress,
    rules: InputRules,
    failed: bool,
}

impl InputMatcher {
    pub fn new(rules: InputRules) -> Self {
        Self {
            progress: LocalProgress::default(),
            rules,
            failed: false,
        }
    }

    pub fn progress(&self) -> &LocalProgress {
        &self.progress
    }

    pub fn rules(&self) -> InputRules {
        self.rules
    }

    pub fn has_failed(&self) -> bool {
        self.failed
    }

    pub fn is_finished(&self, text: &TargetText) -> bool {
        self.progress.cursor_index >= text.len()
    }

    /// Process a new value of the input control. Only the last appended
    /// character counts as the keystroke.
    pub fn submit(&mut self, raw: &str, text: &TargetText, elapsed_ms: u64) -> MatchResult {
        if self.failed || self.is_finished(text) {
            return self.result(MatchOutcome::Ignored);
        }

        let prev_len = self.progress.buffer.chars().count();
        let new_len = raw.chars().count();

        if new_len < prev_len {
            if self.rules.no_backspace {
                debug!("deletion blocked at cursor {}", self.progress.cursor_index);
                return self.result(MatchOutcome::DeletionBlocked);
            }
            self.progress.buffer = raw.to_string();
            return self.result(MatchOutcome::Edited);
        }

        let typed = match raw.chars().last() {
            Some(c) if new_len > prev_len => c,
            _ => {
                self.progress.buffer = raw.to_string();
                return self.result(MatchOutcome::Edited);
            }
        };

        let expected = text.char_at(self.progress.cursor_index);
        if Some(typed) == expected {
            self.accept(raw, typed, text, elapsed_ms)
        } else {
            self.reject(raw)
        }
    }

    fn accept(&mut self, raw: &str, typed: char, text: &TargetText, elapsed_ms: u64) -> MatchResult {
        let mut next = self.progress.cursor_index + 1;
        let mut buffer = raw.to_string();

        if typed == '\n' && self.rules.auto_indent {
            let run = text.indent_run(next);
            if run > 0 {
                buffer.extend(&text.chars()[next..next + run]);
                next += run;
            }
        }

        let advanced = next - self.progress.cursor_index;
        self.progress.cursor_index = next;
        self.progress.correct_count += advanced as u32;
        self.progress.streak += 1;
        self.progress.buffer = buffer;
        self.progress.history.push(KeystrokeRecord {
            time: elapsed_ms,
            index: next,
        });

        if next >= text.len() {
            info!("text exhausted after {} ms", elapsed_ms);
            self.result(MatchOutcome::Completed)
        } else {
            self.result(MatchOutcome::Accepted { advanced })
        }
    }

    fn reject(&mut self, raw: &str) -> MatchResult {
        self.progress.error_count += 1;
        self.progress.streak = 0;

        if self.rules.permadeath_limit == Some(self.progress.error_count) {
            info!("permadeath limit reached at {} errors", self.progress.error_count);
            self.failed = true;
            return self.result(MatchOutcome::Failed);
        }

        self.progress.buffer = raw.to_string();
        self.result(MatchOutcome::Mismatch {
            errors: self.progress.error_count,
        })
    }

    fn result(&self, outcome: MatchOutcome) -> MatchResult {
        MatchResult {
            outcome,
            buffer: self.progress.buffer.clone(),
        }
    }
}
