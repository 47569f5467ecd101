use serde::{Deserialize, Serialize};

use crate::matcher::LocalProgress;

/// Live stats derived from the local player's progress. Never stored on
/// its own; recompute it whenever the inputs change.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub wpm: f64,
    /// 0-100
    pub accuracy: f64,
    /// 0-100
    pub progress_pct: f64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self {
            wpm: 0.0,
            accuracy: 100.0,
            progress_pct: 0.0,
        }
    }
}

/// Gross words per minute, a word being five characters.
pub fn gross_wpm(chars: u32, elapsed_ms: u64) -> f64 {
    let minutes = elapsed_ms as f64 / 60_000.0;
    if minutes <= 0.0 || chars == 0 {
        return 0.0;
    }
    (chars as f64 / 5.0) / minutes
}

/// Share of keystrokes that matched, 0-100. No keystrokes reads as 100.
pub fn accuracy(correct: u32, errors: u32) -> f64 {
    let total = correct as u64 + errors as u64;
    if total == 0 {
        return 100.0;
    }
    (correct as f64 / total as f64) * 100.0
}

pub fn progress_pct(cursor: usize, text_len: usize) -> f64 {
    if text_len == 0 {
        return 0.0;
    }
    (cursor.min(text_len) as f64 / text_len as f64) * 100.0
}

/// Rounded metrics for the local player at `now_ms`.
pub fn compute(progress: &LocalProgress, text_len: usize, start_ms: u64, now_ms: u64) -> Metrics {
    let elapsed = now_ms.saturating_sub(start_ms);
    Metrics {
        wpm: gross_wpm(progress.correct_count, elapsed).round(),
        accuracy: accuracy(progress.correct_count, progress.error_count).round(),
        progress_pct: progress_pct(progress.cursor_index, text_len).round(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn progress(cursor: usize, correct: u32, errors: u32) -> LocalProgress {
        LocalProgress {
            cursor_index: cursor,
            correct_count: correct,
            error_count: errors,
            ..LocalProgress::default()
        }
    }

    #[test]
    fn test_gross_wpm() {
        // 300 chars in 60 seconds = 60 WPM
        assert_eq!(gross_wpm(300, 60_000), 60.0);
        assert_eq!(gross_wpm(150, 30_000), 60.0);
        assert_eq!(gross_wpm(100, 0), 0.0);
        assert_eq!(gross_wpm(0, 5_000), 0.0);
    }

    #[test]
    fn test_accuracy() {
        assert_eq!(accuracy(90, 10), 90.0);
        assert_eq!(accuracy(0, 0), 100.0);
        assert_eq!(accuracy(0, 4), 0.0);
    }

    #[test]
    fn test_sixty_chars_in_twelve_seconds() {
        let m = compute(&progress(60, 60, 0), 60, 1_000, 13_000);
        assert_eq!(m.wpm, 60.0);
        assert_eq!(m.accuracy, 100.0);
        assert_eq!(m.progress_pct, 100.0);
    }

    #[test]
    fn test_clock_before_start_is_zero_wpm() {
        let m = compute(&progress(5, 5, 0), 10, 10_000, 9_000);
        assert_eq!(m.wpm, 0.0);
        assert!(m.wpm.is_finite());
    }

    #[test]
    fn test_rounding() {
        // 2 of 3 correct = 66.67% -> 67
        let m = compute(&progress(2, 2, 1), 3, 0, 60_000);
        assert_eq!(m.accuracy, 67.0);
        assert_eq!(m.progress_pct, 67.0);
    }
}
