//! Smooths sparse opponent progress samples into continuous cursor motion.
//!
//! Remote participants are dead-reckoned from their last authoritative
//! sample; ghosts are computed directly from race start time and need no
//! network at all.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// A simulated rival racing at a fixed speed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GhostProfile {
    pub username: String,
    pub wpm: f64,
    #[serde(default)]
    pub accuracy: Option<f64>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ParticipantState {
    pub id: String,
    pub display_name: String,
    pub last_known_index: usize,
    pub last_known_wpm: f64,
    pub last_known_accuracy: Option<f64>,
    pub last_update_ms: u64,
    predicted_index: usize,
    pub is_ghost: bool,
}

impl ParticipantState {
    /// Where the UI should draw this participant's cursor.
    pub fn predicted_index(&self) -> usize {
        self.predicted_index
    }
}

pub const GHOST_ID: &str = "ghost-bot";

fn chars_per_second(wpm: f64) -> f64 {
    if wpm.is_finite() && wpm > 0.0 {
        wpm * 5.0 / 60.0
    } else {
        0.0
    }
}

/// Deterministic ghost position `elapsed_ms` into a race.
pub fn ghost_index(wpm: f64, elapsed_ms: u64, text_len: usize) -> usize {
    let chars = (chars_per_second(wpm) * (elapsed_ms as f64 / 1000.0)).floor();
    (chars as usize).min(text_len)
}

#[derive(Clone, Debug)]
pub struct OpponentProjector {
    participants: Vec<ParticipantState>,
    text_len: usize,
    max_lookahead: usize,
    race_start_ms: Option<u64>,
}

impl OpponentProjector {
    pub fn new(text_len: usize, max_lookahead: usize) -> Self {
        Self {
            participants: Vec::new(),
            text_len,
            max_lookahead,
            race_start_ms: None,
        }
    }

    /// Register a remote participant from the match roster.
    pub fn add_remote(&mut self, id: impl Into<String>, display_name: impl Into<String>, now_ms: u64) {
        let id = id.into();
        if self.get(&id).is_some() {
            return;
        }
        self.participants.push(ParticipantState {
            display_name: display_name.into(),
            id,
            last_known_index: 0,
            last_known_wpm: 0.0,
            last_known_accuracy: None,
            last_update_ms: now_ms,
            predicted_index: 0,
            is_ghost: false,
        });
    }

    pub fn add_ghost(&mut self, profile: &GhostProfile) {
        self.participants.retain(|p| p.id != GHOST_ID);
        self.participants.push(ParticipantState {
            id: GHOST_ID.to_string(),
            display_name: profile.username.clone(),
            last_known_index: 0,
            last_known_wpm: profile.wpm,
            last_known_accuracy: profile.accuracy,
            last_update_ms: 0,
            predicted_index: 0,
            is_ghost: true,
        });
    }

    /// Anchor for ghost participants.
    pub fn set_race_start(&mut self, start_ms: u64) {
        self.race_start_ms = Some(start_ms);
    }

    /// A fresh sample from the network. Re-anchors the extrapolation but
    /// never touches the predicted index directly.
    pub fn on_authoritative_update(&mut self, id: &str, index: usize, wpm: f64, timestamp_ms: u64) {
        let text_len = self.text_len;
        let pos = match self.participants.iter().position(|p| p.id == id) {
            Some(pos) => pos,
            None => {
                debug!("first sample from unlisted participant {}", id);
                self.add_remote(id, id, timestamp_ms);
                self.participants.len() - 1
            }
        };
        let participant = &mut self.participants[pos];

        if participant.is_ghost {
            warn!("ignoring network sample for ghost participant {}", id);
            return;
        }

        participant.last_known_index = index.min(text_len);
        participant.last_known_wpm = if wpm.is_finite() { wpm.max(0.0) } else { 0.0 };
        participant.last_update_ms = timestamp_ms;
    }

    pub fn note_accuracy(&mut self, id: &str, accuracy: f64) {
        if let Some(p) = self.participants.iter_mut().find(|p| p.id == id) {
            p.last_known_accuracy = Some(accuracy);
        }
    }

    /// Advance every predicted cursor to `now_ms`.
    pub fn tick(&mut self, now_ms: u64) {
        let text_len = self.text_len;
        let lookahead = self.max_lookahead;
        let race_start = self.race_start_ms;

        for p in self.participants.iter_mut() {
            let target = if p.is_ghost {
                match race_start {
                    Some(start) => ghost_index(p.last_known_wpm, now_ms.saturating_sub(start), text_len),
                    None => 0,
                }
            } else {
                let elapsed_secs = now_ms.saturating_sub(p.last_update_ms) as f64 / 1000.0;
                let predicted = p.last_known_index as f64 + chars_per_second(p.last_known_wpm) * elapsed_secs;
                let predicted = (predicted.floor() as usize).min(text_len);
                predicted.min(p.last_known_index + lookahead)
            };
            p.predicted_index = target.max(p.predicted_index);
        }
    }

    pub fn render_index(&self, id: &str) -> Option<usize> {
        self.get(id).map(|p| p.predicted_index)
    }

    pub fn get(&self, id: &str) -> Option<&ParticipantState> {
        self.participants.iter().find(|p| p.id == id)
    }

    pub fn participants(&self) -> &[ParticipantState] {
        &self.participants
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn projector() -> OpponentProjector {
        let mut p = OpponentProjector::new(200, 15);
        p.add_remote("op", "Opponent", 0);
        p
    }

    #[test]
    fn test_dead_reckoning() {
        let mut p = projector();
        // 60 wpm = 5 chars per second
        p.on_authoritative_update("op", 10, 60.0, 1_000);
        p.tick(2_000);
        assert_eq!(p.render_index("op"), Some(15));
    }

    #[test]
    fn test_lookahead_bound() {
        let mut p = projector();
        p.on_authoritative_update("op", 10, 60.0, 0);
        p.tick(10_000);
        // naive extrapolation says 60
        assert_eq!(p.render_index("op"), Some(25));
    }

    #[test]
    fn test_never_regresses_after_lower_sample() {
        let mut p = projector();
        p.on_authoritative_update("op", 10, 60.0, 0);
        p.tick(3_000);
        assert_eq!(p.render_index("op"), Some(25));

        p.on_authoritative_update("op", 12, 30.0, 3_000);
        p.tick(3_016);
        assert_eq!(p.render_index("op"), Some(25));
    }

    #[test]
    fn test_clamped_to_text_length() {
        let mut p = OpponentProjector::new(12, 15);
        p.add_remote("op", "Opponent", 0);
        p.on_authoritative_update("op", 10, 120.0, 0);
        p.tick(5_000);
        assert_eq!(p.render_index("op"), Some(12));
    }

    #[test]
    fn test_stalled_feed_holds_at_bound() {
        let mut p = projector();
        p.on_authoritative_update("op", 40, 90.0, 0);
        p.tick(60_000);
        p.tick(600_000);
        assert_eq!(p.render_index("op"), Some(55));
    }

    #[test]
    fn test_update_does_not_write_prediction() {
        let mut p = projector();
        p.on_authoritative_update("op", 30, 60.0, 0);
        assert_eq!(p.render_index("op"), Some(0));
        assert_eq!(p.get("op").unwrap().last_known_index, 30);
    }

    #[test]
    fn test_unknown_participant_joins() {
        let mut p = projector();
        p.on_authoritative_update("late", 5, 40.0, 100);
        assert!(p.get("late").is_some());
        p.tick(100);
        assert_eq!(p.render_index("late"), Some(5));
    }

    #[test]
    fn test_ghost_is_deterministic() {
        let profile = GhostProfile {
            username: "past me".to_string(),
            wpm: 72.0,
            accuracy: Some(97.0),
        };
        let mut a = OpponentProjector::new(500, 15);
        let mut b = OpponentProjector::new(500, 15);
        a.add_ghost(&profile);
        b.add_ghost(&profile);
        a.set_race_start(1_000);
        b.set_race_start(50_000);
        a.tick(1_000 + 7_500);
        b.tick(50_000 + 7_500);
        assert_eq!(a.render_index(GHOST_ID), b.render_index(GHOST_ID));
        // 72 wpm = 6 cps, 7.5 s -> 45
        assert_eq!(a.render_index(GHOST_ID), Some(45));
    }

    #[test]
    fn test_ghost_ignores_network_and_waits_for_start() {
        let mut p = OpponentProjector::new(100, 15);
        p.add_ghost(&GhostProfile {
            username: "ghost".to_string(),
            wpm: 60.0,
            accuracy: None,
        });
        p.tick(5_000);
        assert_eq!(p.render_index(GHOST_ID), Some(0));
        p.on_authoritative_update(GHOST_ID, 90, 200.0, 5_000);
        p.set_race_start(5_000);
        p.tick(7_000);
        assert_eq!(p.render_index(GHOST_ID), Some(10));
    }

    #[test]
    fn test_ghost_index_caps_at_text_length() {
        assert_eq!(ghost_index(60.0, 1_000_000, 80), 80);
        assert_eq!(ghost_index(f64::NAN, 1_000, 80), 0);
    }
}
