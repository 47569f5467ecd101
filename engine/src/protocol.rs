use serde::{Deserialize, Serialize};

use crate::matcher::KeystrokeRecord;
use crate::modifiers::RankTier;
use crate::race::RaceMode;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ClientMsg {
    JoinQueue {
        user_id: String,
        mode: RaceMode,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        rank: Option<RankTier>,
    },
    LeaveQueue {
        user_id: String,
    },
    RaceProgress {
        race_id: String,
        user_id: String,
        cursor_index: usize,
        wpm: f64,
        accuracy: f64,
    },
    RaceFinished {
        race_id: String,
        user_id: String,
        wpm: f64,
        accuracy: f64,
        errors: u32,
        /// Seconds of active race time.
        duration: u64,
        history: Vec<KeystrokeRecord>,
    },
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RosterEntry {
    pub user_id: String,
    pub username: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Placement {
    pub user_id: String,
    pub position: u32,
    pub wpm: f64,
    pub accuracy: f64,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ServerMsg {
    WaitingForOpponent,
    RaceMatched {
        race_id: String,
        text: String,
        #[serde(default)]
        language: Option<String>,
        participants: Vec<RosterEntry>,
        /// Authoritative race start, Unix milliseconds.
        start_time: u64,
    },
    OpponentProgress {
        user_id: String,
        cursor_index: usize,
        wpm: f64,
        accuracy: f64,
    },
    RaceResults {
        #[serde(default)]
        winner_id: Option<String>,
        #[serde(default)]
        placements: Vec<Placement>,
    },
    MatchFailed {
        reason: String,
    },
}
