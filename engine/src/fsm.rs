use rust_fsm::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RaceState {
    Idle,
    Matching,
    Countdown,
    Active,
    /// `failed` is set when the race ended on the permadeath limit.
    Completed { failed: bool },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RaceEvent {
    /// A networked mode asked to be paired.
    QueueJoined,
    /// A local mode has its text and can count down.
    TextResolved,
    Matched,
    /// Pairing timed out or the server refused it.
    MatchFailed,
    CountdownElapsed,
    TextExhausted,
    TimeUp,
    Permadeath,
    /// Authoritative results arrived for a networked race.
    ResultsReceived,
    Reset,
}

impl StateMachineImpl for RaceState {
    type Input = RaceEvent;
    type State = RaceState;
    type Output = ();
    const INITIAL_STATE: Self::State = RaceState::Idle;

    fn transition(state: &Self::State, input: &Self::Input) -> Option<Self::State> {
        use RaceEvent::*;
        use RaceState::*;
        match (state, input) {
            (Idle, QueueJoined) => Some(Matching),
            (Idle, TextResolved) => Some(Countdown),
            (Matching, Matched) => Some(Countdown),
            (Matching, MatchFailed) => Some(Idle),
            (Countdown, CountdownElapsed) => Some(Active),
            (Active, TextExhausted) | (Active, TimeUp) | (Active, ResultsReceived) => {
                Some(Completed { failed: false })
            }
            (Active, Permadeath) => Some(Completed { failed: true }),
            // Networked races keep listening for the final standings after
            // the local player is done.
            (Completed { failed }, ResultsReceived) => Some(Completed { failed: *failed }),
            (Matching, Reset) | (Countdown, Reset) | (Active, Reset) | (Completed { .. }, Reset) => {
                Some(Idle)
            }
            _ => None,
        }
    }

    fn output(_state: &Self::State, _input: &Self::Input) -> Option<Self::Output> {
        None
    }
}

impl Default for RaceState {
    fn default() -> Self {
        RaceState::INITIAL_STATE
    }
}

impl RaceState {
    pub fn is_completed(&self) -> bool {
        matches!(self, RaceState::Completed { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, RaceState::Completed { failed: true })
    }
}
