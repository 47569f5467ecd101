//! Race engine for a competitive typing client: keystroke matching, live
//! metrics, opponent projection, competitive modifiers and the race
//! lifecycle that ties them together. No I/O and no rendering; callers
//! inject time and forward the events the engine queues.

pub mod config;
pub mod error;
pub mod fsm;
pub mod matcher;
pub mod metrics;
pub mod modifiers;
pub mod projector;
pub mod protocol;
pub mod race;
pub mod text;

pub use config::EngineConfig;
pub use error::RaceError;
pub use fsm::{RaceEvent, RaceState};
pub use race::{EngineEvent, LocalRace, RaceEngine, RaceMode, RaceSummary};
