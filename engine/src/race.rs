//! The race lifecycle: one engine owns the session, the matcher, the
//! projector and the modifiers, and sequences them from idle to completion.
//!
//! Every entry point takes `now_ms` so callers (and tests) control time.
//! Nothing here blocks; each call mutates the model in one step and queues
//! [`EngineEvent`]s for whoever renders or forwards them.

use std::collections::VecDeque;
use std::str::FromStr;

use rand::RngCore;
use rust_fsm::StateMachineImpl;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::RaceError;
use crate::fsm::{RaceEvent, RaceState};
use crate::matcher::{InputMatcher, KeystrokeRecord, LocalProgress, MatchOutcome, MatchResult};
use crate::metrics::{self, Metrics};
use crate::modifiers::{EffectChange, ModifierEngine, ModifierId, ModifierSet};
use crate::projector::{GhostProfile, OpponentProjector};
use crate::protocol::{ClientMsg, Placement, RosterEntry, ServerMsg};
use crate::text::TargetText;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RaceMode {
    #[default]
    Solo,
    Ghost,
    QuickRace,
    Ranked,
    Custom,
    Github,
    Chaos,
}

/// Where a finished race's result goes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResultSink {
    /// POSTed to the REST API.
    Api,
    /// Sent as `race-finished` on the race channel.
    Channel,
    Discard,
}

impl RaceMode {
    pub fn is_networked(&self) -> bool {
        matches!(self, RaceMode::QuickRace | RaceMode::Ranked)
    }

    pub fn result_sink(&self) -> ResultSink {
        match self {
            RaceMode::QuickRace | RaceMode::Ranked => ResultSink::Channel,
            RaceMode::Ghost => ResultSink::Discard,
            RaceMode::Solo | RaceMode::Custom | RaceMode::Github | RaceMode::Chaos => ResultSink::Api,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RaceMode::Solo => "solo",
            RaceMode::Ghost => "ghost",
            RaceMode::QuickRace => "quick-race",
            RaceMode::Ranked => "ranked",
            RaceMode::Custom => "custom",
            RaceMode::Github => "github",
            RaceMode::Chaos => "chaos",
        }
    }
}

impl FromStr for RaceMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "solo" => Ok(RaceMode::Solo),
            "ghost" => Ok(RaceMode::Ghost),
            "quick-race" | "quick_race" | "quick" => Ok(RaceMode::QuickRace),
            "ranked" => Ok(RaceMode::Ranked),
            "custom" => Ok(RaceMode::Custom),
            "github" | "code" => Ok(RaceMode::Github),
            "chaos" => Ok(RaceMode::Chaos),
            other => Err(format!("unknown race mode '{other}'")),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CompletionReason {
    TextExhausted,
    TimeUp,
    Permadeath,
    /// The race authority ended the race.
    Results,
}

#[derive(Clone, Debug)]
pub struct RaceSession {
    pub target_text: TargetText,
    pub mode: RaceMode,
    pub race_id: Option<String>,
    /// Set on entering `Active`.
    pub start_ms: Option<u64>,
    pub countdown_ends_ms: u64,
    pub duration_ms: Option<u64>,
}

/// What a finished race reports.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RaceSummary {
    pub mode: RaceMode,
    pub reason: CompletionReason,
    pub failed: bool,
    pub wpm: f64,
    pub accuracy: f64,
    pub errors: u32,
    pub duration_secs: u64,
    pub history: Vec<KeystrokeRecord>,
    pub text_id: Option<String>,
    pub race_id: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum EngineEvent {
    StateChanged { from: RaceState, to: RaceState },
    Metrics(Metrics),
    /// A message for the race channel.
    Outbound(ClientMsg),
    Effect(EffectChange),
    /// Text or pairing could not be obtained; the race stayed out of `Active`.
    RetryRequired { reason: String },
    Finished(RaceSummary),
    Results {
        winner_id: Option<String>,
        placements: Vec<Placement>,
    },
}

/// A request to race in a local (non-networked) mode.
#[derive(Clone, Debug)]
pub struct LocalRace {
    pub mode: RaceMode,
    pub text: TargetText,
    pub modifiers: Vec<ModifierId>,
    pub ghost: Option<GhostProfile>,
}

#[derive(Debug)]
pub struct RaceEngine {
    config: EngineConfig,
    user_id: String,
    state: RaceState,
    session: Option<RaceSession>,
    matcher: InputMatcher,
    projector: OpponentProjector,
    modifiers: ModifierEngine,
    metrics: Metrics,
    /// Mode and modifiers requested while waiting for a match.
    queued: Option<(RaceMode, Vec<ModifierId>)>,
    matching_since_ms: Option<u64>,
    summary: Option<RaceSummary>,
    outbox: VecDeque<EngineEvent>,
}

impl RaceEngine {
    pub fn new(config: EngineConfig, user_id: impl Into<String>) -> Self {
        let modifiers = ModifierEngine::new(ModifierSet::default(), &config);
        Self::build(config, user_id.into(), modifiers)
    }

    /// Use `rng` for chaos effect selection.
    pub fn with_rng(config: EngineConfig, user_id: impl Into<String>, rng: Box<dyn RngCore + Send>) -> Self {
        let modifiers = ModifierEngine::with_rng(ModifierSet::default(), &config, rng);
        Self::build(config, user_id.into(), modifiers)
    }

    fn build(config: EngineConfig, user_id: String, modifiers: ModifierEngine) -> Self {
        Self {
            projector: OpponentProjector::new(0, config.max_lookahead_chars),
            config,
            user_id,
            state: RaceState::default(),
            session: None,
            matcher: InputMatcher::default(),
            modifiers,
            metrics: Metrics::default(),
            queued: None,
            matching_since_ms: None,
            summary: None,
            outbox: VecDeque::new(),
        }
    }

    pub fn state(&self) -> RaceState {
        self.state
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn session(&self) -> Option<&RaceSession> {
        self.session.as_ref()
    }

    pub fn progress(&self) -> &LocalProgress {
        self.matcher.progress()
    }

    pub fn metrics(&self) -> Metrics {
        self.metrics
    }

    pub fn projector(&self) -> &OpponentProjector {
        &self.projector
    }

    pub fn modifiers(&self) -> &ModifierEngine {
        &self.modifiers
    }

    pub fn summary(&self) -> Option<&RaceSummary> {
        self.summary.as_ref()
    }

    /// Whole seconds left on the race timer, if the race is timed.
    pub fn time_left_secs(&self, now_ms: u64) -> Option<u64> {
        let session = self.session.as_ref()?;
        let duration = session.duration_ms?;
        let elapsed = session.start_ms.map_or(0, |s| now_ms.saturating_sub(s));
        Some(duration.saturating_sub(elapsed).div_ceil(1000))
    }

    /// Take every event queued since the last drain.
    pub fn drain_events(&mut self) -> Vec<EngineEvent> {
        self.outbox.drain(..).collect()
    }

    /// Start a mode that needs no pairing once its text is in hand.
    pub fn start_local(&mut self, race: LocalRace, now_ms: u64) -> Result<(), RaceError> {
        if race.mode.is_networked() {
            return Err(RaceError::InvalidTransition {
                state: self.state,
                event: RaceEvent::TextResolved,
            });
        }
        self.guard(RaceEvent::TextResolved)?;

        let mut modifiers = race.modifiers;
        if race.mode == RaceMode::Chaos {
            modifiers.push(ModifierId::ChaosRandom);
        }
        let ghost = match race.mode {
            RaceMode::Ghost => Some(race.ghost.unwrap_or_else(|| GhostProfile {
                username: "ghost".to_string(),
                wpm: self.config.ghost_default_wpm,
                accuracy: None,
            })),
            _ => race.ghost,
        };

        self.prepare(race.mode, race.text, None, modifiers, now_ms);
        if let Some(profile) = ghost {
            self.projector.add_ghost(&profile);
        }
        self.session_mut_countdown(now_ms + self.config.countdown_ms);
        self.fire(RaceEvent::TextResolved)?;
        self.check_countdown(now_ms);
        Ok(())
    }

    /// Ask the race authority for an opponent.
    pub fn join_queue(
        &mut self,
        mode: RaceMode,
        modifiers: Vec<ModifierId>,
        rank: Option<crate::modifiers::RankTier>,
        now_ms: u64,
    ) -> Result<(), RaceError> {
        if !mode.is_networked() {
            return Err(RaceError::InvalidTransition {
                state: self.state,
                event: RaceEvent::QueueJoined,
            });
        }
        self.fire(RaceEvent::QueueJoined)?;
        self.queued = Some((mode, modifiers));
        self.matching_since_ms = Some(now_ms);
        self.outbox.push_back(EngineEvent::Outbound(ClientMsg::JoinQueue {
            user_id: self.user_id.clone(),
            mode,
            rank,
        }));
        Ok(())
    }

    /// Text fetch or pairing failed. The race stays out of `Active` and the
    /// caller is told to offer a retry.
    pub fn acquisition_failed(&mut self, reason: impl Into<String>, now_ms: u64) {
        let reason = reason.into();
        warn!("race acquisition failed: {}", reason);
        if self.state == RaceState::Matching {
            let _ = self.fire(RaceEvent::MatchFailed);
            self.clear_race(now_ms);
        }
        self.outbox.push_back(EngineEvent::RetryRequired { reason });
    }

    /// Dispatch one message from the race channel.
    pub fn on_server_message(&mut self, msg: ServerMsg, now_ms: u64) -> Result<(), RaceError> {
        match msg {
            ServerMsg::WaitingForOpponent => {
                debug!("waiting for opponent");
                Ok(())
            }
            ServerMsg::RaceMatched {
                race_id,
                text,
                language,
                participants,
                start_time,
            } => self.on_matched(race_id, &text, language, &participants, start_time, now_ms),
            ServerMsg::OpponentProgress {
                user_id,
                cursor_index,
                wpm,
                accuracy,
            } => {
                self.on_authoritative_update(&user_id, cursor_index, wpm, now_ms);
                self.projector.note_accuracy(&user_id, accuracy);
                Ok(())
            }
            ServerMsg::RaceResults { winner_id, placements } => {
                self.on_results(winner_id, placements, now_ms);
                Ok(())
            }
            ServerMsg::MatchFailed { reason } => {
                self.acquisition_failed(reason, now_ms);
                Ok(())
            }
        }
    }

    pub fn on_matched(
        &mut self,
        race_id: String,
        text: &str,
        language: Option<String>,
        participants: &[RosterEntry],
        start_time_ms: u64,
        now_ms: u64,
    ) -> Result<(), RaceError> {
        self.guard(RaceEvent::Matched)?;

        let target = match language.as_deref() {
            Some(lang) if lang != "plain" && !lang.is_empty() => TargetText::code(text, lang),
            _ => TargetText::plain(text),
        };
        let target = match target {
            Ok(t) => t,
            Err(e) => {
                let reason = format!("match carried unusable text: {e}");
                self.acquisition_failed(reason.clone(), now_ms);
                return Err(RaceError::Acquisition { reason });
            }
        };

        let (mode, modifiers) = self.queued.take().unwrap_or((RaceMode::QuickRace, Vec::new()));
        info!(
            "matched into race {} with {} participants",
            race_id,
            participants.len()
        );
        self.prepare(mode, target, Some(race_id), modifiers, now_ms);
        for entry in participants.iter().filter(|p| p.user_id != self.user_id) {
            self.projector.add_remote(&entry.user_id, &entry.username, now_ms);
        }
        self.matching_since_ms = None;
        self.session_mut_countdown(start_time_ms);
        self.fire(RaceEvent::Matched)?;
        self.check_countdown(now_ms);
        Ok(())
    }

    /// Fresh opponent progress from the network.
    pub fn on_authoritative_update(&mut self, user_id: &str, index: usize, wpm: f64, now_ms: u64) {
        if user_id == self.user_id {
            return;
        }
        if !matches!(self.state, RaceState::Countdown | RaceState::Active) {
            debug!("dropping progress for {} in state {:?}", user_id, self.state);
            return;
        }
        self.projector.on_authoritative_update(user_id, index, wpm, now_ms);
    }

    /// Final standings from the race authority.
    pub fn on_results(&mut self, winner_id: Option<String>, placements: Vec<Placement>, now_ms: u64) {
        match self.state {
            RaceState::Active => {
                self.finish(CompletionReason::Results, now_ms);
            }
            RaceState::Completed { .. } => {
                let _ = self.fire(RaceEvent::ResultsReceived);
            }
            other => {
                warn!("ignoring race results in state {:?}", other);
                return;
            }
        }
        info!("race results received, winner {:?}", winner_id);
        self.outbox.push_back(EngineEvent::Results { winner_id, placements });
    }

    /// Feed the full current value of the input control.
    pub fn submit(&mut self, raw: &str, now_ms: u64) -> Result<MatchResult, RaceError> {
        if self.expire_if_due(now_ms) || self.state != RaceState::Active {
            return Err(RaceError::NotActive(self.state));
        }
        let Some(session) = self.session.as_ref() else {
            return Err(RaceError::NotActive(self.state));
        };
        let start = session.start_ms.unwrap_or(now_ms);
        let result = self.matcher.submit(raw, &session.target_text, now_ms.saturating_sub(start));

        match result.outcome {
            MatchOutcome::Accepted { .. } => {
                self.refresh_metrics(now_ms);
                self.emit_progress();
            }
            MatchOutcome::Completed => {
                self.refresh_metrics(now_ms);
                self.emit_progress();
                self.finish(CompletionReason::TextExhausted, now_ms);
            }
            MatchOutcome::Mismatch { .. } => self.refresh_metrics(now_ms),
            MatchOutcome::Failed => {
                self.refresh_metrics(now_ms);
                self.finish(CompletionReason::Permadeath, now_ms);
            }
            MatchOutcome::DeletionBlocked | MatchOutcome::Edited | MatchOutcome::Ignored => {}
        }
        Ok(result)
    }

    /// Per-frame tick: opponent motion and chaos effects.
    pub fn tick(&mut self, now_ms: u64) {
        if self.state != RaceState::Active || self.expire_if_due(now_ms) {
            return;
        }
        self.projector.tick(now_ms);
        if let Some(change) = self.modifiers.tick(now_ms) {
            self.outbox.push_back(EngineEvent::Effect(change));
        }
        let before = self.metrics;
        self.metrics = self.current_metrics(now_ms);
        if self.metrics != before {
            self.outbox.push_back(EngineEvent::Metrics(self.metrics));
        }
    }

    /// 1 Hz tick: countdown, race timer and matchmaking timeout.
    pub fn tick_second(&mut self, now_ms: u64) {
        match self.state {
            RaceState::Matching => {
                let waited = self.matching_since_ms.map_or(0, |s| now_ms.saturating_sub(s));
                if waited >= self.config.matching_timeout_ms {
                    self.outbox.push_back(EngineEvent::Outbound(ClientMsg::LeaveQueue {
                        user_id: self.user_id.clone(),
                    }));
                    self.acquisition_failed("no opponent found", now_ms);
                }
            }
            RaceState::Countdown => self.check_countdown(now_ms),
            RaceState::Active => {
                self.expire_if_due(now_ms);
            }
            _ => {}
        }
    }

    /// Leave the race from any state and return every per-race entity to
    /// its initial value.
    pub fn reset(&mut self, now_ms: u64) {
        if self.state == RaceState::Matching {
            self.outbox.push_back(EngineEvent::Outbound(ClientMsg::LeaveQueue {
                user_id: self.user_id.clone(),
            }));
        }
        if self.state != RaceState::Idle {
            let _ = self.fire(RaceEvent::Reset);
        }
        self.clear_race(now_ms);
    }

    fn guard(&self, event: RaceEvent) -> Result<(), RaceError> {
        match RaceState::transition(&self.state, &event) {
            Some(_) => Ok(()),
            None => Err(RaceError::InvalidTransition {
                state: self.state,
                event,
            }),
        }
    }

    fn fire(&mut self, event: RaceEvent) -> Result<RaceState, RaceError> {
        let next = RaceState::transition(&self.state, &event).ok_or(RaceError::InvalidTransition {
            state: self.state,
            event,
        })?;
        let from = std::mem::replace(&mut self.state, next);
        if from != next {
            info!("race state {:?} -> {:?} on {:?}", from, next, event);
            self.outbox.push_back(EngineEvent::StateChanged { from, to: next });
        }
        Ok(next)
    }

    /// Build the per-race entities for a freshly resolved text.
    fn prepare(
        &mut self,
        mode: RaceMode,
        text: TargetText,
        race_id: Option<String>,
        modifiers: Vec<ModifierId>,
        now_ms: u64,
    ) {
        let set = ModifierSet::new(modifiers);
        let text = if set.active.contains(&ModifierId::CodeMix) {
            text.into_structured()
        } else {
            text
        };
        self.modifiers.replace_set(set);
        self.matcher = InputMatcher::new(self.modifiers.input_rules(&text));
        self.projector = OpponentProjector::new(text.len(), self.config.max_lookahead_chars);
        self.metrics = Metrics::default();
        self.summary = None;
        self.session = Some(RaceSession {
            target_text: text,
            mode,
            race_id,
            start_ms: None,
            countdown_ends_ms: now_ms,
            duration_ms: self.config.duration_ms(),
        });
    }

    fn session_mut_countdown(&mut self, ends_ms: u64) {
        if let Some(session) = self.session.as_mut() {
            session.countdown_ends_ms = ends_ms;
        }
    }

    fn check_countdown(&mut self, now_ms: u64) {
        let due = self
            .session
            .as_ref()
            .is_some_and(|s| now_ms >= s.countdown_ends_ms);
        if self.state != RaceState::Countdown || !due {
            return;
        }
        if self.fire(RaceEvent::CountdownElapsed).is_err() {
            return;
        }
        if let Some(session) = self.session.as_mut() {
            session.start_ms = Some(now_ms);
        }
        self.projector.set_race_start(now_ms);
        self.modifiers.start(now_ms);
        self.tick(now_ms);
    }

    /// End an active race whose timer has run out. Returns true if it did.
    fn expire_if_due(&mut self, now_ms: u64) -> bool {
        if self.state != RaceState::Active || self.time_left_secs(now_ms) != Some(0) {
            return false;
        }
        self.finish(CompletionReason::TimeUp, now_ms);
        true
    }

    fn current_metrics(&self, now_ms: u64) -> Metrics {
        match self.session.as_ref() {
            Some(s) => metrics::compute(
                self.matcher.progress(),
                s.target_text.len(),
                s.start_ms.unwrap_or(now_ms),
                now_ms,
            ),
            None => Metrics::default(),
        }
    }

    fn refresh_metrics(&mut self, now_ms: u64) {
        self.metrics = self.current_metrics(now_ms);
        self.outbox.push_back(EngineEvent::Metrics(self.metrics));
    }

    /// At most one `race-progress` per accepted keystroke.
    fn emit_progress(&mut self) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        if !session.mode.is_networked() {
            return;
        }
        let Some(race_id) = session.race_id.clone() else {
            return;
        };
        self.outbox.push_back(EngineEvent::Outbound(ClientMsg::RaceProgress {
            race_id,
            user_id: self.user_id.clone(),
            cursor_index: self.matcher.progress().cursor_index,
            wpm: self.metrics.wpm,
            accuracy: self.metrics.accuracy,
        }));
    }

    fn finish(&mut self, reason: CompletionReason, now_ms: u64) {
        let event = match reason {
            CompletionReason::TextExhausted => RaceEvent::TextExhausted,
            CompletionReason::TimeUp => RaceEvent::TimeUp,
            CompletionReason::Permadeath => RaceEvent::Permadeath,
            CompletionReason::Results => RaceEvent::ResultsReceived,
        };
        let Ok(state) = self.fire(event) else {
            return;
        };
        self.modifiers.stop();
        self.metrics = self.current_metrics(now_ms);

        let Some(session) = self.session.as_ref() else {
            return;
        };
        let elapsed_ms = session.start_ms.map_or(0, |s| now_ms.saturating_sub(s));
        let duration_secs = match (reason, session.duration_ms) {
            (CompletionReason::TimeUp, Some(d)) => d / 1000,
            _ => elapsed_ms / 1000,
        };
        let progress = self.matcher.progress();
        let summary = RaceSummary {
            mode: session.mode,
            reason,
            failed: state.is_failed(),
            wpm: self.metrics.wpm,
            accuracy: self.metrics.accuracy,
            errors: progress.error_count,
            duration_secs,
            history: progress.history.clone(),
            text_id: session.target_text.text_id().map(str::to_string),
            race_id: session.race_id.clone(),
        };
        info!(
            "race finished ({:?}): {} wpm, {}% accuracy, {} errors",
            reason, summary.wpm, summary.accuracy, summary.errors
        );

        if session.mode.result_sink() == ResultSink::Channel {
            if let Some(race_id) = session.race_id.clone() {
                self.outbox.push_back(EngineEvent::Outbound(ClientMsg::RaceFinished {
                    race_id,
                    user_id: self.user_id.clone(),
                    wpm: summary.wpm,
                    accuracy: summary.accuracy,
                    errors: summary.errors,
                    duration: summary.duration_secs,
                    history: summary.history.clone(),
                }));
            }
        }
        self.outbox.push_back(EngineEvent::Metrics(self.metrics));
        self.outbox.push_back(EngineEvent::Finished(summary.clone()));
        self.summary = Some(summary);
    }

    fn clear_race(&mut self, now_ms: u64) {
        debug!("clearing race state at {}", now_ms);
        self.modifiers.stop();
        self.modifiers.replace_set(ModifierSet::default());
        self.session = None;
        self.matcher = InputMatcher::default();
        self.projector = OpponentProjector::new(0, self.config.max_lookahead_chars);
        self.metrics = Metrics::default();
        self.queued = None;
        self.matching_since_ms = None;
        self.summary = None;
    }
}
