//! Runs one race: wires the engine to its timers, the race channel, the
//! REST API and a keystroke source, then tears all of them down.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use engine::modifiers::{ModifierId, RankTier};
use engine::projector::GhostProfile;
use engine::protocol::ClientMsg;
use engine::race::{RaceMode, ResultSink};
use engine::text::{Difficulty, TargetText};
use engine::{EngineEvent, LocalRace, RaceEngine, RaceError, RaceState, RaceSummary};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::api::{self, ApiClient};
use crate::bridge::NetworkBridge;
use crate::input::{self, AutoTypist, KeyInput};

const FRAME: Duration = Duration::from_millis(16);
/// How long a finished networked race waits for the final standings.
const RESULTS_GRACE_MS: u64 = 10_000;

pub fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// What the player asked to race.
#[derive(Clone, Debug, Default)]
pub struct RacePlan {
    pub mode: RaceMode,
    pub difficulty: Difficulty,
    pub modifiers: Vec<ModifierId>,
    pub rank: Option<RankTier>,
    pub ghost: Option<GhostProfile>,
    pub custom_text: Option<String>,
}

impl RacePlan {
    /// Explicit modifiers plus whatever the rank tier imposes.
    pub fn effective_modifiers(&self) -> Vec<ModifierId> {
        let mut mods = self.modifiers.clone();
        if self.mode == RaceMode::Ranked {
            mods.extend(self.rank.unwrap_or_default().modifiers().iter().copied());
        }
        mods.sort();
        mods.dedup();
        mods
    }
}

pub struct Driver {
    engine: RaceEngine,
    api: Option<ApiClient>,
    channel: Option<mpsc::UnboundedSender<ClientMsg>>,
    typist: Option<AutoTypist>,
    rng: StdRng,
    summary: Option<RaceSummary>,
    finished_at: Option<u64>,
    done: bool,
    retry: Option<String>,
}

impl Driver {
    pub fn new(engine: RaceEngine, api: Option<ApiClient>, typist: Option<AutoTypist>, seed: Option<u64>) -> Self {
        Self {
            engine,
            api,
            channel: None,
            typist,
            rng: seed.map_or_else(StdRng::from_entropy, StdRng::seed_from_u64),
            summary: None,
            finished_at: None,
            done: false,
            retry: None,
        }
    }

    pub async fn run(mut self, plan: RacePlan, ws_url: Option<&str>) -> Result<Option<RaceSummary>> {
        let mut bridge = self.begin(&plan, ws_url).await?;

        let mut frame = interval(FRAME);
        frame.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut second = interval(Duration::from_secs(1));
        let typist_every = self
            .typist
            .as_ref()
            .map_or(Duration::from_secs(3600), AutoTypist::interval);
        let mut typist_tick = interval(typist_every);
        let (mut keys, stdin_task) = if self.typist.is_none() {
            info!("type the text below; ':bs' deletes, ':quit' leaves");
            let (rx, task) = input::spawn_stdin(true);
            (Some(rx), Some(task))
        } else {
            (None, None)
        };

        while !self.done && self.retry.is_none() {
            tokio::select! {
                _ = frame.tick() => {
                    self.engine.tick(current_timestamp());
                }
                _ = second.tick() => {
                    let now = current_timestamp();
                    self.engine.tick_second(now);
                    self.report(now);
                    if self.finished_at.is_some_and(|t| now.saturating_sub(t) >= RESULTS_GRACE_MS) {
                        warn!("no race results arrived; leaving");
                        self.done = true;
                    }
                }
                msg = async {
                    match bridge.as_mut() {
                        Some(b) => b.recv().await,
                        None => std::future::pending().await,
                    }
                } => {
                    match msg {
                        Some(msg) => {
                            match self.engine.on_server_message(msg, current_timestamp()) {
                                Err(e) if e.is_retryable() => self.retry = Some(e.to_string()),
                                Err(e) => warn!("race channel message rejected: {}", e),
                                Ok(()) => {}
                            }
                        }
                        None => {
                            warn!("race channel lost; opponents continue on last known speed");
                            bridge = None;
                        }
                    }
                }
                key = async {
                    match keys.as_mut() {
                        Some(rx) => rx.recv().await,
                        None => std::future::pending().await,
                    }
                } => {
                    match key {
                        Some(key) => self.handle_key(key),
                        None => keys = None,
                    }
                }
                _ = typist_tick.tick(), if self.typist.is_some() => {
                    self.autotype();
                }
            }
            self.flush().await;
        }

        drop(frame);
        drop(second);
        drop(typist_tick);
        if let Some(task) = stdin_task {
            task.abort();
        }
        self.leave(bridge).await;

        if let Some(reason) = self.retry {
            return Err(RaceError::Acquisition { reason }.into());
        }
        Ok(self.summary)
    }

    /// Reset the engine and send what that queues (`leave-queue` while
    /// matching) before the channel closes.
    async fn leave(&mut self, bridge: Option<NetworkBridge>) {
        self.engine.reset(current_timestamp());
        self.flush().await;
        self.channel = None;
        if let Some(b) = bridge {
            b.shutdown();
        }
    }

    /// Acquire text or a match and move the engine out of `Idle`.
    async fn begin(&mut self, plan: &RacePlan, ws_url: Option<&str>) -> Result<Option<NetworkBridge>> {
        let now = current_timestamp();

        if plan.mode.is_networked() {
            let url = ws_url.context("networked modes need a race server (remove --offline)")?;
            let bridge = match NetworkBridge::connect(url).await {
                Ok(b) => b,
                Err(e) => {
                    self.engine.acquisition_failed(format!("{e:#}"), now);
                    self.flush().await;
                    let reason = self.retry.take().unwrap_or_default();
                    return Err(RaceError::Acquisition { reason }.into());
                }
            };
            self.channel = Some(bridge.sender());
            self.engine
                .join_queue(plan.mode, plan.effective_modifiers(), plan.rank, now)?;
            self.flush().await;
            info!("looking for an opponent...");
            return Ok(Some(bridge));
        }

        let text = match plan.mode {
            RaceMode::Custom => {
                let raw = plan.custom_text.as_deref().unwrap_or_default();
                TargetText::custom(raw, self.engine.config().custom_text_min_chars)?
            }
            _ => api::resolve_text(self.api.as_ref(), plan.mode, plan.difficulty, &mut self.rng).await,
        };
        info!("race text:\n{}", text.as_string());
        self.engine.start_local(
            LocalRace {
                mode: plan.mode,
                text,
                modifiers: plan.effective_modifiers(),
                ghost: plan.ghost.clone(),
            },
            now,
        )?;
        self.flush().await;
        Ok(None)
    }

    fn handle_key(&mut self, key: KeyInput) {
        if key == KeyInput::Quit {
            info!("leaving race");
            self.done = true;
        } else {
            self.press(key);
        }
    }

    fn press(&mut self, key: KeyInput) {
        if self.engine.state() != RaceState::Active {
            debug!("key ignored in state {:?}", self.engine.state());
            return;
        }
        // stdin ends every line with a newline; prose only wants the ones it contains
        let wants_newline = self.engine.session().is_some_and(|s| {
            s.target_text.is_structured()
                || s.target_text.char_at(self.engine.progress().cursor_index) == Some('\n')
        });
        if key == KeyInput::Char('\n') && !wants_newline {
            return;
        }
        let raw = input::apply_key(&self.engine.progress().buffer, key);
        if let Err(e) = self.engine.submit(&raw, current_timestamp()) {
            debug!("keystroke not accepted: {}", e);
        }
    }

    fn autotype(&mut self) {
        let Some(expected) = self
            .engine
            .session()
            .and_then(|s| s.target_text.char_at(self.engine.progress().cursor_index))
        else {
            return;
        };
        let Some(typist) = self.typist.as_mut() else {
            return;
        };
        let key = typist.next_key(expected);
        self.press(key);
    }

    /// Forward everything the engine queued.
    async fn flush(&mut self) {
        for event in self.engine.drain_events() {
            match event {
                EngineEvent::Outbound(msg) => match &self.channel {
                    Some(tx) => {
                        if tx.send(msg).is_err() {
                            warn!("race channel closed; message dropped");
                        }
                    }
                    None => debug!("no race channel for {:?}", msg),
                },
                EngineEvent::StateChanged { from, to } => {
                    info!("{:?} -> {:?}", from, to);
                }
                EngineEvent::Metrics(_) => {}
                EngineEvent::Effect(change) => info!("chaos: {:?}", change),
                EngineEvent::RetryRequired { reason } => {
                    warn!("{}", reason);
                    self.retry = Some(reason);
                }
                EngineEvent::Finished(summary) => {
                    info!(
                        "finished{}: {} wpm, {}% accuracy, {} errors in {}s",
                        if summary.failed { " (FAILED)" } else { "" },
                        summary.wpm,
                        summary.accuracy,
                        summary.errors,
                        summary.duration_secs
                    );
                    if summary.mode.result_sink() == ResultSink::Api {
                        if let Some(api) = self.api.as_ref() {
                            if let Err(e) = api.submit_result(&summary).await {
                                warn!("could not save result: {:#}", e);
                            }
                        }
                    }
                    if summary.mode.is_networked() {
                        self.finished_at = Some(current_timestamp());
                    } else {
                        self.done = true;
                    }
                    self.summary = Some(summary);
                }
                EngineEvent::Results { winner_id, placements } => {
                    let me = self.engine.user_id();
                    match winner_id.as_deref() {
                        Some(w) if w == me => info!("you won!"),
                        Some(w) => info!("winner: {}", w),
                        None => info!("race over"),
                    }
                    for p in placements {
                        info!("#{} {} - {} wpm, {}%", p.position, p.user_id, p.wpm, p.accuracy);
                    }
                    self.done = true;
                }
            }
        }
    }

    fn report(&self, now: u64) {
        match self.engine.state() {
            RaceState::Countdown => {
                if let Some(s) = self.engine.session() {
                    let left = s.countdown_ends_ms.saturating_sub(now).div_ceil(1000);
                    info!("starting in {}...", left);
                }
            }
            RaceState::Active => {
                let m = self.engine.metrics();
                let opponents: Vec<String> = self
                    .engine
                    .projector()
                    .participants()
                    .iter()
                    .map(|p| format!("{}@{}", p.display_name, p.predicted_index()))
                    .collect();
                let time_left = self
                    .engine
                    .time_left_secs(now)
                    .map_or_else(|| "-".to_string(), |t| format!("{t}s"));
                let effect = self
                    .engine
                    .modifiers()
                    .current_transient_effect()
                    .map(|e| format!(" [{:?}]", e.kind))
                    .unwrap_or_default();
                info!(
                    "{} | {} wpm | {}% acc | {}% done | {}{}",
                    time_left,
                    m.wpm,
                    m.accuracy,
                    m.progress_pct,
                    opponents.join(" "),
                    effect
                );
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine::EngineConfig;

    #[test]
    fn test_ranked_plan_adds_tier_modifiers() {
        let plan = RacePlan {
            mode: RaceMode::Ranked,
            rank: Some(RankTier::Master),
            modifiers: vec![ModifierId::CodeMix, ModifierId::Fog],
            ..RacePlan::default()
        };
        assert_eq!(
            plan.effective_modifiers(),
            vec![ModifierId::Fog, ModifierId::NoBackspace, ModifierId::CodeMix]
        );
    }

    #[test]
    fn test_unranked_plan_ignores_tier() {
        let plan = RacePlan {
            mode: RaceMode::Solo,
            rank: Some(RankTier::Apex),
            ..RacePlan::default()
        };
        assert!(plan.effective_modifiers().is_empty());
    }

    #[tokio::test]
    async fn test_offline_autotyped_race_completes() {
        let config = EngineConfig {
            countdown_ms: 0,
            ..EngineConfig::default()
        };
        let engine = RaceEngine::new(config, "me");
        let typist = AutoTypist::new(3000.0, 0.0, Some(1));
        let driver = Driver::new(engine, None, Some(typist), Some(1));
        let plan = RacePlan {
            mode: RaceMode::Custom,
            custom_text: Some("tiny custom race".to_string()),
            ..RacePlan::default()
        };
        let summary = driver.run(plan, None).await.unwrap().unwrap();
        assert!(!summary.failed);
        assert_eq!(summary.errors, 0);
        assert_eq!(summary.history.len(), 16);
    }

    #[tokio::test]
    async fn test_networked_mode_without_server_is_an_error() {
        let engine = RaceEngine::new(EngineConfig::default(), "me");
        let driver = Driver::new(engine, None, None, Some(1));
        let plan = RacePlan {
            mode: RaceMode::QuickRace,
            ..RacePlan::default()
        };
        assert!(driver.run(plan, None).await.is_err());
    }

    fn queued_driver() -> (Driver, mpsc::UnboundedReceiver<ClientMsg>) {
        let mut engine = RaceEngine::new(EngineConfig::default(), "me");
        engine.join_queue(RaceMode::QuickRace, vec![], None, 0).unwrap();
        engine.drain_events();
        let (tx, rx) = mpsc::unbounded_channel();
        let mut driver = Driver::new(engine, None, None, Some(1));
        driver.channel = Some(tx);
        (driver, rx)
    }

    #[tokio::test]
    async fn test_quit_while_matching_leaves_queue() {
        let (mut driver, mut rx) = queued_driver();
        driver.handle_key(KeyInput::Quit);
        assert!(driver.done);

        driver.leave(None).await;
        assert_eq!(
            rx.try_recv().unwrap(),
            ClientMsg::LeaveQueue {
                user_id: "me".to_string()
            }
        );
        assert!(driver.channel.is_none());
        assert_eq!(driver.engine.state(), RaceState::Idle);
    }

    #[tokio::test]
    async fn test_unusable_match_text_is_retryable() {
        let (mut driver, _rx) = queued_driver();
        let err = driver
            .engine
            .on_matched("r1".to_string(), "", None, &[], 0, 0)
            .unwrap_err();
        assert!(err.is_retryable());
        driver.flush().await;
        assert!(driver.retry.is_some());
        assert_eq!(driver.engine.state(), RaceState::Idle);
    }

    #[test]
    fn test_prose_newline_typed_only_where_text_has_one() {
        // untimed: keys below carry the wall clock, the race started at 0
        let config = EngineConfig {
            countdown_ms: 0,
            duration_secs: None,
            ..EngineConfig::default()
        };
        let mut engine = RaceEngine::new(config, "me");
        let text = TargetText::custom("one two\nthree", 10).unwrap();
        engine
            .start_local(
                LocalRace {
                    mode: RaceMode::Custom,
                    text,
                    modifiers: vec![],
                    ghost: None,
                },
                0,
            )
            .unwrap();
        let mut driver = Driver::new(engine, None, None, Some(1));

        // a stray line break is swallowed
        driver.press(KeyInput::Char('\n'));
        assert_eq!(driver.engine.progress().error_count, 0);

        for c in "one two\nthree".chars() {
            driver.press(KeyInput::Char(c));
        }
        assert_eq!(driver.engine.state(), RaceState::Completed { failed: false });
        assert_eq!(driver.engine.progress().error_count, 0);
    }
}
