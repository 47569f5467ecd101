//! Competitive modifiers: static rule/presentation changes picked at race
//! start, plus the randomized transient effects of chaos mode.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::EngineConfig;
use crate::matcher::InputRules;
use crate::text::TargetText;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModifierId {
    VisualDim,
    Fog,
    NoBackspace,
    Permadeath,
    CodeMix,
    ChaosRandom,
}

impl FromStr for ModifierId {
    type Err = String;

    /// Accepts both the kebab-case names and the short ids the lobby sends.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "visual-dim" | "dim" => Ok(ModifierId::VisualDim),
            "fog" => Ok(ModifierId::Fog),
            "no-backspace" | "no_backspace" => Ok(ModifierId::NoBackspace),
            "permadeath" => Ok(ModifierId::Permadeath),
            "code-mix" | "code" => Ok(ModifierId::CodeMix),
            "chaos-random" | "chaos" => Ok(ModifierId::ChaosRandom),
            other => Err(format!("unknown modifier '{other}'")),
        }
    }
}

/// Ranked tiers and the modifier protocol each one races under.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RankTier {
    #[default]
    Bronze,
    Silver,
    Gold,
    Diamond,
    Master,
    Apex,
}

impl RankTier {
    pub fn modifiers(&self) -> &'static [ModifierId] {
        use ModifierId::*;
        match self {
            RankTier::Bronze => &[],
            RankTier::Silver => &[VisualDim],
            RankTier::Gold => &[Fog],
            RankTier::Diamond => &[CodeMix, Fog],
            RankTier::Master => &[NoBackspace, CodeMix],
            RankTier::Apex => &[Permadeath, ChaosRandom],
        }
    }

    /// Unknown names race as Bronze.
    pub fn parse_lenient(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "silver" => RankTier::Silver,
            "gold" => RankTier::Gold,
            "diamond" => RankTier::Diamond,
            "master" => RankTier::Master,
            "apex" => RankTier::Apex,
            _ => RankTier::Bronze,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EffectKind {
    Blur,
    Shake,
    Flip,
    Pulse,
    FullDim,
}

pub const EFFECT_CATALOG: [EffectKind; 5] = [
    EffectKind::Blur,
    EffectKind::Shake,
    EffectKind::Flip,
    EffectKind::Pulse,
    EffectKind::FullDim,
];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransientEffect {
    pub kind: EffectKind,
    pub expires_at_ms: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EffectChange {
    Started(TransientEffect),
    Cleared,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ModifierSet {
    pub active: BTreeSet<ModifierId>,
    pub transient: Option<TransientEffect>,
}

impl ModifierSet {
    pub fn new(ids: impl IntoIterator<Item = ModifierId>) -> Self {
        Self {
            active: ids.into_iter().collect(),
            transient: None,
        }
    }
}

/// Query surface for the renderer and the input matcher. The static set
/// is fixed for the race; only the transient effect changes over time.
pub struct ModifierEngine {
    set: ModifierSet,
    rng: Box<dyn RngCore + Send>,
    next_roll_ms: Option<u64>,
    cadence_ms: u64,
    trigger_probability: f64,
    min_effect_ms: u64,
    max_effect_ms: u64,
    fog_window: usize,
    permadeath_limit: u32,
}

impl fmt::Debug for ModifierEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModifierEngine")
            .field("set", &self.set)
            .field("next_roll_ms", &self.next_roll_ms)
            .finish_non_exhaustive()
    }
}

impl ModifierEngine {
    pub fn new(set: ModifierSet, config: &EngineConfig) -> Self {
        Self::with_rng(set, config, Box::new(StdRng::from_entropy()))
    }

    /// Inject the random source used for chaos effects.
    pub fn with_rng(set: ModifierSet, config: &EngineConfig, rng: Box<dyn RngCore + Send>) -> Self {
        Self {
            set,
            rng,
            next_roll_ms: None,
            cadence_ms: config.chaos_cadence_ms.max(1),
            trigger_probability: config.chaos_trigger_probability.clamp(0.0, 1.0),
            min_effect_ms: config.chaos_min_effect_ms,
            max_effect_ms: config.chaos_max_effect_ms,
            fog_window: config.fog_window_chars,
            permadeath_limit: config.permadeath_error_limit,
        }
    }

    /// Install the static set for the next race. Clears any transient effect
    /// and stops the chaos schedule until [`ModifierEngine::start`].
    pub fn replace_set(&mut self, set: ModifierSet) {
        self.set = set;
        self.set.transient = None;
        self.next_roll_ms = None;
    }

    pub fn is_active(&self, id: ModifierId) -> bool {
        self.set.active.contains(&id)
    }

    pub fn active(&self) -> impl Iterator<Item = ModifierId> + '_ {
        self.set.active.iter().copied()
    }

    pub fn current_transient_effect(&self) -> Option<TransientEffect> {
        self.set.transient
    }

    /// True when the character at `index` should be obscured by fog.
    pub fn is_fogged(&self, index: usize, cursor: usize) -> bool {
        self.is_active(ModifierId::Fog) && index > cursor + self.fog_window
    }

    pub fn input_rules(&self, text: &TargetText) -> InputRules {
        InputRules {
            no_backspace: self.is_active(ModifierId::NoBackspace),
            permadeath_limit: self
                .is_active(ModifierId::Permadeath)
                .then_some(self.permadeath_limit),
            auto_indent: text.is_structured() || self.is_active(ModifierId::CodeMix),
        }
    }

    /// Begin the chaos schedule; the first roll happens at race start.
    pub fn start(&mut self, now_ms: u64) {
        if self.is_active(ModifierId::ChaosRandom) {
            self.next_roll_ms = Some(now_ms);
        }
    }

    /// Stop scheduling and drop any visible effect.
    pub fn stop(&mut self) {
        self.next_roll_ms = None;
        self.set.transient = None;
    }

    /// Advance the effect schedule to `now_ms`. Rolls are pinned to the
    /// wall-clock cadence, so skipped frames do not skip or bunch rolls.
    pub fn tick(&mut self, now_ms: u64) -> Option<EffectChange> {
        let before = self.set.transient;

        while let Some(due) = self.next_roll_ms.filter(|due| *due <= now_ms) {
            self.roll(due);
            self.next_roll_ms = Some(due + self.cadence_ms);
        }
        if self.set.transient.is_some_and(|e| e.expires_at_ms <= now_ms) {
            self.set.transient = None;
        }

        match (before, self.set.transient) {
            (b, a) if b == a => None,
            (_, Some(effect)) => Some(EffectChange::Started(effect)),
            (_, None) => Some(EffectChange::Cleared),
        }
    }

    fn roll(&mut self, at_ms: u64) {
        if let Some(effect) = self.set.transient {
            if effect.expires_at_ms <= at_ms {
                self.set.transient = None;
            }
        }
        if !self.rng.gen_bool(self.trigger_probability) {
            return;
        }
        let kind = EFFECT_CATALOG[self.rng.gen_range(0..EFFECT_CATALOG.len())];
        let duration = if self.max_effect_ms > self.min_effect_ms {
            self.rng.gen_range(self.min_effect_ms..self.max_effect_ms)
        } else {
            self.min_effect_ms
        };
        debug!("chaos effect {:?} for {} ms", kind, duration);
        self.set.transient = Some(TransientEffect {
            kind,
            expires_at_ms: at_ms + duration,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::mock::StepRng;

    fn chaos_engine(rng: Box<dyn RngCore + Send>) -> ModifierEngine {
        ModifierEngine::with_rng(
            ModifierSet::new([ModifierId::ChaosRandom]),
            &EngineConfig::default(),
            rng,
        )
    }

    #[test]
    fn test_parse_modifier_ids() {
        assert_eq!("dim".parse::<ModifierId>(), Ok(ModifierId::VisualDim));
        assert_eq!("no_backspace".parse::<ModifierId>(), Ok(ModifierId::NoBackspace));
        assert_eq!("code-mix".parse::<ModifierId>(), Ok(ModifierId::CodeMix));
        assert!("turbo".parse::<ModifierId>().is_err());
    }

    #[test]
    fn test_rank_tiers() {
        assert!(RankTier::Bronze.modifiers().is_empty());
        assert_eq!(RankTier::Master.modifiers(), &[ModifierId::NoBackspace, ModifierId::CodeMix]);
        assert_eq!(RankTier::parse_lenient("APEX"), RankTier::Apex);
        assert_eq!(RankTier::parse_lenient("platinum"), RankTier::Bronze);
    }

    #[test]
    fn test_fog_window() {
        let engine = ModifierEngine::new(ModifierSet::new([ModifierId::Fog]), &EngineConfig::default());
        assert!(!engine.is_fogged(18, 10));
        assert!(engine.is_fogged(19, 10));

        let clear = ModifierEngine::new(ModifierSet::default(), &EngineConfig::default());
        assert!(!clear.is_fogged(500, 0));
    }

    #[test]
    fn test_input_rules_follow_modifiers() {
        let text = TargetText::plain("abc").unwrap();
        let engine = ModifierEngine::new(
            ModifierSet::new([ModifierId::NoBackspace, ModifierId::Permadeath, ModifierId::CodeMix]),
            &EngineConfig::default(),
        );
        let rules = engine.input_rules(&text);
        assert!(rules.no_backspace);
        assert_eq!(rules.permadeath_limit, Some(3));
        assert!(rules.auto_indent);

        let plain = ModifierEngine::new(ModifierSet::default(), &EngineConfig::default());
        assert_eq!(plain.input_rules(&text), InputRules::default());
    }

    #[test]
    fn test_no_effects_without_chaos() {
        let mut engine = ModifierEngine::with_rng(
            ModifierSet::new([ModifierId::Fog]),
            &EngineConfig::default(),
            Box::new(StepRng::new(0, 0)),
        );
        engine.start(0);
        assert_eq!(engine.tick(10_000), None);
        assert_eq!(engine.current_transient_effect(), None);
    }

    #[test]
    fn test_effect_triggers_and_clears() {
        // an all-zero source always passes the trigger roll
        let mut engine = chaos_engine(Box::new(StepRng::new(0, 0)));
        engine.start(1_000);

        let change = engine.tick(1_000);
        let effect = match change {
            Some(EffectChange::Started(e)) => e,
            other => panic!("expected an effect, got {other:?}"),
        };
        assert!(EFFECT_CATALOG.contains(&effect.kind));
        assert!(effect.expires_at_ms >= 3_000 && effect.expires_at_ms < 5_000);

        assert_eq!(engine.tick(effect.expires_at_ms - 1), None);
        assert_eq!(engine.tick(effect.expires_at_ms), Some(EffectChange::Cleared));
    }

    #[test]
    fn test_failed_roll_schedules_nothing() {
        let mut engine = chaos_engine(Box::new(StepRng::new(u64::MAX, 0)));
        engine.start(0);
        for t in (0..30_000).step_by(16) {
            assert_eq!(engine.tick(t), None);
        }
    }

    #[test]
    fn test_seeded_sequence_is_reproducible() {
        let run = |seed: u64| {
            let mut engine = chaos_engine(Box::new(StdRng::seed_from_u64(seed)));
            engine.start(0);
            let mut seen = Vec::new();
            for t in (0..60_000).step_by(50) {
                if let Some(EffectChange::Started(e)) = engine.tick(t) {
                    seen.push(e);
                }
            }
            seen
        };
        assert_eq!(run(42), run(42));
        assert!(!run(42).is_empty());
    }

    #[test]
    fn test_cadence_is_frame_rate_independent() {
        let collect = |step: usize| {
            let mut engine = chaos_engine(Box::new(StdRng::seed_from_u64(9)));
            engine.start(0);
            for t in (0..=30_000u64).step_by(step) {
                engine.tick(t);
            }
            engine.current_transient_effect()
        };
        assert_eq!(collect(16), collect(1_000));
    }

    #[test]
    fn test_stop_clears_effect() {
        let mut engine = chaos_engine(Box::new(StepRng::new(0, 0)));
        engine.start(0);
        engine.tick(0);
        assert!(engine.current_transient_effect().is_some());
        engine.stop();
        assert!(engine.current_transient_effect().is_none());
        assert_eq!(engine.tick(10_000), None);
    }
}
