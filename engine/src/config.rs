use serde::{Deserialize, Serialize};

/// Tunables for a single race engine. Every field has a default so a
/// partial JSON/env document deserializes cleanly.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub countdown_ms: u64,
    /// `None` runs the race until the text is exhausted.
    pub duration_secs: Option<u64>,
    pub max_lookahead_chars: usize,
    pub fog_window_chars: usize,
    pub chaos_cadence_ms: u64,
    pub chaos_trigger_probability: f64,
    pub chaos_min_effect_ms: u64,
    pub chaos_max_effect_ms: u64,
    pub matching_timeout_ms: u64,
    pub permadeath_error_limit: u32,
    pub custom_text_min_chars: usize,
    pub ghost_default_wpm: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            countdown_ms: 3000,
            duration_secs: Some(60),
            max_lookahead_chars: 15,
            fog_window_chars: 8,
            chaos_cadence_ms: 3000,
            chaos_trigger_probability: 0.6,
            chaos_min_effect_ms: 2000,
            chaos_max_effect_ms: 4000,
            matching_timeout_ms: 30_000,
            permadeath_error_limit: 3,
            custom_text_min_chars: 10,
            ghost_default_wpm: 60.0,
        }
    }
}

impl EngineConfig {
    /// Race length in milliseconds, if the race is timed at all.
    pub fn duration_ms(&self) -> Option<u64> {
        self.duration_secs.filter(|s| *s > 0).map(|s| s * 1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.countdown_ms, 3000);
        assert_eq!(cfg.max_lookahead_chars, 15);
        assert_eq!(cfg.permadeath_error_limit, 3);
        assert_eq!(cfg.duration_ms(), Some(60_000));
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let cfg: EngineConfig =
            serde_json::from_str(r#"{"countdown_ms": 5000, "duration_secs": null}"#).unwrap();
        assert_eq!(cfg.countdown_ms, 5000);
        assert_eq!(cfg.duration_ms(), None);
        assert_eq!(cfg.fog_window_chars, 8);
    }

    #[test]
    fn test_zero_duration_is_untimed() {
        let cfg = EngineConfig {
            duration_secs: Some(0),
            ..EngineConfig::default()
        };
        assert_eq!(cfg.duration_ms(), None);
    }
}
