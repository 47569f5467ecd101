use engine::EngineConfig;

pub const DEFAULT_API_URL: &str = "http://127.0.0.1:3000/api";
pub const DEFAULT_WS_URL: &str = "ws://127.0.0.1:3000/ws";

/// Client settings resolved from `.env`, the environment and the command line.
#[derive(Clone, Debug, PartialEq)]
pub struct ClientConfig {
    pub api_url: String,
    pub ws_url: String,
    pub user_id: String,
    pub offline: bool,
    pub engine: EngineConfig,
}

impl ClientConfig {
    /// Load `.env` (if any) and read the process environment.
    pub fn from_env() -> Self {
        if let Err(e) = dotenvy::dotenv() {
            tracing::debug!("no .env loaded: {}", e);
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut engine = EngineConfig::default();
        if let Some(secs) = lookup("RACE_COUNTDOWN_SECS").and_then(|v| v.trim().parse::<u64>().ok()) {
            engine.countdown_ms = secs * 1000;
        }
        if let Some(secs) = lookup("RACE_DURATION_SECS").and_then(|v| v.trim().parse::<u64>().ok()) {
            engine.duration_secs = Some(secs);
        }

        Self {
            api_url: lookup("RACE_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            ws_url: lookup("RACE_WS_URL").unwrap_or_else(|| DEFAULT_WS_URL.to_string()),
            user_id: lookup("RACE_USER_ID").unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            offline: lookup("RACE_OFFLINE").is_some_and(|v| v == "1" || v.eq_ignore_ascii_case("true")),
            engine,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_without_env() {
        let cfg = ClientConfig::from_lookup(lookup(&[]));
        assert_eq!(cfg.api_url, DEFAULT_API_URL);
        assert_eq!(cfg.ws_url, DEFAULT_WS_URL);
        assert!(!cfg.offline);
        assert_eq!(cfg.engine, EngineConfig::default());
        assert!(!cfg.user_id.is_empty());
    }

    #[test]
    fn test_env_overrides() {
        let cfg = ClientConfig::from_lookup(lookup(&[
            ("RACE_API_URL", "https://race.example/api"),
            ("RACE_USER_ID", "u-42"),
            ("RACE_COUNTDOWN_SECS", "5"),
            ("RACE_DURATION_SECS", "30"),
            ("RACE_OFFLINE", "true"),
        ]));
        assert_eq!(cfg.api_url, "https://race.example/api");
        assert_eq!(cfg.user_id, "u-42");
        assert_eq!(cfg.engine.countdown_ms, 5000);
        assert_eq!(cfg.engine.duration_secs, Some(30));
        assert!(cfg.offline);
    }

    #[test]
    fn test_garbage_numbers_are_ignored() {
        let cfg = ClientConfig::from_lookup(lookup(&[("RACE_COUNTDOWN_SECS", "soon")]));
        assert_eq!(cfg.engine.countdown_ms, 3000);
    }
}
