//! REST collaborator: race texts, result submission and history.

use anyhow::{Context, Result};
use engine::matcher::KeystrokeRecord;
use engine::race::RaceMode;
use engine::text::{self, Difficulty, TargetText};
use engine::RaceSummary;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
struct TextEnvelope {
    text: TextBody,
}

#[derive(Debug, Deserialize)]
struct TextBody {
    #[serde(rename = "_id", default)]
    id: Option<String>,
    content: String,
    #[serde(default)]
    language: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultPayload<'a> {
    pub text_id: Option<&'a str>,
    pub wpm: f64,
    pub accuracy: f64,
    pub errors: u32,
    pub time_taken: u64,
    pub replay_data: &'a [KeystrokeRecord],
}

impl<'a> From<&'a RaceSummary> for ResultPayload<'a> {
    fn from(summary: &'a RaceSummary) -> Self {
        Self {
            text_id: summary.text_id.as_deref(),
            wpm: summary.wpm,
            accuracy: summary.accuracy,
            errors: summary.errors,
            time_taken: summary.duration_secs,
            replay_data: &summary.history,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    #[serde(default)]
    pub wpm: f64,
    #[serde(default)]
    pub accuracy: f64,
    #[serde(default)]
    pub errors: u32,
    #[serde(default)]
    pub time_taken: u64,
    #[serde(default)]
    pub created_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HistoryEnvelope {
    races: Vec<HistoryEntry>,
}

#[derive(Clone, Debug)]
pub struct ApiClient {
    http: reqwest::Client,
    base: String,
}

impl ApiClient {
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base: base.into().trim_end_matches('/').to_string(),
        }
    }

    async fn fetch_text(&self, path: &str) -> Result<TargetText> {
        let url = format!("{}{}", self.base, path);
        let envelope: TextEnvelope = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET {url}"))?
            .error_for_status()?
            .json()
            .await
            .context("decoding text response")?;

        let body = envelope.text;
        let target = match body.language.as_deref() {
            Some(lang) if lang != "plain" => TargetText::code(&body.content, lang)?,
            _ => TargetText::plain(&body.content)?,
        };
        Ok(match body.id {
            Some(id) => target.with_id(id),
            None => target,
        })
    }

    pub async fn random_text(&self, difficulty: Difficulty) -> Result<TargetText> {
        self.fetch_text(&format!("/texts/random?difficulty={}", difficulty.as_str()))
            .await
    }

    /// A source-code snippet with its language tag.
    pub async fn code_snippet(&self) -> Result<TargetText> {
        let text = self.fetch_text("/texts/github").await?;
        // snippets without a language tag are still code
        Ok(text.into_structured())
    }

    pub async fn submit_result(&self, summary: &RaceSummary) -> Result<()> {
        let url = format!("{}/races", self.base);
        self.http
            .post(&url)
            .json(&ResultPayload::from(summary))
            .send()
            .await
            .with_context(|| format!("POST {url}"))?
            .error_for_status()?;
        info!("result saved ({} wpm)", summary.wpm);
        Ok(())
    }

    pub async fn history(&self) -> Result<Vec<HistoryEntry>> {
        let url = format!("{}/races/history", self.base);
        let envelope: HistoryEnvelope = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET {url}"))?
            .error_for_status()?
            .json()
            .await
            .context("decoding race history")?;
        Ok(envelope.races)
    }
}

/// Text for a local race: from the API when there is one, otherwise (or
/// when the API fails) from the built-in texts.
pub async fn resolve_text<R: Rng + ?Sized>(
    api: Option<&ApiClient>,
    mode: RaceMode,
    difficulty: Difficulty,
    rng: &mut R,
) -> TargetText {
    let wants_code = mode == RaceMode::Github;
    if let Some(api) = api {
        let fetched = if wants_code {
            api.code_snippet().await
        } else {
            api.random_text(difficulty).await
        };
        match fetched {
            Ok(text) => {
                info!("text_source = api");
                return text;
            }
            Err(e) => warn!("text fetch failed, using built-in text: {:#}", e),
        }
    }
    info!("text_source = builtin");
    if wants_code {
        text::random_snippet(rng)
    } else {
        text::random_passage(rng)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine::race::CompletionReason;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_result_payload_shape() {
        let summary = RaceSummary {
            mode: RaceMode::Solo,
            reason: CompletionReason::TextExhausted,
            failed: false,
            wpm: 71.0,
            accuracy: 96.0,
            errors: 3,
            duration_secs: 42,
            history: vec![KeystrokeRecord { time: 150, index: 1 }],
            text_id: Some("t-9".to_string()),
            race_id: None,
        };
        let json = serde_json::to_value(ResultPayload::from(&summary)).unwrap();
        assert_eq!(json["textId"], "t-9");
        assert_eq!(json["timeTaken"], 42);
        assert_eq!(json["replayData"][0]["index"], 1);
    }

    #[test]
    fn test_text_envelope_parses() {
        let raw = r#"{"text": {"_id": "abc", "content": "fn x() {}", "language": "rust"}}"#;
        let env: TextEnvelope = serde_json::from_str(raw).unwrap();
        assert_eq!(env.text.id.as_deref(), Some("abc"));
        assert_eq!(env.text.language.as_deref(), Some("rust"));
    }

    #[tokio::test]
    async fn test_offline_resolution_uses_builtin_texts() {
        let mut rng = StdRng::seed_from_u64(1);
        let prose = resolve_text(None, RaceMode::Solo, Difficulty::Easy, &mut rng).await;
        assert!(!prose.is_structured());
        let code = resolve_text(None, RaceMode::Github, Difficulty::Easy, &mut rng).await;
        assert!(code.is_structured());
    }
}
