use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::RaceError;

/// Built-in prose used for offline races and when the text API is unreachable.
pub const PASSAGES: &[&str] = &[
    "Sphinx of black quartz, judge my vow. Five quacking zephyrs jolt my wax bed.",
    "A journey of a thousand miles begins with a single step, and most of them are typed badly.",
    "The harbor lights flickered as the last ferry pulled away, leaving only the sound of gulls and rope.",
    "Good habits formed at youth make all the difference when the deadline arrives before the coffee.",
    "She kept a notebook of unfinished ideas, and every winter she would read it from the back to the front.",
    "Clocks do not measure time so much as they measure our patience with waiting for it to pass.",
    "Every mountain trail looks shorter on the map than it feels halfway up with an empty water bottle.",
    "The library smelled of dust and cedar, and the quiet there was the kind you could lean against.",
];

/// Built-in code snippets: `(language, source)`.
pub const CODE_SNIPPETS: &[(&str, &str)] = &[
    (
        "rust",
        "fn main() {\n    let total: u32 = (1..=10).sum();\n    println!(\"{}\", total);\n}",
    ),
    (
        "python",
        "def fib(n):\n    a, b = 0, 1\n    for _ in range(n):\n        a, b = b, a + b\n    return a",
    ),
    (
        "javascript",
        "function debounce(fn, ms) {\n  let t;\n  return (...args) => {\n    clearTimeout(t);\n    t = setTimeout(() => fn(...args), ms);\n  };\n}",
    ),
    (
        "go",
        "func sum(xs []int) int {\n\ttotal := 0\n\tfor _, x := range xs {\n\t\ttotal += x\n\t}\n\treturn total\n}",
    ),
];

/// Difficulty requested from the text API.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    #[default]
    Medium,
    Hard,
}

impl Difficulty {
    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
        }
    }
}

impl std::str::FromStr for Difficulty {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "easy" => Ok(Difficulty::Easy),
            "medium" => Ok(Difficulty::Medium),
            "hard" => Ok(Difficulty::Hard),
            other => Err(format!("unknown difficulty '{other}'")),
        }
    }
}

/// The immutable reference text a race is run against.
///
/// Indexing is by `char`, so cursor positions line up with what the
/// player sees even for non-ASCII text.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TargetText {
    chars: Vec<char>,
    structured: bool,
    language: Option<String>,
    text_id: Option<String>,
}

impl TargetText {
    /// Plain prose. Fails on empty input.
    pub fn plain(content: &str) -> Result<Self, RaceError> {
        Self::build(content, false, None)
    }

    /// Source code; newlines trigger the auto-indent skip.
    pub fn code(content: &str, language: impl Into<String>) -> Result<Self, RaceError> {
        Self::build(content, true, Some(language.into()))
    }

    /// Player-supplied text, trimmed and held to a minimum length.
    pub fn custom(content: &str, min_chars: usize) -> Result<Self, RaceError> {
        let trimmed = content.trim();
        let len = trimmed.chars().count();
        if len < min_chars {
            return Err(RaceError::TextTooShort { len, min: min_chars });
        }
        Self::plain(trimmed)
    }

    fn build(content: &str, structured: bool, language: Option<String>) -> Result<Self, RaceError> {
        if content.is_empty() {
            return Err(RaceError::EmptyText);
        }
        Ok(Self {
            chars: content.chars().collect(),
            structured,
            language,
            text_id: None,
        })
    }

    /// Tag the text with the id the text API assigned it.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.text_id = Some(id.into());
        self
    }

    /// Mark the text as structured even if it came in as prose
    /// (the code-mix modifier does this).
    pub fn into_structured(mut self) -> Self {
        self.structured = true;
        self
    }

    pub fn len(&self) -> usize {
        self.chars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chars.is_empty()
    }

    pub fn char_at(&self, idx: usize) -> Option<char> {
        self.chars.get(idx).copied()
    }

    pub fn chars(&self) -> &[char] {
        &self.chars
    }

    pub fn is_structured(&self) -> bool {
        self.structured
    }

    pub fn language(&self) -> Option<&str> {
        self.language.as_deref()
    }

    pub fn text_id(&self) -> Option<&str> {
        self.text_id.as_deref()
    }

    /// Length of the run of spaces/tabs starting at `idx`.
    pub fn indent_run(&self, idx: usize) -> usize {
        self.chars
            .iter()
            .skip(idx)
            .take_while(|c| **c == ' ' || **c == '\t')
            .count()
    }

    /// The text as a `String`.
    pub fn as_string(&self) -> String {
        self.chars.iter().collect()
    }
}

/// A random built-in passage.
pub fn random_passage<R: Rng + ?Sized>(rng: &mut R) -> TargetText {
    let content = PASSAGES.choose(rng).copied().unwrap_or(PASSAGES[0]);
    TargetText {
        chars: content.chars().collect(),
        structured: false,
        language: None,
        text_id: None,
    }
}

/// A random built-in code snippet.
pub fn random_snippet<R: Rng + ?Sized>(rng: &mut R) -> TargetText {
    let (lang, content) = CODE_SNIPPETS.choose(rng).copied().unwrap_or(CODE_SNIPPETS[0]);
    TargetText {
        chars: content.chars().collect(),
        structured: true,
        language: Some(lang.to_string()),
        text_id: None,
    }
}
