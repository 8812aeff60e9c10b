use serde::{Deserialize, Serialize};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Bad caller input, rejected before any network activity.
    #[error("invalid input: {0}")]
    Validation(String),
    /// Network-level failure (DNS, connect, timeout, non-2xx status).
    #[error("transport error: {0}")]
    Transport(String),
    /// Upstream responded, but not in the shape we require.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// Upstream explicitly signalled throttling (e.g. HTTP 429).
    #[error("rate limited: {0}")]
    RateLimit(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Placeholder returned when a backend completes without producing any text.
pub const NO_RESULTS_PLACEHOLDER: &str = "No results found.";

/// One row of a scraped web-search results page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub snippet: String,
    pub display_url: String,
    pub favicon: String,
    /// Populated only in detailed mode, from a per-result page fetch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Web-search output shape: `Short` omits descriptions, `Detailed` fills
/// them via one extra fetch per result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WebSearchMode {
    Short,
    Detailed,
}

impl Default for WebSearchMode {
    fn default() -> Self {
        Self::Short
    }
}

impl std::str::FromStr for WebSearchMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "short" => Ok(Self::Short),
            "detailed" => Ok(Self::Detailed),
            other => Err(Error::Validation(format!(
                "invalid mode: {other}. Valid modes are: short, detailed"
            ))),
        }
    }
}

/// iAsk search modes, passed through as the `mode` query parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AskMode {
    Question,
    Academic,
    Forums,
    Wiki,
    Thinking,
}

impl AskMode {
    pub const ALL: [AskMode; 5] = [
        AskMode::Question,
        AskMode::Academic,
        AskMode::Forums,
        AskMode::Wiki,
        AskMode::Thinking,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Question => "question",
            Self::Academic => "academic",
            Self::Forums => "forums",
            Self::Wiki => "wiki",
            Self::Thinking => "thinking",
        }
    }
}

impl Default for AskMode {
    fn default() -> Self {
        Self::Question
    }
}

impl std::str::FromStr for AskMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let lc = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|m| m.as_str() == lc)
            .ok_or_else(|| {
                let valid: Vec<&str> = Self::ALL.iter().map(|m| m.as_str()).collect();
                Error::Validation(format!(
                    "invalid mode: {s}. Valid modes are: {}",
                    valid.join(", ")
                ))
            })
    }
}

/// iAsk answer verbosity, passed through as `options[detail_level]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetailLevel {
    Concise,
    Detailed,
    Comprehensive,
}

impl DetailLevel {
    pub const ALL: [DetailLevel; 3] = [
        DetailLevel::Concise,
        DetailLevel::Detailed,
        DetailLevel::Comprehensive,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Concise => "concise",
            Self::Detailed => "detailed",
            Self::Comprehensive => "comprehensive",
        }
    }
}

impl std::str::FromStr for DetailLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let lc = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|d| d.as_str() == lc)
            .ok_or_else(|| {
                let valid: Vec<&str> = Self::ALL.iter().map(|d| d.as_str()).collect();
                Error::Validation(format!(
                    "invalid detail level: {s}. Valid levels are: {}",
                    valid.join(", ")
                ))
            })
    }
}

/// A backend that turns one prompt into one block of answer text.
///
/// Concrete clients expose richer entry points (modes, streaming, research
/// flags); this trait is the least-common-denominator seam the tool layer
/// can hold a set of backends behind.
#[async_trait::async_trait]
pub trait AnswerProvider: Send + Sync {
    fn name(&self) -> &'static str;
    async fn answer(&self, prompt: &str) -> Result<String>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn ask_mode_parses_all_valid_values() {
        for m in AskMode::ALL {
            assert_eq!(AskMode::from_str(m.as_str()).unwrap(), m);
        }
        assert_eq!(AskMode::from_str("  Thinking ").unwrap(), AskMode::Thinking);
    }

    #[test]
    fn ask_mode_rejects_unknown_values_with_the_valid_list() {
        let err = AskMode::from_str("bogus").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("bogus"), "got: {msg}");
        assert!(msg.contains("question"), "got: {msg}");
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn detail_level_rejects_unknown_values() {
        assert!(DetailLevel::from_str("medium").is_err());
        assert_eq!(
            DetailLevel::from_str("comprehensive").unwrap(),
            DetailLevel::Comprehensive
        );
    }

    #[test]
    fn search_hit_serializes_without_null_description() {
        let hit = SearchHit {
            title: "Example".to_string(),
            url: "https://example.com".to_string(),
            snippet: "hello".to_string(),
            display_url: "example.com".to_string(),
            favicon: String::new(),
            description: None,
        };
        let v = serde_json::to_value(&hit).unwrap();
        assert!(v.get("description").is_none());
        assert_eq!(v["url"], "https://example.com");
    }
}
