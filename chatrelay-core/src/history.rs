//! Conversation history and its stored format.
//!
//! Stored as versioned JSON so that an incompatible row is rejected
//! instead of silently misread:
//!
//! ```json
//! {"version":1,"turns":[{"speaker":"user","text":"hi"},{"speaker":"assistant","text":"hello"}]}
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Current on-disk format version.
pub const HISTORY_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub speaker: Speaker,
    pub text: String,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            speaker: Speaker::User,
            text: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            speaker: Speaker::Assistant,
            text: text.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum HistoryError {
    #[error("Malformed conversation history: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Unsupported conversation history version {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },
}

/// Ordered turns for one user, oldest first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversationHistory {
    turns: Vec<Turn>,
}

#[derive(Serialize)]
struct StoredHistoryRef<'a> {
    version: u32,
    turns: &'a [Turn],
}

#[derive(Deserialize)]
struct StoredHistory {
    version: u32,
    #[serde(default)]
    turns: Vec<Turn>,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_turns(turns: Vec<Turn>) -> Self {
        Self { turns }
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Append one completed exchange.
    pub fn push_exchange(&mut self, input: impl Into<String>, reply: impl Into<String>) {
        self.turns.push(Turn::user(input));
        self.turns.push(Turn::assistant(reply));
    }

    pub fn encode(&self) -> Result<String, HistoryError> {
        let stored = StoredHistoryRef {
            version: HISTORY_FORMAT_VERSION,
            turns: &self.turns,
        };
        Ok(serde_json::to_string(&stored)?)
    }

    pub fn decode(raw: &str) -> Result<Self, HistoryError> {
        let stored: StoredHistory = serde_json::from_str(raw)?;
        if stored.version != HISTORY_FORMAT_VERSION {
            return Err(HistoryError::UnsupportedVersion {
                found: stored.version,
                expected: HISTORY_FORMAT_VERSION,
            });
        }
        Ok(Self {
            turns: stored.turns,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_writes_version_and_ordered_turns() {
        let mut history = ConversationHistory::new();
        history.push_exchange("hi", "hello");

        let raw = history.encode().unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();

        assert_eq!(value["version"], 1);
        assert_eq!(value["turns"][0]["speaker"], "user");
        assert_eq!(value["turns"][0]["text"], "hi");
        assert_eq!(value["turns"][1]["speaker"], "assistant");
        assert_eq!(value["turns"][1]["text"], "hello");
    }

    #[test]
    fn test_decode_preserves_order() {
        let raw = r#"{"version":1,"turns":[
            {"speaker":"user","text":"a"},
            {"speaker":"assistant","text":"b"},
            {"speaker":"user","text":"c"},
            {"speaker":"assistant","text":"d"}]}"#;
        let history = ConversationHistory::decode(raw).unwrap();
        let texts: Vec<&str> = history.turns().iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn test_decode_rejects_unknown_version() {
        let raw = r#"{"version":2,"turns":[]}"#;
        match ConversationHistory::decode(raw) {
            Err(HistoryError::UnsupportedVersion { found, expected }) => {
                assert_eq!(found, 2);
                assert_eq!(expected, HISTORY_FORMAT_VERSION);
            }
            other => panic!("Expected UnsupportedVersion, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(
            ConversationHistory::decode("\u{80}\u{4}pickle"),
            Err(HistoryError::Malformed(_))
        ));
        assert!(matches!(
            ConversationHistory::decode(r#"{"turns":[]}"#),
            Err(HistoryError::Malformed(_))
        ));
    }

    #[test]
    fn test_decode_rejects_unknown_speaker() {
        let raw = r#"{"version":1,"turns":[{"speaker":"system","text":"x"}]}"#;
        assert!(matches!(
            ConversationHistory::decode(raw),
            Err(HistoryError::Malformed(_))
        ));
    }

    #[test]
    fn test_push_exchange_appends_user_then_assistant() {
        let mut history = ConversationHistory::from_turns(vec![Turn::user("hi"), Turn::assistant("hello")]);
        history.push_exchange("how are you", "fine");

        assert_eq!(
            history.turns(),
            &[
                Turn::user("hi"),
                Turn::assistant("hello"),
                Turn::user("how are you"),
                Turn::assistant("fine"),
            ]
        );
    }
}
