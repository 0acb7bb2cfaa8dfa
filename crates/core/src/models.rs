use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One uploaded PDF, kept only until extraction has consumed it.
#[derive(Debug, Clone)]
pub struct RawDocument {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl RawDocument {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
        }
    }

    pub fn checksum(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(&self.bytes);
        format!("{:x}", hasher.finalize())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Append-only log of question/answer pairs.
///
/// Turns only enter through [`ChatHistory::record_exchange`], so the log is
/// always `[user, assistant, user, assistant, ...]`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatHistory {
    turns: Vec<ChatTurn>,
}

impl ChatHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_exchange(&mut self, question: impl Into<String>, answer: impl Into<String>) {
        self.turns.push(ChatTurn::user(question));
        self.turns.push(ChatTurn::assistant(answer));
    }

    pub fn turns(&self) -> &[ChatTurn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn exchanges(&self) -> usize {
        self.turns.len() / 2
    }

    pub fn last(&self) -> Option<&ChatTurn> {
        self.turns.last()
    }

    /// Most recent turn first.
    pub fn newest_first(&self) -> impl Iterator<Item = &ChatTurn> {
        self.turns.iter().rev()
    }
}

/// A retrieved chunk together with its similarity to the query.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoredChunk {
    pub position: usize,
    pub text: String,
    pub score: f32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Only the instruction placeholder is indexed.
    Uninitialized,
    /// User documents are indexed.
    Ready,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentSummary {
    pub name: String,
    pub checksum: String,
    pub pages: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkippedDocument {
    pub name: String,
    pub reason: String,
}

/// What the last successful Process action indexed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingSummary {
    pub documents: Vec<DocumentSummary>,
    pub skipped: Vec<SkippedDocument>,
    pub characters: usize,
    pub chunks: usize,
    pub indexed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_alternates_starting_with_user() {
        let mut history = ChatHistory::new();
        history.record_exchange("q1", "a1");
        history.record_exchange("q2", "a2");

        assert_eq!(history.len(), 4);
        assert_eq!(history.exchanges(), 2);
        for (index, turn) in history.turns().iter().enumerate() {
            let expected = if index % 2 == 0 {
                ChatRole::User
            } else {
                ChatRole::Assistant
            };
            assert_eq!(turn.role, expected);
        }

        let newest: Vec<_> = history.newest_first().map(|turn| turn.content.as_str()).collect();
        assert_eq!(newest, vec!["a2", "q2", "a1", "q1"]);
    }

    #[test]
    fn checksum_is_reproducible() {
        let first = RawDocument::new("a.pdf", b"abc".to_vec());
        let second = RawDocument::new("b.pdf", b"abc".to_vec());
        assert_eq!(first.checksum(), second.checksum());
        assert_eq!(first.checksum().len(), 64);
    }
}
