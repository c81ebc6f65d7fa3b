//! Per-session state, passed explicitly into every component call: the
//! loaded frame, the conversation transcript, and the last-referenced-column
//! cell used to disambiguate follow-up questions. Nothing here is ambient;
//! a multi-session host simply owns one context per session.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::frame::Frame;
use crate::llm::{ChatMessage, Role};

#[derive(Debug, Clone, Serialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    pub ts_utc: DateTime<Utc>,
}

/// Ordered, append-only conversation transcript.
#[derive(Debug, Clone, Default)]
pub struct ChatMemory {
    turns: Vec<Turn>,
}

impl ChatMemory {
    pub fn add_user(&mut self, text: impl Into<String>) {
        self.turns.push(Turn {
            role: Role::User,
            content: text.into(),
            ts_utc: Utc::now(),
        });
    }

    pub fn add_assistant(&mut self, text: impl Into<String>) {
        self.turns.push(Turn {
            role: Role::Assistant,
            content: text.into(),
            ts_utc: Utc::now(),
        });
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn last(&self, n: usize) -> &[Turn] {
        let start = self.turns.len().saturating_sub(n);
        &self.turns[start..]
    }

    /// The last `n` turns as model messages, for conversational context.
    pub fn context_messages(&self, n: usize) -> Vec<ChatMessage> {
        self.last(n)
            .iter()
            .map(|t| ChatMessage {
                role: t.role,
                content: t.content.clone(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

/// All mutable state owned by one analysis session.
#[derive(Debug)]
pub struct SessionContext {
    pub id: Uuid,
    pub frame: Option<Frame>,
    pub memory: ChatMemory,
    /// Overwritten whenever a question unambiguously names exactly one
    /// column; read when a follow-up names none.
    pub last_column: Option<String>,
}

impl Default for SessionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionContext {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            frame: None,
            memory: ChatMemory::default(),
            last_column: None,
        }
    }

    /// Replace the dataset wholesale. The column memory belongs to the old
    /// schema, so it is cleared.
    pub fn load_frame(&mut self, frame: Frame) {
        self.frame = Some(frame);
        self.last_column = None;
    }

    pub fn dataset_loaded(&self) -> bool {
        self.frame.is_some()
    }
}

/// Columns whose names appear verbatim (case-insensitively) in the question,
/// in frame order.
pub fn find_candidate_columns(question: &str, columns: &[String]) -> Vec<String> {
    let text = question.to_lowercase();
    columns
        .iter()
        .filter(|c| text.contains(&c.to_lowercase()))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_is_append_only_and_windows_from_the_end() {
        let mut memory = ChatMemory::default();
        for i in 0..5 {
            memory.add_user(format!("q{i}"));
            memory.add_assistant(format!("a{i}"));
        }
        assert_eq!(memory.len(), 10);
        let last = memory.last(3);
        assert_eq!(last.len(), 3);
        assert_eq!(last[2].content, "a4");
        assert_eq!(memory.last(100).len(), 10);
    }

    #[test]
    fn loading_a_frame_clears_the_column_memory() {
        let mut session = SessionContext::new();
        session.last_column = Some("income".to_string());
        let frame = Frame::from_csv_str("a,b\n1,2\n").unwrap();
        session.load_frame(frame);
        assert!(session.dataset_loaded());
        assert!(session.last_column.is_none());
    }

    #[test]
    fn candidate_columns_match_case_insensitively() {
        let columns = vec!["Age".to_string(), "income".to_string(), "city".to_string()];
        let found = find_candidate_columns("Plot the AGE against income", &columns);
        assert_eq!(found, vec!["Age".to_string(), "income".to_string()]);
    }

    #[test]
    fn no_mention_yields_no_candidates() {
        let columns = vec!["age".to_string()];
        assert!(find_candidate_columns("what about the average?", &columns).is_empty());
    }
}
