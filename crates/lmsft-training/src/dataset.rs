use crate::error::RecordError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Canonical speaker vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::System, Role::User, Role::Assistant];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }

    /// Map a source-specific role label onto the canonical vocabulary.
    ///
    /// Returns `None` for anything that has no safe mapping (`tool`,
    /// `function`, `observation`, ...). Callers drop those records.
    #[must_use]
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "system" => Some(Self::System),
            "user" | "human" => Some(Self::User),
            "assistant" | "gpt" | "model" | "bot" => Some(Self::Assistant),
            _ => None,
        }
    }

    /// Strict parse of an already-canonical role name.
    #[must_use]
    pub fn parse_canonical(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|r| r.as_str() == name)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One role-tagged turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    role: Role,
    content: String,
}

impl Message {
    #[must_use]
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self { role, content: content.into() }
    }

    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    #[must_use]
    pub fn content(&self) -> &str {
        &self.content
    }
}

/// A validated multi-turn example with provenance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    messages: Vec<Message>,
    source_dataset: String,
    original_id: String,
    tools: Option<String>,
}

impl Conversation {
    /// Build a conversation, rejecting empty ones and back-to-back assistant turns.
    pub fn new(
        messages: Vec<Message>,
        source_dataset: impl Into<String>,
        original_id: impl Into<String>,
    ) -> Result<Self, RecordError> {
        validate_messages(&messages)?;
        Ok(Self {
            messages,
            source_dataset: source_dataset.into(),
            original_id: original_id.into(),
            tools: None,
        })
    }

    /// Attach a JSON-encoded tool/function list.
    #[must_use]
    pub fn with_tools(mut self, tools: impl Into<String>) -> Self {
        self.tools = Some(tools.into());
        self
    }

    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    #[must_use]
    pub fn source_dataset(&self) -> &str {
        &self.source_dataset
    }

    #[must_use]
    pub fn original_id(&self) -> &str {
        &self.original_id
    }

    #[must_use]
    pub fn tools(&self) -> Option<&str> {
        self.tools.as_deref()
    }

    /// Canonical ordering key.
    #[must_use]
    pub fn key(&self) -> (&str, &str) {
        (&self.source_dataset, &self.original_id)
    }
}

/// Output of exactly one normalizer, in input order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessedDataset {
    pub source_dataset: String,
    pub conversations: Vec<Conversation>,
}

impl ProcessedDataset {
    #[must_use]
    pub fn new(source_dataset: impl Into<String>) -> Self {
        Self { source_dataset: source_dataset.into(), conversations: Vec::new() }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }
}

pub fn validate_messages(messages: &[Message]) -> Result<(), RecordError> {
    if messages.is_empty() {
        return Err(RecordError::Empty);
    }
    for (idx, pair) in messages.windows(2).enumerate() {
        if pair[0].role == Role::Assistant && pair[1].role == Role::Assistant {
            return Err(RecordError::ConsecutiveAssistant(idx + 1));
        }
    }
    Ok(())
}

/// Stable id for sources that carry none: SHA-256 over the turns.
///
/// Every field is length-prefixed, so no content can imitate a turn boundary.
#[must_use]
pub fn content_id(messages: &[Message]) -> String {
    let mut hasher = Sha256::new();

    hasher.update((messages.len() as u64).to_le_bytes());
    for msg in messages {
        for field in [msg.role.as_str(), msg.content.as_str()] {
            hasher.update((field.len() as u64).to_le_bytes());
            hasher.update(field.as_bytes());
        }
    }

    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msgs(roles: &[Role]) -> Vec<Message> {
        roles.iter().enumerate().map(|(i, r)| Message::new(*r, format!("turn {i}"))).collect()
    }

    #[test]
    fn test_role_labels_map_to_canonical() {
        assert_eq!(Role::from_label("human"), Some(Role::User));
        assert_eq!(Role::from_label("GPT"), Some(Role::Assistant));
        assert_eq!(Role::from_label(" system "), Some(Role::System));
        assert_eq!(Role::from_label("tool"), None);
        assert_eq!(Role::from_label("function"), None);
    }

    #[test]
    fn test_conversation_rejects_empty() {
        assert_eq!(Conversation::new(vec![], "ds", "1").unwrap_err(), RecordError::Empty);
    }

    #[test]
    fn test_conversation_rejects_consecutive_assistant() {
        let err = Conversation::new(msgs(&[Role::User, Role::Assistant, Role::Assistant]), "ds", "1").unwrap_err();
        assert_eq!(err, RecordError::ConsecutiveAssistant(2));
    }

    #[test]
    fn test_conversation_accepts_alternating_turns() {
        let conv = Conversation::new(
            msgs(&[Role::System, Role::User, Role::Assistant, Role::User, Role::Assistant]),
            "ds",
            "1",
        )
        .unwrap();
        assert_eq!(conv.messages().len(), 5);
        assert_eq!(conv.key(), ("ds", "1"));
        assert!(conv.tools().is_none());
    }

    #[test]
    fn test_content_id_stable_for_same_content() {
        let a = msgs(&[Role::User, Role::Assistant]);
        assert_eq!(content_id(&a), content_id(&a.clone()));
        let b = msgs(&[Role::System, Role::Assistant]);
        assert_ne!(content_id(&a), content_id(&b));
    }

    #[test]
    fn test_content_id_separates_turn_boundaries() {
        let one_turn = vec![Message::new(Role::User, "hi\nassistant\u{0}there")];
        let two_turns = vec![Message::new(Role::User, "hi"), Message::new(Role::Assistant, "there")];
        assert_ne!(content_id(&one_turn), content_id(&two_turns));

        let split_early = vec![Message::new(Role::User, "ab"), Message::new(Role::Assistant, "c")];
        let split_late = vec![Message::new(Role::User, "a"), Message::new(Role::Assistant, "bc")];
        assert_ne!(content_id(&split_early), content_id(&split_late));
    }
}
