//! ShareGPT-style records: `{"id": ..., "conversations": [{"from": .., "value": ..}]}`.

use super::{conversation_with_id, json_id, map_turns};
use crate::dataset::Conversation;
use crate::error::RecordError;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct ShareGptTurn {
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ShareGptRecord {
    #[serde(default)]
    pub id: Option<serde_json::Value>,
    #[serde(default)]
    pub system: Option<String>,
    #[serde(default)]
    pub conversations: Option<Vec<ShareGptTurn>>,
}

impl ShareGptRecord {
    pub fn parse(value: serde_json::Value) -> Result<Self, RecordError> {
        serde_json::from_value(value).map_err(|e| RecordError::Malformed(e.to_string()))
    }

    /// Convert the turn list. A turn without `from` counts as an unmappable role.
    pub fn into_conversation(self, source_dataset: &str) -> Result<Conversation, RecordError> {
        let turns = self.conversations.ok_or(RecordError::MissingField("conversations"))?;
        let messages = map_turns(
            turns.into_iter().map(|t| (t.from.unwrap_or_default(), t.value.unwrap_or_default())),
        )?;
        conversation_with_id(source_dataset, json_id(self.id.as_ref()), messages)
    }
}
