//! Message parts and message shapes
//!
//! Parts are the smallest protocol unit: a message or artifact carries an
//! ordered list of parts, each either free text or structured data. The
//! wire field names (`kind`, `mimeType`, `messageId`, ...) are normative
//! for external subscribers and enforced through serde renames.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Optional metadata attached to a data part
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PartMetadata {
    /// MIME type of the data payload
    #[serde(rename = "mimeType", skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// A single content part of a message or artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Part {
    /// Free-form text
    Text { text: String },
    /// Structured data payload
    Data {
        data: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        metadata: Option<PartMetadata>,
    },
}

impl Part {
    /// Create a text part
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Create a data part
    pub fn data(data: Value) -> Self {
        Self::Data {
            data,
            metadata: None,
        }
    }

    /// Create a data part with a MIME type
    pub fn data_with_mime(data: Value, mime_type: impl Into<String>) -> Self {
        Self::Data {
            data,
            metadata: Some(PartMetadata {
                mime_type: Some(mime_type.into()),
            }),
        }
    }

    /// Get the text content if this is a text part
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            Self::Data { .. } => None,
        }
    }

    /// Get the data payload if this is a data part
    pub fn as_data(&self) -> Option<&Value> {
        match self {
            Self::Data { data, .. } => Some(data),
            Self::Text { .. } => None,
        }
    }
}

/// Role of a message author
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Agent,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Agent => "agent",
            Self::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A protocol-level message exchanged with external clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique message identifier
    #[serde(rename = "messageId")]
    pub message_id: String,

    /// Conversation this message belongs to
    #[serde(rename = "contextId")]
    pub context_id: String,

    /// Author role
    pub role: Role,

    /// Ordered content parts
    pub parts: Vec<Part>,

    /// Tasks referenced by this message (e.g. dispatched children)
    #[serde(
        rename = "referenceTaskIds",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub reference_task_ids: Option<Vec<String>>,
}

impl Message {
    /// Create a message with a generated id
    pub fn new(context_id: impl Into<String>, role: Role, parts: Vec<Part>) -> Self {
        Self {
            message_id: Uuid::new_v4().to_string(),
            context_id: context_id.into(),
            role,
            parts,
            reference_task_ids: None,
        }
    }

    /// Create an agent-authored message with a single text part
    pub fn agent_text(context_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(context_id, Role::Agent, vec![Part::text(text)])
    }

    /// Attach referenced task ids
    pub fn with_reference_task_ids(mut self, task_ids: Vec<String>) -> Self {
        self.reference_task_ids = Some(task_ids);
        self
    }

    /// First text part, if any
    pub fn first_text(&self) -> Option<&str> {
        self.parts.iter().find_map(|p| p.as_text())
    }

    /// First data part, if any
    pub fn first_data(&self) -> Option<&Value> {
        self.parts.iter().find_map(|p| p.as_data())
    }
}

/// A model-facing conversation entry owned by a context
///
/// This is the internal history shape fed to the LLM, distinct from the
/// protocol [`Message`] that crosses the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMessage {
    /// Author role (user or assistant)
    pub role: Role,

    /// Text content
    pub content: String,

    /// Reasoning content, when the model produced any. Ordered before
    /// `content` when converting back into provider messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

impl ModelMessage {
    /// Create a user history entry
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            reasoning: None,
        }
    }

    /// Create an assistant history entry
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            reasoning: None,
        }
    }

    /// Attach reasoning content
    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = Some(reasoning.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_part_serialization() {
        let part = Part::text("hello");
        let json = serde_json::to_value(&part).unwrap();
        assert_eq!(json, json!({"kind": "text", "text": "hello"}));

        let part = Part::data_with_mime(json!({"a": 1}), "application/json");
        let json = serde_json::to_value(&part).unwrap();
        assert_eq!(
            json,
            json!({
                "kind": "data",
                "data": {"a": 1},
                "metadata": {"mimeType": "application/json"}
            })
        );
    }

    #[test]
    fn test_part_accessors() {
        let text = Part::text("t");
        assert_eq!(text.as_text(), Some("t"));
        assert!(text.as_data().is_none());

        let data = Part::data(json!([1, 2]));
        assert!(data.as_text().is_none());
        assert_eq!(data.as_data(), Some(&json!([1, 2])));
    }

    #[test]
    fn test_message_part_lookup() {
        let msg = Message::new(
            "c1",
            Role::User,
            vec![
                Part::data(json!({"x": true})),
                Part::text("first"),
                Part::text("second"),
            ],
        );

        assert_eq!(msg.first_text(), Some("first"));
        assert_eq!(msg.first_data(), Some(&json!({"x": true})));
    }

    #[test]
    fn test_message_wire_field_names() {
        let msg = Message::agent_text("c1", "hi").with_reference_task_ids(vec!["t2".to_string()]);
        let json = serde_json::to_value(&msg).unwrap();

        assert!(json.get("messageId").is_some());
        assert_eq!(json["contextId"], "c1");
        assert_eq!(json["role"], "agent");
        assert_eq!(json["referenceTaskIds"], json!(["t2"]));
    }

    #[test]
    fn test_model_message_roundtrip() {
        let msg = ModelMessage::assistant("answer").with_reasoning("thinking");
        let json = serde_json::to_string(&msg).unwrap();
        let back: ModelMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
    }
}
