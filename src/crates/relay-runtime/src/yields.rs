//! Workflow yield values
//!
//! A plugin communicates with the runtime through a lazy sequence of
//! [`WorkflowYield`] values. Each yield is a discrete semantic event; the
//! runtime dispatches on the tag and translates yields into protocol
//! events, pauses, or dispatch replies.

use relay_core::{Artifact, Part, PauseReason};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A discrete event produced by a workflow plugin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum WorkflowYield {
    /// Free-form progress message published as a `status-update`
    StatusUpdate { text: String },

    /// A structured artifact, optionally a chunk of a streamed artifact
    Artifact {
        artifact: Artifact,
        #[serde(default)]
        append: bool,
        #[serde(default, rename = "lastChunk")]
        last_chunk: bool,
    },

    /// Pause request; the generator receives the validated input on resume
    Interrupted {
        reason: PauseReason,
        prompt: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        input_schema: Option<Value>,
    },

    /// Terminal self-rejection
    Reject { reason: String },

    /// Data returned to the dispatching LLM's tool-call result; only
    /// meaningful as the first yield
    DispatchResponse { parts: Vec<Part> },
}

/// Classification of a dispatched workflow's first yield, bounded by the
/// dispatch-response timeout
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchReply {
    /// The first yield was a `dispatch-response`; its parts go back to the
    /// tool-call result
    Parts(Vec<Part>),

    /// The first yield paused the workflow; the pause prompt goes back
    PausePrompt(String),

    /// Anything else, or the timeout elapsed; the workflow continues in
    /// the background
    Acknowledgment {
        workflow_name: String,
        description: Option<String>,
        plugin_id: String,
    },
}

impl DispatchReply {
    /// Render the reply as tool-result parts
    pub fn into_parts(self) -> Vec<Part> {
        match self {
            Self::Parts(parts) => parts,
            Self::PausePrompt(prompt) => vec![Part::text(prompt)],
            Self::Acknowledgment {
                workflow_name,
                description,
                plugin_id,
            } => vec![Part::data(serde_json::json!({
                "workflowName": workflow_name,
                "description": description,
                "pluginId": plugin_id,
            }))],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_yield_tags() {
        let y = WorkflowYield::StatusUpdate {
            text: "working".to_string(),
        };
        let json = serde_json::to_value(&y).unwrap();
        assert_eq!(json["type"], "status-update");

        let y = WorkflowYield::Interrupted {
            reason: PauseReason::AuthRequired,
            prompt: "approve".to_string(),
            input_schema: None,
        };
        let json = serde_json::to_value(&y).unwrap();
        assert_eq!(json["type"], "interrupted");
        assert_eq!(json["reason"], "auth-required");

        let y = WorkflowYield::DispatchResponse { parts: vec![] };
        assert_eq!(serde_json::to_value(&y).unwrap()["type"], "dispatch-response");
    }

    #[test]
    fn test_dispatch_reply_parts() {
        let reply = DispatchReply::PausePrompt("sign this".to_string());
        assert_eq!(reply.into_parts(), vec![Part::text("sign this")]);

        let reply = DispatchReply::Acknowledgment {
            workflow_name: "Vault Deposit".to_string(),
            description: None,
            plugin_id: "vault_deposit".to_string(),
        };
        let parts = reply.into_parts();
        assert_eq!(parts.len(), 1);
        assert_eq!(
            parts[0].as_data().unwrap()["workflowName"],
            json!("Vault Deposit")
        );
    }
}
