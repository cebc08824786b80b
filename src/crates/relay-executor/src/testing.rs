//! Test infrastructure: scripted models and sample workflow plugins
//!
//! Public so integration tests (and embedders' tests) can drive the full
//! executor stack without a live provider. The scripted model replays a
//! fixed chunk script per turn and really executes tools from the request
//! snapshot, mirroring a provider-side tool loop.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use relay_core::{AgentEvent, Artifact, BusMessage, Part};
use relay_runtime::{WorkflowContext, WorkflowError, WorkflowIo, WorkflowPlugin};
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::llm::{ChatRequest, ChunkStream, LanguageModel, ModelError, StreamChunk};

/// One step of a scripted model turn
#[derive(Debug, Clone)]
pub enum ScriptStep {
    /// Emit a chunk verbatim
    Chunk(StreamChunk),

    /// Emit a `tool-call`, execute the named tool from the request
    /// snapshot, then emit its `tool-result`
    CallTool { id: String, name: String, args: Value },

    /// Sleep before the next step
    Delay(Duration),

    /// Fail the stream
    Error(String),
}

/// Split text into per-word deltas followed by the end marker
pub fn text_steps(text: &str) -> Vec<ScriptStep> {
    let mut steps: Vec<ScriptStep> = text
        .split_inclusive(' ')
        .map(|word| {
            ScriptStep::Chunk(StreamChunk::TextDelta {
                delta: word.to_string(),
            })
        })
        .collect();
    steps.push(ScriptStep::Chunk(StreamChunk::TextEnd));
    steps
}

/// Language model replaying scripted turns
pub struct ScriptedModel {
    turns: Mutex<VecDeque<Vec<ScriptStep>>>,
}

impl ScriptedModel {
    pub fn new(turns: Vec<Vec<ScriptStep>>) -> Self {
        Self {
            turns: Mutex::new(turns.into()),
        }
    }

    /// Model with a single scripted turn
    pub fn single(steps: Vec<ScriptStep>) -> Self {
        Self::new(vec![steps])
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn stream(&self, request: ChatRequest) -> Result<ChunkStream, ModelError> {
        let steps = self
            .turns
            .lock()
            .expect("script lock")
            .pop_front()
            .unwrap_or_default();
        let tools = request.tools.clone();
        let invocation = request.invocation.clone();

        Ok(Box::pin(async_stream::stream! {
            for step in steps {
                match step {
                    ScriptStep::Chunk(chunk) => yield Ok(chunk),
                    ScriptStep::Delay(duration) => tokio::time::sleep(duration).await,
                    ScriptStep::Error(message) => {
                        yield Err(ModelError::new(message));
                        return;
                    }
                    ScriptStep::CallTool { id, name, args } => {
                        yield Ok(StreamChunk::ToolCall {
                            id: id.clone(),
                            name: name.clone(),
                            input: args.clone(),
                        });
                        let result = match tools.get(&name) {
                            Some(tool) => match tool.execute(args, invocation.clone()).await {
                                Ok(value) => value,
                                Err(err) => json!({"error": err.to_string()}),
                            },
                            None => json!({"error": format!("unknown tool {name}")}),
                        };
                        yield Ok(StreamChunk::ToolResult { id, name, result });
                    }
                }
            }
        }))
    }
}

/// Drain a bus subscription until the terminal sentinel
pub async fn drain_bus(mut rx: mpsc::Receiver<BusMessage>) -> Vec<AgentEvent> {
    let mut events = Vec::new();
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("bus stalled")
            .expect("bus closed without sentinel");
        match msg {
            BusMessage::Event(event) => events.push(event),
            BusMessage::Finished => return events,
        }
    }
}

/// Transaction-signing plugin: streams status artifacts, pauses for a
/// signature, then finishes the receipt
pub struct BlockchainTransactionPlugin;

#[async_trait]
impl WorkflowPlugin for BlockchainTransactionPlugin {
    fn id(&self) -> &str {
        "blockchain_transaction"
    }

    fn name(&self) -> &str {
        "Blockchain Transaction"
    }

    fn version(&self) -> &str {
        "1.0.0"
    }

    fn description(&self) -> Option<&str> {
        Some("Prepares, signs, and submits a blockchain transaction")
    }

    async fn run(&self, ctx: WorkflowContext, mut io: WorkflowIo) -> Result<Value, WorkflowError> {
        io.artifact(
            Artifact::new("tx-summary")
                .with_name("tx-summary.json")
                .with_parts(vec![Part::data(json!({
                    "action": "transfer",
                    "params": ctx.parameters,
                }))]),
        )
        .await?;

        io.artifact(
            Artifact::new("unsigned-tx")
                .with_name("unsigned-tx")
                .with_parts(vec![Part::data(json!({"to": "0xabc", "value": "0x1"}))]),
        )
        .await?;

        io.artifact_chunk(
            Artifact::new("tx-status")
                .with_name("tx-status.jsonl")
                .with_parts(vec![Part::text("{\"status\":\"awaiting-signature\"}\n")]),
            false,
            false,
        )
        .await?;

        let input = io
            .require_input(
                "Please sign the transaction",
                Some(json!({
                    "type": "object",
                    "properties": {
                        "signature": {"type": "string", "pattern": "^0x[0-9a-f]+$"},
                        "confirm": {"type": "boolean"}
                    },
                    "required": ["signature", "confirm"]
                })),
            )
            .await?;

        io.artifact_chunk(
            Artifact::new("tx-status")
                .with_name("tx-status.jsonl")
                .with_parts(vec![Part::text("{\"status\":\"submitted\"}\n")]),
            true,
            true,
        )
        .await?;

        io.artifact(
            Artifact::new("tx-receipt")
                .with_name("tx-receipt.json")
                .with_parts(vec![Part::data(json!({
                    "signature": input["signature"],
                    "status": "confirmed",
                }))]),
        )
        .await?;

        Ok(json!({"txHash": "0xfeed", "confirmed": true}))
    }
}

/// Deposit plugin whose first yield is a dispatch response
pub struct VaultDepositPlugin;

#[async_trait]
impl WorkflowPlugin for VaultDepositPlugin {
    fn id(&self) -> &str {
        "vault_deposit"
    }

    fn name(&self) -> &str {
        "Vault Deposit"
    }

    fn version(&self) -> &str {
        "1.0.0"
    }

    fn description(&self) -> Option<&str> {
        Some("Deposits funds into a vault")
    }

    fn input_schema(&self) -> Option<Value> {
        Some(json!({
            "type": "object",
            "properties": {
                "vaultId": {"type": "string"},
                "amount": {"type": "string"}
            },
            "required": ["vaultId", "amount"]
        }))
    }

    async fn run(&self, ctx: WorkflowContext, io: WorkflowIo) -> Result<Value, WorkflowError> {
        let vault = ctx.parameters["vaultId"].as_str().unwrap_or("?");
        let amount = ctx.parameters["amount"].as_str().unwrap_or("?");
        io.dispatch_response(vec![Part::text(format!(
            "Deposit of {amount} to vault {vault} queued"
        ))])
        .await?;

        io.status("submitting deposit").await?;
        io.artifact(
            Artifact::new("deposit-receipt")
                .with_name("deposit-receipt.json")
                .with_parts(vec![Part::data(json!({
                    "vaultId": vault,
                    "amount": amount,
                }))]),
        )
        .await?;
        Ok(json!({"deposited": amount}))
    }
}
