//! Anthropic-shaped wire types for the `/v1/messages` surface.
//!
//! These mirror the public Anthropic Messages API at the field level. Every
//! struct captures fields it does not interpret via `unknown_fields` so that
//! round-tripping an unrecognized request does not silently drop data.

use std::{collections::HashMap, fmt};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Arbitrary additional fields captured but not interpreted by this proxy.
pub type UnknownFields = HashMap<String, Value>;

/// Role of a message sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// User-authored turn.
    User,
    /// Assistant-authored turn.
    Assistant,
    /// System prompt turn (only produced internally; never sent by clients
    /// inside `messages`).
    System,
}

/// Content of a tool result, which may itself be a content-block list or a
/// bare JSON mapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolResultContent {
    /// Plain string result.
    Text(String),
    /// Structured content blocks.
    Blocks(Vec<ContentBlock>),
    /// Any other JSON shape (e.g. a bare mapping).
    Value(Value),
}

/// One block of message content.
///
/// Anthropic messages are arrays of tagged content blocks rather than a flat
/// string, so that text, images, and tool calls can interleave within a
/// single turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentBlock {
    /// Plain text.
    #[serde(rename = "text")]
    Text {
        /// The text content.
        text: String,
    },

    /// An image, whose payload is treated opaquely by the translators.
    #[serde(rename = "image")]
    Image {
        /// Image source object (base64 data, media type, etc).
        source: Value,
    },

    /// An assistant-initiated tool invocation.
    #[serde(rename = "tool_use")]
    ToolUse {
        /// Unique id for this invocation, referenced by the matching result.
        id: String,
        /// Tool name.
        name: String,
        /// Structured input arguments.
        input: Value,
    },

    /// The caller-supplied result of a tool invocation.
    #[serde(rename = "tool_result")]
    ToolResult {
        /// Id of the `tool_use` block this result answers.
        tool_use_id: String,
        /// Result payload.
        #[serde(default)]
        content: Option<ToolResultContent>,
    },

    /// Any block type this proxy does not interpret.
    #[serde(other)]
    Unknown,
}

/// Content of a message: either a bare string or a list of blocks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    /// Shorthand for a single text block.
    Text(String),
    /// Full content-block list.
    Blocks(Vec<ContentBlock>),
}

impl MessageContent {
    /// Normalizes to a block list, wrapping a bare string as a single text
    /// block.
    pub fn into_blocks(self) -> Vec<ContentBlock> {
        match self {
            Self::Text(text) => vec![ContentBlock::Text { text }],
            Self::Blocks(blocks) => blocks,
        }
    }

    /// Borrowing variant of [`Self::into_blocks`].
    pub fn as_blocks(&self) -> Vec<&ContentBlock> {
        match self {
            Self::Text(_) => Vec::new(),
            Self::Blocks(blocks) => blocks.iter().collect(),
        }
    }
}

/// One turn in the conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Author of the turn.
    pub role: Role,
    /// Turn content.
    pub content: MessageContent,
}

/// The `system` field: either a bare string or a list of text blocks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SystemPrompt {
    /// Single string form.
    Text(String),
    /// List-of-text-blocks form.
    Blocks(Vec<ContentBlock>),
}

/// A tool definition offered to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    /// Tool name, referenced by `tool_use.name`.
    pub name: String,
    /// Human-readable description shown to the model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON Schema describing the tool's input.
    pub input_schema: Value,
}

/// Controls how the model is steered towards tool use.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolChoice {
    /// Let the model decide.
    Auto,
    /// Force use of some tool.
    Any,
    /// Force use of a specific named tool.
    Tool {
        /// Name of the required tool.
        name: String,
    },
}

/// Extended-thinking configuration, accepted and passed through unexamined.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Thinking {
    /// Any shape; this proxy does not interpret thinking configuration.
    Opaque(Value),
}

/// Request body for `POST /v1/messages`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Logical model name, possibly carrying a `:channel` suffix and CFP
    /// markers; rewritten by the model router before use.
    pub model: String,
    /// Conversation turns.
    pub messages: Vec<Message>,
    /// Maximum tokens to generate; must be greater than zero.
    pub max_tokens: u32,
    /// System prompt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<SystemPrompt>,
    /// Tools offered to the model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Tool>>,
    /// Tool steering.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
    /// Whether the response should stream as SSE.
    #[serde(default)]
    pub stream: bool,
    /// Sampling temperature.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Nucleus sampling parameter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    /// Top-k sampling parameter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    /// Sequences that stop generation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_sequences: Option<Vec<String>>,
    /// Opaque extended-thinking configuration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<Thinking>,
    /// Caller-supplied metadata, accepted but never interpreted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    /// Fields this proxy neither produces nor interprets.
    #[serde(flatten)]
    pub unknown_fields: UnknownFields,
}

/// Reason generation stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The model reached a natural stopping point.
    EndTurn,
    /// Generation hit the `max_tokens` cap.
    MaxTokens,
    /// A configured stop sequence was produced.
    StopSequence,
    /// The model invoked a tool.
    ToolUse,
    /// An error occurred mid-stream (streaming responses only).
    Error,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::EndTurn => "end_turn",
            Self::MaxTokens => "max_tokens",
            Self::StopSequence => "stop_sequence",
            Self::ToolUse => "tool_use",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// Token usage accounting.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    /// Tokens consumed by the prompt.
    pub input_tokens: u32,
    /// Tokens produced by the completion.
    pub output_tokens: u32,
    /// Always zero: this proxy performs no prompt caching.
    #[serde(default)]
    pub cache_creation_input_tokens: u32,
    /// Always zero: this proxy performs no prompt caching.
    #[serde(default)]
    pub cache_read_input_tokens: u32,
}

/// Response body for a unary `POST /v1/messages` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// Unique response id.
    pub id: String,
    /// Always `"message"`.
    #[serde(rename = "type")]
    pub response_type: String,
    /// Always [`Role::Assistant`].
    pub role: Role,
    /// Generated content blocks.
    pub content: Vec<ContentBlock>,
    /// Model that produced the response (the caller-facing name, not the
    /// upstream-resolved one).
    pub model: String,
    /// Why generation stopped.
    pub stop_reason: Option<StopReason>,
    /// Stop sequence encountered, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_sequence: Option<String>,
    /// Token accounting.
    pub usage: Usage,
}

/// Response for `POST /v1/messages/count_tokens`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CountTokensResponse {
    /// Estimated input token count.
    pub input_tokens: u32,
}

/// Anthropic-shaped error envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Always `"error"`.
    #[serde(rename = "type")]
    pub response_type: String,
    /// Error details.
    pub error: ErrorDetails,
}

/// Inner error payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetails {
    /// Machine-readable error category.
    #[serde(rename = "type")]
    pub error_type: String,
    /// Human-readable message.
    pub message: String,
}

/// Streaming SSE event payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StreamEvent {
    /// First event of every stream.
    #[serde(rename = "message_start")]
    MessageStart {
        /// Initial message shell (empty content, zeroed usage).
        message: StreamMessageStart,
    },
    /// A content block has opened at `index`.
    #[serde(rename = "content_block_start")]
    ContentBlockStart {
        /// Block index.
        index: u32,
        /// The block being opened (usually with empty text/input).
        content_block: ContentBlock,
    },
    /// Incremental content for the block at `index`.
    #[serde(rename = "content_block_delta")]
    ContentBlockDelta {
        /// Block index.
        index: u32,
        /// Delta payload.
        delta: ContentDelta,
    },
    /// The block at `index` is complete.
    #[serde(rename = "content_block_stop")]
    ContentBlockStop {
        /// Block index.
        index: u32,
    },
    /// Final stop reason and usage for the message.
    #[serde(rename = "message_delta")]
    MessageDelta {
        /// Terminal delta.
        delta: MessageDelta,
        /// Final usage; only `output_tokens` is meaningful.
        usage: Usage,
    },
    /// Last event of every stream before `[DONE]`.
    #[serde(rename = "message_stop")]
    MessageStop,
}

/// Initial message shell carried by `message_start`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamMessageStart {
    /// Response id.
    pub id: String,
    /// Always `"message"`.
    #[serde(rename = "type")]
    pub message_type: String,
    /// Always [`Role::Assistant`].
    pub role: Role,
    /// Always empty at `message_start`.
    pub content: Vec<ContentBlock>,
    /// Caller-facing model name.
    pub model: String,
    /// Zeroed usage; filled in by the closing `message_delta`.
    pub usage: Usage,
}

/// Incremental update to a content block.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentDelta {
    /// Text fragment.
    #[serde(rename = "text_delta")]
    TextDelta {
        /// Fragment text.
        text: String,
    },
    /// Fragment of a tool call's JSON input, to be concatenated by the
    /// receiver.
    #[serde(rename = "input_json_delta")]
    InputJsonDelta {
        /// Fragment of the serialized JSON input.
        partial_json: String,
    },
}

/// Terminal delta carried by `message_delta`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageDelta {
    /// Final stop reason.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<StopReason>,
    /// Final stop sequence, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_sequence: Option<String>,
}
