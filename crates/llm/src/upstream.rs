//! The upstream chat-completions wire shape and the client that speaks it.
//!
//! Every upstream this proxy forwards to — OpenAI itself, an
//! OpenAI-compatible gateway, or Gemini's OpenAI-compatibility endpoint — is
//! addressed with the same JSON body shape; only the base URL, the
//! authentication header, and (for Gemini) tool-schema sanitization differ.

use std::pin::Pin;

use eventsource_stream::Eventsource;
use futures::{Stream, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    error::{RelayError, Result},
    http_client::http_client,
    model_router::ProviderConfig,
};

/// A message in the upstream's flat, role-tagged conversation format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamMessage {
    /// `system` | `user` | `assistant` | `tool`.
    pub role: String,
    /// Plain-string content; structural content blocks never reach this
    /// wire shape (see the request translator).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

/// A tool definition in OpenAI's function-calling envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamTool {
    /// Always `"function"`.
    #[serde(rename = "type")]
    pub tool_type: String,
    /// The function definition.
    pub function: UpstreamFunction,
}

/// Inner function definition of an [`UpstreamTool`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamFunction {
    /// Function name.
    pub name: String,
    /// Human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON Schema parameters.
    pub parameters: Value,
}

/// Request body sent to the upstream.
#[derive(Debug, Clone, Serialize)]
pub struct UpstreamRequest {
    /// Upstream-resolved model id (provider prefix stripped).
    pub model: String,
    /// Conversation turns.
    pub messages: Vec<UpstreamMessage>,
    /// Generation cap.
    pub max_tokens: u32,
    /// Whether to stream the response as SSE.
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<UpstreamTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<Value>,
}

/// A single tool call as carried by a unary response or reassembled from
/// stream fragments.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpstreamToolCall {
    /// Position of this call among its sibling calls.
    #[serde(default)]
    pub index: u32,
    /// Upstream-assigned call id, if provided.
    #[serde(default)]
    pub id: Option<String>,
    /// Function payload.
    #[serde(default)]
    pub function: Option<UpstreamFunctionCall>,
}

/// Function name/arguments fragment of an [`UpstreamToolCall`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpstreamFunctionCall {
    /// Function name, present on the first fragment.
    #[serde(default)]
    pub name: Option<String>,
    /// Arguments, or a fragment of them in streaming mode.
    #[serde(default)]
    pub arguments: Option<String>,
}

/// Token accounting as reported by the upstream.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct UpstreamUsage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
}

/// A unary (non-streaming) chat-completions response.
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamResponse {
    #[serde(default)]
    pub id: Option<String>,
    pub choices: Vec<UpstreamChoice>,
    #[serde(default)]
    pub usage: UpstreamUsage,
}

/// One choice of an [`UpstreamResponse`].
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamChoice {
    pub message: UpstreamResponseMessage,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// The message payload of an [`UpstreamChoice`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpstreamResponseMessage {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<UpstreamToolCall>>,
}

/// One SSE chunk of a streaming chat-completions response.
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamChunk {
    #[serde(default)]
    pub choices: Vec<UpstreamChunkChoice>,
    #[serde(default)]
    pub usage: Option<UpstreamUsage>,
}

/// One choice of an [`UpstreamChunk`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpstreamChunkChoice {
    #[serde(default)]
    pub delta: UpstreamDelta,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// Incremental content of an [`UpstreamChunkChoice`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpstreamDelta {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<UpstreamToolCall>>,
}

/// Builds the final URL a request is sent to, applying the Gemini-specific
/// construction rule (§4.D.9): `base/models/<model>` when `base` already
/// ends in `/v1`, else `base/v1beta/models/<model>`. All other upstreams use
/// the conventional `base/chat/completions`.
fn resolve_url(base_url: &str, upstream_model: &str) -> String {
    let base = base_url.trim_end_matches('/');
    let bare_model = upstream_model.split_once('/').map(|(_, rest)| rest).unwrap_or(upstream_model);

    if upstream_model.starts_with("gemini/") {
        if base.ends_with("/v1") {
            format!("{base}/models/{bare_model}")
        } else {
            format!("{base}/v1beta/models/{bare_model}")
        }
    } else {
        format!("{base}/chat/completions")
    }
}

fn auth_header(api_key: Option<&SecretString>) -> String {
    format!("Bearer {}", api_key.map(ExposeSecret::expose_secret).unwrap_or_default())
}

/// Sends a non-streaming chat-completions request and decodes the response.
///
/// `upstream_model` is the routing decision's provider-prefixed model id
/// (e.g. `gemini/claude-4-sonnet`), used only to resolve the request URL;
/// `request.model` itself already carries the bare, upstream-facing id.
pub async fn send_unary(
    request: &UpstreamRequest,
    upstream_model: &str,
    provider: &ProviderConfig,
    debug: bool,
) -> Result<UpstreamResponse> {
    let base_url = provider
        .base_url
        .as_deref()
        .ok_or_else(|| RelayError::Validation("no base URL configured for the resolved channel".to_string()))?;
    let url = resolve_url(base_url, upstream_model);

    if debug {
        log::trace!("upstream request to {url}: {}", serde_json::to_string(request).unwrap_or_default());
    }

    let response = http_client()
        .post(url)
        .header("Authorization", auth_header(provider.api_key.as_ref()))
        .json(request)
        .send()
        .await?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(RelayError::Upstream {
            status: Some(status),
            message: body,
        });
    }

    let response = response.json::<UpstreamResponse>().await?;
    if debug {
        log::trace!("upstream response: {response:?}");
    }

    Ok(response)
}

/// Sends a streaming chat-completions request and returns the decoded chunk
/// stream, filtering the terminal `[DONE]` sentinel.
pub async fn send_stream(
    request: &UpstreamRequest,
    upstream_model: &str,
    provider: &ProviderConfig,
    debug: bool,
) -> Result<Pin<Box<dyn Stream<Item = Result<UpstreamChunk>> + Send>>> {
    let base_url = provider
        .base_url
        .as_deref()
        .ok_or_else(|| RelayError::Validation("no base URL configured for the resolved channel".to_string()))?;
    let url = resolve_url(base_url, upstream_model);

    if debug {
        log::trace!("upstream request to {url}: {}", serde_json::to_string(request).unwrap_or_default());
    }

    let response = http_client()
        .post(url)
        .header("Authorization", auth_header(provider.api_key.as_ref()))
        .json(request)
        .send()
        .await?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(RelayError::Upstream {
            status: Some(status),
            message: body,
        });
    }

    let stream = response
        .bytes_stream()
        .eventsource()
        .filter_map(move |event| async move {
            match event {
                Ok(event) if event.data == "[DONE]" => None,
                Ok(event) => {
                    if debug {
                        log::trace!("upstream chunk: {}", event.data);
                    }
                    Some(
                        serde_json::from_str::<UpstreamChunk>(&event.data)
                            .map_err(|err| RelayError::Upstream {
                                status: None,
                                message: format!("malformed upstream chunk: {err}"),
                            }),
                    )
                }
                Err(err) => Some(Err(RelayError::Upstream {
                    status: None,
                    message: format!("upstream stream error: {err}"),
                })),
            }
        });

    Ok(Box::pin(stream))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_url_uses_chat_completions_for_openai_and_anthropic() {
        assert_eq!(resolve_url("https://api.openai.com/v1", "openai/gpt-4o-mini"), "https://api.openai.com/v1/chat/completions");
    }

    #[test]
    fn resolve_url_appends_models_segment_when_base_ends_in_v1() {
        assert_eq!(
            resolve_url("https://g.example/v1", "gemini/claude-4-sonnet"),
            "https://g.example/v1/models/claude-4-sonnet"
        );
    }

    #[test]
    fn resolve_url_falls_back_to_v1beta_when_base_lacks_v1_suffix() {
        assert_eq!(
            resolve_url("https://g.example", "gemini/claude-4-sonnet"),
            "https://g.example/v1beta/models/claude-4-sonnet"
        );
    }
}
