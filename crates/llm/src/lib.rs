//! Anthropic Messages API surface, fulfilled against OpenAI-compatible (and
//! other) upstream chat-completion endpoints.
//!
//! Wires together model routing, request/response translation, and the CFP
//! emulation layer behind three endpoints: `POST /v1/messages`,
//! `POST /v1/messages/count_tokens`, and `GET /health`.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{
        IntoResponse, Sse,
        sse::{Event, KeepAlive},
    },
    routing::{get, post},
};
use config::Config;
use futures::StreamExt;

pub mod cfp;
mod error;
mod http_client;
pub mod model_router;
pub mod translate;
pub mod types;
pub mod upstream;

pub use error::{RelayError, Result};

/// Fixed token-count estimate returned by `count_tokens` in place of a real
/// upstream counter, which this proxy never calls.
const FALLBACK_TOKEN_COUNT: u32 = 1000;

/// Builds the router for the whole Anthropic-shaped surface.
pub fn router(config: Arc<Config>) -> Router {
    Router::new()
        .route("/v1/messages", post(messages_handler))
        .route("/v1/messages/count_tokens", post(count_tokens_handler))
        .route("/health", get(health_handler))
        .with_state(config)
}

async fn messages_handler(
    State(config): State<Arc<Config>>,
    Json(request): Json<types::Request>,
) -> Result<axum::response::Response> {
    if request.max_tokens == 0 {
        return Err(RelayError::Validation("max_tokens must be greater than zero".to_string()));
    }

    let decision = model_router::route(&request.model, &config);
    let upstream_request = translate::request::translate(&request, &decision);

    log::debug!(
        "routed {} -> {} (cfp={}, channel={})",
        decision.original_model,
        decision.upstream_model,
        decision.cfp_enabled,
        decision.provider_config.name,
    );

    if request.stream {
        let chunks =
            upstream::send_stream(&upstream_request, &decision.upstream_model, &decision.provider_config, config.debug).await?;
        let caller_model = request.model.clone();
        Ok(streaming_response(chunks, caller_model, decision.cfp_enabled))
    } else {
        let upstream_response =
            upstream::send_unary(&upstream_request, &decision.upstream_model, &decision.provider_config, config.debug).await?;
        let response = translate::response::translate(upstream_response, &request.model, decision.cfp_enabled);
        Ok(Json(response).into_response())
    }
}

/// Assembles the Anthropic-shaped SSE response for a streaming request.
///
/// Chunks are taken as an already-resolved stream so this can be driven with
/// a synthetic upstream in tests, without reaching the network.
fn streaming_response(
    chunks: impl futures::Stream<Item = Result<upstream::UpstreamChunk>> + Unpin + Send + 'static,
    caller_model: String,
    cfp_enabled: bool,
) -> axum::response::Response {
    let frames = translate::stream::translate_stream(chunks, caller_model, cfp_enabled);

    let events = frames
        .map(|frame| {
            let event = Event::default().event(frame.event).json_data(&frame.data).unwrap_or_else(|err| {
                log::error!("failed to serialize {} frame: {err}", frame.event);
                Event::default().event("error")
            });
            Ok::<_, std::convert::Infallible>(event)
        })
        .chain(futures::stream::once(async { Ok::<_, std::convert::Infallible>(Event::default().data("[DONE]")) }));

    Sse::new(events).keep_alive(KeepAlive::default()).into_response()
}

async fn count_tokens_handler(Json(_request): Json<types::Request>) -> Json<types::CountTokensResponse> {
    Json(types::CountTokensResponse {
        input_tokens: FALLBACK_TOKEN_COUNT,
    })
}

async fn health_handler() -> StatusCode {
    StatusCode::OK
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::types::{Message, MessageContent, Role};

    fn config() -> Arc<Config> {
        Arc::new(Config {
            anthropic_api_key: None,
            openai_api_key: None,
            gemini_api_key: None,
            preferred_provider: config::PreferredProvider::OpenAi,
            big_model: "gpt-4.1".to_string(),
            small_model: "gpt-4.1-mini".to_string(),
            base_url: Some("https://api.openai.com/v1".to_string()),
            api_key: None,
            channels: HashMap::new(),
            debug: false,
            port: 8082,
        })
    }

    fn request(max_tokens: u32) -> types::Request {
        types::Request {
            model: "claude-3-haiku".to_string(),
            messages: vec![Message {
                role: Role::User,
                content: MessageContent::Text("hi".to_string()),
            }],
            max_tokens,
            system: None,
            tools: None,
            tool_choice: None,
            stream: false,
            temperature: None,
            top_p: None,
            top_k: None,
            stop_sequences: None,
            thinking: None,
            metadata: None,
            unknown_fields: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn zero_max_tokens_is_rejected_before_any_upstream_call() {
        let err = messages_handler(State(config()), Json(request(0))).await.unwrap_err();
        assert!(matches!(err, RelayError::Validation(_)));
    }

    #[tokio::test]
    async fn count_tokens_returns_fixed_fallback() {
        let Json(response) = count_tokens_handler(Json(request(10))).await;
        assert_eq!(response.input_tokens, FALLBACK_TOKEN_COUNT);
    }

    #[tokio::test]
    async fn health_reports_ok() {
        assert_eq!(health_handler().await, StatusCode::OK);
    }

    #[tokio::test]
    async fn streaming_response_body_ends_with_done_sentinel() {
        let chunk = upstream::UpstreamChunk {
            choices: vec![upstream::UpstreamChunkChoice {
                delta: upstream::UpstreamDelta {
                    content: Some("hi".to_string()),
                    tool_calls: None,
                },
                finish_reason: Some("stop".to_string()),
            }],
            usage: None,
        };
        let chunks = futures::stream::iter(vec![Ok(chunk)]);

        let response = streaming_response(chunks, "claude-3-haiku".to_string(), false);
        let mut body = response.into_body().into_data_stream();

        let mut collected = Vec::new();
        while let Some(frame) = body.next().await {
            collected.extend_from_slice(&frame.expect("body stream yields no transport errors"));
        }

        let text = String::from_utf8(collected).expect("SSE body is UTF-8");
        assert!(text.trim_end().ends_with("data: [DONE]"), "body did not end with the DONE sentinel: {text:?}");
    }
}
