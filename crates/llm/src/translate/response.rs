//! Upstream unary response → Anthropic Messages response (component E).

use serde_json::{Value, json};
use uuid::Uuid;

use crate::{
    cfp::{self, CfpStreamParser},
    types::{ContentBlock, Response, Role, StopReason, Usage},
    upstream::UpstreamResponse,
};

/// Translates a unary upstream response into the Anthropic shape, running
/// CFP post-processing when `cfp_enabled`.
pub fn translate(upstream: UpstreamResponse, caller_model: &str, cfp_enabled: bool) -> Response {
    let id = upstream.id.unwrap_or_else(|| format!("msg_{}", Uuid::new_v4()));
    let choice = upstream.choices.into_iter().next();

    let mut content_text = choice.as_ref().and_then(|c| c.message.content.clone()).unwrap_or_default();
    let mut tool_calls: Vec<(String, String, String)> = choice
        .as_ref()
        .and_then(|c| c.message.tool_calls.clone())
        .unwrap_or_default()
        .into_iter()
        .map(|call| {
            let id = call.id.unwrap_or_else(|| format!("toolu_{}", Uuid::new_v4()));
            let name = call.function.as_ref().and_then(|f| f.name.clone()).unwrap_or_default();
            let arguments = call.function.and_then(|f| f.arguments).unwrap_or_default();
            (id, name, arguments)
        })
        .collect();
    let finish_reason = choice.and_then(|c| c.finish_reason);

    let mut forced_tool_use = false;
    let mut cfp_result_value: Option<Value> = None;

    if cfp_enabled {
        let mut parser = CfpStreamParser::new();
        let mut events = parser.feed(&content_text);
        events.extend(parser.finalize());

        let mut call_starts = std::collections::HashMap::new();
        let mut completed_calls = Vec::new();
        let mut rendered_text = String::new();

        for event in events {
            match event {
                cfp::Event::Text(text) => rendered_text.push_str(&text),
                cfp::Event::CallStart { id, name } => {
                    call_starts.insert(id, name);
                }
                cfp::Event::CallComplete { id, full_args } => {
                    if let Some(name) = call_starts.get(&id).cloned() {
                        completed_calls.push((id, name, full_args));
                    }
                }
                cfp::Event::Result { result } => {
                    cfp_result_value = Some(result);
                }
                _ => {}
            }
        }

        if !completed_calls.is_empty() {
            tool_calls = completed_calls;
            content_text = String::new();
            forced_tool_use = true;
        } else if let Some(result) = &cfp_result_value {
            content_text = result.to_string();
        } else {
            content_text = rendered_text;
        }
    }

    let mut content = Vec::new();
    if !content_text.is_empty() {
        content.push(ContentBlock::Text { text: content_text });
    }
    for (id, name, arguments) in tool_calls {
        let input = serde_json::from_str::<Value>(&arguments).unwrap_or_else(|_| json!({"raw": arguments}));
        content.push(ContentBlock::ToolUse { id, name, input });
    }
    if content.is_empty() {
        content.push(ContentBlock::Text { text: String::new() });
    }

    let stop_reason = if forced_tool_use {
        StopReason::ToolUse
    } else {
        map_finish_reason(finish_reason.as_deref())
    };

    Response {
        id,
        response_type: "message".to_string(),
        role: Role::Assistant,
        content,
        model: caller_model.to_string(),
        stop_reason: Some(stop_reason),
        stop_sequence: None,
        usage: Usage {
            input_tokens: upstream.usage.prompt_tokens,
            output_tokens: upstream.usage.completion_tokens,
            cache_creation_input_tokens: 0,
            cache_read_input_tokens: 0,
        },
    }
}

fn map_finish_reason(reason: Option<&str>) -> StopReason {
    match reason {
        Some("stop") => StopReason::EndTurn,
        Some("length") => StopReason::MaxTokens,
        Some("tool_calls") => StopReason::ToolUse,
        _ => StopReason::EndTurn,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::{UpstreamChoice, UpstreamResponseMessage, UpstreamUsage};

    fn upstream(content: &str, finish_reason: &str) -> UpstreamResponse {
        UpstreamResponse {
            id: Some("chatcmpl-1".to_string()),
            choices: vec![UpstreamChoice {
                message: UpstreamResponseMessage {
                    content: Some(content.to_string()),
                    tool_calls: None,
                },
                finish_reason: Some(finish_reason.to_string()),
            }],
            usage: UpstreamUsage {
                prompt_tokens: 3,
                completion_tokens: 1,
            },
        }
    }

    #[test]
    fn s1_unary_text_passthrough() {
        let response = translate(upstream("hello", "stop"), "claude-3-haiku", false);
        assert_eq!(response.content.len(), 1);
        assert!(matches!(&response.content[0], ContentBlock::Text { text } if text == "hello"));
        assert_eq!(response.stop_reason, Some(StopReason::EndTurn));
        assert_eq!(response.usage.input_tokens, 3);
        assert_eq!(response.usage.output_tokens, 1);
    }

    #[test]
    fn length_finish_reason_maps_to_max_tokens() {
        let response = translate(upstream("partial", "length"), "claude-3-haiku", false);
        assert_eq!(response.stop_reason, Some(StopReason::MaxTokens));
    }

    #[test]
    fn cfp_call_complete_replaces_text_with_tool_use_and_forces_tool_use_stop() {
        let text = "intro <cfp>{\"v\":1,\"role\":\"call\",\"id\":\"a\",\"name\":\"search\"}</cfp>\
                     <cfp>{\"v\":1,\"role\":\"args_delta\",\"id\":\"a\",\"delta\":\"{\\\"q\\\":1}\"}</cfp>\
                     <cfp>{\"v\":1,\"role\":\"args_complete\",\"id\":\"a\"}</cfp>";
        let response = translate(upstream(text, "stop"), "claude-3-haiku", true);

        assert_eq!(response.stop_reason, Some(StopReason::ToolUse));
        assert!(response.content.iter().any(|b| matches!(b, ContentBlock::ToolUse { name, .. } if name == "search")));
        assert!(!response.content.iter().any(|b| matches!(b, ContentBlock::Text { text } if !text.is_empty())));
    }

    #[test]
    fn s4_cfp_malformed_block_surfaces_as_text_with_end_turn() {
        let response = translate(upstream("<cfp>{not json}</cfp>", "stop"), "claude-3-haiku", true);
        assert_eq!(response.stop_reason, Some(StopReason::EndTurn));
        assert!(response.content.iter().any(|b| matches!(b, ContentBlock::Text { text } if text.contains("not json"))));
    }

    #[test]
    fn content_is_never_empty() {
        let response = translate(upstream("", "stop"), "claude-3-haiku", false);
        assert_eq!(response.content.len(), 1);
    }
}
