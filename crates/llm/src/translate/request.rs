//! Anthropic request → upstream request translation (component D).

use serde_json::{Value, json};

use crate::{
    cfp::codec,
    model_router::RoutingDecision,
    types::{ContentBlock, Message, MessageContent, Request, Role, SystemPrompt, Tool, ToolChoice, ToolResultContent},
    upstream::{UpstreamFunction, UpstreamMessage, UpstreamRequest, UpstreamTool},
};

const MAX_TOKENS_CAP: u32 = 16384;

const CFP_INSTRUCTION_BLURB: &str = concat!(
    "You can call the tools listed below by emitting tagged JSON blocks of the ",
    "form <cfp>{...}</cfp> in your reply. Do not use any other function-calling ",
    "mechanism. Each call needs a unique id: first emit a call block with the ",
    "tool name, then an args_delta block carrying the complete JSON-encoded ",
    "arguments as its delta, then an args_complete block with the same id.",
);

/// Translates an Anthropic [`Request`] plus its routing decision into the
/// flat upstream request shape every upstream is spoken to in.
pub fn translate(request: &Request, decision: &RoutingDecision) -> UpstreamRequest {
    let bare_model = decision
        .upstream_model
        .split_once('/')
        .map(|(_, rest)| rest.to_string())
        .unwrap_or_else(|| decision.upstream_model.clone());

    let is_capped_upstream = decision.upstream_model.starts_with("openai/") || decision.upstream_model.starts_with("gemini/");
    let max_tokens = if is_capped_upstream {
        request.max_tokens.min(MAX_TOKENS_CAP)
    } else {
        request.max_tokens
    };

    let has_tools = request.tools.as_ref().is_some_and(|tools| !tools.is_empty());

    let (messages, tools, tool_choice) = if decision.cfp_enabled && has_tools {
        let messages = build_cfp_messages(request);
        (messages, None, None)
    } else {
        let messages = build_plain_messages(request);
        let tools = request
            .tools
            .as_ref()
            .map(|tools| tools.iter().map(|tool| translate_tool(tool, &decision.upstream_model)).collect());
        let tool_choice = request.tool_choice.as_ref().map(translate_tool_choice);
        (messages, tools, tool_choice)
    };

    UpstreamRequest {
        model: bare_model,
        messages,
        max_tokens,
        stream: request.stream,
        temperature: request.temperature,
        top_p: request.top_p,
        top_k: request.top_k,
        stop: request.stop_sequences.clone(),
        tools,
        tool_choice,
    }
}

fn system_text(system: &SystemPrompt) -> String {
    match system {
        SystemPrompt::Text(text) => text.clone(),
        SystemPrompt::Blocks(blocks) => blocks
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n\n"),
    }
}

fn build_plain_messages(request: &Request) -> Vec<UpstreamMessage> {
    let mut messages = Vec::new();

    if let Some(system) = &request.system {
        let text = system_text(system);
        if !text.is_empty() {
            messages.push(UpstreamMessage {
                role: "system".to_string(),
                content: Some(text),
            });
        }
    }

    for message in &request.messages {
        let content = flatten_message_content(message);
        messages.push(UpstreamMessage {
            role: role_str(message.role).to_string(),
            content: Some(non_empty_or_placeholder(content)),
        });
    }

    messages
}

fn role_str(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::System => "system",
    }
}

fn non_empty_or_placeholder(content: String) -> String {
    if content.is_empty() { "...".to_string() } else { content }
}

/// Flattens one message's content into the plain-string shape every
/// upstream is spoken to in.
fn flatten_message_content(message: &Message) -> String {
    let blocks = message.content.as_blocks();
    if blocks.is_empty() {
        if let MessageContent::Text(text) = &message.content {
            return text.clone();
        }
    }
    flatten_blocks(&blocks)
}

fn flatten_blocks(blocks: &[&ContentBlock]) -> String {
    let mut out = String::new();
    for block in blocks {
        match block {
            ContentBlock::Text { text } => out.push_str(text),
            ContentBlock::Image { .. } => {
                out.push_str("[Image content - not displayed in text format]");
            }
            ContentBlock::ToolUse { id, name, input } => {
                out.push_str(&format!("[Tool: {name} (ID: {id})]\nInput: {input}"));
            }
            ContentBlock::ToolResult { tool_use_id, content } => {
                let rendered = content.as_ref().map(flatten_tool_result_content).unwrap_or_default();
                out.push_str(&format!("Tool result for {tool_use_id}:\n{rendered}\n"));
            }
            ContentBlock::Unknown => {}
        }
    }
    out
}

fn flatten_tool_result_content(content: &ToolResultContent) -> String {
    match content {
        ToolResultContent::Text(text) => text.clone(),
        ToolResultContent::Blocks(blocks) => flatten_blocks(&blocks.iter().collect::<Vec<_>>()),
        ToolResultContent::Value(value) => value.to_string(),
    }
}

fn translate_tool(tool: &Tool, upstream_model: &str) -> UpstreamTool {
    let parameters = if upstream_model.starts_with("gemini/") {
        sanitize_gemini_schema(&tool.input_schema)
    } else {
        tool.input_schema.clone()
    };

    UpstreamTool {
        tool_type: "function".to_string(),
        function: UpstreamFunction {
            name: tool.name.clone(),
            description: tool.description.clone(),
            parameters,
        },
    }
}

/// Removes `additionalProperties` and `default` everywhere, and `format` on
/// string-typed nodes unless it is `enum` or `date-time`, recursively over
/// nested objects and arrays.
fn sanitize_gemini_schema(schema: &Value) -> Value {
    match schema {
        Value::Object(map) => {
            let is_string_type = map.get("type").and_then(Value::as_str) == Some("string");
            let mut sanitized = serde_json::Map::new();

            for (key, value) in map {
                match key.as_str() {
                    "additionalProperties" | "default" => continue,
                    "format" if is_string_type => {
                        let keep = matches!(value.as_str(), Some("enum") | Some("date-time"));
                        if keep {
                            sanitized.insert(key.clone(), value.clone());
                        }
                    }
                    _ => {
                        sanitized.insert(key.clone(), sanitize_gemini_schema(value));
                    }
                }
            }

            Value::Object(sanitized)
        }
        Value::Array(items) => Value::Array(items.iter().map(sanitize_gemini_schema).collect()),
        other => other.clone(),
    }
}

fn translate_tool_choice(choice: &ToolChoice) -> Value {
    match choice {
        ToolChoice::Auto => json!("auto"),
        ToolChoice::Any => json!("any"),
        ToolChoice::Tool { name } => json!({"type": "function", "function": {"name": name}}),
    }
}

/// Collapses the original system message, a generated tool catalog, and the
/// CFP instruction blurb into one leading system message, then rewrites the
/// remaining turns per §4.D.8.
fn build_cfp_messages(request: &Request) -> Vec<UpstreamMessage> {
    let mut messages = Vec::new();

    let mut system_parts = Vec::new();
    if let Some(system) = &request.system {
        let text = system_text(system);
        if !text.is_empty() {
            system_parts.push(text);
        }
    }
    if let Some(tools) = &request.tools {
        system_parts.push(render_tool_catalog(tools));
    }
    system_parts.push(CFP_INSTRUCTION_BLURB.to_string());

    messages.push(UpstreamMessage {
        role: "system".to_string(),
        content: Some(system_parts.join("\n\n")),
    });

    for message in &request.messages {
        if matches!(message.role, Role::System) {
            continue;
        }

        if let Some(rewritten) = rewrite_cfp_turn(message) {
            messages.push(rewritten);
        } else {
            let content = flatten_message_content(message);
            messages.push(UpstreamMessage {
                role: role_str(message.role).to_string(),
                content: Some(non_empty_or_placeholder(content)),
            });
        }
    }

    messages
}

fn render_tool_catalog(tools: &[Tool]) -> String {
    let mut out = String::from("Available tools:\n");
    for tool in tools {
        let description = tool.description.as_deref().unwrap_or("");
        let schema = serde_json::to_string_pretty(&tool.input_schema).unwrap_or_default();
        out.push_str(&format!("\n### {}\n{description}\n{schema}\n", tool.name));
    }
    out
}

/// Rewrites a single turn that contains a structured tool call or tool
/// result into its CFP-encoded equivalent. Returns `None` for turns that
/// should pass through unchanged.
fn rewrite_cfp_turn(message: &Message) -> Option<UpstreamMessage> {
    let blocks = message.content.as_blocks();

    if let Some(ContentBlock::ToolUse { id, name, input }) = blocks.iter().find(|b| matches!(b, ContentBlock::ToolUse { .. })) {
        let arguments_json = input.to_string();
        let content = format!(
            "{}{}{}",
            codec::encode_call(id, name),
            codec::encode_args_delta(id, &arguments_json),
            codec::encode_args_complete(id),
        );
        return Some(UpstreamMessage {
            role: "assistant".to_string(),
            content: Some(content),
        });
    }

    if let Some(ContentBlock::ToolResult { content, .. }) = blocks.iter().find(|b| matches!(b, ContentBlock::ToolResult { .. })) {
        let fresh_id = uuid::Uuid::new_v4().to_string();
        let result_value = content
            .as_ref()
            .map(|c| match c {
                ToolResultContent::Text(text) => json!(text),
                ToolResultContent::Blocks(blocks) => json!(flatten_blocks(&blocks.iter().collect::<Vec<_>>())),
                ToolResultContent::Value(value) => value.clone(),
            })
            .unwrap_or(Value::Null);

        return Some(UpstreamMessage {
            role: "user".to_string(),
            content: Some(codec::encode_result(&fresh_id, result_value)),
        });
    }

    None
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use serde_json::json;

    use super::*;
    use crate::{model_router::ProviderConfig, types::{MessageContent, Role}};

    fn decision(upstream_model: &str, cfp_enabled: bool) -> RoutingDecision {
        RoutingDecision {
            upstream_model: upstream_model.to_string(),
            provider_config: ProviderConfig {
                name: "default".to_string(),
                base_url: Some("https://api.openai.com/v1".to_string()),
                api_key: None,
            },
            cfp_enabled,
            original_model: upstream_model.to_string(),
        }
    }

    fn simple_request(content: MessageContent) -> Request {
        Request {
            model: "claude-3-haiku".to_string(),
            messages: vec![Message {
                role: Role::User,
                content,
            }],
            max_tokens: 50,
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

    #[test]
    fn s1_simple_text_message_flattens_to_plain_string() {
        let request = simple_request(MessageContent::Text("hi".to_string()));
        let upstream = translate(&request, &decision("openai/gpt-4o-mini", false));
        assert_eq!(upstream.messages.len(), 1);
        assert_eq!(upstream.messages[0].content.as_deref(), Some("hi"));
    }

    #[test]
    fn max_tokens_capped_for_openai_upstream() {
        let mut request = simple_request(MessageContent::Text("hi".to_string()));
        request.max_tokens = 100_000;
        let upstream = translate(&request, &decision("openai/gpt-4o-mini", false));
        assert_eq!(upstream.max_tokens, MAX_TOKENS_CAP);
    }

    #[test]
    fn s6_gemini_schema_sanitation_removes_additional_properties_and_format() {
        let schema = json!({
            "type": "object",
            "additionalProperties": false,
            "properties": {"d": {"type": "string", "format": "uri"}}
        });
        let sanitized = sanitize_gemini_schema(&schema);
        assert_eq!(
            sanitized,
            json!({"type": "object", "properties": {"d": {"type": "string"}}})
        );
    }

    #[test]
    fn gemini_schema_sanitation_keeps_enum_and_date_time_formats() {
        let schema = json!({"type": "string", "format": "enum"});
        assert_eq!(sanitize_gemini_schema(&schema), json!({"type": "string", "format": "enum"}));

        let schema = json!({"type": "string", "format": "date-time"});
        assert_eq!(sanitize_gemini_schema(&schema), json!({"type": "string", "format": "date-time"}));
    }

    #[test]
    fn tool_result_message_flattens_with_expected_prefix() {
        let request = simple_request(MessageContent::Blocks(vec![ContentBlock::ToolResult {
            tool_use_id: "call_1".to_string(),
            content: Some(ToolResultContent::Text("42".to_string())),
        }]));
        let upstream = translate(&request, &decision("openai/gpt-4o-mini", false));
        assert_eq!(upstream.messages[0].content.as_deref(), Some("Tool result for call_1:\n42\n"));
    }

    #[test]
    fn empty_content_becomes_placeholder_ellipsis() {
        let request = simple_request(MessageContent::Blocks(vec![]));
        let upstream = translate(&request, &decision("openai/gpt-4o-mini", false));
        assert_eq!(upstream.messages[0].content.as_deref(), Some("..."));
    }

    #[test]
    fn cfp_rewrite_drops_tools_and_tool_choice() {
        let mut request = simple_request(MessageContent::Text("hi".to_string()));
        request.tools = Some(vec![Tool {
            name: "search".to_string(),
            description: None,
            input_schema: json!({"type": "object"}),
        }]);
        request.tool_choice = Some(ToolChoice::Auto);

        let upstream = translate(&request, &decision("openai/gpt-4o-mini", true));
        assert!(upstream.tools.is_none());
        assert!(upstream.tool_choice.is_none());
        assert_eq!(upstream.messages[0].role, "system");
    }

    #[test]
    fn cfp_rewrite_encodes_assistant_tool_use_as_call_sequence() {
        let mut request = simple_request(MessageContent::Text("hi".to_string()));
        request.tools = Some(vec![Tool {
            name: "search".to_string(),
            description: None,
            input_schema: json!({"type": "object"}),
        }]);
        request.messages.push(Message {
            role: Role::Assistant,
            content: MessageContent::Blocks(vec![ContentBlock::ToolUse {
                id: "call_1".to_string(),
                name: "search".to_string(),
                input: json!({"q": "x"}),
            }]),
        });

        let upstream = translate(&request, &decision("openai/gpt-4o-mini", true));
        let assistant_turn = upstream.messages.iter().find(|m| m.role == "assistant").unwrap();
        let content = assistant_turn.content.as_deref().unwrap();
        assert!(content.contains("\"role\":\"call\""));
        assert!(content.contains("\"role\":\"args_delta\""));
        assert!(content.contains("\"role\":\"args_complete\""));
    }

    #[test]
    fn tool_choice_named_tool_maps_to_function_object() {
        let choice = ToolChoice::Tool {
            name: "search".to_string(),
        };
        assert_eq!(
            translate_tool_choice(&choice),
            json!({"type": "function", "function": {"name": "search"}})
        );
    }
}
