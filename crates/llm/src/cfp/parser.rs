//! Stateful incremental parser that turns a monotonically growing stream of
//! text fragments into ordered [`Event`]s, tolerating a CFP block being
//! split across an arbitrary number of fragments.

use std::collections::HashMap;

use serde_json::Value;

use super::codec;

/// One unit of structured output produced by the parser.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Plain text, emitted in the order it appeared relative to CFP blocks.
    Text(String),
    /// A new tool call has begun.
    CallStart {
        /// Call id.
        id: String,
        /// Tool name.
        name: String,
    },
    /// A fragment of a call's JSON arguments.
    ArgsDelta {
        /// Call id.
        id: String,
        /// Argument fragment.
        delta: String,
    },
    /// A call's arguments are complete.
    CallComplete {
        /// Call id.
        id: String,
        /// Accumulated arguments, re-serialized as an object; `"{}"` if the
        /// accumulated text did not parse as a JSON object.
        full_args: String,
    },
    /// A tool result block was observed in the stream.
    Result {
        /// Result payload.
        result: Value,
    },
}

#[derive(Debug, Clone)]
struct ActiveCall {
    args_accum: String,
}

/// Per-request parser state. Not thread-safe; owned by a single request
/// task for its whole lifetime.
#[derive(Debug, Default)]
pub struct CfpStreamParser {
    buffer: String,
    active_calls: HashMap<String, ActiveCall>,
    completed_calls: Vec<String>,
}

impl CfpStreamParser {
    /// Creates a fresh parser with empty state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `fragment` to the internal buffer and emits every event
    /// extractable from the buffer without losing information, retaining
    /// only the tail that might still begin an incomplete block.
    pub fn feed(&mut self, fragment: &str) -> Vec<Event> {
        self.buffer.push_str(fragment);
        self.drain()
    }

    /// Called once when the upstream stream ends. Performs one last
    /// extraction pass, then emits any residual buffer as text.
    pub fn finalize(mut self) -> Vec<Event> {
        let mut events = self.drain();
        if !self.buffer.is_empty() {
            events.push(Event::Text(std::mem::take(&mut self.buffer)));
        }
        events
    }

    fn drain(&mut self) -> Vec<Event> {
        let mut events = Vec::new();

        loop {
            let Some(open) = self.buffer.find("<cfp>") else {
                if !self.buffer.is_empty() {
                    events.push(Event::Text(std::mem::take(&mut self.buffer)));
                }
                break;
            };

            if open > 0 {
                events.push(Event::Text(self.buffer[..open].to_string()));
            }

            let payload_start = open + "<cfp>".len();
            let Some(close_rel) = self.buffer[payload_start..].find("</cfp>") else {
                self.buffer.drain(..open);
                break;
            };
            let payload_end = payload_start + close_rel;
            let block_end = payload_end + "</cfp>".len();

            let payload = self.buffer[payload_start..payload_end].to_string();
            let whole_block = self.buffer[open..block_end].to_string();
            self.buffer.drain(..block_end);

            let block = codec::parse(&payload);
            if block.role == codec::PARSE_FAILED_ROLE {
                events.push(Event::Text(whole_block));
                continue;
            }

            self.apply(&block, &mut events);
        }

        events
    }

    fn apply(&mut self, block: &codec::CfpBlock, events: &mut Vec<Event>) {
        match block.role.as_str() {
            "call" => {
                if self.active_calls.contains_key(&block.id) {
                    return;
                }
                let name = block.name.clone().unwrap_or_default();
                self.active_calls.insert(
                    block.id.clone(),
                    ActiveCall {
                        args_accum: String::new(),
                    },
                );
                events.push(Event::CallStart {
                    id: block.id.clone(),
                    name,
                });
            }
            "args_delta" => {
                let Some(call) = self.active_calls.get_mut(&block.id) else {
                    return;
                };
                let delta = block.delta.clone().unwrap_or_default();
                call.args_accum.push_str(&delta);
                events.push(Event::ArgsDelta {
                    id: block.id.clone(),
                    delta,
                });
            }
            "args_complete" => {
                let Some(call) = self.active_calls.remove(&block.id) else {
                    return;
                };
                let full_args = normalize_args(&call.args_accum);
                self.completed_calls.push(block.id.clone());
                events.push(Event::CallComplete {
                    id: block.id.clone(),
                    full_args,
                });
            }
            "result" => {
                events.push(Event::Result {
                    result: block.result.clone().unwrap_or(Value::Null),
                });
            }
            "error" => {
                let message = block
                    .err
                    .as_ref()
                    .and_then(|e| e.get("message").or_else(|| e.get("error")))
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| block.err.as_ref().map(|e| e.to_string()).unwrap_or_default());
                events.push(Event::Text(format!("[CFP error] {message}")));
            }
            _ => {}
        }
    }
}

/// Re-serializes accumulated argument text as a JSON object string, falling
/// back to `"{}"` when it does not parse as an object.
fn normalize_args(accum: &str) -> String {
    match serde_json::from_str::<Value>(accum) {
        Ok(value @ Value::Object(_)) => value.to_string(),
        _ => "{}".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_all(fragments: &[&str]) -> Vec<Event> {
        let mut parser = CfpStreamParser::new();
        let mut events = Vec::new();
        for fragment in fragments {
            events.extend(parser.feed(fragment));
        }
        events.extend(parser.finalize());
        events
    }

    #[test]
    fn plain_text_passes_through_untouched() {
        let events = feed_all(&["hello world"]);
        assert_eq!(events, vec![Event::Text("hello world".to_string())]);
    }

    #[test]
    fn full_call_sequence_in_one_fragment() {
        let text = "before <cfp>{\"v\":1,\"role\":\"call\",\"id\":\"a\",\"name\":\"f\",\"args\":{}}</cfp>\
                     <cfp>{\"v\":1,\"role\":\"args_delta\",\"id\":\"a\",\"delta\":\"{\\\"x\\\":1}\"}</cfp>\
                     <cfp>{\"v\":1,\"role\":\"args_complete\",\"id\":\"a\"}</cfp> after";

        let events = feed_all(&[text]);

        assert_eq!(
            events,
            vec![
                Event::Text("before ".to_string()),
                Event::CallStart {
                    id: "a".to_string(),
                    name: "f".to_string(),
                },
                Event::ArgsDelta {
                    id: "a".to_string(),
                    delta: "{\"x\":1}".to_string(),
                },
                Event::CallComplete {
                    id: "a".to_string(),
                    full_args: "{\"x\":1}".to_string(),
                },
                Event::Text(" after".to_string()),
            ]
        );
    }

    #[test]
    fn fragmentation_invariance_across_arbitrary_splits() {
        let whole = "x<cfp>{\"v\":1,\"role\":\"call\",\"id\":\"a\",\"name\":\"f\",\"args\":{}}</cfp>y\
                      <cfp>{\"v\":1,\"role\":\"args_delta\",\"id\":\"a\",\"delta\":\"ab\"}</cfp>z\
                      <cfp>{\"v\":1,\"role\":\"args_complete\",\"id\":\"a\"}</cfp>w";

        let one_shot = feed_all(&[whole]);

        // Split at every single character boundary.
        let chars: Vec<&str> = whole
            .char_indices()
            .map(|(i, c)| &whole[i..i + c.len_utf8()])
            .collect();
        let split_fine = feed_all(&chars);

        assert_eq!(one_shot, split_fine);

        // Split inside the tag delimiters themselves.
        let mid = whole.len() / 2;
        let boundary = (0..=mid).rev().find(|&i| whole.is_char_boundary(i)).unwrap();
        let split_coarse = feed_all(&[&whole[..boundary], &whole[boundary..]]);
        assert_eq!(one_shot, split_coarse);
    }

    #[test]
    fn args_delta_before_call_start_is_dropped() {
        let events = feed_all(&["<cfp>{\"v\":1,\"role\":\"args_delta\",\"id\":\"ghost\",\"delta\":\"x\"}</cfp>"]);
        assert!(events.is_empty());
    }

    #[test]
    fn call_complete_emitted_at_most_once() {
        let text = "<cfp>{\"v\":1,\"role\":\"call\",\"id\":\"a\",\"name\":\"f\"}</cfp>\
                     <cfp>{\"v\":1,\"role\":\"args_complete\",\"id\":\"a\"}</cfp>\
                     <cfp>{\"v\":1,\"role\":\"args_complete\",\"id\":\"a\"}</cfp>";
        let events = feed_all(&[text]);
        let complete_count = events.iter().filter(|e| matches!(e, Event::CallComplete { .. })).count();
        assert_eq!(complete_count, 1);
    }

    #[test]
    fn invalid_accumulated_args_normalize_to_empty_object() {
        let text = "<cfp>{\"v\":1,\"role\":\"call\",\"id\":\"a\",\"name\":\"f\"}</cfp>\
                     <cfp>{\"v\":1,\"role\":\"args_delta\",\"id\":\"a\",\"delta\":\"not json\"}</cfp>\
                     <cfp>{\"v\":1,\"role\":\"args_complete\",\"id\":\"a\"}</cfp>";
        let events = feed_all(&[text]);
        assert!(events.iter().any(|e| matches!(
            e,
            Event::CallComplete { full_args, .. } if full_args == "{}"
        )));
    }

    #[test]
    fn malformed_block_surfaces_as_text() {
        let events = feed_all(&["a <cfp>{not json}</cfp> b"]);
        assert_eq!(
            events,
            vec![
                Event::Text("a ".to_string()),
                Event::Text("<cfp>{not json}</cfp>".to_string()),
                Event::Text(" b".to_string()),
            ]
        );
    }

    #[test]
    fn incomplete_block_retained_until_closing_tag_arrives() {
        let mut parser = CfpStreamParser::new();
        let first = parser.feed("before <cfp>{\"v\":1,\"role\":\"call\"");
        assert_eq!(first, vec![Event::Text("before ".to_string())]);

        let second = parser.feed(",\"id\":\"a\",\"name\":\"f\"}</cfp> after");
        assert_eq!(
            second,
            vec![
                Event::CallStart {
                    id: "a".to_string(),
                    name: "f".to_string(),
                },
                Event::Text(" after".to_string()),
            ]
        );
    }

    #[test]
    fn finalize_emits_residual_buffer_as_text() {
        let mut parser = CfpStreamParser::new();
        assert!(parser.feed("trailing <cfp>{\"v\":1").is_empty());
        let tail = parser.finalize();
        assert_eq!(tail, vec![Event::Text("trailing <cfp>{\"v\":1".to_string())]);
    }

    #[test]
    fn result_event_carries_parsed_payload() {
        let events = feed_all(&["<cfp>{\"v\":1,\"role\":\"result\",\"id\":\"a\",\"result\":{\"ok\":true}}</cfp>"]);
        assert_eq!(
            events,
            vec![Event::Result {
                result: serde_json::json!({"ok": true}),
            }]
        );
    }
}
