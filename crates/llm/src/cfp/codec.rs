//! Encoding and recognition of CFP blocks: `<cfp>{JSON}</cfp>` runs embedded
//! in otherwise free-form model text.
//!
//! The delimiter is treated as a literal string, never as markup — there is
//! no HTML/XML parsing anywhere in this module.

use serde_json::{Map, Value, json};

const TAG_OPEN: &str = "<cfp>";
const TAG_CLOSE: &str = "</cfp>";

/// Sentinel role returned by [`parse`] when a payload could not be decoded
/// as JSON even after lenient repair. Distinct from the genuine CFP `error`
/// role, which the protocol itself defines.
pub const PARSE_FAILED_ROLE: &str = "parse_failed";

/// A decoded CFP payload. `role` selects which of the optional fields are
/// meaningful; unrecognized/absent fields are left `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct CfpBlock {
    /// Payload schema version, always `1`.
    pub v: u32,
    /// Block role (`call`, `args_delta`, `args_complete`, `result`, `error`).
    pub role: String,
    /// Call id this block belongs to.
    pub id: String,
    /// Tool name, present on `call`.
    pub name: Option<String>,
    /// Initial args, present on `call`; callers ignore this per the parser's
    /// contract and rely on `args_delta` instead.
    pub args: Option<Value>,
    /// Argument fragment, present on `args_delta`.
    pub delta: Option<String>,
    /// Tool result payload, present on `result`.
    pub result: Option<Value>,
    /// Error payload, present on `error`.
    pub err: Option<Value>,
}

/// Produces the `<cfp>{...}</cfp>` encoding of a block for the given role.
///
/// Only the fields relevant to `role` are emitted in the JSON payload,
/// matching the wire schema in the data model: `name`+`args` for `call`,
/// `result` for `result`, `err` for `error`, `delta` for `args_delta`, and no
/// extra fields for `args_complete`.
pub fn encode(role: &str, id: &str, fields: EncodeFields) -> String {
    let mut payload = Map::new();
    payload.insert("v".to_string(), json!(1));
    payload.insert("role".to_string(), json!(role));
    payload.insert("id".to_string(), json!(id));

    match role {
        "call" => {
            if let Some(name) = fields.name {
                payload.insert("name".to_string(), json!(name));
            }
            payload.insert("args".to_string(), fields.args.unwrap_or_else(|| json!({})));
        }
        "args_delta" => {
            payload.insert("delta".to_string(), json!(fields.delta.unwrap_or_default()));
        }
        "result" => {
            payload.insert("result".to_string(), fields.result.unwrap_or(Value::Null));
        }
        "error" => {
            payload.insert("err".to_string(), fields.err.unwrap_or(Value::Null));
        }
        _ => {}
    }

    format!("{TAG_OPEN}{}{TAG_CLOSE}", Value::Object(payload))
}

/// Optional role-specific fields passed to [`encode`].
#[derive(Debug, Clone, Default)]
pub struct EncodeFields {
    /// Tool name (`call`).
    pub name: Option<String>,
    /// Initial args (`call`); SHOULD be omitted or zeroed per design notes.
    pub args: Option<Value>,
    /// Argument fragment (`args_delta`).
    pub delta: Option<String>,
    /// Result payload (`result`).
    pub result: Option<Value>,
    /// Error payload (`error`).
    pub err: Option<Value>,
}

/// Convenience constructor for the common `call` shape.
pub fn encode_call(id: &str, name: &str) -> String {
    encode(
        "call",
        id,
        EncodeFields {
            name: Some(name.to_string()),
            ..Default::default()
        },
    )
}

/// Convenience constructor for `args_delta`.
pub fn encode_args_delta(id: &str, delta: &str) -> String {
    encode(
        "args_delta",
        id,
        EncodeFields {
            delta: Some(delta.to_string()),
            ..Default::default()
        },
    )
}

/// Convenience constructor for `args_complete`.
pub fn encode_args_complete(id: &str) -> String {
    encode("args_complete", id, EncodeFields::default())
}

/// Convenience constructor for `result`.
pub fn encode_result(id: &str, result: Value) -> String {
    encode(
        "result",
        id,
        EncodeFields {
            result: Some(result),
            ..Default::default()
        },
    )
}

/// Convenience constructor for `error`.
pub fn encode_error(id: &str, err: Value) -> String {
    encode(
        "error",
        id,
        EncodeFields {
            err: Some(err),
            ..Default::default()
        },
    )
}

/// A located, still-raw CFP payload string within some text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedBlock {
    /// Raw text between the delimiters (not yet JSON-parsed).
    pub payload: String,
    /// Byte offset of the start of `<cfp>`.
    pub start: usize,
    /// Byte offset just past the end of `</cfp>`.
    pub end: usize,
}

/// Finds all complete, well-formed `<cfp>…</cfp>` runs in `text`, in order of
/// appearance. Scanning is non-greedy: each `<cfp>` is paired with the
/// nearest following `</cfp>`.
pub fn extract_blocks(text: &str) -> Vec<ExtractedBlock> {
    let mut blocks = Vec::new();
    let mut cursor = 0;

    while let Some(open_rel) = text[cursor..].find(TAG_OPEN) {
        let open_start = cursor + open_rel;
        let payload_start = open_start + TAG_OPEN.len();

        let Some(close_rel) = text[payload_start..].find(TAG_CLOSE) else {
            break;
        };
        let payload_end = payload_start + close_rel;
        let block_end = payload_end + TAG_CLOSE.len();

        blocks.push(ExtractedBlock {
            payload: text[payload_start..payload_end].to_string(),
            start: open_start,
            end: block_end,
        });

        cursor = block_end;
    }

    blocks
}

/// Parses a raw CFP payload string into a [`CfpBlock`].
///
/// Attempts a strict JSON parse first; on failure, attempts a lenient
/// repair (closing unterminated strings and balancing brackets) and
/// retries. If both fail, returns a block under the sentinel role
/// [`PARSE_FAILED_ROLE`] carrying the raw text, so callers always get
/// something to surface as text instead of a panic or a silently dropped
/// block.
pub fn parse(payload: &str) -> CfpBlock {
    let value = serde_json::from_str::<Value>(payload.trim())
        .ok()
        .or_else(|| serde_json::from_str::<Value>(&repair(payload.trim())).ok());

    let Some(Value::Object(obj)) = value else {
        return CfpBlock {
            v: 1,
            role: PARSE_FAILED_ROLE.to_string(),
            id: String::new(),
            name: None,
            args: None,
            delta: None,
            result: None,
            err: Some(json!({"raw": payload})),
        };
    };

    CfpBlock {
        v: obj.get("v").and_then(Value::as_u64).unwrap_or(1) as u32,
        role: obj.get("role").and_then(Value::as_str).unwrap_or_default().to_string(),
        id: obj.get("id").and_then(Value::as_str).unwrap_or_default().to_string(),
        name: obj.get("name").and_then(Value::as_str).map(str::to_string),
        args: obj.get("args").cloned(),
        delta: obj.get("delta").and_then(Value::as_str).map(str::to_string),
        result: obj.get("result").cloned(),
        err: obj.get("err").cloned(),
    }
}

/// Attempts to repair truncated JSON by closing unterminated strings and
/// balancing brackets, tracking string/escape state so structural
/// characters embedded inside string literals are not counted.
fn repair(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len() + 8);
    let mut stack = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for ch in raw.chars() {
        out.push(ch);

        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }

        match ch {
            '"' => in_string = true,
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                stack.pop();
            }
            _ => {}
        }
    }

    if in_string {
        out.push('"');
    }
    while let Some(closer) = stack.pop() {
        out.push(closer);
    }

    out
}

/// True if `text` contains at least one complete `<cfp>…</cfp>` run.
pub fn has_blocks(text: &str) -> bool {
    !extract_blocks(text).is_empty()
}

/// Removes every complete CFP block from `text`, leaving surrounding text
/// untouched.
pub fn strip_blocks(text: &str) -> String {
    let blocks = extract_blocks(text);
    if blocks.is_empty() {
        return text.to_string();
    }

    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    for block in blocks {
        out.push_str(&text[cursor..block.start]);
        cursor = block.end;
    }
    out.push_str(&text[cursor..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_call_has_v1_role_id_and_empty_args() {
        let raw = encode_call("a1", "search");
        assert!(raw.starts_with(TAG_OPEN));
        assert!(raw.ends_with(TAG_CLOSE));

        let block = parse(&extract_blocks(&raw)[0].payload);
        assert_eq!(block.v, 1);
        assert_eq!(block.role, "call");
        assert_eq!(block.id, "a1");
        assert_eq!(block.name.as_deref(), Some("search"));
    }

    #[test]
    fn round_trip_law_encode_extract_parse() {
        let raw = encode_args_delta("x", "{\"q\":1}");
        let extracted = extract_blocks(&raw);
        assert_eq!(extracted.len(), 1);

        let block = parse(&extracted[0].payload);
        assert_eq!(block.role, "args_delta");
        assert_eq!(block.id, "x");
        assert_eq!(block.delta.as_deref(), Some("{\"q\":1}"));
    }

    #[test]
    fn extract_blocks_finds_multiple_in_sequence() {
        let text = format!(
            "prefix{TAG_OPEN}{{\"a\":1}}{TAG_CLOSE}mid{TAG_OPEN}{{\"b\":2}}{TAG_CLOSE}suffix",
        );
        let blocks = extract_blocks(&text);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].payload, "{\"a\":1}");
        assert_eq!(blocks[1].payload, "{\"b\":2}");
    }

    #[test]
    fn extract_blocks_ignores_unterminated_open_tag() {
        let text = format!("before{TAG_OPEN}{{\"a\":1}}");
        assert!(extract_blocks(&text).is_empty());
    }

    #[test]
    fn parse_recovers_truncated_json_via_repair() {
        let block = parse("{\"v\":1,\"role\":\"args_delta\",\"id\":\"a\",\"delta\":\"oops");
        assert_eq!(block.role, "args_delta");
        assert_eq!(block.delta.as_deref(), Some("oops"));
    }

    #[test]
    fn parse_falls_back_to_sentinel_role_on_total_garbage() {
        let block = parse("not json at all {{{");
        assert_eq!(block.role, PARSE_FAILED_ROLE);
        assert!(block.err.is_some());
    }

    #[test]
    fn has_blocks_and_strip_blocks_agree() {
        let text = format!("a{TAG_OPEN}{{\"v\":1}}{TAG_CLOSE}b");
        assert!(has_blocks(&text));
        assert_eq!(strip_blocks(&text), "ab");
        assert!(!has_blocks("no tags here"));
    }

    #[test]
    fn delimiters_are_literal_not_markup() {
        let text = "<cfp class=\"x\">{\"v\":1}</cfp>";
        // The literal string "<cfp>" does not appear, so no block is found —
        // this is intentional: the delimiter is a fixed string, not a tag
        // with attributes.
        assert!(extract_blocks(text).is_empty());
    }
}
