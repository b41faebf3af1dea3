//! Upstream streaming chunks → Anthropic SSE event sequence (component F).
//!
//! The most intricate component: it drives the CFP parser inline while
//! bookkeeping which content-block index each open text/tool-use block
//! occupies, so that the emitted event sequence always satisfies the block
//! index discipline in the data model. Frames are produced incrementally —
//! as each upstream chunk arrives, not once the whole stream has ended — so
//! that tool calls surface to the downstream client as soon as the CFP
//! parser or native `tool_calls` delta resolves them.

use std::collections::{HashMap, VecDeque};

use futures::{Stream, StreamExt, stream};
use uuid::Uuid;

use crate::{
    cfp::{CfpStreamParser, Event as CfpEvent},
    error::Result,
    types::{ContentBlock, ContentDelta, MessageDelta, Role, StopReason, StreamEvent, StreamMessageStart, Usage},
    upstream::UpstreamChunk,
};

/// One SSE frame: an `event:` name paired with its JSON `data:` payload.
#[derive(Debug, Clone)]
pub struct SseFrame {
    /// SSE `event:` line value.
    pub event: &'static str,
    /// Anthropic event payload, already matching `event` via its own
    /// internal `type` tag.
    pub data: StreamEvent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockKind {
    Text,
    ToolUse,
}

struct OpenBlocks {
    text_index: Option<u32>,
    next_index: u32,
    open: Vec<(u32, BlockKind)>,
    call_index: HashMap<String, u32>,
}

impl OpenBlocks {
    fn new() -> Self {
        Self {
            text_index: None,
            next_index: 0,
            open: Vec::new(),
            call_index: HashMap::new(),
        }
    }

    fn open_text(&mut self, frames: &mut VecDeque<SseFrame>) -> u32 {
        if let Some(index) = self.text_index {
            return index;
        }
        let index = self.next_index;
        self.next_index += 1;
        self.text_index = Some(index);
        self.open.push((index, BlockKind::Text));
        frames.push_back(SseFrame {
            event: "content_block_start",
            data: StreamEvent::ContentBlockStart {
                index,
                content_block: ContentBlock::Text { text: String::new() },
            },
        });
        index
    }

    fn close_text_if_open(&mut self, frames: &mut VecDeque<SseFrame>) {
        if let Some(index) = self.text_index.take() {
            self.open.retain(|(i, _)| *i != index);
            frames.push_back(SseFrame {
                event: "content_block_stop",
                data: StreamEvent::ContentBlockStop { index },
            });
        }
    }

    fn open_tool_use(&mut self, id: &str, name: &str, frames: &mut VecDeque<SseFrame>) -> u32 {
        self.close_text_if_open(frames);
        let index = self.next_index;
        self.next_index += 1;
        self.open.push((index, BlockKind::ToolUse));
        frames.push_back(SseFrame {
            event: "content_block_start",
            data: StreamEvent::ContentBlockStart {
                index,
                content_block: ContentBlock::ToolUse {
                    id: id.to_string(),
                    name: name.to_string(),
                    input: serde_json::Value::Object(Default::default()),
                },
            },
        });
        index
    }

    fn close_index(&mut self, index: u32, frames: &mut VecDeque<SseFrame>) {
        if self.open.iter().any(|(i, _)| *i == index) {
            self.open.retain(|(i, _)| *i != index);
            frames.push_back(SseFrame {
                event: "content_block_stop",
                data: StreamEvent::ContentBlockStop { index },
            });
        }
    }

    /// Closes every still-open block, most-recently-opened first.
    fn close_all(&mut self, frames: &mut VecDeque<SseFrame>) {
        let mut remaining = std::mem::take(&mut self.open);
        remaining.reverse();
        for (index, kind) in remaining {
            if kind == BlockKind::Text {
                self.text_index = None;
            }
            frames.push_back(SseFrame {
                event: "content_block_stop",
                data: StreamEvent::ContentBlockStop { index },
            });
        }
    }

    fn any_tool_use_opened(&self) -> bool {
        !self.call_index.is_empty() || self.open.iter().any(|(_, k)| *k == BlockKind::ToolUse)
    }
}

struct StreamState<S> {
    chunks: S,
    pending: VecDeque<SseFrame>,
    parser: Option<CfpStreamParser>,
    blocks: OpenBlocks,
    native_tool_index: HashMap<u32, u32>,
    last_finish_reason: Option<String>,
    last_usage: Option<Usage>,
    any_tool_use: bool,
    had_error: bool,
    finished: bool,
}

/// Translates an upstream chunk stream into an incremental Anthropic SSE
/// frame stream, driving the CFP parser inline when `cfp_enabled`.
pub fn translate_stream<S>(chunks: S, caller_model: String, cfp_enabled: bool) -> impl Stream<Item = SseFrame>
where
    S: Stream<Item = Result<UpstreamChunk>> + Unpin,
{
    let mut pending = VecDeque::new();
    pending.push_back(SseFrame {
        event: "message_start",
        data: StreamEvent::MessageStart {
            message: StreamMessageStart {
                id: format!("msg_{}", Uuid::new_v4()),
                message_type: "message".to_string(),
                role: Role::Assistant,
                content: Vec::new(),
                model: caller_model,
                usage: Usage::default(),
            },
        },
    });

    let state = StreamState {
        chunks,
        pending,
        parser: cfp_enabled.then(CfpStreamParser::new),
        blocks: OpenBlocks::new(),
        native_tool_index: HashMap::new(),
        last_finish_reason: None,
        last_usage: None,
        any_tool_use: false,
        had_error: false,
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(frame) = state.pending.pop_front() {
                return Some((frame, state));
            }
            if state.finished {
                return None;
            }

            match state.chunks.next().await {
                Some(Ok(chunk)) => {
                    process_chunk(&mut state, chunk);
                    if state.last_finish_reason.is_some() {
                        finalize_stream(&mut state);
                    }
                }
                Some(Err(err)) => {
                    log::warn!("error inside upstream stream: {err}");
                    state.had_error = true;
                    finalize_stream(&mut state);
                }
                None => finalize_stream(&mut state),
            }
        }
    })
}

fn process_chunk<S>(state: &mut StreamState<S>, chunk: UpstreamChunk) {
    if let Some(usage) = chunk.usage {
        state.last_usage = Some(Usage {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
            cache_creation_input_tokens: 0,
            cache_read_input_tokens: 0,
        });
    }

    for choice in chunk.choices {
        if let Some(finish_reason) = choice.finish_reason {
            state.last_finish_reason = Some(finish_reason);
        }

        let content = choice.delta.content.unwrap_or_default();

        if let Some(parser) = state.parser.as_mut() {
            if !content.is_empty() {
                for event in parser.feed(&content) {
                    apply_cfp_event(event, &mut state.blocks, &mut state.pending, &mut state.any_tool_use);
                }
            }
        } else if !content.is_empty() {
            let index = state.blocks.open_text(&mut state.pending);
            state.pending.push_back(SseFrame {
                event: "content_block_delta",
                data: StreamEvent::ContentBlockDelta {
                    index,
                    delta: ContentDelta::TextDelta { text: content },
                },
            });
        }

        if state.parser.is_none() {
            for call in choice.delta.tool_calls.unwrap_or_default() {
                let already_open = state.native_tool_index.contains_key(&call.index);
                let index = if already_open {
                    state.native_tool_index[&call.index]
                } else {
                    state.any_tool_use = true;
                    let id = call.id.clone().unwrap_or_else(|| format!("toolu_{}", Uuid::new_v4()));
                    let name = call.function.as_ref().and_then(|f| f.name.clone()).unwrap_or_default();
                    let index = state.blocks.open_tool_use(&id, &name, &mut state.pending);
                    state.native_tool_index.insert(call.index, index);
                    index
                };

                if let Some(arguments) = call.function.and_then(|f| f.arguments) {
                    if !arguments.is_empty() {
                        state.pending.push_back(SseFrame {
                            event: "content_block_delta",
                            data: StreamEvent::ContentBlockDelta {
                                index,
                                delta: ContentDelta::InputJsonDelta { partial_json: arguments },
                            },
                        });
                    }
                }
            }
        }
    }
}

fn finalize_stream<S>(state: &mut StreamState<S>) {
    if state.finished {
        return;
    }
    state.finished = true;

    if let Some(parser) = state.parser.take() {
        for event in parser.finalize() {
            apply_cfp_event(event, &mut state.blocks, &mut state.pending, &mut state.any_tool_use);
        }
    }

    state.blocks.close_all(&mut state.pending);

    let stop_reason = if state.had_error {
        StopReason::Error
    } else if state.any_tool_use || state.blocks.any_tool_use_opened() {
        StopReason::ToolUse
    } else {
        map_finish_reason(state.last_finish_reason.as_deref())
    };

    let usage = if state.had_error {
        Usage::default()
    } else {
        state.last_usage.unwrap_or_default()
    };

    state.pending.push_back(SseFrame {
        event: "message_delta",
        data: StreamEvent::MessageDelta {
            delta: MessageDelta {
                stop_reason: Some(stop_reason),
                stop_sequence: None,
            },
            usage,
        },
    });

    state.pending.push_back(SseFrame {
        event: "message_stop",
        data: StreamEvent::MessageStop,
    });
}

fn apply_cfp_event(event: CfpEvent, blocks: &mut OpenBlocks, frames: &mut VecDeque<SseFrame>, any_tool_use: &mut bool) {
    match event {
        CfpEvent::Text(text) => {
            if text.is_empty() {
                return;
            }
            let index = blocks.open_text(frames);
            frames.push_back(SseFrame {
                event: "content_block_delta",
                data: StreamEvent::ContentBlockDelta {
                    index,
                    delta: ContentDelta::TextDelta { text },
                },
            });
        }
        CfpEvent::CallStart { id, name } => {
            *any_tool_use = true;
            let index = blocks.open_tool_use(&id, &name, frames);
            blocks.call_index.insert(id, index);
        }
        CfpEvent::ArgsDelta { id, delta } => {
            if let Some(&index) = blocks.call_index.get(&id) {
                frames.push_back(SseFrame {
                    event: "content_block_delta",
                    data: StreamEvent::ContentBlockDelta {
                        index,
                        delta: ContentDelta::InputJsonDelta { partial_json: delta },
                    },
                });
            }
        }
        CfpEvent::CallComplete { id, .. } => {
            if let Some(index) = blocks.call_index.remove(&id) {
                blocks.close_index(index, frames);
            }
        }
        CfpEvent::Result { result } => {
            let text = result.to_string();
            if text.is_empty() {
                return;
            }
            let index = blocks.open_text(frames);
            frames.push_back(SseFrame {
                event: "content_block_delta",
                data: StreamEvent::ContentBlockDelta {
                    index,
                    delta: ContentDelta::TextDelta { text },
                },
            });
        }
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
