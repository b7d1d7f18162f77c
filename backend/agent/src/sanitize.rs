//! Outbound history repair.
//!
//! Providers reject a tool-call message that is not immediately answered
//! by its results, and results with no preceding call. Storage can hold
//! such orphans (a turn that died mid-loop, a compaction boundary), so
//! they are dropped here before every provider call. Storage is untouched.

use gatehouse_core::{ContentType, Message};
use tracing::debug;

/// True when `results` answers exactly the calls in `calls`.
fn answers(calls: &Message, results: &Message) -> bool {
    if results.content_type != ContentType::ToolResults {
        return false;
    }
    match (calls.call_ids(), results.call_ids()) {
        (Some(mut call_ids), Some(mut result_ids)) if !call_ids.is_empty() => {
            call_ids.sort();
            result_ids.sort();
            call_ids == result_ids
        }
        _ => false,
    }
}

pub fn sanitize_messages(messages: &[Message]) -> Vec<Message> {
    let mut out = Vec::with_capacity(messages.len());
    let mut i = 0;
    while i < messages.len() {
        let msg = &messages[i];
        match msg.content_type {
            ContentType::Text => {
                out.push(msg.clone());
                i += 1;
            }
            ContentType::ToolCalls => match messages.get(i + 1) {
                Some(next) if answers(msg, next) => {
                    out.push(msg.clone());
                    out.push(next.clone());
                    i += 2;
                }
                _ => {
                    debug!(message_id = %msg.id, "Dropping tool call without matching results");
                    i += 1;
                }
            },
            ContentType::ToolResults => {
                debug!(message_id = %msg.id, "Dropping tool results without preceding call");
                i += 1;
            }
        }
    }
    out
}
