//! Session inspection and maintenance subcommands.

use anyhow::Result;
use tokio_util::sync::CancellationToken;

use gatehouse_agent::{CompactionOutcome, TurnEngine};
use gatehouse_core::{ContentType, Message, Store};

use crate::terminal_output::{note_success, paint, render_table, Column, DIM};

/// Longest text shown per history line.
const PREVIEW_CHARS: usize = 240;

pub async fn list(store: &dyn Store, limit: usize) -> Result<()> {
    let sessions = store.list_sessions(limit).await?;
    if sessions.is_empty() {
        println!("No sessions yet.");
        return Ok(());
    }

    let mut rows = Vec::with_capacity(sessions.len());
    for session in &sessions {
        let count = store.message_count(&session.id).await?;
        rows.push(vec![
            session.id.clone(),
            session.agent_id.clone(),
            format!("{}/{}", session.channel, session.peer),
            count.to_string(),
            session.updated_at.format("%Y-%m-%d %H:%M").to_string(),
        ]);
    }
    let columns = [
        Column::left("Session"),
        Column::left("Agent"),
        Column::left("Origin"),
        Column::right("Msgs"),
        Column::left("Updated"),
    ];
    print!("{}", render_table(&columns, &rows));
    Ok(())
}

pub async fn history(store: &dyn Store, session_id: &str, limit: usize) -> Result<()> {
    let messages = store.recent_messages(session_id, limit).await?;
    if messages.is_empty() {
        println!("No messages in session '{session_id}'.");
        return Ok(());
    }
    for message in &messages {
        let stamp = message.created_at.format("%H:%M:%S").to_string();
        println!("{} {}", paint(&stamp, DIM), format_message(message));
    }
    Ok(())
}

pub async fn compact(engine: &TurnEngine, session_id: &str) -> Result<()> {
    match engine.compact_session(&CancellationToken::new(), session_id).await? {
        CompactionOutcome::Skipped { message_count } => {
            println!(
                "Nothing to compact: {message_count} messages (threshold {}).",
                engine.config().compaction.threshold
            );
        }
        CompactionOutcome::Compacted { removed, summary_id } => {
            note_success(&format!("Replaced {removed} messages with summary {summary_id}."));
        }
    }
    Ok(())
}

/// One-line rendering of a stored message.
pub fn format_message(message: &Message) -> String {
    match message.content_type {
        ContentType::Text => format!("{}: {}", message.role, preview(&message.content)),
        ContentType::ToolCalls => {
            let names = match message.tool_calls() {
                Some(Ok(payload)) => payload
                    .tool_calls
                    .iter()
                    .map(|c| c.name.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
                _ => "?".to_string(),
            };
            format!("{} called tools: {names}", message.role)
        }
        ContentType::ToolResults => {
            let (ok, failed) = match message.tool_results_payload() {
                Some(Ok(results)) => {
                    let failed = results.iter().filter(|r| r.is_error).count();
                    (results.len() - failed, failed)
                }
                _ => (0, 0),
            };
            format!("tool results: {ok} ok, {failed} failed")
        }
    }
}

fn preview(text: &str) -> String {
    let flat = text.replace('\n', " ");
    if flat.chars().count() <= PREVIEW_CHARS {
        return flat;
    }
    let cut: String = flat.chars().take(PREVIEW_CHARS).collect();
    format!("{cut}...")
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatehouse_core::{ToolCall, ToolResult};

    #[test]
    fn formats_each_content_type() {
        let text = Message::user_text("s1", "hello\nthere");
        assert_eq!(format_message(&text), "user: hello there");

        let call = ToolCall {
            id: "c1".into(),
            name: "shell".into(),
            input: serde_json::json!({"command": "ls"}),
        };
        let calls = Message::assistant_tool_calls("s1", "", vec![call]).unwrap();
        assert_eq!(format_message(&calls), "assistant called tools: shell");

        let results = Message::tool_results(
            "s1",
            &[ToolResult::success("c1", "ok"), ToolResult::error("c2", "denied")],
        )
        .unwrap();
        assert_eq!(format_message(&results), "tool results: 1 ok, 1 failed");
    }

    #[test]
    fn long_text_is_cut() {
        let long = "x".repeat(PREVIEW_CHARS + 10);
        let rendered = format_message(&Message::assistant_text("s1", long));
        assert!(rendered.ends_with("..."));
        assert_eq!(rendered.chars().count(), "assistant: ".len() + PREVIEW_CHARS + 3);
    }
}
