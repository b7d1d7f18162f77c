//! Interactive chat REPL.
//!
//! Streams tokens as they arrive, prints tool activity, and answers
//! approval prompts from the same stdin. Ctrl-C cancels the running turn.

use std::io::Write;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

use gatehouse_agent::{TurnContext, TurnEngine};
use gatehouse_core::{ApprovalRequest, ApprovalResponse, SessionOrigin, ToolCall, ToolResult, TurnEvent};

use crate::terminal_output::{note_error, note_warn, paint, stream_write, BOLD, CYAN, DIM, YELLOW};

/// Characters of tool input/output echoed to the terminal.
const ECHO_CHARS: usize = 160;

pub async fn run(engine: &TurnEngine, session_id: &str, origin: SessionOrigin) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = std::io::stdout();

    println!(
        "{} session {} ({} approvals). /exit to quit, Ctrl-C cancels a reply.",
        paint("gatehouse", BOLD),
        paint(session_id, CYAN),
        engine.approver().mode()
    );

    loop {
        stream_write(&mut stdout, "\n> ")?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if matches!(input, "/exit" | "/quit") {
            break;
        }

        let cancel = CancellationToken::new();
        let ctx = TurnContext::new(cancel.clone()).with_origin(origin.clone());
        let mut rx = match engine.run_turn(ctx, session_id, input).await {
            Ok(rx) => rx,
            Err(e) => {
                note_error(&format!("Could not start turn: {e}"));
                continue;
            }
        };

        loop {
            let event = tokio::select! {
                event = rx.recv() => event,
                _ = tokio::signal::ctrl_c() => {
                    cancel.cancel();
                    continue;
                }
            };
            let Some(event) = event else { break };

            match event {
                TurnEvent::Token { text } => stream_write(&mut stdout, &text)?,
                TurnEvent::ToolCall { call } => println!("\n{}", paint(&describe_call(&call), DIM)),
                TurnEvent::ToolResult { result } => println!("{}", paint(&describe_result(&result), DIM)),
                TurnEvent::ApprovalNeeded { request } => {
                    let prompt = format!("Allow {}? [y/N] ", describe_request(&request));
                    stream_write(&mut stdout, &paint(&prompt, YELLOW))?;
                    let answer = lines.next_line().await?.unwrap_or_default();
                    let approved = parse_verdict(&answer);
                    if !engine.approver().respond(ApprovalResponse {
                        id: request.id,
                        approved,
                    }) {
                        note_warn("That request was already resolved.");
                    }
                }
                TurnEvent::Done { usage, .. } => {
                    println!();
                    let summary = format!("[{} in / {} out tokens]", usage.input_tokens, usage.output_tokens);
                    println!("{}", paint(&summary, DIM));
                }
                TurnEvent::Error { message } => {
                    println!();
                    note_error(&message);
                }
            }
        }
        stdout.flush()?;
    }
    Ok(())
}

/// `y` or `yes`, case-insensitive. Anything else denies.
pub fn parse_verdict(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

fn clip(text: &str) -> String {
    let flat = text.trim().replace('\n', " ");
    if flat.chars().count() <= ECHO_CHARS {
        flat
    } else {
        let cut: String = flat.chars().take(ECHO_CHARS).collect();
        format!("{cut}...")
    }
}

pub fn describe_call(call: &ToolCall) -> String {
    format!("-> {} {}", call.name, clip(&call.input.to_string()))
}

pub fn describe_result(result: &ToolResult) -> String {
    let marker = if result.is_error { "<- error:" } else { "<-" };
    format!("{marker} {}", clip(&result.content))
}

pub fn describe_request(request: &ApprovalRequest) -> String {
    format!("{} {}", request.tool_name, clip(&request.input.to_string()))
}
