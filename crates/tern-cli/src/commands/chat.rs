//! `tern chat`

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tern_client::{
    AssistantMessageState, ChatSession, ClientConfig, FailureAction, HttpTransport, MessageStatus,
    StaticToken,
};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};

/// One line typed at the prompt
#[derive(Debug, PartialEq)]
enum Input {
    Message(String),
    /// `/new`: forget the conversation
    NewConversation,
}

pub async fn run(
    config: &ClientConfig,
    thread: Option<String>,
    images: &[PathBuf],
    message: Option<String>,
) -> anyhow::Result<()> {
    let tokens = match config.resolve_token() {
        Some(token) => StaticToken::new(token),
        None => StaticToken::none(),
    };
    let mut session = ChatSession::new(
        Arc::new(HttpTransport::new(&config.relay_url)),
        Arc::new(tokens),
    )
    .with_config(config.session());
    if let Some(thread) = thread {
        session = session.resume(thread.into());
    }

    let mut images = images
        .iter()
        .map(|p| image_data_uri(p))
        .collect::<anyhow::Result<Vec<_>>>()?;

    if let Some(message) = message {
        send_and_render(&session, message, images).await?;
        return Ok(());
    }

    if io::IsTerminal::is_terminal(&io::stderr()) {
        eprintln!("tern chat ({}), ctrl-c cancels a reply, ctrl-d exits", config.relay_url);
        eprintln!();
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(input) = next_input(&mut lines).await? {
        match input {
            Input::NewConversation => {
                session.reset();
                println!("[new conversation]");
            }
            Input::Message(text) => {
                // Attachments go with the first message only
                send_and_render(&session, text, std::mem::take(&mut images)).await?;
            }
        }
    }

    if let Some(conversation) = session.conversation() {
        eprintln!("conversation: {}", conversation);
    }
    Ok(())
}

/// Prompt until a non-blank line arrives; `None` at EOF
async fn next_input<R>(lines: &mut Lines<R>) -> io::Result<Option<Input>>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        print!("> ");
        io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            return Ok(None);
        };
        match line.trim() {
            "" => continue,
            "/new" => return Ok(Some(Input::NewConversation)),
            text => return Ok(Some(Input::Message(text.to_string()))),
        }
    }
}

/// Send one message and print the reply as it streams
async fn send_and_render(
    session: &ChatSession,
    message: String,
    images: Vec<String>,
) -> anyhow::Result<AssistantMessageState> {
    let mut rx = session.subscribe();
    let handle = session.send(message, images)?;
    let id = handle.id();
    let mut printed = 0;

    let render = async {
        loop {
            let snapshot = rx.borrow_and_update().clone();
            if let Some(state) = snapshot.filter(|s| s.id == id) {
                print_new_text(&state.text, &mut printed);
                if state.is_terminal() {
                    break;
                }
            }
            if rx.changed().await.is_err() {
                break;
            }
        }
    };

    tokio::select! {
        _ = render => {}
        _ = tokio::signal::ctrl_c() => session.cancel(),
    }

    let state = handle.wait().await;
    print_new_text(&state.text, &mut printed);
    println!();
    print_footer(&state);
    Ok(state)
}

fn print_new_text(text: &str, printed: &mut usize) {
    if let Some(rest) = text.get(*printed..) {
        if !rest.is_empty() {
            print!("{}", rest);
            let _ = io::stdout().flush();
        }
    }
    *printed = text.len();
}

fn print_footer(state: &AssistantMessageState) {
    for (n, annotation) in state.annotations.iter().enumerate() {
        match annotation.quote.as_deref() {
            Some(quote) => println!("[{}] {}: \"{}\"", n + 1, annotation.label, quote),
            None => println!("[{}] {} ({})", n + 1, annotation.label, annotation.locator),
        }
    }

    match state.status {
        MessageStatus::Complete => {
            if let Some(usage) = state.usage {
                println!(
                    "\n[Tokens: {} in, {} out | {} ms]",
                    usage.prompt_tokens, usage.completion_tokens, usage.duration_ms
                );
            }
        }
        MessageStatus::Cancelled => eprintln!("[cancelled]"),
        MessageStatus::Errored => {
            if let Some(ref error) = state.error {
                eprintln!("Error: {}", error);
                if let tern_client::Error::InvalidArgument { details, .. } = error {
                    for detail in details {
                        match detail.index {
                            Some(i) => eprintln!("  image {}: {}", i + 1, detail.reason),
                            None => eprintln!("  {}", detail.reason),
                        }
                    }
                }
            }
            match state.failure_action() {
                FailureAction::Retry => eprintln!("(temporary failure, send the message again to retry)"),
                FailureAction::Reauthenticate => eprintln!("(sign in again or refresh TERN_TOKEN)"),
                FailureAction::None => {}
            }
        }
        MessageStatus::Pending | MessageStatus::Streaming => {}
    }
}

/// Read an image file into a `data:` URI
fn image_data_uri(path: &Path) -> anyhow::Result<String> {
    let bytes = std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    // Unknown types are sent as-is and rejected by the relay
    let mime = match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        _ => "application/octet-stream",
    };
    Ok(format!("data:{};base64,{}", mime, STANDARD.encode(bytes)))
}
