use anyhow::{Context, Result, bail};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use crate::config::{Config, HistoryMode};
use crate::events::Conversation;
use crate::llm::{ChatProvider, ChatRequest};
use crate::session::SessionStore;
use crate::storage::SessionStorage;
use crate::streaming::{PumpStatus, StreamPump};

pub fn list_conversations(storage: &dyn SessionStorage, out: &mut impl Write) -> Result<()> {
    let sessions = storage.load().unwrap_or_default();

    if sessions.is_empty() {
        writeln!(out, "No conversations yet. Run 'chatpane' to start one!")?;
        return Ok(());
    }

    writeln!(out, "💬 Your conversations:")?;
    writeln!(out, "{}", "=".repeat(50))?;
    for conversation in &sessions {
        writeln!(out, "{}", summary_line(conversation))?;
    }

    Ok(())
}

fn summary_line(conversation: &Conversation) -> String {
    let updated = chrono::DateTime::from_timestamp_millis(conversation.updated_at)
        .map(|at| at.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "unknown".to_string());
    format!(
        "{}  {}  ({} messages, updated {})",
        conversation.id,
        conversation.title,
        conversation.messages.len(),
        updated
    )
}

/// One-shot exchange printed as it streams
pub async fn ask(
    store: &mut SessionStore,
    provider: Arc<dyn ChatProvider>,
    prompt: &str,
    use_search: bool,
    history_mode: HistoryMode,
    out: &mut impl Write,
) -> Result<()> {
    if prompt.trim().is_empty() {
        bail!("Prompt cannot be empty");
    }
    if !store.active().is_some_and(Conversation::is_empty) {
        store.create_session();
    }
    let Some(exchange) = store.begin_exchange(prompt) else {
        bail!("Could not start a conversation");
    };

    let request = ChatRequest::new(exchange.history.clone(), prompt)
        .with_search_grounding(use_search)
        .with_history_mode(history_mode);
    let mut pump = StreamPump::spawn(provider, request, exchange.clone());

    let mut printed = String::new();
    let status = loop {
        let status = pump.recv(store).await;
        let text = store
            .get(&exchange.conversation_id)
            .and_then(|conversation| conversation.messages.iter().find(|m| m.id == exchange.message_id))
            .filter(|message| !message.is_error)
            .map(|message| message.content.clone())
            .unwrap_or_default();

        match text.strip_prefix(printed.as_str()) {
            Some(rest) => write!(out, "{rest}")?,
            // The model rewrote earlier text; start the answer over.
            None => write!(out, "\n{text}")?,
        }
        out.flush()?;
        printed = text;

        if !status.is_streaming() {
            break status;
        }
    };
    writeln!(out)?;

    if let PumpStatus::Failed(reason) = status {
        bail!("Request failed: {reason}");
    }

    let citations = store
        .get(&exchange.conversation_id)
        .and_then(|conversation| conversation.messages.iter().find(|m| m.id == exchange.message_id))
        .map(|message| message.citations().to_vec())
        .unwrap_or_default();
    if !citations.is_empty() {
        writeln!(out, "\nSources:")?;
        for (n, citation) in citations.iter().enumerate() {
            writeln!(out, "  [{}] {} {}", n + 1, citation.title, citation.uri)?;
        }
    }

    Ok(())
}

pub fn delete_conversation(store: &mut SessionStore, id: &str, out: &mut impl Write) -> Result<()> {
    let Some(conversation) = store.get(id) else {
        bail!("Conversation '{id}' not found. Run 'chatpane list' to see stored conversations.");
    };
    let title = conversation.title.clone();
    store.delete_session(id);
    writeln!(out, "🗑️  Deleted '{title}'")?;
    Ok(())
}

pub fn init_config(path: &Path, out: &mut impl Write) -> Result<()> {
    if path.exists() {
        bail!("Config file {} already exists", path.display());
    }
    Config::default()
        .save(path)
        .with_context(|| format!("Failed to initialize {}", path.display()))?;
    writeln!(out, "✨ Wrote default config to {}", path.display())?;
    Ok(())
}
