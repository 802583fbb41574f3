//! Conversation UI components for chat interface

pub mod commands;
pub mod composer;
pub mod history;
pub mod manager;
pub mod sidebar;
pub mod streaming;

pub use commands::{ParsedCommand, SlashCommand, get_help_text};
pub use composer::{ComposerResult, ConversationComposer};
pub use history::HistoryView;
pub use manager::{ConversationAction, ConversationManager};
pub use sidebar::SessionList;
pub use streaming::StreamingIndicator;
