use std::str::FromStr;

use strum::{AsRefStr, EnumIter, EnumString, IntoEnumIterator, IntoStaticStr};

use crate::config::HistoryMode;

/// Commands that can be invoked by starting a message with a leading slash.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, EnumIter, AsRefStr, IntoStaticStr,
)]
#[strum(serialize_all = "kebab-case")]
pub enum SlashCommand {
    /// Start a new conversation
    New,
    /// Delete the current conversation
    Delete,
    /// Toggle web search grounding
    Search,
    /// Choose whether earlier turns are sent with each prompt
    History,
    /// Show help
    Help,
    /// Exit the application
    Bye,
}

pub fn command_entries() -> Vec<CommandEntry> {
    SlashCommand::iter()
        .map(|command| CommandEntry {
            keyword: command.command(),
            description: command.description(),
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    pub command: SlashCommand,
    pub argument: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandEntry {
    pub keyword: &'static str,
    pub description: &'static str,
}

impl From<SlashCommand> for ParsedCommand {
    fn from(command: SlashCommand) -> Self {
        Self {
            command,
            argument: None,
        }
    }
}

impl ParsedCommand {
    pub fn argument(&self) -> Option<&str> {
        self.argument.as_deref()
    }

    /// Explicit on/off argument of `/search`; `None` means toggle
    pub fn switch_target(&self) -> Option<bool> {
        match self.argument()?.trim().to_lowercase().as_str() {
            "on" | "true" | "yes" | "1" => Some(true),
            "off" | "false" | "no" | "0" => Some(false),
            _ => None,
        }
    }

    /// Explicit argument of `/history`; `None` means toggle
    pub fn history_target(&self) -> Option<HistoryMode> {
        if self.command != SlashCommand::History {
            return None;
        }
        match self.argument()?.trim().to_lowercase().as_str() {
            "full" | "on" => Some(HistoryMode::Full),
            "none" | "off" | "fresh" => Some(HistoryMode::None),
            _ => None,
        }
    }
}

impl SlashCommand {
    /// User-visible description shown in help.
    pub fn description(self) -> &'static str {
        match self {
            SlashCommand::New => "start a new conversation",
            SlashCommand::Delete => "delete the current conversation",
            SlashCommand::Search => "toggle web search grounding (on|off)",
            SlashCommand::History => "send earlier turns with each prompt (full|none)",
            SlashCommand::Help => "show available commands and keys",
            SlashCommand::Bye => "exit the application",
        }
    }

    /// Only these commands may be followed by more text.
    pub fn takes_argument(self) -> bool {
        matches!(self, SlashCommand::Search | SlashCommand::History)
    }

    /// Command string without the leading '/'.
    pub fn command(self) -> &'static str {
        self.into()
    }
}

/// Parse a slash command from user input
pub fn parse_slash_command(input: &str) -> Option<ParsedCommand> {
    let rest = input.trim().strip_prefix('/')?;

    let mut parts = rest.split_whitespace();
    let head = parts.next()?;
    let tail: Vec<&str> = parts.collect();

    let command = SlashCommand::from_str(head).ok().or_else(|| match head.to_lowercase().as_str() {
        "q" | "quit" | "exit" => Some(SlashCommand::Bye),
        "n" | "clear" => Some(SlashCommand::New),
        "rm" | "del" => Some(SlashCommand::Delete),
        "web" | "grounding" => Some(SlashCommand::Search),
        "?" | "h" => Some(SlashCommand::Help),
        _ => None,
    })?;

    let argument = if tail.is_empty() {
        None
    } else if command.takes_argument() {
        Some(tail.join(" "))
    } else {
        // "/delete the duplicated lines" is a prompt, not a command.
        return None;
    };

    Some(ParsedCommand { command, argument })
}

/// Get help text for all available commands
pub fn get_help_text() -> String {
    let mut help = String::from("Commands:\n");
    for entry in command_entries() {
        help.push_str(&format!("  /{:<8} {}\n", entry.keyword, entry.description));
    }

    help.push_str("\nKeys:\n");
    for (key, action) in KEY_BINDINGS {
        help.push_str(&format!("  {key:<16} {action}\n"));
    }
    help
}

const KEY_BINDINGS: [(&str, &str); 9] = [
    ("Enter", "send"),
    ("Shift/Alt+Enter", "new line"),
    ("Ctrl+N", "new conversation"),
    ("Ctrl+D", "delete conversation"),
    ("Ctrl+Up/Down", "switch conversation"),
    ("PageUp/PageDown", "scroll history"),
    ("Ctrl+G", "toggle web search"),
    ("F1-F4", "use a suggested prompt"),
    ("Esc / Ctrl+C", "quit"),
];
