use crate::config::HistoryMode;
use crate::llm::{ChatProvider, ChatRequest};
use crate::prompts::STARTER_PROMPTS;
use crate::session::SessionStore;
use crate::streaming::{PumpStatus, StreamPump};
use crate::ui::conversation::{
    ComposerResult, ConversationComposer, HistoryView, ParsedCommand, SessionList, SlashCommand,
    StreamingIndicator, get_help_text,
};
use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use ratatui::{
    Frame,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, Paragraph, Wrap},
};
use std::cell::Cell;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

const SIDEBAR_WIDTH: u16 = 30;
const PAGE_LINES: usize = 10;

/// Actions that can be requested by the conversation manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversationAction {
    None,
    Exit,
}

/// Manages the conversation flow and UI components
pub struct ConversationManager {
    store: SessionStore,
    provider: Arc<dyn ChatProvider>,
    composer: ConversationComposer,
    pump: Option<StreamPump>,
    model: String,
    use_search: bool,
    history_mode: HistoryMode,
    /// Lines scrolled up from the bottom of the history
    scroll: usize,
    /// Inner size of the history pane at the last draw
    history_size: Cell<(u16, u16)>,
    notice: Option<String>,
    show_help: bool,
}

impl ConversationManager {
    pub fn new(store: SessionStore, provider: Arc<dyn ChatProvider>, model: impl Into<String>) -> Self {
        Self {
            store,
            provider,
            composer: ConversationComposer::new("Ask anything... (/help for commands)"),
            pump: None,
            model: model.into(),
            use_search: false,
            history_mode: HistoryMode::default(),
            scroll: 0,
            history_size: Cell::new((0, 0)),
            notice: None,
            show_help: false,
        }
    }

    pub fn with_search_grounding(mut self, enabled: bool) -> Self {
        self.use_search = enabled;
        self
    }

    pub fn with_history_mode(mut self, mode: HistoryMode) -> Self {
        self.history_mode = mode;
        self
    }

    #[cfg(test)]
    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Revision receiver of the underlying store
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.store.subscribe()
    }

    pub fn is_streaming(&self) -> bool {
        self.pump.is_some()
    }

    /// Send a prompt from the active conversation
    pub fn send(&mut self, text: &str) {
        if self.pump.is_some() {
            return;
        }
        let Some(exchange) = self.store.begin_exchange(text) else {
            return;
        };

        info!(
            conversation = %exchange.conversation_id,
            search = self.use_search,
            history = %self.history_mode,
            "sending prompt"
        );
        let request = ChatRequest::new(exchange.history.clone(), exchange.user_text.clone())
            .with_search_grounding(self.use_search)
            .with_history_mode(self.history_mode);
        self.pump = Some(StreamPump::spawn(self.provider.clone(), request, exchange));
        self.composer.set_enabled(false);
        self.scroll = 0;
        self.notice = None;
    }

    /// Apply stream updates that have arrived since the last call
    pub fn process_streaming_chunks(&mut self) {
        let Some(pump) = self.pump.as_mut() else {
            return;
        };
        match pump.drain(&mut self.store) {
            PumpStatus::Streaming => {}
            PumpStatus::Finished => self.finish_stream(None),
            PumpStatus::Failed(reason) => self.finish_stream(Some(reason)),
        }
    }

    fn finish_stream(&mut self, failure: Option<String>) {
        self.pump = None;
        self.composer.set_enabled(true);
        if let Some(reason) = failure {
            warn!(%reason, "response failed");
            self.notice = Some(format!("Request failed: {reason}"));
        }
    }

    /// Handle key input
    pub fn handle_key(&mut self, key: KeyEvent) -> ConversationAction {
        if key.kind != KeyEventKind::Press {
            return ConversationAction::None;
        }
        if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
            return ConversationAction::Exit;
        }
        if self.show_help {
            self.show_help = false;
            return ConversationAction::None;
        }

        if key.modifiers.contains(KeyModifiers::CONTROL) {
            match key.code {
                KeyCode::Char('n') => return self.handle_slash_command(SlashCommand::New.into()),
                KeyCode::Char('d') => return self.handle_slash_command(SlashCommand::Delete.into()),
                KeyCode::Char('g') => return self.handle_slash_command(SlashCommand::Search.into()),
                KeyCode::Up => {
                    self.store.select_previous();
                    self.scroll = 0;
                    return ConversationAction::None;
                }
                KeyCode::Down => {
                    self.store.select_next();
                    self.scroll = 0;
                    return ConversationAction::None;
                }
                _ => {}
            }
        }

        match key.code {
            KeyCode::PageUp => {
                self.scroll = (self.scroll + PAGE_LINES).min(self.max_scroll());
                return ConversationAction::None;
            }
            KeyCode::PageDown => {
                self.scroll = self.scroll.saturating_sub(PAGE_LINES);
                return ConversationAction::None;
            }
            KeyCode::F(n @ 1..=4) => {
                self.composer.set_content(STARTER_PROMPTS[n as usize - 1]);
                return ConversationAction::None;
            }
            _ => {}
        }

        match self.composer.handle_key(key) {
            ComposerResult::Submitted(input) => {
                self.send(&input);
                ConversationAction::None
            }
            ComposerResult::Command(command) => self.handle_slash_command(command),
            ComposerResult::Ignored if key.code == KeyCode::Esc => ConversationAction::Exit,
            ComposerResult::None | ComposerResult::Ignored => ConversationAction::None,
        }
    }

    fn max_scroll(&self) -> usize {
        let (width, height) = self.history_size.get();
        self.store
            .active()
            .map(|conversation| HistoryView::new(conversation).max_scroll(width, height))
            .unwrap_or(0)
    }

    /// Handle slash commands
    fn handle_slash_command(&mut self, command: ParsedCommand) -> ConversationAction {
        match command.command {
            SlashCommand::New => {
                self.store.create_session();
                self.scroll = 0;
            }
            SlashCommand::Delete => {
                if let Some(id) = self.store.active_id().map(str::to_string) {
                    self.store.delete_session(&id);
                }
                self.scroll = 0;
            }
            SlashCommand::Search => {
                self.use_search = command.switch_target().unwrap_or(!self.use_search);
                let state = if self.use_search { "on" } else { "off" };
                self.notice = Some(format!("Web search {state}"));
            }
            SlashCommand::History => {
                self.history_mode = command
                    .history_target()
                    .unwrap_or_else(|| self.history_mode.toggled());
                self.notice = Some(format!("History: {}", self.history_mode));
            }
            SlashCommand::Help => self.show_help = true,
            SlashCommand::Bye => return ConversationAction::Exit,
        }
        ConversationAction::None
    }

    /// Draw the whole screen
    pub fn render(&self, frame: &mut Frame) {
        let columns = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Length(SIDEBAR_WIDTH), Constraint::Min(20)])
            .split(frame.size());

        let streaming_id = self.pump.as_ref().map(|pump| pump.exchange().conversation_id.as_str());
        let pending_id = self.pump.as_ref().map(|pump| pump.exchange().message_id.as_str());

        frame.render_widget(
            SessionList::new(self.store.sessions(), self.store.active_id()).streaming(streaming_id),
            columns[0],
        );

        let rows = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Min(3),
                Constraint::Length(1),
                Constraint::Length(self.composer.desired_height()),
            ])
            .split(columns[1]);

        if let Some(conversation) = self.store.active() {
            // Inner size of the bordered pane, minus the scrollbar column.
            self.history_size.set((
                rows[0].width.saturating_sub(3),
                rows[0].height.saturating_sub(2),
            ));
            frame.render_widget(
                HistoryView::new(conversation).pending(pending_id).scroll(self.scroll),
                rows[0],
            );
        }

        self.render_status(frame, rows[1]);
        frame.render_widget(&self.composer, rows[2]);

        if self.show_help {
            let area = centered(frame.size(), 60, 20);
            frame.render_widget(Clear, area);
            frame.render_widget(
                Paragraph::new(get_help_text())
                    .wrap(Wrap { trim: false })
                    .block(
                        Block::default()
                            .borders(Borders::ALL)
                            .title("Help (any key to close)")
                            .style(Style::default().fg(Color::Yellow)),
                    ),
                area,
            );
        }
    }

    fn render_status(&self, frame: &mut Frame, area: Rect) {
        let on_off = |on: bool| if on { "on" } else { "off" };
        let mut spans = vec![
            Span::styled(format!(" {} ", self.model), Style::default().fg(Color::Cyan)),
            Span::styled(
                format!("│ search {} ", on_off(self.use_search)),
                Style::default().fg(if self.use_search { Color::Green } else { Color::DarkGray }),
            ),
            Span::styled(format!("│ history {} ", self.history_mode), Style::default().fg(Color::DarkGray)),
        ];
        if let Some(notice) = &self.notice {
            spans.push(Span::styled(format!("│ {notice}"), Style::default().fg(Color::Yellow)));
        }

        if self.is_streaming() {
            let columns = Layout::default()
                .direction(Direction::Horizontal)
                .constraints([Constraint::Length(24), Constraint::Min(0)])
                .split(area);
            frame.render_widget(&StreamingIndicator::new("Gemini"), columns[0]);
            frame.render_widget(Paragraph::new(Line::from(spans)), columns[1]);
        } else {
            frame.render_widget(Paragraph::new(Line::from(spans)), area);
        }
    }
}

fn centered(area: Rect, width: u16, height: u16) -> Rect {
    let width = width.min(area.width);
    let height = height.min(area.height);
    Rect {
        x: area.x + (area.width - width) / 2,
        y: area.y + (area.height - height) / 2,
        width,
        height,
    }
}
