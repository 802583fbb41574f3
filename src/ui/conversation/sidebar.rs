use crate::events::Conversation;
use ratatui::{
    buffer::Buffer,
    layout::Rect,
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Widget},
};

const ROWS_PER_ENTRY: usize = 2;

/// Conversation list shown beside the history
pub struct SessionList<'a> {
    sessions: &'a [Conversation],
    active_id: Option<&'a str>,
    streaming_id: Option<&'a str>,
}

impl<'a> SessionList<'a> {
    pub fn new(sessions: &'a [Conversation], active_id: Option<&'a str>) -> Self {
        Self {
            sessions,
            active_id,
            streaming_id: None,
        }
    }

    /// Conversation that is currently receiving a reply
    pub fn streaming(mut self, conversation_id: Option<&'a str>) -> Self {
        self.streaming_id = conversation_id;
        self
    }

    fn entry_lines(&self, conversation: &Conversation, width: usize) -> [Line<'static>; 2] {
        let is_active = self.active_id == Some(conversation.id.as_str());
        let is_streaming = self.streaming_id == Some(conversation.id.as_str());

        let marker = if is_active { "▶ " } else { "  " };
        let title: String = conversation.title.chars().take(width.saturating_sub(2)).collect();
        let title_style = if is_active {
            Style::default().fg(Color::Black).bg(Color::Cyan).add_modifier(Modifier::BOLD)
        } else {
            Style::default().fg(Color::White)
        };

        let updated = chrono::DateTime::from_timestamp_millis(conversation.updated_at)
            .map(|at| at.with_timezone(&chrono::Local).format("%b %d %H:%M").to_string())
            .unwrap_or_default();
        let mut meta = vec![Span::styled(
            format!("  {} msgs · {updated}", conversation.messages.len()),
            Style::default().fg(Color::DarkGray),
        )];
        if is_streaming {
            meta.push(Span::styled(" ●", Style::default().fg(Color::Yellow)));
        }

        [
            Line::from(vec![Span::styled(format!("{marker}{title}"), title_style)]),
            Line::from(meta),
        ]
    }
}

impl Widget for SessionList<'_> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let block = Block::default()
            .borders(Borders::ALL)
            .title(format!("📚 Chats ({})", self.sessions.len()));
        let inner = block.inner(area);
        block.render(area, buf);

        let visible_entries = (inner.height as usize / ROWS_PER_ENTRY).max(1);
        let active_index = self
            .sessions
            .iter()
            .position(|conversation| Some(conversation.id.as_str()) == self.active_id)
            .unwrap_or(0);
        // Scroll just far enough to keep the active entry on screen.
        let first = (active_index + 1).saturating_sub(visible_entries);

        let mut y = inner.y;
        for conversation in self.sessions.iter().skip(first).take(visible_entries) {
            for line in self.entry_lines(conversation, inner.width as usize) {
                if y >= inner.y + inner.height {
                    return;
                }
                buf.set_line(inner.x, y, &line, inner.width);
                y += 1;
            }
        }
    }
}
