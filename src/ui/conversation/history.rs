//! Conversation history display component

use crate::events::{Conversation, Message, Role};
use crate::prompts::STARTER_PROMPTS;
use crate::ui::conversation::streaming::StreamingIndicator;
use ratatui::{
    buffer::Buffer,
    layout::Rect,
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{
        Block, Borders, Scrollbar, ScrollbarOrientation, ScrollbarState, StatefulWidget, Widget,
    },
};

/// Read-only view of one conversation, bottom-anchored
pub struct HistoryView<'a> {
    conversation: &'a Conversation,
    pending: Option<&'a str>,
    scroll: usize,
    indicator: StreamingIndicator,
}

impl<'a> HistoryView<'a> {
    pub fn new(conversation: &'a Conversation) -> Self {
        Self {
            conversation,
            pending: None,
            scroll: 0,
            indicator: StreamingIndicator::new("Gemini"),
        }
    }

    /// Id of the model message still being streamed into
    pub fn pending(mut self, message_id: Option<&'a str>) -> Self {
        self.pending = message_id;
        self
    }

    /// Lines scrolled up from the bottom
    pub fn scroll(mut self, scroll: usize) -> Self {
        self.scroll = scroll;
        self
    }

    /// Furthest the view can scroll for a given inner size
    pub fn max_scroll(&self, width: u16, height: u16) -> usize {
        self.lines(width).len().saturating_sub(height as usize)
    }

    /// Every rendered line for the given inner width
    pub fn lines(&self, width: u16) -> Vec<Line<'static>> {
        if self.conversation.is_empty() {
            return welcome_lines();
        }

        let mut lines = Vec::new();
        for message in &self.conversation.messages {
            lines.extend(self.render_message(message, width));
            lines.push(Line::default());
        }
        lines.pop();
        lines
    }

    fn render_message(&self, message: &Message, width: u16) -> Vec<Line<'static>> {
        let mut lines = Vec::new();
        let in_flight = self.pending == Some(message.id.as_str());

        let (label, color) = match message.role {
            Role::User => ("You", Color::Blue),
            Role::Assistant => ("Gemini", Color::Green),
            Role::System => ("System", Color::Yellow),
        };
        let timestamp = chrono::DateTime::from_timestamp_millis(message.timestamp)
            .map(|at| at.with_timezone(&chrono::Local).format("%H:%M").to_string())
            .unwrap_or_default();
        lines.push(Line::from(vec![
            Span::styled(label, Style::default().fg(color).add_modifier(Modifier::BOLD)),
            Span::styled(format!(" {timestamp}"), Style::default().fg(Color::DarkGray)),
        ]));

        if in_flight && message.content.is_empty() {
            lines.push(self.indicator.thinking_line());
            return lines;
        }

        let content_style = if message.is_error {
            Style::default().fg(Color::Red)
        } else {
            Style::default().fg(Color::White)
        };
        let wrapped = wrap_text(&message.content, width.saturating_sub(2) as usize);
        let last = wrapped.len().saturating_sub(1);
        for (i, text) in wrapped.into_iter().enumerate() {
            let mut spans = vec![Span::raw("  "), Span::styled(text, content_style)];
            if in_flight && i == last {
                spans.push(self.indicator.cursor());
            }
            lines.push(Line::from(spans));
        }

        let citations = message.citations();
        if !citations.is_empty() {
            lines.push(Line::from(vec![Span::styled(
                "  Sources",
                Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
            )]));
            for (n, citation) in citations.iter().enumerate() {
                lines.push(Line::from(vec![
                    Span::styled(format!("  [{}] ", n + 1), Style::default().fg(Color::DarkGray)),
                    Span::styled(citation.title.clone(), Style::default().fg(Color::Cyan)),
                    Span::styled(format!("  {}", citation.uri), Style::default().fg(Color::DarkGray)),
                ]));
            }
        }

        lines
    }
}

fn welcome_lines() -> Vec<Line<'static>> {
    let mut lines = vec![
        Line::from(vec![Span::styled(
            "How can I help you today?",
            Style::default().fg(Color::Green).add_modifier(Modifier::BOLD),
        )]),
        Line::default(),
        Line::from(vec![Span::styled("Try one of these:", Style::default().fg(Color::Gray))]),
    ];
    for (n, prompt) in STARTER_PROMPTS.iter().enumerate() {
        lines.push(Line::from(vec![
            Span::styled(format!("  F{}  ", n + 1), Style::default().fg(Color::Yellow)),
            Span::styled(*prompt, Style::default().fg(Color::White)),
        ]));
    }
    lines.push(Line::default());
    lines.push(Line::from(vec![Span::styled(
        "Enter to send, Shift+Enter for a new line, /help for commands.",
        Style::default().fg(Color::DarkGray),
    )]));
    lines
}

/// Wrap text to a width in characters, keeping explicit line breaks
pub fn wrap_text(text: &str, width: usize) -> Vec<String> {
    if width == 0 {
        return vec![text.to_string()];
    }

    let mut lines = Vec::new();
    for paragraph in text.split('\n') {
        let mut current = String::new();
        let mut current_len = 0;

        for word in paragraph.split_whitespace() {
            let word_len = word.chars().count();
            if current_len > 0 && current_len + 1 + word_len <= width {
                current.push(' ');
                current.push_str(word);
                current_len += 1 + word_len;
                continue;
            }
            if current_len > 0 {
                lines.push(std::mem::take(&mut current));
                current_len = 0;
            }

            // Hard-break words longer than a line.
            let chars: Vec<char> = word.chars().collect();
            let mut pieces = chars.chunks(width).peekable();
            while let Some(piece) = pieces.next() {
                if pieces.peek().is_some() {
                    lines.push(piece.iter().collect());
                } else {
                    current = piece.iter().collect();
                    current_len = piece.len();
                }
            }
        }

        lines.push(current);
    }
    lines
}

impl Widget for HistoryView<'_> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let block = Block::default()
            .borders(Borders::ALL)
            .title(format!("💬 {}", self.conversation.title));

        let inner_area = block.inner(area);
        block.render(area, buf);

        let all_lines = self.lines(inner_area.width.saturating_sub(1));
        let height = inner_area.height as usize;
        let total = all_lines.len();
        let max_scroll = total.saturating_sub(height);
        let start = max_scroll - self.scroll.min(max_scroll);

        for (i, line) in all_lines.iter().skip(start).take(height).enumerate() {
            buf.set_line(inner_area.x, inner_area.y + i as u16, line, inner_area.width);
        }

        if max_scroll > 0 {
            let mut state = ScrollbarState::new(max_scroll).position(start);
            Scrollbar::default()
                .orientation(ScrollbarOrientation::VerticalRight)
                .begin_symbol(Some("↑"))
                .end_symbol(Some("↓"))
                .render(inner_area, buf, &mut state);
        }
    }
}
