use ratatui::{
    buffer::Buffer,
    layout::Rect,
    style::{Color, Style},
    text::{Line, Span},
    widgets::Widget,
};
use std::time::{SystemTime, UNIX_EPOCH};

/// Animated "thinking" line and typing cursor for a reply in flight
#[derive(Debug, Clone)]
pub struct StreamingIndicator {
    label: String,
    millis: u128,
}

impl StreamingIndicator {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            millis: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis(),
        }
    }

    /// Freeze the animation at a given instant
    pub fn at(mut self, millis: u128) -> Self {
        self.millis = millis;
        self
    }

    fn dots(&self) -> &'static str {
        match (self.millis / 300) % 4 {
            0 => ".",
            1 => "..",
            2 => "...",
            _ => "   ",
        }
    }

    /// Line shown while the model has not produced any text yet
    pub fn thinking_line(&self) -> Line<'static> {
        Line::from(vec![
            Span::raw("  "),
            Span::styled(format!("{} is thinking", self.label), Style::default().fg(Color::Green)),
            Span::styled(self.dots(), Style::default().fg(Color::Yellow)),
        ])
    }

    /// Blinking block appended to partial text
    pub fn cursor(&self) -> Span<'static> {
        let symbol = if (self.millis / 500) % 2 == 0 { "▋" } else { " " };
        Span::styled(symbol, Style::default().fg(Color::Green))
    }
}

impl Widget for &StreamingIndicator {
    fn render(self, area: Rect, buf: &mut Buffer) {
        if area.height == 0 {
            return;
        }
        buf.set_line(area.x, area.y, &self.thinking_line(), area.width);
    }
}
