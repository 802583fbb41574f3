//! Terminal front end

pub mod conversation;

use anyhow::Result;
use crossterm::{
    cursor::Show,
    event::{self, Event},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{
    Terminal,
    backend::{Backend, CrosstermBackend},
};
use std::io::{self, Write, stdout};
use std::time::Duration;
use tracing::debug;

use conversation::{ConversationAction, ConversationManager};

const TICK: Duration = Duration::from_millis(50);

/// Take over the terminal and run the chat until the user quits
pub async fn run(manager: ConversationManager) -> Result<()> {
    install_panic_hook();
    enable_raw_mode()?;
    let result = enter_and_run(manager).await;
    restore_terminal(&mut stdout())?;
    result
}

async fn enter_and_run(manager: ConversationManager) -> Result<()> {
    let mut stdout = stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout))?;
    event_loop(&mut terminal, manager).await
}

/// Leave raw mode and the alternate screen before a panic message is printed
fn install_panic_hook() {
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let _ = restore_terminal(&mut stdout());
        previous(info);
    }));
}

/// Give the terminal back to the shell
fn restore_terminal(out: &mut impl Write) -> io::Result<()> {
    disable_raw_mode()?;
    execute!(out, LeaveAlternateScreen, Show)
}

async fn event_loop<B: Backend>(terminal: &mut Terminal<B>, mut manager: ConversationManager) -> Result<()> {
    let mut revisions = manager.subscribe();
    let mut dirty = true;

    loop {
        manager.process_streaming_chunks();
        if revisions.has_changed().unwrap_or(false) {
            let revision = *revisions.borrow_and_update();
            debug!(revision, "store changed");
            dirty = true;
        }

        // Keep redrawing while streaming so the indicator animates.
        if dirty || manager.is_streaming() {
            terminal.draw(|frame| manager.render(frame))?;
            dirty = false;
        }

        while event::poll(Duration::ZERO)? {
            match event::read()? {
                Event::Key(key) => {
                    if manager.handle_key(key) == ConversationAction::Exit {
                        return Ok(());
                    }
                    dirty = true;
                }
                Event::Resize(..) => dirty = true,
                _ => {}
            }
        }

        tokio::time::sleep(TICK).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restoring_leaves_the_alternate_screen_and_shows_the_cursor() {
        let mut out = Vec::new();
        restore_terminal(&mut out).unwrap();
        let written = String::from_utf8(out).unwrap();
        assert!(written.contains("\x1b[?1049l"));
        assert!(written.contains("\x1b[?25h"));
    }
}
