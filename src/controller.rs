use std::time::Duration;
use tracing::trace;

use ratatui::crossterm::event::{self, Event, KeyCode};

use crate::domain::{LVConfig, LVError, Message};
use crate::model::Model;

// Maps terminal events to interaction intents. While the filter prompt
// is open every key press goes through untranslated.
pub struct Controller {
    event_poll_time: u64,
}

impl Controller {
    pub fn new(cfg: &LVConfig) -> Self {
        Self {
            event_poll_time: cfg.event_poll_time,
        }
    }

    pub fn handle_event(&self, model: &Model) -> Result<Option<Message>, LVError> {
        if event::poll(Duration::from_millis(self.event_poll_time))? {
            match event::read()? {
                Event::Key(key) if key.kind == event::KeyEventKind::Press => {
                    if model.raw_keyevents() {
                        return Ok(Some(Message::RawKey(key)));
                    }
                    return Ok(self.handle_key(key));
                }
                Event::Resize(width, height) => {
                    return Ok(Some(Message::Resize(width as usize, height as usize)));
                }
                _ => {}
            }
        }
        // Nothing pending, let the model drive its reload timer
        Ok(Some(Message::Tick))
    }

    fn handle_key(&self, key: event::KeyEvent) -> Option<Message> {
        let message = match key.code {
            KeyCode::Char('q') => Some(Message::Quit),
            KeyCode::Char('j') | KeyCode::Down => Some(Message::MoveDown),
            KeyCode::Char('k') | KeyCode::Up => Some(Message::MoveUp),
            KeyCode::Char('h') | KeyCode::Left => Some(Message::MoveLeft),
            KeyCode::Char('l') | KeyCode::Right => Some(Message::MoveRight),
            KeyCode::Char('g') => Some(Message::MoveBeginning),
            KeyCode::Char('G') => Some(Message::MoveEnd),
            KeyCode::Char('s') => Some(Message::SortAscending),
            KeyCode::Char('S') => Some(Message::SortDescending),
            KeyCode::Char('m') => Some(Message::SortAppendAscending),
            KeyCode::Char('M') => Some(Message::SortAppendDescending),
            KeyCode::Char('/') => Some(Message::Filter),
            KeyCode::Enter => Some(Message::ToggleDetail),
            KeyCode::Char('r') => Some(Message::ToggleAutoReload),
            KeyCode::Char('c') => Some(Message::CopyRow),
            KeyCode::Char('?') => Some(Message::Help),
            KeyCode::Esc => Some(Message::Exit),
            _ => None,
        };
        trace!("Mapped: {key:?} => {message:?}");
        message
    }
}
