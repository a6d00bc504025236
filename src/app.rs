use ratatui::layout::Rect;
use tokio::sync::mpsc::UnboundedSender;
use zenith_core::{CompletionError, Controller, Exchange, ExchangeOutcome};

use crate::tui::AppEvent;

/// Matches the input box limit of the web client
pub const MAX_INPUT_CHARS: usize = 500;

/// Convert a character index to a byte index for UTF-8 safe string operations
fn char_to_byte_index(s: &str, char_idx: usize) -> usize {
    s.char_indices()
        .nth(char_idx)
        .map(|(i, _)| i)
        .unwrap_or(s.len())
}

pub struct App {
    pub should_quit: bool,
    pub controller: Controller,
    pub model: String,

    // Input box
    pub input: String,
    pub cursor: usize, // cursor position in chars

    // Transcript scrolling
    pub scroll: u16,
    pub max_scroll: u16,   // updated during render
    pub follow_tail: bool, // stick to the newest entry until the user scrolls up
    pub transcript_area: Option<Rect>,

    // Animation state
    pub animation_frame: u8, // 0-2 for ellipsis animation

    exchange: Option<Exchange>,
}

impl App {
    pub fn new(controller: Controller, model: String) -> Self {
        Self {
            should_quit: false,
            controller,
            model,
            input: String::new(),
            cursor: 0,
            scroll: 0,
            max_scroll: 0,
            follow_tail: true,
            transcript_area: None,
            animation_frame: 0,
            exchange: None,
        }
    }

    pub fn is_sending(&self) -> bool {
        self.exchange.is_some()
    }

    pub fn tick_animation(&mut self) {
        if self.is_sending() {
            self.animation_frame = (self.animation_frame + 1) % 3;
        }
    }

    /// Start an exchange for the current input and run the request in the
    /// background. The reply comes back through `events` as [`AppEvent::Reply`].
    pub fn submit(&mut self, events: &UnboundedSender<AppEvent>) {
        let Some(exchange) = self.controller.begin(&self.input) else {
            return;
        };

        self.input.clear();
        self.cursor = 0;
        self.animation_frame = 0;
        self.follow_tail = true;

        let task = tokio::spawn(self.controller.request(&exchange));
        let events = events.clone();
        tokio::spawn(async move {
            let result = match task.await {
                Ok(result) => result,
                Err(e) => {
                    tracing::error!("completion task failed: {}", e);
                    Err(CompletionError::Unreachable(format!("request task failed: {}", e)))
                }
            };
            let _ = events.send(AppEvent::Reply(result));
        });

        self.exchange = Some(exchange);
    }

    pub fn receive_reply(&mut self, result: Result<String, CompletionError>) -> Option<ExchangeOutcome> {
        let Some(exchange) = self.exchange.take() else {
            tracing::warn!("reply received with no exchange in flight");
            return None;
        };
        self.follow_tail = true;
        self.controller.finish(exchange, result)
    }

    pub fn reset(&mut self) {
        if self.controller.reset() {
            self.scroll = 0;
            self.follow_tail = true;
        }
    }

    // Transcript scrolling

    pub fn scroll_up(&mut self, lines: u16) {
        self.scroll = self.scroll.min(self.max_scroll).saturating_sub(lines);
        self.follow_tail = false;
    }

    pub fn scroll_down(&mut self, lines: u16) {
        self.scroll = self.scroll.saturating_add(lines).min(self.max_scroll);
        self.follow_tail = self.scroll >= self.max_scroll;
    }

    pub fn page_height(&self) -> u16 {
        self.transcript_area
            .map(|area| area.height.saturating_sub(2))
            .unwrap_or(10)
            .max(1)
    }

    // Input editing; ignored while the controller holds the input locked

    fn editable(&self) -> bool {
        self.controller.input().is_enabled()
    }

    pub fn insert_char(&mut self, c: char) {
        if !self.editable() || self.input.chars().count() >= MAX_INPUT_CHARS {
            return;
        }
        let byte_pos = char_to_byte_index(&self.input, self.cursor);
        self.input.insert(byte_pos, c);
        self.cursor += 1;
    }

    pub fn insert_newline(&mut self) {
        self.insert_char('\n');
    }

    /// Insert pasted text at the cursor, truncated to the input limit.
    /// Line endings are normalized; the paste never submits.
    pub fn paste(&mut self, text: &str) {
        if !self.editable() {
            return;
        }
        let room = MAX_INPUT_CHARS.saturating_sub(self.input.chars().count());
        let pasted: String = text
            .replace("\r\n", "\n")
            .replace('\r', "\n")
            .chars()
            .take(room)
            .collect();

        let byte_pos = char_to_byte_index(&self.input, self.cursor);
        self.input.insert_str(byte_pos, &pasted);
        self.cursor += pasted.chars().count();
    }

    pub fn backspace(&mut self) {
        if !self.editable() || self.cursor == 0 {
            return;
        }
        self.cursor -= 1;
        let byte_pos = char_to_byte_index(&self.input, self.cursor);
        self.input.remove(byte_pos);
    }

    pub fn delete(&mut self) {
        if !self.editable() || self.cursor >= self.input.chars().count() {
            return;
        }
        let byte_pos = char_to_byte_index(&self.input, self.cursor);
        self.input.remove(byte_pos);
    }

    pub fn move_cursor_left(&mut self) {
        self.cursor = self.cursor.saturating_sub(1);
    }

    pub fn move_cursor_right(&mut self) {
        self.cursor = (self.cursor + 1).min(self.input.chars().count());
    }

    /// Start of the cursor's line
    pub fn move_cursor_home(&mut self) {
        let before: Vec<char> = self.input.chars().take(self.cursor).collect();
        self.cursor = before
            .iter()
            .rposition(|&c| c == '\n')
            .map(|i| i + 1)
            .unwrap_or(0);
    }

    /// End of the cursor's line
    pub fn move_cursor_end(&mut self) {
        let rest = self.input.chars().skip(self.cursor);
        let to_line_end = rest.take_while(|&c| c != '\n').count();
        self.cursor += to_line_end;
    }
}
