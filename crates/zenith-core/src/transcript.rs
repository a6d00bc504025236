//! Append-only transcript surface
//!
//! Holds what the user sees: user entries, rendered assistant entries, error
//! notices and at most one pending placeholder. Nothing here feeds back into
//! the conversation sent to the endpoint.

use chrono::{DateTime, Local};

use crate::render::{MathTypesetter, RenderedBlock};
use crate::state::Role;

pub type EntryId = u64;

#[derive(Debug, Clone, PartialEq)]
pub enum EntryBody {
    /// Shown verbatim, never parsed
    Literal(String),
    Rendered(RenderedBlock),
    /// "Awaiting response" placeholder
    Pending,
}

#[derive(Debug, Clone)]
pub struct Entry {
    pub id: EntryId,
    pub role: Role,
    pub body: EntryBody,
    pub is_error: bool,
    pub timestamp: DateTime<Local>,
}

impl Entry {
    pub fn is_pending(&self) -> bool {
        matches!(self.body, EntryBody::Pending)
    }

    /// The entry's text as displayed, without styling
    pub fn text(&self) -> String {
        match &self.body {
            EntryBody::Literal(text) => text.clone(),
            EntryBody::Rendered(block) => block.plain_text(),
            EntryBody::Pending => String::new(),
        }
    }
}

#[derive(Debug)]
pub struct Transcript {
    entries: Vec<Entry>,
    welcome: Option<String>,
    next_id: EntryId,
    revision: u64,
}

impl Transcript {
    pub fn new(welcome: Option<String>) -> Self {
        let mut transcript = Self {
            entries: Vec::new(),
            welcome,
            next_id: 1,
            revision: 0,
        };
        transcript.push_welcome();
        transcript
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    /// Bumped on every change so views can follow the newest entry
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn push_user(&mut self, text: &str) -> EntryId {
        self.push(Role::User, EntryBody::Literal(text.to_string()), false)
    }

    pub fn push_assistant(&mut self, block: RenderedBlock) -> EntryId {
        self.push(Role::Assistant, EntryBody::Rendered(block), false)
    }

    /// Assistant-styled notice for a failed exchange
    pub fn push_error(&mut self, message: &str) -> EntryId {
        self.push(Role::Assistant, EntryBody::Literal(message.to_string()), true)
    }

    /// Show the placeholder, reusing the live one if it already exists
    pub fn show_pending(&mut self) -> EntryId {
        if let Some(id) = self.pending() {
            return id;
        }
        self.push(Role::Assistant, EntryBody::Pending, false)
    }

    pub fn pending(&self) -> Option<EntryId> {
        self.entries.iter().find(|e| e.is_pending()).map(|e| e.id)
    }

    pub fn remove(&mut self, id: EntryId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.id != id);
        let removed = self.entries.len() != before;
        if removed {
            self.revision += 1;
        }
        removed
    }

    /// Run the math typesetting pass over one rendered entry
    pub fn typeset(&mut self, id: EntryId, typesetter: &dyn MathTypesetter) -> usize {
        let Some(entry) = self.entries.iter_mut().find(|e| e.id == id) else {
            return 0;
        };
        let EntryBody::Rendered(block) = &mut entry.body else {
            return 0;
        };
        let count = block.typeset(typesetter);
        if count > 0 {
            self.revision += 1;
        }
        count
    }

    /// Back to the initial state: only the welcome entry, if any
    pub fn clear(&mut self) {
        self.entries.clear();
        self.push_welcome();
        self.revision += 1;
    }

    fn push_welcome(&mut self) {
        if let Some(welcome) = self.welcome.clone() {
            self.push(Role::Assistant, EntryBody::Literal(welcome), false);
        }
    }

    fn push(&mut self, role: Role, body: EntryBody, is_error: bool) -> EntryId {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.push(Entry {
            id,
            role,
            body,
            is_error,
            timestamp: Local::now(),
        });
        self.revision += 1;
        id
    }
}
