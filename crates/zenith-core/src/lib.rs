pub mod ai;
pub mod config;
pub mod controller;
pub mod render;
pub mod state;
pub mod transcript;

// Re-export main types for convenience
pub use ai::{CompletionClient, CompletionError, ErrorKind, OpenAIClient};
pub use config::Config;
pub use controller::{Controller, Exchange, ExchangeOutcome, InputSurface, Phase};
pub use render::{render, MathTypesetter, RenderedBlock, Segment, Span, SpanStyle, UnicodeTypesetter};
pub use state::{Conversation, Role, Turn};
pub use transcript::{Entry, EntryBody, EntryId, Transcript};
