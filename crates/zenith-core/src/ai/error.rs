use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Closed set of failure categories produced at the completion client boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Unreachable,
    TimedOut,
    RequestRejected,
    MalformedResponse,
    IncompleteResponse,
}

/// The part of `choices[0].message.content` that a decodable response lacked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingField {
    Choices,
    FirstChoice,
    Message,
    Content,
    EmptyContent,
}

impl fmt::Display for MissingField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            MissingField::Choices => "the `choices` array",
            MissingField::FirstChoice => "an entry in `choices`",
            MissingField::Message => "`choices[0].message`",
            MissingField::Content => "`choices[0].message.content`",
            MissingField::EmptyContent => "non-empty `choices[0].message.content`",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("cannot reach completion endpoint: {0}")]
    Unreachable(String),

    #[error("completion endpoint did not answer within {}s", .0.as_secs())]
    TimedOut(Duration),

    #[error("request rejected with status {status}: {message}")]
    RequestRejected { status: u16, message: String },

    #[error("response body is not valid JSON: {0}")]
    MalformedResponse(String),

    #[error("response is missing {0}")]
    IncompleteResponse(MissingField),
}

impl CompletionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CompletionError::Unreachable(_) => ErrorKind::Unreachable,
            CompletionError::TimedOut(_) => ErrorKind::TimedOut,
            CompletionError::RequestRejected { .. } => ErrorKind::RequestRejected,
            CompletionError::MalformedResponse(_) => ErrorKind::MalformedResponse,
            CompletionError::IncompleteResponse(_) => ErrorKind::IncompleteResponse,
        }
    }

    /// Map a reqwest failure that happened before a status line was read
    pub(crate) fn from_transport(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            CompletionError::TimedOut(timeout)
        } else {
            CompletionError::Unreachable(err.to_string())
        }
    }
}
