//! Message lifecycle controller
//!
//! `Idle → Sending → {Succeeded, Failed} → Idle`. Entering `Sending` mints the
//! one [`Exchange`] token; [`Controller::finish`] consumes it. A second
//! submission while a token is outstanding is refused, so there is never more
//! than one request in flight per controller.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::ai::{CompletionClient, CompletionError, ErrorKind};
use crate::render::{self, MathTypesetter};
use crate::state::{Conversation, Turn};
use crate::transcript::{EntryId, Transcript};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Sending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeOutcome {
    Succeeded,
    Failed(ErrorKind),
}

/// Lock state of the text input the user types into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputSurface {
    enabled: bool,
    focused: bool,
}

impl InputSurface {
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_focused(&self) -> bool {
        self.focused
    }

    fn lock(&mut self) {
        self.enabled = false;
        self.focused = false;
    }

    fn unlock_and_focus(&mut self) {
        self.enabled = true;
        self.focused = true;
    }
}

impl Default for InputSurface {
    fn default() -> Self {
        Self {
            enabled: true,
            focused: true,
        }
    }
}

static NEXT_CONTROLLER_ID: AtomicU64 = AtomicU64::new(1);

/// An in-flight exchange. Only [`Controller::begin`] creates one, and only
/// the controller that created it can finish it.
#[derive(Debug)]
pub struct Exchange {
    owner: u64,
    message: String,
    history: Vec<Turn>,
    placeholder: EntryId,
}

impl Exchange {
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Conversation as it stood when the exchange began
    pub fn history(&self) -> &[Turn] {
        &self.history
    }

    pub fn placeholder(&self) -> EntryId {
        self.placeholder
    }
}

/// Returns the controller to `Idle` when dropped, whichever branch ran
struct ReturnToIdle<'a> {
    phase: &'a mut Phase,
    input: &'a mut InputSurface,
}

impl Drop for ReturnToIdle<'_> {
    fn drop(&mut self) {
        *self.phase = Phase::Idle;
        self.input.unlock_and_focus();
        tracing::debug!("exchange finished, input unlocked");
    }
}

pub struct Controller {
    id: u64,
    client: Arc<dyn CompletionClient>,
    conversation: Conversation,
    transcript: Transcript,
    typesetter: Option<Box<dyn MathTypesetter>>,
    input: InputSurface,
    phase: Phase,
}

impl Controller {
    pub fn new(client: Arc<dyn CompletionClient>, transcript: Transcript) -> Self {
        Self {
            id: NEXT_CONTROLLER_ID.fetch_add(1, Ordering::Relaxed),
            client,
            conversation: Conversation::new(),
            transcript,
            typesetter: None,
            input: InputSurface::default(),
            phase: Phase::Idle,
        }
    }

    pub fn with_conversation(mut self, conversation: Conversation) -> Self {
        self.conversation = conversation;
        self
    }

    pub fn with_typesetter(mut self, typesetter: Box<dyn MathTypesetter>) -> Self {
        self.typesetter = Some(typesetter);
        self
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn input(&self) -> InputSurface {
        self.input
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    /// `Idle → Sending`. Returns `None`, with no side effects, for blank input
    /// or while another exchange is outstanding.
    pub fn begin(&mut self, input: &str) -> Option<Exchange> {
        if self.phase != Phase::Idle {
            tracing::debug!("submission ignored, an exchange is already in flight");
            return None;
        }
        let message = input.trim();
        if message.is_empty() {
            return None;
        }

        self.phase = Phase::Sending;
        self.input.lock();
        self.transcript.push_user(message);
        let placeholder = self.transcript.show_pending();
        tracing::debug!(turns = self.conversation.len(), "exchange started");

        Some(Exchange {
            owner: self.id,
            message: message.to_string(),
            history: self.conversation.snapshot().to_vec(),
            placeholder,
        })
    }

    /// The network call for `exchange`, detached from the controller so the
    /// caller can keep drawing while it runs
    pub fn request(
        &self,
        exchange: &Exchange,
    ) -> impl Future<Output = Result<String, CompletionError>> + Send + 'static {
        let client = Arc::clone(&self.client);
        let history = exchange.history.clone();
        let message = exchange.message.clone();
        async move { client.complete(&history, &message).await }
    }

    /// `Sending → {Succeeded, Failed} → Idle`. Returns `None`, changing
    /// nothing, when `exchange` is not the one this controller is waiting on.
    pub fn finish(
        &mut self,
        exchange: Exchange,
        result: Result<String, CompletionError>,
    ) -> Option<ExchangeOutcome> {
        if exchange.owner != self.id || self.phase != Phase::Sending {
            tracing::warn!(
                owner = exchange.owner,
                phase = ?self.phase,
                "ignoring reply for an exchange this controller is not waiting on"
            );
            return None;
        }

        let Self {
            conversation,
            transcript,
            typesetter,
            input,
            phase,
            ..
        } = self;
        let _idle = ReturnToIdle { phase, input };

        transcript.remove(exchange.placeholder);

        match result {
            Ok(text) => {
                let entry = transcript.push_assistant(render::render(&text));
                conversation.append_exchange(Turn::user(exchange.message), Turn::assistant(text));
                if let Some(typesetter) = typesetter.as_deref() {
                    transcript.typeset(entry, typesetter);
                }
                tracing::info!(turns = conversation.len(), "exchange succeeded");
                Some(ExchangeOutcome::Succeeded)
            }
            Err(err) => {
                tracing::warn!(kind = ?err.kind(), "exchange failed: {}", err);
                transcript.push_error(&user_message(&err));
                Some(ExchangeOutcome::Failed(err.kind()))
            }
        }
    }

    /// Run a whole exchange. Returns `None` when the submission was refused.
    pub async fn submit(&mut self, input: &str) -> Option<ExchangeOutcome> {
        let exchange = self.begin(input)?;
        let result = self.request(&exchange).await;
        self.finish(exchange, result)
    }

    /// Forget the conversation and clear the transcript to its welcome entry.
    /// Refused while an exchange is in flight.
    pub fn reset(&mut self) -> bool {
        if self.phase == Phase::Sending {
            tracing::debug!("reset ignored, an exchange is in flight");
            return false;
        }
        self.conversation.reset();
        self.transcript.clear();
        tracing::info!("conversation reset");
        true
    }
}

/// Wording shown in the transcript for each failure category
pub fn user_message(err: &CompletionError) -> String {
    match err {
        CompletionError::Unreachable(_) => {
            "Sorry, the assistant service cannot be reached right now. Check your connection and try again.".to_string()
        }
        CompletionError::TimedOut(_) => {
            "Sorry, the assistant service took too long to respond. Please try again.".to_string()
        }
        CompletionError::RequestRejected { message, .. } => {
            format!("Sorry, the request was rejected: {}", message)
        }
        CompletionError::MalformedResponse(_) => {
            "Sorry, the response came back in an unexpected format.".to_string()
        }
        CompletionError::IncompleteResponse(_) => {
            "Sorry, the response was incomplete. Please try again.".to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::{interpret_response, MissingField};
    use crate::render::UnicodeTypesetter;
    use crate::state::Role;
    use crate::transcript::EntryBody;
    use async_trait::async_trait;
    use reqwest::StatusCode;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays canned outcomes and records every request it receives
    #[derive(Default)]
    struct ScriptedClient {
        replies: Mutex<VecDeque<Result<String, CompletionError>>>,
        requests: Mutex<Vec<(Vec<Turn>, String)>>,
    }

    impl ScriptedClient {
        fn new(replies: Vec<Result<String, CompletionError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn requests(&self) -> Vec<(Vec<Turn>, String)> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CompletionClient for ScriptedClient {
        async fn complete(&self, history: &[Turn], message: &str) -> Result<String, CompletionError> {
            self.requests
                .lock()
                .unwrap()
                .push((history.to_vec(), message.to_string()));
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(CompletionError::Unreachable("no scripted reply".into())))
        }
    }

    struct PanickingTypesetter;

    impl MathTypesetter for PanickingTypesetter {
        fn typeset(&self, _tex: &str, _display: bool) -> String {
            panic!("typesetter exploded");
        }
    }

    fn controller_with(client: Arc<ScriptedClient>) -> Controller {
        Controller::new(client, Transcript::new(None))
    }

    fn pending_count(controller: &Controller) -> usize {
        controller
            .transcript()
            .entries()
            .iter()
            .filter(|e| e.is_pending())
            .count()
    }

    fn interpreted(status: u16, body: &str) -> Result<String, CompletionError> {
        interpret_response(StatusCode::from_u16(status).unwrap(), body)
    }

    #[test]
    fn test_blank_input_causes_no_transition() {
        let mut controller = controller_with(ScriptedClient::new(vec![]));

        for input in ["", "   ", "\n\t "] {
            assert!(controller.begin(input).is_none());
            assert_eq!(controller.phase(), Phase::Idle);
            assert!(controller.input().is_enabled());
            assert!(controller.transcript().entries().is_empty());
        }
    }

    #[test]
    fn test_begin_locks_input_and_shows_placeholder() {
        let mut controller = controller_with(ScriptedClient::new(vec![]));

        let exchange = controller.begin("  2+2?  ").expect("exchange should start");
        assert_eq!(controller.phase(), Phase::Sending);
        assert!(!controller.input().is_enabled());
        assert_eq!(exchange.message(), "2+2?");

        let entries = controller.transcript().entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].role, Role::User);
        assert_eq!(entries[0].text(), "2+2?");
        assert!(entries[1].is_pending());
        assert_eq!(entries[1].id, exchange.placeholder());

        // State is untouched until the exchange completes
        assert!(controller.conversation().is_empty());
    }

    #[test]
    fn test_second_submission_while_sending_is_refused() {
        let mut controller = controller_with(ScriptedClient::new(vec![]));

        let _exchange = controller.begin("first").unwrap();
        let entries_before = controller.transcript().entries().len();

        assert!(controller.begin("second").is_none());
        assert_eq!(controller.transcript().entries().len(), entries_before);
        assert_eq!(pending_count(&controller), 1);
    }

    #[tokio::test]
    async fn test_successful_exchange_appends_pair() {
        let client = ScriptedClient::new(vec![Ok("4".to_string())]);
        let mut controller = controller_with(client.clone());

        let outcome = controller.submit("2+2?").await;
        assert_eq!(outcome, Some(ExchangeOutcome::Succeeded));

        let entries = controller.transcript().entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].role, Role::User);
        assert_eq!(entries[0].text(), "2+2?");
        assert_eq!(entries[1].role, Role::Assistant);
        assert!(matches!(entries[1].body, EntryBody::Rendered(_)));
        assert_eq!(entries[1].text(), "4");
        assert!(!entries[1].is_error);

        assert_eq!(
            controller.conversation().snapshot(),
            &[Turn::user("2+2?"), Turn::assistant("4")]
        );
        assert_eq!(controller.phase(), Phase::Idle);
        assert!(controller.input().is_enabled());
        assert!(controller.input().is_focused());
    }

    #[tokio::test]
    async fn test_next_request_carries_previous_exchange() {
        let client = ScriptedClient::new(vec![Ok("4".to_string()), Ok("6".to_string())]);
        let mut controller = controller_with(client.clone());

        controller.submit("2+2?").await;
        controller.submit("3+3?").await;

        let requests = client.requests();
        assert_eq!(requests.len(), 2);
        assert!(requests[0].0.is_empty());
        assert_eq!(requests[0].1, "2+2?");
        assert_eq!(requests[1].0, vec![Turn::user("2+2?"), Turn::assistant("4")]);
        assert_eq!(requests[1].1, "3+3?");
        assert_eq!(controller.conversation().len(), 4);
    }

    #[tokio::test]
    async fn test_rejected_exchange_shows_server_message() {
        let client = ScriptedClient::new(vec![interpreted(500, r#"{"error":"overloaded"}"#)]);
        let mut controller = controller_with(client);

        let outcome = controller.submit("hello").await;
        assert_eq!(outcome, Some(ExchangeOutcome::Failed(ErrorKind::RequestRejected)));

        let assistant: Vec<_> = controller
            .transcript()
            .entries()
            .iter()
            .filter(|e| e.role == Role::Assistant)
            .collect();
        assert_eq!(assistant.len(), 1);
        assert!(assistant[0].is_error);
        assert!(assistant[0].text().contains("overloaded"));

        assert!(controller.conversation().is_empty());
        assert_eq!(pending_count(&controller), 0);
        assert!(controller.input().is_enabled());
    }

    #[tokio::test]
    async fn test_failures_leave_state_unchanged() {
        let client = ScriptedClient::new(vec![
            Ok("first answer".to_string()),
            interpreted(200, "not json"),
            interpreted(200, r#"{"choices":[]}"#),
            Err(CompletionError::Unreachable("connection refused".into())),
        ]);
        let mut controller = controller_with(client);

        controller.submit("first").await;
        let before = controller.conversation().snapshot().to_vec();

        let outcomes = [
            controller.submit("malformed").await,
            controller.submit("incomplete").await,
            controller.submit("offline").await,
        ];
        assert_eq!(
            outcomes,
            [
                Some(ExchangeOutcome::Failed(ErrorKind::MalformedResponse)),
                Some(ExchangeOutcome::Failed(ErrorKind::IncompleteResponse)),
                Some(ExchangeOutcome::Failed(ErrorKind::Unreachable)),
            ]
        );
        assert_eq!(controller.conversation().snapshot(), before.as_slice());
        assert_eq!(pending_count(&controller), 0);
    }

    #[tokio::test]
    async fn test_placeholder_never_leaks_across_turns() {
        let client = ScriptedClient::new(vec![Ok("a".to_string()), Ok("b".to_string())]);
        let mut controller = controller_with(client);

        for input in ["one", "two"] {
            let exchange = controller.begin(input).unwrap();
            assert_eq!(pending_count(&controller), 1);
            let result = controller.request(&exchange).await;
            controller.finish(exchange, result);
            assert_eq!(pending_count(&controller), 0);
        }
    }

    #[test]
    fn test_input_unlocks_even_when_rendering_panics() {
        let mut controller = controller_with(ScriptedClient::new(vec![]))
            .with_typesetter(Box::new(PanickingTypesetter));

        let exchange = controller.begin("square it").unwrap();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            controller.finish(exchange, Ok("\\( x^2 \\)".to_string()))
        }));

        assert!(result.is_err());
        assert_eq!(controller.phase(), Phase::Idle);
        assert!(controller.input().is_enabled());
        assert!(controller.input().is_focused());
    }

    #[tokio::test]
    async fn test_typesetter_runs_on_rendered_reply() {
        let client = ScriptedClient::new(vec![Ok("Area is \\( \\pi r^2 \\)".to_string())]);
        let mut controller = controller_with(client).with_typesetter(Box::new(UnicodeTypesetter));

        controller.submit("area?").await;

        let reply = &controller.transcript().entries()[1];
        assert_eq!(reply.text(), "Area is π r²");
        // The conversation keeps the raw reply
        assert_eq!(
            controller.conversation().snapshot()[1].content,
            "Area is \\( \\pi r^2 \\)"
        );
    }

    #[tokio::test]
    async fn test_reset_is_idempotent() {
        let client = ScriptedClient::new(vec![Ok("4".to_string())]);
        let mut controller =
            Controller::new(client, Transcript::new(Some("Welcome!".to_string())));
        controller.submit("2+2?").await;

        assert!(controller.reset());
        let once: Vec<String> = controller.transcript().entries().iter().map(|e| e.text()).collect();
        assert!(controller.conversation().is_empty());

        assert!(controller.reset());
        let twice: Vec<String> = controller.transcript().entries().iter().map(|e| e.text()).collect();
        assert!(controller.conversation().is_empty());
        assert_eq!(once, twice);
        assert_eq!(twice, vec!["Welcome!".to_string()]);
    }

    #[test]
    fn test_reset_refused_while_sending() {
        let mut controller = controller_with(ScriptedClient::new(vec![]))
            .with_conversation({
                let mut conversation = Conversation::new();
                conversation.append_exchange(Turn::user("q"), Turn::assistant("a"));
                conversation
            });

        let _exchange = controller.begin("next").unwrap();
        assert!(!controller.reset());
        assert_eq!(controller.conversation().len(), 2);
        assert_eq!(pending_count(&controller), 1);
    }

    #[test]
    fn test_finish_rejects_exchange_from_another_controller() {
        let mut ours = controller_with(ScriptedClient::new(vec![]));
        let mut theirs = controller_with(ScriptedClient::new(vec![]));

        let mine = ours.begin("mine").unwrap();
        let foreign = theirs.begin("theirs").unwrap();
        assert_eq!(mine.placeholder(), foreign.placeholder());

        assert_eq!(ours.finish(foreign, Ok("stray".to_string())), None);
        assert_eq!(ours.phase(), Phase::Sending);
        assert!(!ours.input().is_enabled());
        assert_eq!(ours.transcript().pending(), Some(mine.placeholder()));
        assert!(ours.conversation().is_empty());

        assert_eq!(
            ours.finish(mine, Ok("answer".to_string())),
            Some(ExchangeOutcome::Succeeded)
        );
        assert_eq!(ours.conversation().len(), 2);
    }

    #[test]
    fn test_finish_while_idle_changes_nothing() {
        let mut idle = controller_with(ScriptedClient::new(vec![]));
        let mut other = controller_with(ScriptedClient::new(vec![]));
        let foreign = other.begin("hello").unwrap();

        assert_eq!(idle.finish(foreign, Ok("late".to_string())), None);
        assert_eq!(idle.phase(), Phase::Idle);
        assert!(idle.transcript().entries().is_empty());
        assert!(idle.conversation().is_empty());
    }

    #[test]
    fn test_user_message_per_kind() {
        let incomplete = CompletionError::IncompleteResponse(MissingField::Choices);
        assert!(user_message(&incomplete).contains("incomplete"));

        let malformed = CompletionError::MalformedResponse("expected value".into());
        assert!(user_message(&malformed).contains("unexpected format"));

        let unreachable = CompletionError::Unreachable("dns".into());
        assert!(user_message(&unreachable).contains("cannot be reached"));
        assert!(!user_message(&unreachable).contains("dns"));
    }
}
