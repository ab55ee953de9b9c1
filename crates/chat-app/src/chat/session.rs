use std::sync::Arc;

use chatline_core::{
    AuxiliaryPayload, ConversationId, LoadingRotator, LoadingState, MergedThread, RenderedItem,
    RotatorConfig, RotatorError, StreamEventMapped, StreamEventPayload, StreamSessionId,
    StreamState, StreamTarget, StreamTransition, Turn, TurnId,
};
use chatline_llm::{
    LlmProvider, ProviderError, ProviderEventStream, ProviderMessage, StreamRequest,
    create_provider,
};
use chatline_storage::{QuestionLog, SqliteQuestionLog, record_question_detached};
use snafu::{ResultExt, Snafu, ensure};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::settings::ChatSettings;

const STREAM_CLOSED_EARLY: &str = "provider stream ended before a terminal event";

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SessionError {
    #[snafu(display("question is empty"))]
    EmptyQuestion { stage: &'static str },
    #[snafu(display("a response is still streaming for {active:?}"))]
    Busy {
        stage: &'static str,
        active: StreamTarget,
    },
    #[snafu(display("no chat provider is configured; set an API key"))]
    ProviderNotConfigured { stage: &'static str },
    #[snafu(display("chat provider failed on `{stage}`: {source}"))]
    Provider {
        stage: &'static str,
        source: ProviderError,
    },
    #[snafu(display("invalid loading indicator settings on `{stage}`: {source}"))]
    LoadingConfig {
        stage: &'static str,
        source: RotatorError,
    },
}

pub type SessionResult<T> = Result<T, SessionError>;

/// One conversation: the append-only turn list, the side-channel payloads, the
/// in-flight request and the loading indicator that follows it.
pub struct ChatSession {
    conversation_id: ConversationId,
    provider: Option<Arc<dyn LlmProvider>>,
    question_log: Option<Arc<dyn QuestionLog>>,
    model_id: String,
    preamble: Option<String>,
    temperature: Option<f64>,
    max_tokens: Option<u64>,
    turns: Vec<Turn>,
    payloads: Vec<AuxiliaryPayload>,
    draft: String,
    reasoning: String,
    stream_state: StreamState,
    next_turn_id: u64,
    next_session_id: StreamSessionId,
    active_stream: Option<ProviderEventStream>,
    pending_records: Vec<JoinHandle<()>>,
    rotator: LoadingRotator,
    thread: MergedThread,
}

impl ChatSession {
    pub fn new(rotator_config: RotatorConfig) -> SessionResult<Self> {
        let rotator = LoadingRotator::new(rotator_config).context(LoadingConfigSnafu {
            stage: "session-new-rotator",
        })?;

        Ok(Self {
            conversation_id: ConversationId::new(1),
            provider: None,
            question_log: None,
            model_id: chatline_llm::DEFAULT_OPENAI_MODEL.to_string(),
            preamble: None,
            temperature: None,
            max_tokens: None,
            turns: Vec::new(),
            payloads: Vec::new(),
            draft: String::new(),
            reasoning: String::new(),
            stream_state: StreamState::Idle,
            next_turn_id: 1,
            next_session_id: StreamSessionId::new(1),
            active_stream: None,
            pending_records: Vec::new(),
            rotator,
            thread: MergedThread::new(),
        })
    }

    /// Builds a session from settings. A missing provider or question log only
    /// degrades the session; bad loading settings are fatal.
    pub async fn from_settings(settings: &ChatSettings) -> SessionResult<Self> {
        let mut session = Self::new(settings.rotator_config())?;
        session.model_id = settings.model.clone();
        session.preamble = settings.preamble.clone();
        session.temperature = settings.temperature;
        session.max_tokens = settings.max_tokens;

        if let Some(config) = settings.to_provider_config() {
            match create_provider(config) {
                Ok(provider) => {
                    tracing::info!(provider_id = %provider.id(), "initialized chat provider");
                    session.provider = Some(provider);
                }
                Err(error) => {
                    tracing::error!("failed to initialize chat provider: {error}");
                }
            }
        } else {
            tracing::warn!("no API key configured; questions cannot be answered");
        }

        match SqliteQuestionLog::open(&settings.question_log_path).await {
            Ok(log) => session.question_log = Some(Arc::new(log)),
            Err(error) => {
                tracing::error!(
                    path = %settings.question_log_path,
                    "failed to open question log, questions will not be recorded: {error}"
                );
            }
        }

        Ok(session)
    }

    pub fn with_provider(
        mut self,
        provider: Arc<dyn LlmProvider>,
        model_id: impl Into<String>,
    ) -> Self {
        self.provider = Some(provider);
        self.model_id = model_id.into();
        self
    }

    pub fn with_question_log(mut self, log: Arc<dyn QuestionLog>) -> Self {
        self.question_log = Some(log);
        self
    }

    pub fn with_preamble(mut self, preamble: impl Into<String>) -> Self {
        self.preamble = Some(preamble.into());
        self
    }

    /// Generation options forwarded with every request.
    pub fn with_generation(mut self, temperature: Option<f64>, max_tokens: Option<u64>) -> Self {
        self.temperature = temperature;
        self.max_tokens = max_tokens;
        self
    }

    /// Every turn so far, oldest first.
    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    /// Side-channel payloads in arrival order.
    pub fn payloads(&self) -> &[AuxiliaryPayload] {
        &self.payloads
    }

    /// Assistant text received so far for the in-flight request.
    pub fn draft(&self) -> &str {
        &self.draft
    }

    /// Reasoning text streamed for the in-flight request.
    pub fn reasoning(&self) -> &str {
        &self.reasoning
    }

    pub fn stream_state(&self) -> &StreamState {
        &self.stream_state
    }

    /// True while a request is streaming.
    pub fn is_outstanding(&self) -> bool {
        self.stream_state.is_outstanding()
    }

    /// Error text from the most recent request, if it failed.
    pub fn last_error(&self) -> Option<&str> {
        self.stream_state.error_message()
    }

    pub fn loading(&self) -> LoadingState {
        self.rotator.state()
    }

    pub fn subscribe_loading(&self) -> watch::Receiver<LoadingState> {
        self.rotator.subscribe()
    }

    /// Turns paired with their payloads for display.
    pub fn rendered(&mut self) -> &[RenderedItem] {
        self.thread.update(&self.turns, &self.payloads);
        self.thread.items()
    }

    /// Records the question, appends it as a user turn and opens the provider stream.
    ///
    /// Rejected submissions leave the session untouched.
    pub fn submit(&mut self, question: impl Into<String>) -> SessionResult<StreamTarget> {
        let question = question.into();
        ensure!(
            !question.trim().is_empty(),
            EmptyQuestionSnafu {
                stage: "submit-validate",
            }
        );
        if let Some(active) = self.stream_state.active_target() {
            return BusySnafu {
                stage: "submit-check-active",
                active,
            }
            .fail();
        }
        let Some(provider) = self.provider.clone() else {
            return ProviderNotConfiguredSnafu {
                stage: "submit-check-provider",
            }
            .fail();
        };

        if let Some(log) = self.question_log.clone() {
            self.pending_records.retain(|record| !record.is_finished());
            self.pending_records
                .push(record_question_detached(log, question.clone()));
        }

        let target = StreamTarget::new(self.conversation_id, self.next_session_id);
        // Reserve the next session id immediately so a later submit never reuses a target.
        self.next_session_id = self.next_session_id.next();

        if let Err(rejection) = self.apply_transition(StreamTransition::Start(target)) {
            tracing::error!(?rejection, "stream start rejected");
            return BusySnafu {
                stage: "submit-start-transition",
                active: target,
            }
            .fail();
        }

        let user_turn_id = self.alloc_turn_id();
        self.turns.push(Turn::user(user_turn_id, question));
        self.draft.clear();
        self.reasoning.clear();

        let mut request = StreamRequest::new(
            target,
            self.model_id.clone(),
            self.turns.iter().map(ProviderMessage::from).collect(),
        );
        if let Some(preamble) = &self.preamble {
            request = request.with_preamble(preamble.clone());
        }
        if let Some(temperature) = self.temperature {
            request = request.with_temperature(temperature);
        }
        if let Some(max_tokens) = self.max_tokens {
            request = request.with_max_tokens(max_tokens);
        }

        match provider.stream_chat(request) {
            Ok(handle) => {
                // Detached: the worker exits once the stream is cancelled or dropped.
                tokio::spawn(handle.worker);
                self.active_stream = Some(handle.stream);
                self.rotator.set_outstanding(true);
                tracing::debug!(target = ?target, "submitted question");
                Ok(target)
            }
            Err(source) => {
                let message = source.to_string();
                self.finish_stream(StreamTransition::Fail { target, message });
                Err(source).context(ProviderSnafu {
                    stage: "submit-stream-chat",
                })
            }
        }
    }

    /// Applies one provider event. Events for any request other than the in-flight one
    /// are dropped and `false` is returned.
    pub fn apply_event(&mut self, event: StreamEventMapped) -> bool {
        if !self.stream_state.accepts_stream_event(event.target) {
            tracing::debug!(target = ?event.target, "dropping stale stream event");
            return false;
        }

        let target = event.target;
        match event.payload {
            StreamEventPayload::Delta(chunk) => self.draft.push_str(&chunk),
            StreamEventPayload::ReasoningDelta(chunk) => self.reasoning.push_str(&chunk),
            StreamEventPayload::Data(payload) => self.payloads.push(payload),
            StreamEventPayload::Done => self.finish_stream(StreamTransition::Complete(target)),
            StreamEventPayload::Error(message) => {
                tracing::warn!(target = ?target, error = %message, "response failed");
                self.finish_stream(StreamTransition::Fail { target, message });
            }
        }

        true
    }

    /// Cancels the in-flight request, keeping any partial answer. No-op when idle.
    pub fn stop(&mut self) -> bool {
        let Some(target) = self.stream_state.active_target() else {
            return false;
        };

        if let Some(stream) = self.active_stream.as_mut() {
            stream.cancel();
        }
        self.finish_stream(StreamTransition::Cancel(target));
        tracing::debug!(target = ?target, "stopped active response");
        true
    }

    /// Waits for the next event of the in-flight request and applies it. Returns false
    /// once there is nothing left to wait for.
    pub async fn pump(&mut self) -> bool {
        let Some(stream) = self.active_stream.as_mut() else {
            return false;
        };

        match stream.recv().await {
            Some(event) => {
                self.apply_event(event);
                true
            }
            None => {
                if let Some(target) = self.stream_state.active_target() {
                    self.finish_stream(StreamTransition::Fail {
                        target,
                        message: STREAM_CLOSED_EARLY.to_string(),
                    });
                }
                self.active_stream = None;
                false
            }
        }
    }

    pub async fn run_to_completion(&mut self) {
        while self.pump().await {}
    }

    /// Waits for outstanding question-log writes so they are not lost at shutdown.
    pub async fn flush_records(&mut self) {
        for record in self.pending_records.drain(..) {
            if let Err(error) = record.await {
                tracing::error!("question log task failed: {error}");
            }
        }
    }

    fn finish_stream(&mut self, transition: StreamTransition) {
        let completed = matches!(transition, StreamTransition::Complete(_));
        if let Err(rejection) = self.apply_transition(transition) {
            tracing::warn!(?rejection, "ignoring stream transition");
            return;
        }

        let content = std::mem::take(&mut self.draft);
        if completed || !content.is_empty() {
            let assistant_turn_id = self.alloc_turn_id();
            self.turns.push(Turn::assistant(assistant_turn_id, content));
        }

        self.active_stream = None;
        self.rotator.set_outstanding(self.stream_state.is_outstanding());
    }

    fn apply_transition(
        &mut self,
        transition: StreamTransition,
    ) -> Result<(), chatline_core::StreamTransitionRejection> {
        self.stream_state = self.stream_state.apply(transition)?;
        Ok(())
    }

    fn alloc_turn_id(&mut self) -> TurnId {
        let id = TurnId::new(self.next_turn_id);
        self.next_turn_id = self.next_turn_id.saturating_add(1);
        id
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use chatline_core::Role;
    use chatline_llm::{ProviderResult, ProviderStreamHandle, ProviderWorker, make_event_stream};
    use serde_json::json;

    use super::*;

    /// Replays canned payloads for each request, optionally holding the stream open
    /// until it is cancelled.
    pub(crate) struct ScriptedProvider {
        replies: Mutex<Vec<Vec<StreamEventPayload>>>,
        hold_open: bool,
        pub(crate) requests: Mutex<Vec<StreamRequest>>,
    }

    impl ScriptedProvider {
        pub(crate) fn new(replies: Vec<Vec<StreamEventPayload>>) -> Self {
            Self {
                replies: Mutex::new(replies),
                hold_open: false,
                requests: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn held_open(replies: Vec<Vec<StreamEventPayload>>) -> Self {
            Self {
                hold_open: true,
                ..Self::new(replies)
            }
        }
    }

    impl LlmProvider for ScriptedProvider {
        fn id(&self) -> &str {
            "scripted"
        }

        fn name(&self) -> &str {
            "Scripted"
        }

        fn default_model(&self) -> &str {
            "scripted-model"
        }

        fn stream_chat(&self, request: StreamRequest) -> ProviderResult<ProviderStreamHandle> {
            let target = request.target;
            self.requests.lock().unwrap().push(request);
            let reply = {
                let mut replies = self.replies.lock().unwrap();
                if replies.is_empty() {
                    Vec::new()
                } else {
                    replies.remove(0)
                }
            };
            let hold_open = self.hold_open;

            let (event_tx, stream, cancel_rx) = make_event_stream(target);
            let worker: ProviderWorker = Box::pin(async move {
                for payload in reply {
                    if event_tx.send(StreamEventMapped::new(target, payload)).is_err() {
                        return;
                    }
                }
                if hold_open {
                    let _ = cancel_rx.await;
                }
            });

            Ok(ProviderStreamHandle { stream, worker })
        }
    }

    pub(crate) fn quick_rotator() -> RotatorConfig {
        RotatorConfig::new(["A", "B", "C"], Duration::from_millis(50))
    }

    fn session_with(provider: ScriptedProvider) -> (ChatSession, Arc<ScriptedProvider>) {
        let provider = Arc::new(provider);
        let session = ChatSession::new(quick_rotator())
            .expect("valid rotator")
            .with_provider(provider.clone(), "scripted-model");
        (session, provider)
    }

    fn delta(text: &str) -> StreamEventPayload {
        StreamEventPayload::Delta(text.to_string())
    }

    fn data(value: serde_json::Value) -> StreamEventPayload {
        StreamEventPayload::Data(AuxiliaryPayload::new(value))
    }

    #[tokio::test]
    async fn answered_question_appends_both_turns() {
        let (mut session, provider) = session_with(ScriptedProvider::new(vec![vec![
            delta("Save "),
            delta("more."),
            StreamEventPayload::Done,
        ]]));

        session.submit("How do I budget?").expect("submit accepted");
        assert!(session.is_outstanding());
        assert!(session.loading().active);
        assert_eq!(session.loading().status, "A");

        session.run_to_completion().await;

        assert!(!session.is_outstanding());
        assert!(!session.loading().active);
        let turns = session.turns();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0], Turn::user(TurnId::new(1), "How do I budget?"));
        assert_eq!(turns[1], Turn::assistant(TurnId::new(2), "Save more."));

        let requests = provider.requests.lock().unwrap();
        assert_eq!(requests[0].messages.len(), 1);
        assert_eq!(requests[0].messages[0].role, Role::User);
    }

    #[tokio::test]
    async fn generation_options_reach_the_provider() {
        let (session, provider) =
            session_with(ScriptedProvider::new(vec![vec![StreamEventPayload::Done]]));
        let mut session = session
            .with_preamble("Be brief.")
            .with_generation(Some(0.3), Some(256));

        session.submit("Hi").expect("submit");
        session.run_to_completion().await;

        let requests = provider.requests.lock().unwrap();
        assert_eq!(requests[0].preamble.as_deref(), Some("Be brief."));
        assert_eq!(requests[0].temperature, Some(0.3));
        assert_eq!(requests[0].max_tokens, Some(256));
    }

    #[tokio::test]
    async fn history_is_sent_with_each_follow_up() {
        let (mut session, provider) = session_with(ScriptedProvider::new(vec![
            vec![delta("first"), StreamEventPayload::Done],
            vec![delta("second"), StreamEventPayload::Done],
        ]));

        session.submit("one").expect("first submit");
        session.run_to_completion().await;
        session.submit("two").expect("second submit");
        session.run_to_completion().await;

        let requests = provider.requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].messages.len(), 3);
        assert_ne!(requests[0].target, requests[1].target);
        assert_eq!(session.turns().len(), 4);
    }

    #[tokio::test]
    async fn data_events_feed_the_rendered_thread() {
        let (mut session, _) = session_with(ScriptedProvider::new(vec![vec![
            data(json!({ "source": "faq.md" })),
            delta("See the FAQ."),
            data(json!({ "source": "terms.md" })),
            StreamEventPayload::Done,
        ]]));

        session.submit("Where is this documented?").expect("submit");
        session.run_to_completion().await;

        assert_eq!(session.payloads().len(), 2);
        let rendered = session.rendered().to_vec();
        assert_eq!(rendered.len(), 2);
        assert_eq!(rendered[0].payloads[0].value["source"], "faq.md");
        assert_eq!(rendered[1].payloads[0].value["source"], "terms.md");
    }

    #[tokio::test]
    async fn blank_and_concurrent_submits_are_rejected() {
        let (mut session, _) = session_with(ScriptedProvider::held_open(vec![vec![delta("…")]]));

        assert!(matches!(
            session.submit("   "),
            Err(SessionError::EmptyQuestion { .. })
        ));
        assert!(session.turns().is_empty());

        let target = session.submit("first").expect("submit");
        assert!(matches!(
            session.submit("second"),
            Err(SessionError::Busy { active, .. }) if active == target
        ));
        assert_eq!(session.turns().len(), 1);
        session.stop();
    }

    #[tokio::test]
    async fn missing_provider_is_reported() {
        let mut session = ChatSession::new(quick_rotator()).expect("valid rotator");
        assert!(matches!(
            session.submit("hello"),
            Err(SessionError::ProviderNotConfigured { .. })
        ));
        assert!(session.turns().is_empty());
        assert!(!session.loading().active);
    }

    #[tokio::test]
    async fn stop_keeps_partial_answer_and_clears_loading() {
        let (mut session, _) =
            session_with(ScriptedProvider::held_open(vec![vec![delta("Partial")]]));

        let target = session.submit("Tell me everything").expect("submit");
        assert!(session.pump().await);
        assert_eq!(session.draft(), "Partial");

        assert!(session.stop());
        assert!(!session.stop());
        assert_eq!(session.stream_state(), &StreamState::Cancelled(target));
        assert!(!session.loading().active);
        assert_eq!(session.turns()[1].content, "Partial");

        // Nothing else arrives for the cancelled request.
        assert!(!session.pump().await);
        assert!(!session.apply_event(StreamEventMapped::new(target, delta("late"))));
        assert_eq!(session.turns().len(), 2);
    }

    #[tokio::test]
    async fn stale_events_are_ignored() {
        let (mut session, _) = session_with(ScriptedProvider::held_open(vec![Vec::new()]));
        let target = session.submit("hi").expect("submit");

        let stale = StreamTarget::new(target.conversation_id, StreamSessionId::new(99));
        assert!(!session.apply_event(StreamEventMapped::new(stale, StreamEventPayload::Done)));
        assert!(session.is_outstanding());
        session.stop();
    }

    #[tokio::test]
    async fn provider_error_ends_the_request() {
        let (mut session, _) = session_with(ScriptedProvider::new(vec![vec![
            delta("Half an ans"),
            StreamEventPayload::Error("rate limited".to_string()),
        ]]));

        session.submit("Go").expect("submit");
        session.run_to_completion().await;

        assert_eq!(session.last_error(), Some("rate limited"));
        assert!(!session.loading().active);
        assert_eq!(session.turns()[1].content, "Half an ans");
    }

    #[tokio::test]
    async fn stream_closing_without_terminal_event_is_an_error() {
        let (mut session, _) = session_with(ScriptedProvider::new(vec![vec![delta("cut")]]));

        session.submit("Go").expect("submit");
        session.run_to_completion().await;

        assert_eq!(session.last_error(), Some(STREAM_CLOSED_EARLY));
        assert!(!session.is_outstanding());
        assert_eq!(session.turns()[1].content, "cut");
    }

    #[tokio::test]
    async fn questions_are_recorded_in_the_log() {
        let log = Arc::new(
            SqliteQuestionLog::open(":memory:")
                .await
                .expect("in-memory log"),
        );
        let (session, _) = session_with(ScriptedProvider::new(vec![vec![
            StreamEventPayload::Done,
        ]]));
        let mut session = session.with_question_log(log.clone());

        session.submit("Is this saved?").expect("submit");
        session.run_to_completion().await;
        session.flush_records().await;

        let recorded = log.list_questions().await.expect("list questions");
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].question, "Is this saved?");
    }

    #[test]
    fn empty_loading_messages_are_fatal() {
        let error = ChatSession::new(RotatorConfig::new(
            Vec::<String>::new(),
            Duration::from_secs(1),
        ))
        .err()
        .expect("empty status list must fail");
        assert!(matches!(
            error,
            SessionError::LoadingConfig {
                source: RotatorError::EmptyStatusList { .. },
                ..
            }
        ));
    }
}
