use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use rebook_core::audit::{AuditContext, AuditSink, NoopAuditSink};
use rebook_core::domain::booking::BookingId;
use rebook_core::domain::conversation::{ConversationState, Intent, MediaType, MessageRole};
use rebook_core::domain::trip::TripId;
use rebook_core::errors::ApplicationError;
use rebook_core::flows::{ConversationGraph, IntentRouter, RouteNode, TurnMedia};
use rebook_db::{EngineError, ReservationEngine, ReservationStore};

use crate::extractor::Extractor;
use crate::faq::FaqLookup;
use crate::handlers::{self, APOLOGY_REPLY, FALLBACK_REPLY};
use crate::media::{merge_media_text, MediaProcessor, NoopMediaProcessor};
use crate::session::ConversationStore;

const DEFAULT_COLLABORATOR_TIMEOUT: Duration = Duration::from_secs(30);
const EMPTY_QUESTION_REPLY: &str = "Sorry, I did not understand your question. Please ask again.";

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TurnRequest {
    pub thread_id: String,
    pub message: String,
    pub media_type: Option<MediaType>,
    pub attachments: Vec<String>,
}

impl TurnRequest {
    pub fn text(thread_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self { thread_id: thread_id.into(), message: message.into(), ..Self::default() }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TurnReply {
    pub reply: String,
    pub intent: Option<Intent>,
    pub booking_id: Option<BookingId>,
    pub date: Option<NaiveDate>,
    pub trip_id: Option<TripId>,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub path: Vec<RouteNode>,
}

/// What the walk does after a node ran.
enum Step {
    Continue,
    /// A collaborator failed; the turn ends with this reply.
    Stop(String),
}

#[derive(Default)]
struct TurnProgress {
    text: String,
    media_text: Option<String>,
    reply: Option<String>,
}

/// Runs one conversational turn: media pre-processing, classification, and exactly one
/// handler, following the routing graph from its entry node.
pub struct AgentRuntime<S> {
    engine: Arc<ReservationEngine<S>>,
    extractor: Arc<dyn Extractor>,
    faq: Arc<dyn FaqLookup>,
    media: Arc<dyn MediaProcessor>,
    sessions: ConversationStore,
    router: IntentRouter<ConversationGraph>,
    audit_sink: Arc<dyn AuditSink>,
    collaborator_timeout: Duration,
}

impl<S> AgentRuntime<S>
where
    S: ReservationStore,
{
    pub fn new(
        engine: Arc<ReservationEngine<S>>,
        extractor: Arc<dyn Extractor>,
        faq: Arc<dyn FaqLookup>,
    ) -> Self {
        Self {
            engine,
            extractor,
            faq,
            media: Arc::new(NoopMediaProcessor),
            sessions: ConversationStore::new(),
            router: IntentRouter::default(),
            audit_sink: Arc::new(NoopAuditSink),
            collaborator_timeout: DEFAULT_COLLABORATOR_TIMEOUT,
        }
    }

    pub fn with_media(mut self, media: Arc<dyn MediaProcessor>) -> Self {
        self.media = media;
        self
    }

    pub fn with_audit_sink(mut self, audit_sink: Arc<dyn AuditSink>) -> Self {
        self.audit_sink = audit_sink;
        self
    }

    pub fn with_collaborator_timeout(mut self, timeout: Duration) -> Self {
        self.collaborator_timeout = timeout;
        self
    }

    pub fn engine(&self) -> &ReservationEngine<S> {
        &self.engine
    }

    pub fn sessions(&self) -> &ConversationStore {
        &self.sessions
    }

    /// Never fails: collaborator and store faults become an apology with `error` set.
    pub async fn handle_turn(&self, request: TurnRequest) -> TurnReply {
        let correlation_id = Uuid::new_v4().to_string();
        let audit =
            AuditContext::new(None, Some(request.thread_id.clone()), &correlation_id, "agent");
        let media = TurnMedia {
            media_type: request.media_type,
            has_attachments: !request.attachments.is_empty(),
        };

        let mut state = self.sessions.lock(&request.thread_id).await;
        state.start_turn();
        state.push_message(MessageRole::User, request.message.clone());

        let mut progress =
            TurnProgress { text: request.message.clone(), ..TurnProgress::default() };
        let mut path = Vec::new();
        let mut node = self.router.entry();

        loop {
            path.push(node);
            match self.run_node(node, &mut state, &mut progress, &request, &audit).await {
                Ok(Step::Continue) => {}
                Ok(Step::Stop(reply)) => {
                    progress.reply = Some(reply);
                    break;
                }
                Err(fault) => {
                    progress.reply = Some(self.fault_reply(fault, &mut state, &audit));
                    break;
                }
            }

            match self.router.next_with_audit(
                node,
                &state,
                media,
                self.audit_sink.as_ref(),
                &audit,
            ) {
                Ok(transition) if transition.to == RouteNode::End => break,
                Ok(transition) => node = transition.to,
                Err(routing) => {
                    let fault = ApplicationError::Domain(routing.into());
                    progress.reply = Some(self.internal_reply(fault, &mut state, &audit));
                    break;
                }
            }
        }

        let reply = progress.reply.unwrap_or_default();
        state.push_message(MessageRole::Assistant, reply.clone());
        info!(
            event_name = "agent.turn_completed",
            correlation_id = %audit.correlation_id,
            thread_id = %request.thread_id,
            intent = state.intent.map(|intent| intent.as_str()).unwrap_or("none"),
            last_node = path.last().map(RouteNode::as_str).unwrap_or("none"),
            has_error = state.error.is_some(),
            "turn completed"
        );

        TurnReply {
            reply,
            intent: state.intent,
            booking_id: state.booking_id.clone(),
            date: state.date,
            trip_id: state.trip_id.clone(),
            result: state.result.clone(),
            error: state.error.clone(),
            path,
        }
    }

    async fn run_node(
        &self,
        node: RouteNode,
        state: &mut ConversationState,
        progress: &mut TurnProgress,
        request: &TurnRequest,
        audit: &AuditContext,
    ) -> Result<Step, EngineError> {
        debug!(node = node.as_str(), correlation_id = %audit.correlation_id, "running node");
        let engine = self.engine.as_ref();
        let reply = match node {
            RouteNode::MediaIngest | RouteNode::End => return Ok(Step::Continue),
            RouteNode::ImageVision => {
                let described = self.media.describe_image(&request.attachments).await;
                progress.media_text = self.media_step("image_vision", described);
                return Ok(Step::Continue);
            }
            RouteNode::AudioTranscribe => {
                let transcribed = self.media.transcribe_audio(&request.attachments).await;
                progress.media_text = self.media_step("audio_transcribe", transcribed);
                return Ok(Step::Continue);
            }
            RouteNode::TicketParse => {
                if let Some(media_text) = progress.media_text.clone() {
                    let parsed = self.media.parse_ticket(&media_text).await;
                    if let Some(ticket) = self.media_step("ticket_parse", parsed) {
                        progress.media_text = Some(format!("{media_text}\n{ticket}"));
                    }
                }
                return Ok(Step::Continue);
            }
            RouteNode::MergeMediaText => {
                if let Some(media_text) = &progress.media_text {
                    state.push_message(MessageRole::Media, media_text.clone());
                }
                progress.text = merge_media_text(&request.message, progress.media_text.as_deref());
                return Ok(Step::Continue);
            }
            RouteNode::Classify => return Ok(self.classify(state, &progress.text, audit).await),
            RouteNode::Extract => match handlers::extract(state) {
                Some(prompt) => prompt,
                None => return Ok(Step::Continue),
            },
            RouteNode::Candidates => handlers::candidates(engine, state).await?,
            RouteNode::Apply => handlers::apply(engine, state, audit).await?,
            RouteNode::CheckBooking => handlers::check_booking(engine, state).await?,
            RouteNode::ViewTrips => handlers::view_trips(engine, state).await?,
            RouteNode::CancelBooking => handlers::cancel_booking(engine, state, audit).await?,
            RouteNode::GetInvoice => handlers::get_invoice(engine, state).await?,
            RouteNode::CreateComplaint => handlers::create_complaint(engine, state, audit).await?,
            RouteNode::Faq => self.answer_faq(state, &progress.text, audit).await,
            RouteNode::Fallback => FALLBACK_REPLY.to_string(),
        };
        progress.reply = Some(reply);
        Ok(Step::Continue)
    }

    async fn classify(
        &self,
        state: &mut ConversationState,
        text: &str,
        audit: &AuditContext,
    ) -> Step {
        let extracted = match self.bounded(self.extractor.extract(text, state)).await {
            Some(Ok(fields)) => fields,
            Some(Err(failure)) => {
                warn!(
                    event_name = "agent.extractor_failed",
                    correlation_id = %audit.correlation_id,
                    error = %failure,
                    "extractor failed; answering with an apology"
                );
                state.record_error(failure.to_string());
                return Step::Stop(APOLOGY_REPLY.to_string());
            }
            None => {
                warn!(
                    event_name = "agent.extractor_timeout",
                    correlation_id = %audit.correlation_id,
                    timeout_ms = self.collaborator_timeout.as_millis() as u64,
                    "extractor timed out; answering with an apology"
                );
                state.record_error("extractor timed out");
                return Step::Stop(APOLOGY_REPLY.to_string());
            }
        };

        let declared = extracted.intent;
        state.merge(extracted);
        if declared.is_none() {
            state.intent =
                Some(if state.has_change_signal() { Intent::ChangeTime } else { Intent::Unknown });
        }
        debug!(
            event_name = "agent.classified",
            correlation_id = %audit.correlation_id,
            intent = state.intent.map(|intent| intent.as_str()).unwrap_or("none"),
            inferred = declared.is_none(),
            "message classified"
        );
        Step::Continue
    }

    async fn answer_faq(
        &self,
        state: &mut ConversationState,
        text: &str,
        audit: &AuditContext,
    ) -> String {
        if text.trim().is_empty() {
            return EMPTY_QUESTION_REPLY.to_string();
        }
        match self.bounded(self.faq.answer(text)).await {
            Some(Ok(answer)) => handlers::faq_reply(&answer),
            Some(Err(failure)) => {
                warn!(
                    event_name = "agent.faq_failed",
                    correlation_id = %audit.correlation_id,
                    error = %failure,
                    "faq lookup failed; answering with an apology"
                );
                state.record_error(failure.to_string());
                APOLOGY_REPLY.to_string()
            }
            None => {
                warn!(
                    event_name = "agent.faq_timeout",
                    correlation_id = %audit.correlation_id,
                    "faq lookup timed out; answering with an apology"
                );
                state.record_error("faq lookup timed out");
                APOLOGY_REPLY.to_string()
            }
        }
    }

    fn media_step<E: std::fmt::Display>(
        &self,
        step: &'static str,
        outcome: Result<Option<String>, E>,
    ) -> Option<String> {
        match outcome {
            Ok(text) => text.filter(|text| !text.trim().is_empty()),
            Err(failure) => {
                warn!(
                    event_name = "agent.media_failed",
                    step,
                    error = %failure,
                    "media step failed"
                );
                None
            }
        }
    }

    async fn bounded<T>(&self, future: impl Future<Output = T>) -> Option<T> {
        tokio::time::timeout(self.collaborator_timeout, future).await.ok()
    }

    fn fault_reply(
        &self,
        fault: EngineError,
        state: &mut ConversationState,
        audit: &AuditContext,
    ) -> String {
        match fault {
            EngineError::NotFound(domain) if domain.is_not_found() => {
                debug!(
                    event_name = "agent.not_found",
                    correlation_id = %audit.correlation_id,
                    error = %domain,
                    "lookup missed"
                );
                state.record_error(domain.to_string());
                handlers::not_found_reply(&domain)
            }
            other => self.internal_reply(other.into(), state, audit),
        }
    }

    fn internal_reply(
        &self,
        fault: ApplicationError,
        state: &mut ConversationState,
        audit: &AuditContext,
    ) -> String {
        error!(
            event_name = "agent.turn_failed",
            correlation_id = %audit.correlation_id,
            error = %fault,
            "turn failed"
        );
        let interface = fault.into_interface(audit.correlation_id.clone());
        state.record_error(interface.user_message());
        APOLOGY_REPLY.to_string()
    }
}
