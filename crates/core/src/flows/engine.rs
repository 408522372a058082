use thiserror::Error;
use tracing::debug;

use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use crate::domain::conversation::{ConversationState, Intent, MediaType};
use crate::flows::states::{RouteContext, RouteNode, RouteTransition, TurnMedia};

pub trait RoutingGraph {
    fn entry(&self) -> RouteNode;
    fn transition(
        &self,
        current: RouteNode,
        context: &RouteContext<'_>,
    ) -> Result<RouteTransition, RoutingError>;
}

/// The booking assistant graph: media pre-processing, classification, then one handler.
#[derive(Clone, Debug, Default)]
pub struct ConversationGraph;

impl RoutingGraph for ConversationGraph {
    fn entry(&self) -> RouteNode {
        RouteNode::MediaIngest
    }

    fn transition(
        &self,
        current: RouteNode,
        context: &RouteContext<'_>,
    ) -> Result<RouteTransition, RoutingError> {
        transition_conversation(current, context)
    }
}

pub struct IntentRouter<G> {
    graph: G,
}

impl<G> IntentRouter<G>
where
    G: RoutingGraph,
{
    pub fn new(graph: G) -> Self {
        Self { graph }
    }

    pub fn entry(&self) -> RouteNode {
        self.graph.entry()
    }

    pub fn next(
        &self,
        current: RouteNode,
        state: &ConversationState,
        media: TurnMedia,
    ) -> Result<RouteTransition, RoutingError> {
        self.graph.transition(current, &RouteContext::new(state, media))
    }

    pub fn next_with_audit<S>(
        &self,
        current: RouteNode,
        state: &ConversationState,
        media: TurnMedia,
        sink: &S,
        audit: &AuditContext,
    ) -> Result<RouteTransition, RoutingError>
    where
        S: AuditSink + ?Sized,
    {
        let result = self.next(current, state, media);
        match &result {
            Ok(transition) => {
                debug!(
                    event_name = "router.transition",
                    correlation_id = %audit.correlation_id,
                    thread_id = audit.thread_id.as_deref().unwrap_or(""),
                    from = transition.from.as_str(),
                    to = transition.to.as_str(),
                    "route transition"
                );
                sink.emit(
                    AuditEvent::from_context(
                        audit,
                        "router.transition",
                        AuditCategory::Routing,
                        AuditOutcome::Success,
                    )
                    .with_metadata("from", transition.from.as_str())
                    .with_metadata("to", transition.to.as_str())
                    .with_metadata(
                        "intent",
                        state.intent.map(|intent| intent.as_str()).unwrap_or("none"),
                    ),
                );
            }
            Err(error) => {
                sink.emit(
                    AuditEvent::from_context(
                        audit,
                        "router.transition",
                        AuditCategory::Routing,
                        AuditOutcome::Rejected,
                    )
                    .with_metadata("error", error.to_string()),
                );
            }
        }
        result
    }
}

impl Default for IntentRouter<ConversationGraph> {
    fn default() -> Self {
        Self::new(ConversationGraph)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RoutingError {
    #[error("no transition out of terminal node `{0}`")]
    TerminalNode(RouteNode),
}

fn transition_conversation(
    current: RouteNode,
    context: &RouteContext<'_>,
) -> Result<RouteTransition, RoutingError> {
    let to = match current {
        RouteNode::MediaIngest => route_from_media_ingest(context.media),
        RouteNode::ImageVision | RouteNode::AudioTranscribe => RouteNode::TicketParse,
        RouteNode::TicketParse => RouteNode::MergeMediaText,
        RouteNode::MergeMediaText => RouteNode::Classify,
        RouteNode::Classify => route_from_classify(context.state),
        RouteNode::Extract => route_from_extract(context.state),
        node if node.is_terminal_handler() => RouteNode::End,
        node => return Err(RoutingError::TerminalNode(node)),
    };

    Ok(RouteTransition { from: current, to })
}

pub fn route_from_media_ingest(media: TurnMedia) -> RouteNode {
    if !media.has_attachments {
        return RouteNode::Classify;
    }
    match media.media_type {
        Some(MediaType::Image) => RouteNode::ImageVision,
        Some(MediaType::Audio) => RouteNode::AudioTranscribe,
        _ => RouteNode::Classify,
    }
}

/// First match wins. The final `Extract` branch is the safety net for a declared
/// intent with no change-time fields yet.
pub fn route_from_classify(state: &ConversationState) -> RouteNode {
    if let Some(intent) = state.intent.filter(Intent::is_directly_actionable) {
        return match intent {
            Intent::CheckBooking => RouteNode::CheckBooking,
            Intent::ViewTrips => RouteNode::ViewTrips,
            Intent::CancelBooking => RouteNode::CancelBooking,
            Intent::GetInvoice => RouteNode::GetInvoice,
            Intent::CreateComplaint => RouteNode::CreateComplaint,
            _ => RouteNode::Faq,
        };
    }

    if state.has_change_signal() {
        let has_booking = state.booking_id.is_some();
        let has_date = state.date.is_some();
        if !(has_booking && has_date) {
            return RouteNode::Extract;
        }
        if state.trip_id.is_none() {
            return RouteNode::Candidates;
        }
        return RouteNode::Apply;
    }

    if state.intent == Some(Intent::Unknown) {
        return RouteNode::Fallback;
    }

    RouteNode::Extract
}

pub fn route_from_extract(state: &ConversationState) -> RouteNode {
    if state.booking_id.is_some() && state.date.is_some() {
        RouteNode::Candidates
    } else {
        RouteNode::End
    }
}
