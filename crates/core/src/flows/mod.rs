pub mod engine;
pub mod states;

pub use engine::{
    route_from_classify, route_from_extract, route_from_media_ingest, ConversationGraph,
    IntentRouter, RoutingError, RoutingGraph,
};
pub use states::{RouteContext, RouteNode, RouteTransition, TurnMedia};
