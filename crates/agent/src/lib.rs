//! Conversation runtime for the booking-change assistant.
//!
//! This crate turns one user message into one reply:
//! - Extracts intent and booking fields from free text (`extractor`, `llm`)
//! - Keeps per-thread conversation state across turns (`session`)
//! - Walks the routing graph from media pre-processing to a single handler (`runtime`)
//! - Renders replies from reservation engine results (`handlers`)
//!
//! # Key Types
//!
//! - `AgentRuntime` - turn orchestrator (see `runtime` module)
//! - `Extractor` - pluggable field extraction, rule-based or LLM-backed
//! - `FaqLookup` - knowledge-base answers for policy questions
//!
//! # Safety Principle
//!
//! The extractor is strictly a translator. It never decides fees, seat availability or
//! refund amounts. Those come from the reservation engine.

pub mod extractor;
pub mod faq;
pub mod handlers;
pub mod llm;
pub mod media;
pub mod runtime;
pub mod session;

pub use extractor::{build_extractor, Extractor, ExtractorError, LlmExtractor, RuleBasedExtractor};
pub use faq::{FaqError, FaqLookup, KnowledgeBase};
pub use llm::{LlmClient, OpenAiCompatibleClient};
pub use media::{MediaError, MediaProcessor, NoopMediaProcessor};
pub use runtime::{AgentRuntime, TurnReply, TurnRequest};
pub use session::ConversationStore;
