use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

use rebook_core::domain::conversation::{ConversationState, ExtractedFields};

/// Process-lifetime conversation state keyed by thread id.
///
/// Each thread has its own lock, so turns on one thread run one at a time while
/// different threads proceed independently.
#[derive(Clone, Default)]
pub struct ConversationStore {
    threads: Arc<Mutex<HashMap<String, Arc<Mutex<ConversationState>>>>>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn slot(&self, thread_id: &str) -> Arc<Mutex<ConversationState>> {
        let mut threads = self.threads.lock().await;
        threads.entry(thread_id.to_string()).or_default().clone()
    }

    /// Locks the thread's state for the duration of a turn, creating it on first use.
    pub async fn lock(&self, thread_id: &str) -> OwnedMutexGuard<ConversationState> {
        self.slot(thread_id).await.lock_owned().await
    }

    pub async fn get(&self, thread_id: &str) -> ConversationState {
        self.lock(thread_id).await.clone()
    }

    pub async fn merge(&self, thread_id: &str, updates: ExtractedFields) -> ConversationState {
        let mut state = self.lock(thread_id).await;
        state.merge(updates);
        state.clone()
    }

    pub async fn thread_count(&self) -> usize {
        self.threads.lock().await.len()
    }
}
