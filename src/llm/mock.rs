//! A deterministic `ChatCompletion` stub. Not wired into the production
//! `AppState`; exists so the Planner/Coordinator pipeline can be exercised
//! end-to-end in tests without a network call.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{ChatCompletion, ChatReply, ChatRequest};

/// Returns one canned reply per call, in order, cycling the last one if it
/// runs out. Also records every request it received for assertions.
pub struct MockChatClient {
    replies: Vec<String>,
    calls: AtomicUsize,
    received: Mutex<Vec<ChatRequest>>,
}

impl MockChatClient {
    pub fn new(replies: Vec<String>) -> Self {
        Self {
            replies,
            calls: AtomicUsize::new(0),
            received: Mutex::new(Vec::new()),
        }
    }

    pub fn single(reply: impl Into<String>) -> Self {
        Self::new(vec![reply.into()])
    }

    pub async fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub async fn last_request(&self) -> Option<ChatRequest> {
        self.received.lock().await.last().cloned()
    }
}

#[async_trait]
impl ChatCompletion for MockChatClient {
    async fn complete(&self, request: ChatRequest) -> anyhow::Result<ChatReply> {
        let idx = self.calls.fetch_add(1, Ordering::SeqCst);
        self.received.lock().await.push(request);
        let reply = self
            .replies
            .get(idx)
            .or_else(|| self.replies.last())
            .cloned()
            .unwrap_or_default();
        Ok(ChatReply { content: reply })
    }
}
