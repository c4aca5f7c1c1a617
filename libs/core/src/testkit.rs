//! In-memory [`ReplySender`] for tests of code that emits replies.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, watch};

use crate::egress::{ReplyError, ReplyMessage, ReplySender, validate_messages};
use crate::types::ReplyToken;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedReply {
    /// 1-based order in which the call started.
    pub call: usize,
    pub token: ReplyToken,
    pub messages: Vec<ReplyMessage>,
    pub succeeded: bool,
}

/// Records every reply call. Selected calls can be made to fail, and all
/// calls can be held until [`RecordingReplySender::release`] is called.
#[derive(Clone)]
pub struct RecordingReplySender {
    started: Arc<AtomicUsize>,
    finished: Arc<Mutex<Vec<RecordedReply>>>,
    fail_calls: Arc<HashSet<usize>>,
    fail_tokens: Arc<HashSet<String>>,
    gate: Arc<watch::Sender<bool>>,
}

impl Default for RecordingReplySender {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingReplySender {
    pub fn new() -> Self {
        let (gate, _) = watch::channel(true);
        Self {
            started: Arc::default(),
            finished: Arc::default(),
            fail_calls: Arc::default(),
            fail_tokens: Arc::default(),
            gate: Arc::new(gate),
        }
    }

    /// Fails the calls with these 1-based start positions.
    pub fn failing_calls(mut self, calls: impl IntoIterator<Item = usize>) -> Self {
        self.fail_calls = Arc::new(calls.into_iter().collect());
        self
    }

    /// Fails every call that uses one of these reply tokens.
    pub fn failing_tokens<S: Into<String>>(mut self, tokens: impl IntoIterator<Item = S>) -> Self {
        self.fail_tokens = Arc::new(tokens.into_iter().map(Into::into).collect());
        self
    }

    /// Holds every call until [`release`](Self::release).
    pub fn gated(self) -> Self {
        self.gate.send_replace(false);
        self
    }

    pub fn release(&self) {
        self.gate.send_replace(true);
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub async fn replies(&self) -> Vec<RecordedReply> {
        self.finished.lock().await.clone()
    }

    /// Waits until `count` calls have finished; false on timeout.
    pub async fn wait_for_replies(&self, count: usize, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, async {
            loop {
                if self.finished.lock().await.len() >= count {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .is_ok()
    }
}

#[async_trait]
impl ReplySender for RecordingReplySender {
    async fn reply(&self, token: &ReplyToken, messages: &[ReplyMessage]) -> Result<(), ReplyError> {
        let call = self.started.fetch_add(1, Ordering::SeqCst) + 1;
        let mut gate = self.gate.subscribe();
        // The sender half lives in `self`, so the channel cannot close here.
        let _ = gate.wait_for(|open| *open).await;

        let result = validate_messages(messages).and_then(|_| {
            if self.fail_calls.contains(&call) || self.fail_tokens.contains(token.as_str()) {
                Err(ReplyError::Api {
                    status: 400,
                    body: r#"{"message":"Invalid reply token"}"#.into(),
                })
            } else {
                Ok(())
            }
        });

        self.finished.lock().await.push(RecordedReply {
            call,
            token: token.clone(),
            messages: messages.to_vec(),
            succeeded: result.is_ok(),
        });
        result
    }
}
