//! Background processing of verified webhook events.
//!
//! The HTTP handler hands a parsed payload to [`Dispatcher::spawn`] and
//! answers immediately. Events in one payload are handled concurrently and
//! independently: a failed reply, a malformed record or even a panic in one
//! event is logged and counted, and never stops its siblings.
//!
//! Detached dispatches are tracked so shutdown can wait for replies that
//! are still in flight; see [`Dispatcher::drain`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use dine_core::platforms::line::{LineEvent, WebhookPayload};
use dine_core::{ReplyError, ReplyMessage, ReplyToken, SharedReplySender};
use dine_telemetry::{EventOutcome, ReplyOutcome, record_event, record_reply};
use serde_json::Value;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::task::TaskTracker;
use tracing::{Instrument, Span, debug, info, warn};

/// Tally of one payload once every event has settled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub handled: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl DispatchReport {
    pub fn total(&self) -> usize {
        self.handled + self.skipped + self.failed
    }

    fn add(&mut self, outcome: EventOutcome) {
        match outcome {
            EventOutcome::Handled => self.handled += 1,
            EventOutcome::Skipped => self.skipped += 1,
            EventOutcome::Failed => self.failed += 1,
        }
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    sender: SharedReplySender,
    follow_greeting: Arc<str>,
    in_flight: TaskTracker,
}

impl Dispatcher {
    pub fn new(sender: SharedReplySender, follow_greeting: impl Into<Arc<str>>) -> Self {
        Self {
            sender,
            follow_greeting: follow_greeting.into(),
            in_flight: TaskTracker::new(),
        }
    }

    /// Detaches processing of `payload` from the caller.
    ///
    /// The returned handle resolves once every event has settled. Dropping it
    /// does not cancel the work, and [`drain`](Self::drain) still waits for it.
    pub fn spawn(&self, payload: WebhookPayload) -> JoinHandle<DispatchReport> {
        let this = self.clone();
        self.in_flight
            .spawn(async move { this.dispatch(payload).await }.instrument(Span::current()))
    }

    /// Number of detached dispatches that have not settled yet.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Stops tracking new work and waits up to `grace` for detached
    /// dispatches to settle. Returns how many were still running at the
    /// deadline; those are abandoned when the runtime stops.
    pub async fn drain(&self, grace: Duration) -> usize {
        self.in_flight.close();
        let pending = self.in_flight.len();
        if pending == 0 {
            return 0;
        }
        info!(pending, grace_ms = grace.as_millis() as u64, "waiting for in-flight replies");
        match tokio::time::timeout(grace, self.in_flight.wait()).await {
            Ok(()) => {
                info!("in-flight replies settled");
                0
            }
            Err(_) => {
                let abandoned = self.in_flight.len();
                warn!(abandoned, "shutdown grace elapsed; abandoning in-flight replies");
                abandoned
            }
        }
    }

    /// Processes every event in `payload` concurrently and waits for all of them.
    pub async fn dispatch(&self, payload: WebhookPayload) -> DispatchReport {
        let mut report = DispatchReport::default();
        if payload.events.is_empty() {
            debug!("webhook carried no events");
            return report;
        }

        let mut tasks = JoinSet::new();
        for (index, event) in payload.events.into_iter().enumerate() {
            let this = self.clone();
            tasks.spawn(
                async move { this.handle_event(index, event).await }.instrument(Span::current()),
            );
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => report.add(outcome),
                Err(err) => {
                    warn!(error = %err, "event task aborted");
                    record_event("unknown", EventOutcome::Failed);
                    report.add(EventOutcome::Failed);
                }
            }
        }

        if report.failed > 0 {
            warn!(
                handled = report.handled,
                skipped = report.skipped,
                failed = report.failed,
                "webhook events settled with failures"
            );
        } else {
            info!(
                handled = report.handled,
                skipped = report.skipped,
                "webhook events settled"
            );
        }
        report
    }

    async fn handle_event(&self, index: usize, raw: Value) -> EventOutcome {
        let event = match LineEvent::classify(&raw) {
            Ok(event) => event,
            Err(err) => {
                warn!(index, error = %err, "dropping malformed event");
                record_event("malformed", EventOutcome::Failed);
                return EventOutcome::Failed;
            }
        };

        let meta = event.meta();
        let span = tracing::info_span!(
            "line.event",
            index,
            kind = event.kind(),
            webhook_event_id = meta.webhook_event_id.as_deref().unwrap_or(""),
            redelivery = meta.is_redelivery,
        );

        let kind = event.kind();
        let outcome = async {
            match event {
                LineEvent::Message(message) => {
                    let reply = ReplyMessage::text(message.text);
                    self.send(&message.reply_token, reply).await
                }
                LineEvent::Follow(follow) => {
                    let greeting = ReplyMessage::text(self.follow_greeting.as_ref());
                    self.send(&follow.reply_token, greeting).await
                }
                LineEvent::Unhandled(skipped) => {
                    debug!(event_type = %skipped.kind, reason = ?skipped.reason, "event skipped");
                    EventOutcome::Skipped
                }
            }
        }
        .instrument(span)
        .await;

        record_event(kind, outcome);
        outcome
    }

    /// Makes the single reply attempt for one event.
    async fn send(&self, token: &ReplyToken, message: ReplyMessage) -> EventOutcome {
        let started = Instant::now();
        let result = self.sender.reply(token, &[message]).await;
        let elapsed = started.elapsed();

        match result {
            Ok(()) => {
                record_reply(ReplyOutcome::Sent, elapsed);
                debug!(elapsed_ms = elapsed.as_millis() as u64, "reply sent");
                EventOutcome::Handled
            }
            Err(err) => {
                let outcome = match &err {
                    ReplyError::Timeout(_) => ReplyOutcome::TimedOut,
                    ReplyError::Api { .. } | ReplyError::InvalidMessages(_) => {
                        ReplyOutcome::Rejected
                    }
                    ReplyError::Transport(_) => ReplyOutcome::Failed,
                };
                record_reply(outcome, elapsed);
                warn!(
                    error = %err,
                    outcome = outcome.as_str(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "line reply failed"
                );
                EventOutcome::Failed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use dine_core::ReplySender;
    use dine_core::testkit::RecordingReplySender;
    use serde_json::json;
    use std::time::Duration;

    fn text(token: &str, body: &str) -> Value {
        json!({
            "type": "message",
            "replyToken": token,
            "source": { "type": "user", "userId": "U1" },
            "message": { "id": "m", "type": "text", "text": body }
        })
    }

    fn follow(token: &str) -> Value {
        json!({ "type": "follow", "replyToken": token, "source": { "type": "user", "userId": "U2" } })
    }

    fn payload(events: Vec<Value>) -> WebhookPayload {
        WebhookPayload {
            destination: Some("Ubot".into()),
            events,
        }
    }

    fn dispatcher(sender: &RecordingReplySender) -> Dispatcher {
        Dispatcher::new(Arc::new(sender.clone()), "welcome!")
    }

    #[tokio::test]
    async fn text_is_echoed_and_follow_is_greeted() {
        let sender = RecordingReplySender::new();
        let report = dispatcher(&sender)
            .dispatch(payload(vec![text("t1", "one katsu curry"), follow("t2")]))
            .await;
        assert_eq!(
            report,
            DispatchReport {
                handled: 2,
                skipped: 0,
                failed: 0
            }
        );

        let mut replies = sender.replies().await;
        replies.sort_by(|a, b| a.token.as_str().cmp(b.token.as_str()));
        assert_eq!(replies[0].messages, vec![ReplyMessage::text("one katsu curry")]);
        assert_eq!(replies[1].messages, vec![ReplyMessage::text("welcome!")]);
    }

    #[tokio::test]
    async fn unknown_and_malformed_events_never_reply() {
        let sender = RecordingReplySender::new();
        let report = dispatcher(&sender)
            .dispatch(payload(vec![
                json!({ "type": "unfollow" }),
                json!({ "type": "postback", "replyToken": "p" }),
                json!({ "replyToken": "no-type" }),
                json!(42),
            ]))
            .await;
        assert_eq!(report.skipped, 2);
        assert_eq!(report.failed, 2);
        assert_eq!(sender.started(), 0);
    }

    #[tokio::test]
    async fn one_failing_reply_does_not_affect_siblings() {
        let sender = RecordingReplySender::new().failing_tokens(["t3"]);
        let events = (1..=5).map(|i| text(&format!("t{i}"), "hi")).collect();
        let report = dispatcher(&sender).dispatch(payload(events)).await;
        assert_eq!(report.handled, 4);
        assert_eq!(report.failed, 1);
        assert_eq!(report.total(), 5);

        let replies = sender.replies().await;
        assert_eq!(replies.len(), 5);
        assert_eq!(replies.iter().filter(|r| !r.succeeded).count(), 1);
    }

    struct PanickingSender;

    #[async_trait]
    impl ReplySender for PanickingSender {
        async fn reply(&self, token: &ReplyToken, _: &[ReplyMessage]) -> Result<(), ReplyError> {
            if token.as_str() == "boom" {
                panic!("sender exploded");
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn a_panicking_event_is_counted_as_failed() {
        let dispatcher = Dispatcher::new(Arc::new(PanickingSender), "hi");
        let report = dispatcher
            .dispatch(payload(vec![text("boom", "x"), text("fine", "y")]))
            .await;
        assert_eq!(report.handled, 1);
        assert_eq!(report.failed, 1);
    }

    #[tokio::test]
    async fn events_are_processed_concurrently() {
        let sender = RecordingReplySender::new().gated();
        let handle = dispatcher(&sender).spawn(payload(vec![
            text("a", "1"),
            text("b", "2"),
            text("c", "3"),
        ]));

        // All three calls must be in flight at once while the gate is closed.
        let started = tokio::time::timeout(Duration::from_secs(2), async {
            while sender.started() < 3 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        assert!(started.is_ok(), "replies were not started concurrently");
        assert!(sender.replies().await.is_empty());

        sender.release();
        let report = handle.await.unwrap();
        assert_eq!(report.handled, 3);
    }

    #[tokio::test]
    async fn empty_payload_settles_immediately() {
        let sender = RecordingReplySender::new();
        let report = dispatcher(&sender).spawn(payload(vec![])).await.unwrap();
        assert_eq!(report, DispatchReport::default());
        assert_eq!(sender.started(), 0);
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn failed_reply_is_logged() {
        let sender = RecordingReplySender::new().failing_calls([1]);
        dispatcher(&sender)
            .dispatch(payload(vec![text("expired", "hello")]))
            .await;
        assert!(logs_contain("line reply failed"));
        assert!(logs_contain("Invalid reply token"));
        assert!(logs_contain("settled with failures"));
    }

    #[tokio::test]
    async fn drain_waits_for_detached_replies() {
        let sender = RecordingReplySender::new().gated();
        let dispatcher = dispatcher(&sender);
        drop(dispatcher.spawn(payload(vec![follow("f-1")])));

        let started = tokio::time::timeout(Duration::from_secs(2), async {
            while sender.started() < 1 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        assert!(started.is_ok());
        assert_eq!(dispatcher.in_flight(), 1);

        let draining = tokio::spawn({
            let dispatcher = dispatcher.clone();
            async move { dispatcher.drain(Duration::from_secs(2)).await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!draining.is_finished(), "drain returned before the reply settled");

        sender.release();
        assert_eq!(draining.await.unwrap(), 0);
        let replies = sender.replies().await;
        assert_eq!(replies.len(), 1);
        assert!(replies[0].succeeded);
        assert_eq!(dispatcher.in_flight(), 0);
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn drain_reports_replies_still_stuck_at_the_deadline() {
        let sender = RecordingReplySender::new().gated();
        let dispatcher = dispatcher(&sender);
        drop(dispatcher.spawn(payload(vec![text("t1", "a"), text("t2", "b")])));
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(dispatcher.drain(Duration::from_millis(50)).await, 1);
        assert!(logs_contain("abandoning in-flight replies"));
        sender.release();
    }

    #[tokio::test]
    async fn drain_with_nothing_in_flight_returns_at_once() {
        let sender = RecordingReplySender::new();
        let dispatcher = dispatcher(&sender);
        dispatcher.spawn(payload(vec![])).await.unwrap();
        assert_eq!(dispatcher.drain(Duration::ZERO).await, 0);
    }
}
