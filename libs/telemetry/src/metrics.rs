use std::time::Duration;

use metrics::{counter, histogram};

const REQUESTS_COUNTER: &str = "line_webhook_requests_total";
const EVENTS_COUNTER: &str = "line_events_total";
const REPLIES_COUNTER: &str = "line_replies_total";
const REPLY_LATENCY_HISTOGRAM: &str = "line_reply_latency_seconds";

/// How the webhook endpoint answered a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    Accepted,
    Unauthorized,
    Malformed,
    Misconfigured,
    Throttled,
}

impl RequestOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestOutcome::Accepted => "accepted",
            RequestOutcome::Unauthorized => "unauthorized",
            RequestOutcome::Malformed => "malformed",
            RequestOutcome::Misconfigured => "misconfigured",
            RequestOutcome::Throttled => "throttled",
        }
    }
}

/// Terminal state of a single dispatched event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    Handled,
    Skipped,
    Failed,
}

impl EventOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventOutcome::Handled => "handled",
            EventOutcome::Skipped => "skipped",
            EventOutcome::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyOutcome {
    Sent,
    Rejected,
    TimedOut,
    Failed,
}

impl ReplyOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReplyOutcome::Sent => "sent",
            ReplyOutcome::Rejected => "rejected",
            ReplyOutcome::TimedOut => "timed_out",
            ReplyOutcome::Failed => "failed",
        }
    }
}

pub fn record_request(outcome: RequestOutcome) {
    counter!(REQUESTS_COUNTER, "outcome" => outcome.as_str()).increment(1);
}

pub fn record_event(kind: &'static str, outcome: EventOutcome) {
    counter!(EVENTS_COUNTER, "kind" => kind, "outcome" => outcome.as_str()).increment(1);
}

pub fn record_reply(outcome: ReplyOutcome, elapsed: Duration) {
    counter!(REPLIES_COUNTER, "outcome" => outcome.as_str()).increment(1);
    histogram!(REPLY_LATENCY_HISTOGRAM, "outcome" => outcome.as_str())
        .record(elapsed.as_secs_f64());
}
