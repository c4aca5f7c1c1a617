//! Webhook payload decoding and per-event classification.
//!
//! Decoding happens in two stages. [`parse_payload`] only checks that the body
//! is a JSON object and pulls out the raw event records; a failure there
//! rejects the whole request. [`LineEvent::classify`] then runs once per
//! record, so a single oddly shaped event is a per-event failure that never
//! affects its siblings.

use serde::Deserialize;
use serde_json::Value;

use crate::types::ReplyToken;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebhookPayload {
    /// User id of the bot that received the events.
    #[serde(default)]
    pub destination: Option<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub events: Vec<Value>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<Value>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Option::<Vec<Value>>::deserialize(deserializer).map(Option::unwrap_or_default)
}

#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    #[error("body is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("body is not a JSON object")]
    NotAnObject,
}

/// Decodes a verified request body.
///
/// ```
/// use dine_core::platforms::line::parse_payload;
///
/// assert_eq!(parse_payload(br#"{"destination":"Ubot"}"#).unwrap().events.len(), 0);
/// assert!(parse_payload(b"not json").is_err());
/// ```
pub fn parse_payload(body: &[u8]) -> Result<WebhookPayload, PayloadError> {
    let value: Value = serde_json::from_slice(body)?;
    if !value.is_object() {
        return Err(PayloadError::NotAnObject);
    }
    Ok(serde_json::from_value(value)?)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EventMode {
    #[default]
    Active,
    /// Another module owns the channel; events arrive without reply tokens.
    Standby,
}

/// Delivery metadata common to every event type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventMeta {
    pub webhook_event_id: Option<String>,
    pub timestamp: Option<i64>,
    pub mode: EventMode,
    pub is_redelivery: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextMessageEvent {
    pub reply_token: ReplyToken,
    /// Absent for group and room sources when the sender has not consented.
    pub user_id: Option<String>,
    pub message_id: Option<String>,
    pub text: String,
    pub meta: EventMeta,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FollowEvent {
    pub reply_token: ReplyToken,
    pub user_id: Option<String>,
    pub meta: EventMeta,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    UnknownType,
    NonTextMessage,
    Standby,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnhandledEvent {
    pub kind: String,
    pub reason: SkipReason,
    pub meta: EventMeta,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineEvent {
    Message(TextMessageEvent),
    Follow(FollowEvent),
    Unhandled(UnhandledEvent),
}

#[derive(Debug, thiserror::Error)]
pub enum EventShapeError {
    #[error("event record could not be decoded: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("event record has no type")]
    MissingType,
    #[error("{0} event has no reply token")]
    MissingReplyToken(&'static str),
    #[error("text message has no text")]
    MissingText,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEvent {
    #[serde(rename = "type")]
    kind: Option<String>,
    mode: Option<String>,
    timestamp: Option<i64>,
    webhook_event_id: Option<String>,
    delivery_context: Option<RawDeliveryContext>,
    reply_token: Option<String>,
    source: Option<RawSource>,
    message: Option<RawMessage>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDeliveryContext {
    #[serde(default)]
    is_redelivery: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSource {
    user_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawMessage {
    id: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    text: Option<String>,
}

impl LineEvent {
    /// Classifies one raw event record.
    pub fn classify(value: &Value) -> Result<LineEvent, EventShapeError> {
        let raw = RawEvent::deserialize(value)?;
        let kind = raw.kind.ok_or(EventShapeError::MissingType)?;
        let meta = EventMeta {
            webhook_event_id: raw.webhook_event_id,
            timestamp: raw.timestamp,
            mode: match raw.mode.as_deref() {
                Some("standby") => EventMode::Standby,
                _ => EventMode::Active,
            },
            is_redelivery: raw.delivery_context.is_some_and(|ctx| ctx.is_redelivery),
        };
        let user_id = raw.source.and_then(|source| source.user_id);

        let skip = |kind: String,
                    reason: SkipReason,
                    meta: EventMeta|
         -> Result<LineEvent, EventShapeError> {
            Ok(LineEvent::Unhandled(UnhandledEvent { kind, reason, meta }))
        };

        match kind.as_str() {
            "message" | "follow" if meta.mode == EventMode::Standby => {
                skip(kind.clone(), SkipReason::Standby, meta)
            }
            "message" => {
                let message = raw.message.unwrap_or_default();
                if message.kind.as_deref() != Some("text") {
                    return skip(kind.clone(), SkipReason::NonTextMessage, meta);
                }
                let reply_token = raw
                    .reply_token
                    .ok_or(EventShapeError::MissingReplyToken("message"))?;
                let text = message.text.ok_or(EventShapeError::MissingText)?;
                Ok(LineEvent::Message(TextMessageEvent {
                    reply_token: ReplyToken::new(reply_token),
                    user_id,
                    message_id: message.id,
                    text,
                    meta,
                }))
            }
            "follow" => {
                let reply_token = raw
                    .reply_token
                    .ok_or(EventShapeError::MissingReplyToken("follow"))?;
                Ok(LineEvent::Follow(FollowEvent {
                    reply_token: ReplyToken::new(reply_token),
                    user_id,
                    meta,
                }))
            }
            _ => skip(kind.clone(), SkipReason::UnknownType, meta),
        }
    }

    /// Stable label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            LineEvent::Message(_) => "message",
            LineEvent::Follow(_) => "follow",
            LineEvent::Unhandled(_) => "unhandled",
        }
    }

    pub fn meta(&self) -> &EventMeta {
        match self {
            LineEvent::Message(event) => &event.meta,
            LineEvent::Follow(event) => &event.meta,
            LineEvent::Unhandled(event) => &event.meta,
        }
    }
}
