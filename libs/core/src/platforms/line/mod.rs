//! LINE Messaging API: webhook event model, channel credentials and the reply
//! endpoint client.

pub mod creds;
pub mod events;
pub mod sender;

pub use creds::LineCredentials;
pub use events::{
    EventMeta, EventMode, EventShapeError, FollowEvent, LineEvent, PayloadError, SkipReason,
    TextMessageEvent, UnhandledEvent, WebhookPayload, parse_payload,
};
pub use sender::{DEFAULT_API_BASE, LineReplySender};
