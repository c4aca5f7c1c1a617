//! Shared contracts for the dine messaging ingress.
//!
//! Holds the request-scoped value types that flow from the webhook endpoint to
//! the reply egress: the LINE event model, reply messages, the [`ReplySender`]
//! seam and its HTTP implementation, plus credential handling that keeps
//! secrets out of logs.
pub mod egress;
pub mod error;
pub mod platforms;
pub mod secret;
#[cfg(feature = "testkit")]
pub mod testkit;
pub mod types;

pub use egress::{
    MAX_REPLY_MESSAGES, MAX_TEXT_CHARS, ReplyError, ReplyMessage, ReplySender, SharedReplySender,
    validate_messages,
};
pub use error::ConfigError;
pub use secret::SecretString;
pub use types::ReplyToken;
