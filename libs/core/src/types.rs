use serde::{Deserialize, Serialize};
use std::fmt;

/// Single-use credential issued by the platform with each inbound event.
///
/// Reuse and expiry are enforced by the platform, not here; a stale token
/// surfaces as an API error on reply.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReplyToken(String);

impl ReplyToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReplyToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ReplyToken {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}
