use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use crate::egress::{ReplyError, ReplyMessage, ReplySender, validate_messages};
use crate::error::ConfigError;
use crate::platforms::line::creds::CHANNEL_ACCESS_TOKEN_ENV;
use crate::secret::SecretString;
use crate::types::ReplyToken;

pub const DEFAULT_API_BASE: &str = "https://api.line.me";
const REPLY_PATH: &str = "/v2/bot/message/reply";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ReplyBody<'a> {
    reply_token: &'a str,
    messages: &'a [ReplyMessage],
}

/// Calls the reply endpoint with the channel access token.
pub struct LineReplySender {
    http: reqwest::Client,
    endpoint: String,
    access_token: SecretString,
    timeout: Duration,
}

impl LineReplySender {
    pub fn new(
        http: reqwest::Client,
        access_token: SecretString,
        api_base: &str,
        timeout: Duration,
    ) -> Result<Self, ConfigError> {
        if access_token.is_blank() {
            return Err(ConfigError::Missing(CHANNEL_ACCESS_TOKEN_ENV));
        }
        Ok(Self {
            http,
            endpoint: format!("{}{REPLY_PATH}", api_base.trim_end_matches('/')),
            access_token,
            timeout,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl ReplySender for LineReplySender {
    async fn reply(&self, token: &ReplyToken, messages: &[ReplyMessage]) -> Result<(), ReplyError> {
        validate_messages(messages)?;
        let body = ReplyBody {
            reply_token: token.as_str(),
            messages,
        };

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(self.access_token.expose())
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    ReplyError::Timeout(self.timeout)
                } else {
                    ReplyError::Transport(err)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ReplyError::Api {
                status: status.as_u16(),
                body,
            });
        }
        debug!(messages = messages.len(), "reply accepted");
        Ok(())
    }
}
