use std::fmt::Display;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use dine_core::ConfigError;
use dine_core::platforms::line::{DEFAULT_API_BASE, LineCredentials};

pub const DEFAULT_BIND: &str = "0.0.0.0:8090";
pub const DEFAULT_WEBHOOK_PATH: &str = "/line/webhook";
pub const DEFAULT_REPLY_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;
pub const DEFAULT_FOLLOW_GREETING: &str =
    "Thanks for adding us! Scan the QR code on your table to open the menu and place your order.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub cap: u32,
    pub refill_per_sec: u32,
}

/// Process-wide settings, built once at startup and passed down explicitly.
#[derive(Debug, Clone)]
pub struct IngressConfig {
    pub addr: SocketAddr,
    pub webhook_path: String,
    pub api_base: String,
    pub reply_timeout: Duration,
    pub max_body_bytes: usize,
    pub follow_greeting: String,
    pub rate_limit: Option<RateLimitConfig>,
    pub credentials: LineCredentials,
}

impl IngressConfig {
    /// Defaults for everything except the credentials.
    pub fn new(credentials: LineCredentials) -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], 8090)),
            webhook_path: DEFAULT_WEBHOOK_PATH.to_string(),
            api_base: DEFAULT_API_BASE.to_string(),
            reply_timeout: Duration::from_millis(DEFAULT_REPLY_TIMEOUT_MS),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            follow_greeting: DEFAULT_FOLLOW_GREETING.to_string(),
            rate_limit: None,
            credentials,
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let credentials = LineCredentials::from_lookup(&lookup)?;

        let webhook_path =
            lookup("LINE_WEBHOOK_PATH").unwrap_or_else(|| DEFAULT_WEBHOOK_PATH.to_string());
        if !webhook_path.starts_with('/') {
            return Err(ConfigError::Invalid {
                key: "LINE_WEBHOOK_PATH",
                reason: "must start with '/'".into(),
            });
        }

        let rate_limit = match lookup("RATE_LIMIT_CAP") {
            Some(raw) => {
                let cap: u32 = parse_value("RATE_LIMIT_CAP", &raw)?;
                if cap == 0 {
                    return Err(ConfigError::Invalid {
                        key: "RATE_LIMIT_CAP",
                        reason: "must be at least 1; unset it to disable rate limiting".into(),
                    });
                }
                Some(RateLimitConfig {
                    cap,
                    refill_per_sec: parse_or(&lookup, "RATE_LIMIT_REFILL_PER_SEC", 1)?,
                })
            }
            None => None,
        };

        Ok(Self {
            addr: parse_or(&lookup, "BIND", DEFAULT_BIND.parse().map_err(invalid_default)?)?,
            webhook_path,
            api_base: lookup("LINE_API_BASE").unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            reply_timeout: Duration::from_millis(parse_or(
                &lookup,
                "LINE_REPLY_TIMEOUT_MS",
                DEFAULT_REPLY_TIMEOUT_MS,
            )?),
            max_body_bytes: parse_or(&lookup, "LINE_MAX_BODY_BYTES", DEFAULT_MAX_BODY_BYTES)?,
            follow_greeting: lookup("LINE_FOLLOW_GREETING")
                .filter(|greeting| !greeting.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_FOLLOW_GREETING.to_string()),
            rate_limit,
            credentials,
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: Display,
{
    match lookup(key) {
        Some(raw) => parse_value(key, &raw),
        None => Ok(default),
    }
}

fn parse_value<T>(key: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    raw.trim().parse().map_err(|err: T::Err| ConfigError::Invalid {
        key,
        reason: err.to_string(),
    })
}

fn invalid_default(err: std::net::AddrParseError) -> ConfigError {
    ConfigError::Invalid {
        key: "BIND",
        reason: err.to_string(),
    }
}
