use crate::error::ConfigError;
use crate::secret::SecretString;

pub const CHANNEL_SECRET_ENV: &str = "LINE_CHANNEL_SECRET";
pub const CHANNEL_ACCESS_TOKEN_ENV: &str = "LINE_CHANNEL_ACCESS_TOKEN";

/// Channel credentials: the HMAC key for inbound signatures and the bearer
/// token for outbound replies.
#[derive(Clone, Debug)]
pub struct LineCredentials {
    pub channel_secret: SecretString,
    pub channel_access_token: SecretString,
}

impl LineCredentials {
    pub fn new(
        channel_secret: impl Into<SecretString>,
        channel_access_token: impl Into<SecretString>,
    ) -> Self {
        Self {
            channel_secret: channel_secret.into(),
            channel_access_token: channel_access_token.into(),
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads both credentials; a missing or blank value is an error.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let channel_secret = required(&lookup, CHANNEL_SECRET_ENV)?;
        let channel_access_token = required(&lookup, CHANNEL_ACCESS_TOKEN_ENV)?;
        Ok(Self {
            channel_secret,
            channel_access_token,
        })
    }
}

fn required<F>(lookup: &F, key: &'static str) -> Result<SecretString, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(SecretString::from)
        .filter(|value| !value.is_blank())
        .ok_or(ConfigError::Missing(key))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_both_credentials() {
        let creds = LineCredentials::from_lookup(|key| match key {
            CHANNEL_SECRET_ENV => Some("s3cret".into()),
            CHANNEL_ACCESS_TOKEN_ENV => Some("t0ken".into()),
            _ => None,
        })
        .unwrap();
        assert_eq!(creds.channel_secret.expose(), "s3cret");
        assert_eq!(creds.channel_access_token.expose(), "t0ken");
    }

    #[test]
    fn missing_secret_is_reported_by_name() {
        let err = LineCredentials::from_lookup(|key| {
            (key == CHANNEL_ACCESS_TOKEN_ENV).then(|| "t0ken".to_string())
        })
        .unwrap_err();
        assert_eq!(err, ConfigError::Missing(CHANNEL_SECRET_ENV));
    }

    #[test]
    fn blank_token_counts_as_missing() {
        let err = LineCredentials::from_lookup(|key| match key {
            CHANNEL_SECRET_ENV => Some("s3cret".into()),
            _ => Some("   ".into()),
        })
        .unwrap_err();
        assert_eq!(err, ConfigError::Missing(CHANNEL_ACCESS_TOKEN_ENV));
    }

    #[test]
    fn debug_output_hides_values() {
        let creds = LineCredentials::new("s3cret", "t0ken");
        let rendered = format!("{creds:?}");
        assert!(!rendered.contains("s3cret"));
        assert!(!rendered.contains("t0ken"));
    }
}
