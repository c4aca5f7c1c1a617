use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use dine_core::platforms::line::PayloadError;
use dine_telemetry::{RequestOutcome, record_request};
use security::{SignatureError, SignatureErrorKind};

/// Ways a webhook request is refused before any event is dispatched.
///
/// Every variant answers with an empty body so nothing about the channel
/// configuration leaks to the caller.
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error(transparent)]
    Signature(#[from] SignatureError),
    #[error("signature does not match request body")]
    InvalidSignature,
    #[error(transparent)]
    MalformedBody(#[from] PayloadError),
}

impl WebhookError {
    pub fn status(&self) -> StatusCode {
        match self {
            WebhookError::Signature(err) => match err.kind() {
                SignatureErrorKind::Configuration => StatusCode::INTERNAL_SERVER_ERROR,
                SignatureErrorKind::Authentication => StatusCode::FORBIDDEN,
            },
            WebhookError::InvalidSignature => StatusCode::FORBIDDEN,
            WebhookError::MalformedBody(_) => StatusCode::BAD_REQUEST,
        }
    }

    pub fn outcome(&self) -> RequestOutcome {
        match self {
            WebhookError::Signature(err) => match err.kind() {
                SignatureErrorKind::Configuration => RequestOutcome::Misconfigured,
                SignatureErrorKind::Authentication => RequestOutcome::Unauthorized,
            },
            WebhookError::InvalidSignature => RequestOutcome::Unauthorized,
            WebhookError::MalformedBody(_) => RequestOutcome::Malformed,
        }
    }
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "webhook rejected: ingress misconfigured");
        } else {
            tracing::warn!(error = %self, status = status.as_u16(), "webhook rejected");
        }
        record_request(self.outcome());
        status.into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_follow_error_kind() {
        assert_eq!(
            WebhookError::from(SignatureError::MissingSecret).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            WebhookError::from(SignatureError::MissingSignature).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            WebhookError::from(SignatureError::MalformedSignature).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            WebhookError::InvalidSignature.status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            WebhookError::from(PayloadError::NotAnObject).status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn outcomes_follow_error_variant() {
        assert_eq!(
            WebhookError::from(SignatureError::MissingSecret).outcome(),
            RequestOutcome::Misconfigured
        );
        assert_eq!(
            WebhookError::from(SignatureError::InvalidKey).outcome(),
            RequestOutcome::Misconfigured
        );
        assert_eq!(
            WebhookError::from(SignatureError::MissingSignature).outcome(),
            RequestOutcome::Unauthorized
        );
        assert_eq!(
            WebhookError::InvalidSignature.outcome(),
            RequestOutcome::Unauthorized
        );
        assert_eq!(
            WebhookError::from(PayloadError::NotAnObject).outcome(),
            RequestOutcome::Malformed
        );
    }

    #[tokio::test]
    async fn responses_have_empty_bodies() {
        let response = WebhookError::InvalidSignature.into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert!(body.is_empty());
    }
}
