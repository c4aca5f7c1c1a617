use axum::{
    body::Body,
    http::{HeaderValue, Request, header::HeaderName},
    middleware::Next,
    response::Response,
};
use tracing::Instrument;
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Tags each request with a fresh id, opens the `ingress.line` span around it
/// and echoes the id back in the response headers. Every log line written
/// while handling the request, rejections included, carries the id.
pub async fn with_request_id(req: Request<Body>, next: Next) -> Response {
    let rid = Uuid::new_v4().to_string();

    let span = tracing::info_span!(
        "ingress.line",
        request_id = %rid,
        method = %req.method(),
        path = %req.uri().path(),
    );
    let mut res = next.run(req).instrument(span).await;
    if let Ok(value) = HeaderValue::from_str(&rid) {
        res.headers_mut()
            .insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
    }
    res
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Router, http::StatusCode, middleware, routing::get};
    use tower::ServiceExt;

    fn app() -> Router {
        Router::new()
            .route(
                "/",
                get(|| async {
                    tracing::warn!("inside handler");
                    StatusCode::FORBIDDEN
                }),
            )
            .layer(middleware::from_fn(with_request_id))
    }

    fn request_id(response: &Response) -> String {
        response
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .expect("request id header")
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn id_is_echoed_and_tags_handler_logs() {
        let response = app()
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let rid = request_id(&response);
        assert!(Uuid::parse_str(&rid).is_ok());
        assert!(logs_contain("inside handler"));
        assert!(logs_contain(&rid));
    }

    #[tokio::test]
    async fn each_request_gets_a_fresh_id() {
        let first = app()
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let second = app()
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_ne!(request_id(&first), request_id(&second));
    }
}
