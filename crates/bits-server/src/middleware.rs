//! Request logging middleware

use axum::{
    body::{Body, HttpBody},
    extract::Request,
    http::{header, HeaderValue},
    middleware::Next,
    response::Response,
};
use std::time::Instant;
use tracing::{info, info_span, Instrument, Span};

/// Response header carrying the request's correlation id
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Per-request logging handle.
///
/// Inserted into request extensions by [`logging_middleware`]. Handlers pull
/// it out and instrument blobstore calls with [`RequestLogger::span`] so
/// their records carry the request id.
#[derive(Clone, Debug)]
pub struct RequestLogger {
    request_id: String,
    span: Span,
}

impl RequestLogger {
    pub fn new(request_id: impl Into<String>, span: Span) -> Self {
        Self {
            request_id: request_id.into(),
            span,
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn span(&self) -> Span {
        self.span.clone()
    }
}

/// Logging middleware
pub async fn logging_middleware(mut request: Request<Body>, next: Next) -> Response {
    let request_id = uuid::Uuid::new_v4().to_string();
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let host = request
        .headers()
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .or_else(|| request.uri().host())
        .unwrap_or_default()
        .to_string();

    let span = info_span!("request", request_id = %request_id, method = %method, path = %path);
    info!(parent: &span, host = %host, method = %method, path = %path, "Request started");

    request
        .extensions_mut()
        .insert(RequestLogger::new(request_id.clone(), span.clone()));

    let start = Instant::now();
    let mut response = next.run(request).instrument(span.clone()).await;
    let duration = start.elapsed();

    let status = response.status();
    let body_size = response.body().size_hint().exact().or_else(|| {
        response
            .headers()
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
    });
    let location = if status.is_redirection() {
        response
            .headers()
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    } else {
        None
    };

    info!(
        parent: &span,
        status = status.as_u16(),
        body_size,
        duration_ms = duration.as_millis() as u64,
        location = location.as_deref(),
        "Request completed"
    );

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        http::StatusCode,
        middleware,
        response::IntoResponse,
        routing::get,
        Extension, Router,
    };
    use tower::ServiceExt;

    async fn echo_request_id(Extension(logger): Extension<RequestLogger>) -> String {
        logger.request_id().to_string()
    }

    async fn redirect() -> Response {
        (StatusCode::FOUND, [(header::LOCATION, "http://store/blob")]).into_response()
    }

    fn app() -> Router {
        Router::new()
            .route("/id", get(echo_request_id))
            .route("/redirect", get(redirect))
            .layer(middleware::from_fn(logging_middleware))
    }

    #[test_log::test(tokio::test)]
    async fn test_request_id_reaches_handler_and_header() {
        let response = app()
            .oneshot(Request::builder().uri("/id").body(Body::empty()).unwrap())
            .await
            .unwrap();

        let header = response.headers().get(REQUEST_ID_HEADER).unwrap().to_str().unwrap().to_string();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(body, header.as_bytes());
        assert!(uuid::Uuid::parse_str(&header).is_ok());
    }

    #[test_log::test(tokio::test)]
    async fn test_each_request_gets_fresh_id() {
        let first = app()
            .oneshot(Request::builder().uri("/redirect").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let second = app()
            .oneshot(Request::builder().uri("/redirect").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(first.status(), StatusCode::FOUND);
        assert_ne!(
            first.headers().get(REQUEST_ID_HEADER),
            second.headers().get(REQUEST_ID_HEADER)
        );
    }
}
