//! # HTTP ingress: accept an event for a channel and append it to the log.
//!
//! ```text
//! POST / (Host: channela.svc, ce-*, body)
//!   │
//!   ├─ method != POST ───────────────► 405
//!   ├─ body > max_ingress_body_bytes ► 413
//!   ├─ HostRouter::resolve ── miss ──► 404
//!   ├─ required attribute missing ───► 400
//!   ├─ IngressProducer::produce ─ err► 500
//!   └─ acked ────────────────────────► 202
//! ```
//!
//! The path is ignored: the host alone selects the channel. The producer never
//! calls a subscriber.

use std::sync::Arc;

use axum::Router;
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{HeaderMap, Method, StatusCode, Uri, header::HOST};
use axum::response::{IntoResponse, Response};
use tracing::{debug, warn};

use crate::error::IngressError;
use crate::log::{EventLog, TopicNamer};
use crate::model::{ChannelConfig, Message};
use crate::router::HostRouter;

/// Appends inbound messages to the topic of their channel.
#[derive(Clone)]
pub struct IngressProducer {
    log: Arc<dyn EventLog>,
    topic_namer: TopicNamer,
}

impl IngressProducer {
    pub fn new(log: Arc<dyn EventLog>, topic_namer: TopicNamer) -> Self {
        Self { log, topic_namer }
    }

    /// Topic that carries `channel`'s messages.
    pub fn topic_for(&self, channel: &ChannelConfig) -> String {
        (self.topic_namer)(&channel.channel_ref())
    }

    /// Appends `message`; returns once the log acknowledged it.
    pub async fn produce(&self, channel: &ChannelConfig, message: &Message) -> Result<(), IngressError> {
        let topic = self.topic_for(channel);
        self.log
            .produce(&topic, message)
            .await
            .map_err(|source| IngressError::Append { topic, source })
    }
}

#[derive(Clone)]
struct IngressState {
    router: Arc<HostRouter>,
    producer: IngressProducer,
}

/// Builds the ingress HTTP service.
pub fn ingress_router(
    router: Arc<HostRouter>,
    producer: IngressProducer,
    max_body_bytes: usize,
) -> Router {
    Router::new()
        .fallback(receive)
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .with_state(IngressState { router, producer })
}

async fn receive(
    State(state): State<IngressState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if method != Method::POST {
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    }
    let host = request_host(&uri, &headers);
    match accept(&state, host, &headers, body).await {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(err) => {
            if matches!(err, IngressError::Append { .. }) {
                warn!(host, error = %err, label = err.as_label(), "ingress append failed");
            } else {
                debug!(host, error = %err, label = err.as_label(), "ingress rejected request");
            }
            err.into_response()
        }
    }
}

async fn accept(
    state: &IngressState,
    host: &str,
    headers: &HeaderMap,
    body: Bytes,
) -> Result<(), IngressError> {
    let channel = state.router.resolve(host)?;
    let message = Message::from_http(headers, body);
    if let Some(attr) = message.missing_required_attribute() {
        return Err(IngressError::InvalidEvent {
            reason: format!("missing required attribute {attr:?}"),
        });
    }
    state.producer.produce(&channel, &message).await?;
    debug!(channel = %channel.channel_ref(), event_id = ?message.id(), "event accepted");
    Ok(())
}

/// `Host` header, falling back to the URI authority (HTTP/2).
fn request_host<'a>(uri: &'a Uri, headers: &'a HeaderMap) -> &'a str {
    headers
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .or_else(|| uri.authority().map(|a| a.as_str()))
        .map(str::trim)
        .unwrap_or_default()
}

impl IntoResponse for IngressError {
    fn into_response(self) -> Response {
        (self.status_code(), self.to_string()).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::{InMemoryLog, default_topic_name};
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn setup(log: &InMemoryLog) -> Router {
        let router = Arc::new(HostRouter::new());
        router
            .register(ChannelConfig::new("default", "channela", "channela.svc"))
            .unwrap();
        let producer = IngressProducer::new(Arc::new(log.clone()), Arc::new(default_topic_name));
        ingress_router(router, producer, 1024)
    }

    fn event(host: &str) -> axum::http::request::Builder {
        Request::builder()
            .method("POST")
            .uri("/")
            .header("host", host)
            .header("ce-specversion", "1.0")
            .header("ce-id", "evt-1")
            .header("ce-type", "dev.test")
            .header("ce-source", "/test")
            .header("content-type", "application/json")
    }

    #[tokio::test]
    async fn accepted_event_is_appended_verbatim() {
        let log = InMemoryLog::new();
        let app = setup(&log);

        let response = app
            .oneshot(event("channela.svc").body(Body::from("{\"n\":1}")).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let stored = log.messages("knative-messaging-kafka.default.channela");
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].id(), Some("evt-1"));
        assert_eq!(stored[0].attribute("datacontenttype"), Some("application/json"));
        assert_eq!(stored[0].body, Bytes::from_static(b"{\"n\":1}"));
    }

    #[tokio::test]
    async fn unknown_host_is_not_found() {
        let log = InMemoryLog::new();
        let response = setup(&log)
            .oneshot(event("other.svc").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn missing_attribute_is_bad_request() {
        let log = InMemoryLog::new();
        let request = Request::builder()
            .method("POST")
            .uri("/")
            .header("host", "channela.svc")
            .header("ce-id", "evt-1")
            .body(Body::empty())
            .unwrap();
        let response = setup(&log).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(log.messages("knative-messaging-kafka.default.channela").is_empty());
    }

    #[tokio::test]
    async fn append_failure_is_server_error() {
        let log = InMemoryLog::new();
        log.fail_produces(1);
        let response = setup(&log)
            .oneshot(event("channela.svc").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn non_post_is_rejected() {
        let log = InMemoryLog::new();
        let request = Request::builder()
            .method("GET")
            .uri("/")
            .header("host", "channela.svc")
            .body(Body::empty())
            .unwrap();
        let response = setup(&log).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn oversized_body_is_rejected() {
        let log = InMemoryLog::new();
        let response = setup(&log)
            .oneshot(event("channela.svc").body(Body::from(vec![b'x'; 4096])).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn host_with_port_resolves() {
        let log = InMemoryLog::new();
        let response = setup(&log)
            .oneshot(event("channela.svc:8080").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }
}
