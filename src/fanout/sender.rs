//! # One HTTP hop: POST a message to a target and read back its answer.

use std::time::Duration;

use reqwest::Client;
use url::Url;

use crate::error::DeliveryError;
use crate::model::Message;

/// Answer of a target that returned 2xx.
#[derive(Debug, Clone)]
pub struct DeliveryResponse {
    pub status: u16,
    /// Response as a message; `None` when the body was empty.
    pub message: Option<Message>,
}

/// HTTP client shared by every fanout of a dispatcher.
#[derive(Clone, Debug)]
pub struct MessageSender {
    client: Client,
    timeout: Option<Duration>,
}

impl MessageSender {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self::with_client(Client::new(), timeout)
    }

    pub fn with_client(client: Client, timeout: Option<Duration>) -> Self {
        Self { client, timeout }
    }

    /// Sends `message` in binary mode. Any non-2xx status is an error.
    pub async fn send(&self, target: &Url, message: &Message) -> Result<DeliveryResponse, DeliveryError> {
        let mut request = self
            .client
            .post(target.clone())
            .headers(message.to_headers())
            .body(message.body.clone());
        if let Some(timeout) = self.timeout {
            request = request.timeout(timeout);
        }

        let response = request.send().await.map_err(|e| self.classify(e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(DeliveryError::Status {
                status: status.as_u16(),
            });
        }

        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(|e| self.classify(e))?;
        let message = (!body.is_empty()).then(|| Message::from_http(&headers, body));
        Ok(DeliveryResponse {
            status: status.as_u16(),
            message,
        })
    }

    fn classify(&self, err: reqwest::Error) -> DeliveryError {
        match self.timeout {
            Some(timeout) if err.is_timeout() => DeliveryError::Timeout { timeout },
            _ => DeliveryError::Transport {
                reason: err.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;

    async fn serve(app: Router) -> Url {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Url::parse(&format!("http://{addr}/")).unwrap()
    }

    #[tokio::test]
    async fn echo_response_becomes_message() {
        let app = Router::new().route(
            "/",
            post(|headers: HeaderMap, body: axum::body::Bytes| async move { (headers_subset(&headers), body) }),
        );
        let url = serve(app).await;
        let sender = MessageSender::new(Some(Duration::from_secs(5)));

        let msg = Message::new("hello").with_attribute("id", "1");
        let resp = sender.send(&url, &msg).await.unwrap();
        assert_eq!(resp.status, 200);
        let reply = resp.message.unwrap();
        assert_eq!(reply.id(), Some("1"));
        assert_eq!(reply.body.as_ref(), b"hello");
    }

    fn headers_subset(headers: &HeaderMap) -> HeaderMap {
        let mut out = HeaderMap::new();
        if let Some(id) = headers.get("ce-id") {
            out.insert("ce-id", id.clone());
        }
        out
    }

    #[tokio::test]
    async fn empty_body_has_no_message() {
        let app = Router::new().route("/", post(|| async { StatusCode::ACCEPTED }));
        let url = serve(app).await;
        let resp = MessageSender::new(None)
            .send(&url, &Message::new("x"))
            .await
            .unwrap();
        assert_eq!(resp.status, 202);
        assert!(resp.message.is_none());
    }

    #[tokio::test]
    async fn non_success_status_is_error() {
        let app = Router::new().route("/", post(|| async { StatusCode::INTERNAL_SERVER_ERROR }));
        let url = serve(app).await;
        let err = MessageSender::new(None)
            .send(&url, &Message::new("x"))
            .await
            .unwrap_err();
        assert_eq!(err, DeliveryError::Status { status: 500 });
    }

    #[tokio::test]
    async fn slow_target_times_out() {
        let app = Router::new().route(
            "/",
            post(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                StatusCode::OK
            }),
        );
        let url = serve(app).await;
        let err = MessageSender::new(Some(Duration::from_millis(50)))
            .send(&url, &Message::new("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, DeliveryError::Timeout { .. }));
    }

    #[tokio::test]
    async fn unreachable_target_is_transport_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let url = Url::parse(&format!("http://{addr}/")).unwrap();
        let err = MessageSender::new(Some(Duration::from_secs(2)))
            .send(&url, &Message::new("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, DeliveryError::Transport { .. }));
    }
}
