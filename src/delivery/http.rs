//! HTTP delivery client built on reqwest

use super::outcome::{classify_response, DeliveryOutcome};
use super::DeliveryClient;
use crate::error::{sanitize_error_message, BridgeError};
use crate::pipeline::ValidatedPayload;
use async_trait::async_trait;
use reqwest::Client;
use std::error::Error as StdError;
use std::time::Duration;
use tracing::debug;

/// Delivery client posting JSON over HTTP(S)
#[derive(Debug, Clone)]
pub struct HttpDeliveryClient {
    client: Client,
}

impl HttpDeliveryClient {
    /// Create a client; the per-request timeout is supplied on every delivery
    pub fn new() -> Result<Self, BridgeError> {
        let client = Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| BridgeError::delivery_client(e.to_string()))?;

        Ok(Self { client })
    }

    /// Classify a transport-level failure (pure function)
    pub fn classify_error(error: &reqwest::Error, timeout: Duration) -> DeliveryOutcome {
        if error.is_timeout() {
            return DeliveryOutcome::TimedOut { timeout };
        }

        let cause = sanitize_error_message(&error_chain(error));
        if error.is_connect() {
            DeliveryOutcome::ConnectionFailed { cause }
        } else {
            DeliveryOutcome::Failed { cause }
        }
    }
}

/// Render an error with its sources, since reqwest's own message omits the root cause
fn error_chain(error: &dyn StdError) -> String {
    let mut rendered = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        rendered.push_str(": ");
        rendered.push_str(&cause.to_string());
        source = cause.source();
    }
    rendered
}

#[async_trait]
impl DeliveryClient for HttpDeliveryClient {
    async fn deliver(
        &self,
        payload: &ValidatedPayload,
        endpoint: &str,
        timeout: Duration,
    ) -> DeliveryOutcome {
        debug!("POST {} (timeout {}ms)", endpoint, timeout.as_millis());

        // `.json()` sets Content-Type: application/json
        let response = match self
            .client
            .post(endpoint)
            .timeout(timeout)
            .json(payload.as_value())
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => return Self::classify_error(&e, timeout),
        };

        let status = response.status().as_u16();
        match response.text().await {
            Ok(body) => classify_response(status, &body),
            Err(e) => Self::classify_error(&e, timeout),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::{OutcomeKind, ResponseBody};
    use crate::pipeline::validate;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn payload() -> ValidatedPayload {
        validate(br#"{"codeName":"DRONE-001"}"#).unwrap()
    }

    #[tokio::test]
    async fn test_posts_json_and_captures_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/ttc/api/offense-move"))
            .and(header("content-type", "application/json"))
            .and(body_json(json!({"codeName": "DRONE-001"})))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 9})))
            .expect(1)
            .mount(&server)
            .await;

        let client = HttpDeliveryClient::new().unwrap();
        let outcome = client
            .deliver(
                &payload(),
                &format!("{}/ttc/api/offense-move", server.uri()),
                Duration::from_secs(5),
            )
            .await;

        assert_eq!(
            outcome,
            DeliveryOutcome::Success {
                status: 201,
                response: ResponseBody::Json(json!({"id": 9}))
            }
        );
    }

    #[tokio::test]
    async fn test_server_error_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .expect(1)
            .mount(&server)
            .await;

        let client = HttpDeliveryClient::new().unwrap();
        let outcome = client
            .deliver(&payload(), &server.uri(), Duration::from_secs(5))
            .await;

        assert_eq!(outcome.kind(), OutcomeKind::ServerError);
        assert_eq!(outcome.status(), Some(502));
    }

    #[tokio::test]
    async fn test_timeout_is_classified() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let client = HttpDeliveryClient::new().unwrap();
        let timeout = Duration::from_millis(100);
        let outcome = client.deliver(&payload(), &server.uri(), timeout).await;

        assert_eq!(outcome, DeliveryOutcome::TimedOut { timeout });
    }

    #[tokio::test]
    async fn test_refused_connection_is_classified() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        let client = HttpDeliveryClient::new().unwrap();
        let outcome = client
            .deliver(
                &payload(),
                &format!("http://127.0.0.1:{port}/move"),
                Duration::from_secs(5),
            )
            .await;

        assert_eq!(outcome.kind(), OutcomeKind::ConnectionFailed);
    }

    #[derive(Debug, thiserror::Error)]
    #[error("error sending request")]
    struct SendError(#[source] std::io::Error);

    #[test]
    fn test_error_chain_includes_sources() {
        let error = SendError(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "connection refused",
        ));
        assert_eq!(
            error_chain(&error),
            "error sending request: connection refused"
        );
    }
}
