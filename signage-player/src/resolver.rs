//! Client for the remote content authority
//!
//! The engine sees a single opaque "resolve content for this device" call,
//! a heartbeat call and a command acknowledgement. None of them retries
//! internally: the loops own retry policy so every attempt is visible to the
//! connection state machine.

use async_trait::async_trait;
use reqwest::Url;
use std::time::Duration;
use tracing::debug;

use crate::model::{CommandReport, DeviceStatus, HeartbeatAck, ResolvedContent};

/// Characters of a non-2xx body kept in [`ResolveError::Status`]
const MAX_ERROR_MESSAGE_CHARS: usize = 200;

/// Failure taxonomy of every resolver call
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    #[error("network error: {0}")]
    Network(String),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("server returned {status}: {message}")]
    Status { status: u16, message: String },
    #[error("malformed payload: {0}")]
    Malformed(String),
}

impl ResolveError {
    /// No connectivity, DNS or timeout
    pub fn is_network(&self) -> bool {
        matches!(self, ResolveError::Network(_) | ResolveError::Timeout(_))
    }

    /// Non-2xx answer or a payload that cannot be trusted
    pub fn is_server(&self) -> bool {
        !self.is_network()
    }
}

#[async_trait]
pub trait ContentResolver: Send + Sync {
    async fn resolve_content(&self, device_id: &str) -> Result<ResolvedContent, ResolveError>;

    async fn send_heartbeat(&self, status: &DeviceStatus) -> Result<HeartbeatAck, ResolveError>;

    /// Report a command as handled so it is not delivered again.
    async fn acknowledge_command(
        &self,
        device_id: &str,
        report: &CommandReport,
    ) -> Result<(), ResolveError>;
}

/// Run `call` under `limit`, mapping expiry to [`ResolveError::Timeout`].
pub async fn with_timeout<T, F>(limit: Duration, call: F) -> Result<T, ResolveError>
where
    F: std::future::Future<Output = Result<T, ResolveError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(ResolveError::Timeout(limit)),
    }
}

/// JSON-over-HTTP resolver
#[derive(Clone)]
pub struct HttpResolver {
    client: reqwest::Client,
    base_url: Url,
    api_key: Option<String>,
    timeout: Duration,
}

impl HttpResolver {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("signage-player/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let base_url = Url::parse(&base_url.into())?;
        if base_url.cannot_be_a_base() {
            anyhow::bail!("{} cannot be used as a base URL", base_url);
        }

        Ok(Self {
            client,
            base_url,
            api_key,
            timeout,
        })
    }

    /// `{base}/api/devices/{device_id}/{tail...}`, each segment percent-encoded
    fn url(&self, device_id: &str, tail: &[&str]) -> Result<Url, ResolveError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ResolveError::Network(format!("{} cannot carry a path", self.base_url)))?
            .pop_if_empty()
            .extend(["api", "devices", device_id])
            .extend(tail);
        Ok(url)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.header("x-api-key", key),
            None => request,
        }
    }

    fn map_error(&self, error: reqwest::Error) -> ResolveError {
        if error.is_timeout() {
            ResolveError::Timeout(self.timeout)
        } else if error.is_decode() {
            ResolveError::Malformed(error.to_string())
        } else {
            ResolveError::Network(error.to_string())
        }
    }

    /// Turn a response into its body bytes, rejecting non-2xx statuses.
    async fn body(&self, response: reqwest::Response) -> Result<Vec<u8>, ResolveError> {
        let status = response.status();
        let bytes = response.bytes().await.map_err(|e| self.map_error(e))?;

        if !status.is_success() {
            let message = String::from_utf8_lossy(&bytes)
                .trim()
                .chars()
                .take(MAX_ERROR_MESSAGE_CHARS)
                .collect();
            return Err(ResolveError::Status {
                status: status.as_u16(),
                message,
            });
        }
        Ok(bytes.to_vec())
    }
}

fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, ResolveError> {
    serde_json::from_slice(bytes).map_err(|e| ResolveError::Malformed(e.to_string()))
}

#[async_trait]
impl ContentResolver for HttpResolver {
    async fn resolve_content(&self, device_id: &str) -> Result<ResolvedContent, ResolveError> {
        let url = self.url(device_id, &["content"])?;
        debug!(%url, "resolving content");

        let response = self
            .authorize(self.client.get(url))
            .send()
            .await
            .map_err(|e| self.map_error(e))?;

        let content: ResolvedContent = decode(&self.body(response).await?)?;
        content.validated().map_err(ResolveError::Malformed)
    }

    async fn send_heartbeat(&self, status: &DeviceStatus) -> Result<HeartbeatAck, ResolveError> {
        let url = self.url(&status.device_id, &["heartbeat"])?;

        let response = self
            .authorize(self.client.post(url).json(status))
            .send()
            .await
            .map_err(|e| self.map_error(e))?;

        let body = self.body(response).await?;
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(HeartbeatAck::default());
        }
        decode(&body)
    }

    async fn acknowledge_command(
        &self,
        device_id: &str,
        report: &CommandReport,
    ) -> Result<(), ResolveError> {
        let url = self.url(device_id, &["commands", &report.command_id, "ack"])?;

        let response = self
            .authorize(self.client.post(url).json(report))
            .send()
            .await
            .map_err(|e| self.map_error(e))?;

        self.body(response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionStatus;
    use crate::model::CommandStatus;
    use chrono::Utc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    /// Serve exactly one canned HTTP response and hand back the raw request.
    async fn serve_once(status_line: &str, body: &str) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let response = format!(
            "HTTP/1.1 {status_line}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request);
                if let Some(end) = text.find("\r\n\r\n") {
                    let content_length = text[..end]
                        .lines()
                        .find_map(|l| {
                            let (name, value) = l.split_once(':')?;
                            name.eq_ignore_ascii_case("content-length")
                                .then(|| value.trim().parse::<usize>().ok())
                                .flatten()
                        })
                        .unwrap_or(0);
                    if request.len() >= end + 4 + content_length {
                        break;
                    }
                }
            }
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
            String::from_utf8_lossy(&request).to_string()
        });

        (format!("http://{addr}"), handle)
    }

    fn resolver(base_url: &str) -> HttpResolver {
        HttpResolver::new(base_url, Some("secret".into()), Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_resolve_content_success() {
        let body = r#"{"contentHash":"abc","mode":"layout","items":[{"id":"w","durationSeconds":0,"position":0}],"source":"emergency"}"#;
        let (base, server) = serve_once("200 OK", body).await;

        let content = resolver(&base).resolve_content("dev-1").await.unwrap();
        assert_eq!(content.content_hash, "abc");
        assert_eq!(content.items.len(), 1);

        let request = server.await.unwrap();
        assert!(request.starts_with("GET /api/devices/dev-1/content"));
        assert!(request.to_lowercase().contains("x-api-key: secret"));
    }

    #[tokio::test]
    async fn test_non_success_status_is_server_error() {
        let (base, _server) = serve_once("503 Service Unavailable", r#"{"error":"busy"}"#).await;
        let err = resolver(&base).resolve_content("dev-1").await.unwrap_err();
        assert!(matches!(err, ResolveError::Status { status: 503, .. }));
        assert!(err.is_server());
    }

    #[tokio::test]
    async fn test_error_body_truncated_on_char_boundary() {
        let body = format!("{}{}", "a".repeat(199), "é".repeat(10));
        let (base, _server) = serve_once("503 Service Unavailable", &body).await;

        let err = resolver(&base).resolve_content("dev-1").await.unwrap_err();
        match err {
            ResolveError::Status { status, message } => {
                assert_eq!(status, 503);
                assert_eq!(message.chars().count(), MAX_ERROR_MESSAGE_CHARS);
                assert!(message.ends_with('é'));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_ids_are_escaped_in_path() {
        let (base, server) = serve_once("200 OK", "").await;
        let report = CommandReport {
            command_id: "batch/7 ?x#y".into(),
            status: CommandStatus::Completed,
            error: None,
            execution_time_ms: 3,
            reported_at: Utc::now(),
        };

        resolver(&format!("{base}/"))
            .acknowledge_command("lobby/1", &report)
            .await
            .unwrap();

        let request = server.await.unwrap();
        assert!(
            request.starts_with("POST /api/devices/lobby%2F1/commands/batch%2F7%20%3Fx%23y/ack "),
            "unexpected request line: {}",
            request.lines().next().unwrap_or_default()
        );
        assert!(request.contains(r#""commandId":"batch/7 ?x#y""#));
    }

    #[test]
    fn test_rejects_unusable_base_url() {
        assert!(HttpResolver::new("not a url", None, Duration::from_secs(5)).is_err());
        assert!(HttpResolver::new("mailto:ops@example.com", None, Duration::from_secs(5)).is_err());
    }

    #[tokio::test]
    async fn test_malformed_payload() {
        let (base, _server) = serve_once("200 OK", r#"{"contentHash":"abc""#).await;
        let err = resolver(&base).resolve_content("dev-1").await.unwrap_err();
        assert!(matches!(err, ResolveError::Malformed(_)));

        let (base, _server) =
            serve_once("200 OK", r#"{"contentHash":"","mode":"playlist","source":"schedule"}"#)
                .await;
        let err = resolver(&base).resolve_content("dev-1").await.unwrap_err();
        assert!(matches!(err, ResolveError::Malformed(_)));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_network_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = resolver(&format!("http://{addr}"))
            .resolve_content("dev-1")
            .await
            .unwrap_err();
        assert!(err.is_network(), "unexpected error: {err}");
    }

    #[tokio::test]
    async fn test_heartbeat_round_trip() {
        let body = r#"{"needsScreenshot":true,"pendingCommand":{"id":"c9","type":"reboot","issuedAt":"2024-05-01T10:00:00Z"}}"#;
        let (base, server) = serve_once("200 OK", body).await;

        let status = DeviceStatus {
            device_id: "dev-7".into(),
            content_hash: Some("abc".into()),
            player_version: "1.0.0".into(),
            timestamp: Utc::now(),
            connection_status: ConnectionStatus::Connected,
            is_offline_mode: false,
            hostname: "lobby".into(),
            os: "linux".into(),
            health: None,
        };
        let ack = resolver(&base).send_heartbeat(&status).await.unwrap();
        assert!(ack.needs_screenshot);
        assert_eq!(ack.pending_command.unwrap().id, "c9");

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /api/devices/dev-7/heartbeat"));
        assert!(request.contains(r#""contentHash":"abc""#));
        assert!(request.contains(r#""connectionStatus":"connected""#));
    }

    #[tokio::test]
    async fn test_with_timeout_maps_to_timeout_error() {
        tokio::time::pause();
        let slow = async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<_, ResolveError>(())
        };
        let err = with_timeout(Duration::from_secs(10), slow).await.unwrap_err();
        assert_eq!(err, ResolveError::Timeout(Duration::from_secs(10)));
        assert!(err.is_network());
    }
}
