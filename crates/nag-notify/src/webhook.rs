//! Webhook channel — POSTs the alert as JSON to a gateway.
//!
//! Mail relays, push services and SMS gateways all sit behind an HTTP
//! endpoint of their own; this channel only speaks plain HTTP/1.1 to it.

use std::time::Duration;

use bytes::Bytes;
use http_body_util::Full;
use serde::Serialize;
use tracing::debug;

use nag_core::{NotificationEvent, TierSpec};

use crate::dispatch::{BoxFuture, Notifier};
use crate::error::{NotifyError, NotifyResult};
use crate::render::render;

const DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    channel: String,
    url: String,
    recipients: Vec<String>,
    timeout: Duration,
}

#[derive(Serialize)]
struct Payload<'a> {
    channel: &'a str,
    urgency: String,
    recipients: &'a [String],
    subject: String,
    body: String,
    event: &'a NotificationEvent,
}

impl WebhookNotifier {
    pub fn new(channel: &str, url: &str, recipients: Vec<String>) -> Self {
        Self {
            channel: channel.to_string(),
            url: url.to_string(),
            recipients,
            timeout: DELIVERY_TIMEOUT,
        }
    }

    fn payload(&self, tier: &TierSpec, event: &NotificationEvent) -> NotifyResult<Vec<u8>> {
        let message = render(event);
        let payload = Payload {
            channel: &self.channel,
            urgency: tier.urgency.to_string(),
            recipients: &self.recipients,
            subject: message.subject,
            body: message.body,
            event,
        };
        serde_json::to_vec(&payload).map_err(|e| NotifyError::Delivery(e.to_string()))
    }

    async fn post(&self, body: Vec<u8>) -> NotifyResult<()> {
        let uri: http::Uri = self
            .url
            .parse()
            .map_err(|e| NotifyError::Delivery(format!("invalid webhook url: {e}")))?;
        if uri.scheme_str().is_some_and(|s| s != "http") {
            return Err(NotifyError::Delivery(format!(
                "unsupported webhook scheme in {}; only http is spoken",
                self.url
            )));
        }
        let host = uri
            .host()
            .ok_or_else(|| NotifyError::Delivery("webhook url has no host".to_string()))?;
        let port = uri.port_u16().unwrap_or(80);
        let authority = format!("{host}:{port}");

        let stream = tokio::net::TcpStream::connect(&authority)
            .await
            .map_err(|e| NotifyError::Delivery(format!("connect {authority}: {e}")))?;
        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| NotifyError::Delivery(format!("handshake: {e}")))?;

        // Drive the connection in the background.
        tokio::spawn(async move {
            let _ = conn.await;
        });

        let path = uri.path_and_query().map_or("/", |p| p.as_str());
        let req = http::Request::builder()
            .method("POST")
            .uri(path)
            .header("host", authority.as_str())
            .header("content-type", "application/json")
            .header("connection", "close")
            .header("user-agent", concat!("nag/", env!("CARGO_PKG_VERSION")))
            .body(Full::new(Bytes::from(body)))
            .map_err(|e| NotifyError::Delivery(e.to_string()))?;

        let resp = sender
            .send_request(req)
            .await
            .map_err(|e| NotifyError::Delivery(format!("request: {e}")))?;

        if resp.status().is_success() {
            debug!(channel = %self.channel, status = %resp.status(), "webhook accepted");
            Ok(())
        } else {
            Err(NotifyError::Rejected(resp.status().as_u16()))
        }
    }
}

impl Notifier for WebhookNotifier {
    fn deliver<'a>(
        &'a self,
        tier: &'a TierSpec,
        event: &'a NotificationEvent,
    ) -> BoxFuture<'a, NotifyResult<()>> {
        Box::pin(async move {
            let body = self.payload(tier, event)?;
            tokio::time::timeout(self.timeout, self.post(body))
                .await
                .map_err(|_| NotifyError::Timeout)?
        })
    }
}

#[cfg(test)]
mod tests {
    use nag_core::Urgency;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::*;
    use crate::render::tests::event;

    /// Accept one connection, capture the request, answer with `status_line`.
    async fn one_shot_gateway(status_line: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 16 * 1024];
            let mut request = Vec::new();
            loop {
                let n = sock.read(&mut buf).await.unwrap();
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request);
                if let Some(head_end) = text.find("\r\n\r\n") {
                    let len = text[..head_end]
                        .lines()
                        .find_map(|l| {
                            l.to_ascii_lowercase()
                                .strip_prefix("content-length:")
                                .map(|v| v.trim().parse::<usize>().unwrap())
                        })
                        .unwrap_or(0);
                    if request.len() >= head_end + 4 + len || n == 0 {
                        break;
                    }
                }
                if n == 0 {
                    break;
                }
            }
            let response = format!("HTTP/1.1 {status_line}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n");
            sock.write_all(response.as_bytes()).await.unwrap();
            String::from_utf8_lossy(&request).into_owned()
        });
        (format!("http://{addr}/hooks/alert"), handle)
    }

    #[tokio::test]
    async fn webhook_posts_json_payload() {
        let (url, gateway) = one_shot_gateway("200 OK").await;
        let notifier = WebhookNotifier::new("email", &url, vec!["ops@example.com".to_string()]);
        let tier = TierSpec::new("email", 2, Urgency::Low);

        notifier.deliver(&tier, &event(Urgency::Low)).await.unwrap();

        let request = gateway.await.unwrap();
        assert!(request.starts_with("POST /hooks/alert HTTP/1.1"));
        assert!(request.contains("\"subject\":\"ALERT: api\""));
        assert!(request.contains("ops@example.com"));
        assert!(request.contains("\"urgency\":\"low\""));
    }

    #[tokio::test]
    async fn webhook_non_2xx_is_rejected() {
        let (url, gateway) = one_shot_gateway("502 Bad Gateway").await;
        let notifier = WebhookNotifier::new("sms", &url, Vec::new());
        let tier = TierSpec::new("sms", 3, Urgency::High);

        let err = notifier
            .deliver(&tier, &event(Urgency::High))
            .await
            .unwrap_err();
        assert!(matches!(err, NotifyError::Rejected(502)));
        let _ = gateway.await;
    }

    #[tokio::test]
    async fn webhook_unreachable_gateway_fails() {
        let notifier = WebhookNotifier::new("email", "http://127.0.0.1:1/", Vec::new());
        let tier = TierSpec::new("email", 2, Urgency::Low);
        let err = notifier
            .deliver(&tier, &event(Urgency::Low))
            .await
            .unwrap_err();
        assert!(matches!(err, NotifyError::Delivery(_) | NotifyError::Timeout));
    }

    #[tokio::test]
    async fn webhook_refuses_https_without_sending() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let notifier = WebhookNotifier::new(
            "email",
            &format!("https://127.0.0.1:{port}/mail"),
            vec!["ops@example.com".to_string()],
        );
        let tier = TierSpec::new("email", 2, Urgency::Low);

        let err = notifier
            .deliver(&tier, &event(Urgency::Low))
            .await
            .unwrap_err();
        assert!(matches!(err, NotifyError::Delivery(msg) if msg.contains("scheme")));

        let accepted = tokio::time::timeout(Duration::from_millis(200), listener.accept()).await;
        assert!(accepted.is_err(), "alert left the process in plain text");
    }
}
