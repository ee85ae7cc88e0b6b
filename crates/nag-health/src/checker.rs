//! Health check probe logic.
//!
//! A [`Transport`] performs the raw request and reports a status code or a
//! [`TransportError`]. The [`RacingProber`] wraps a transport and races it
//! against the caller's timeout budget, producing exactly one
//! [`CheckResult`] per invocation.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{Instrument, debug, info, warn};

use nag_core::{CheckResult, MAX_PATIENT_TIMEOUT, Outcome, TargetSettings};
use nag_notify::BoxFuture;

use crate::completion::CompletionSlot;
use crate::error::TransportError;

/// Hard ceiling for a single HTTP request, independent of the probe budget.
///
/// Kept above the largest accepted budget so the budget always fires first
/// and a stuck request surfaces as `TimedOut`.
pub const REQUEST_DEADLINE: Duration = Duration::from_secs(MAX_PATIENT_TIMEOUT.as_secs() + 5);

/// Raw request against a probe address.
pub trait Transport: Send + Sync + 'static {
    fn request<'a>(&'a self, address: &'a str) -> BoxFuture<'a, Result<u16, TransportError>>;
}

/// Issues one health check against one target.
pub trait Prober: Send + Sync {
    /// Resolve exactly once, within roughly `budget`.
    fn probe<'a>(&'a self, target: &'a TargetSettings, budget: Duration)
    -> BoxFuture<'a, CheckResult>;
}

// ── HTTP transport ─────────────────────────────────────────────────

/// Plain HTTP/1.1 GET over hyper, abandoned after [`REQUEST_DEADLINE`].
#[derive(Debug, Clone, Default)]
pub struct HttpTransport;

impl HttpTransport {
    pub fn new() -> Self {
        Self
    }

    async fn get(address: &str) -> Result<u16, TransportError> {
        let uri: http::Uri = address
            .parse()
            .map_err(|_| TransportError::InvalidAddress(address.to_string()))?;
        if uri.scheme_str().is_some_and(|s| s != "http") {
            return Err(TransportError::InvalidAddress(address.to_string()));
        }
        let host = uri
            .host()
            .ok_or_else(|| TransportError::InvalidAddress(address.to_string()))?;
        let authority = format!("{host}:{}", uri.port_u16().unwrap_or(80));

        let stream = tokio::net::TcpStream::connect(&authority)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| TransportError::Handshake(e.to_string()))?;

        // Drive the connection in the background.
        tokio::spawn(async move {
            let _ = conn.await;
        });

        let path = uri.path_and_query().map_or("/", |p| p.as_str());
        let req = http::Request::builder()
            .method("GET")
            .uri(path)
            .header("host", authority.as_str())
            .header("connection", "close")
            .header("user-agent", concat!("nag/", env!("CARGO_PKG_VERSION")))
            .body(http_body_util::Empty::<bytes::Bytes>::new())
            .map_err(|e| TransportError::Request(e.to_string()))?;

        let resp = sender
            .send_request(req)
            .await
            .map_err(|e| TransportError::Request(e.to_string()))?;
        Ok(resp.status().as_u16())
    }
}

impl Transport for HttpTransport {
    fn request<'a>(&'a self, address: &'a str) -> BoxFuture<'a, Result<u16, TransportError>> {
        Box::pin(async move {
            match tokio::time::timeout(REQUEST_DEADLINE, Self::get(address)).await {
                Ok(result) => result,
                Err(_) => Err(TransportError::Deadline),
            }
        })
    }
}

// ── Racing prober ──────────────────────────────────────────────────

/// Races a transport request against a timeout budget.
///
/// The request runs in its own task and is never cancelled: when the
/// timeout wins, the request is left to finish and its result is logged
/// as a late reply and discarded.
#[derive(Clone)]
pub struct RacingProber {
    transport: Arc<dyn Transport>,
    late_replies: Arc<AtomicU64>,
}

impl RacingProber {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            late_replies: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Prober over the bundled HTTP transport.
    pub fn http() -> Self {
        Self::new(Arc::new(HttpTransport::new()))
    }

    /// Results that arrived after their probe had already resolved.
    pub fn late_replies(&self) -> u64 {
        self.late_replies.load(Ordering::Relaxed)
    }
}

impl Prober for RacingProber {
    fn probe<'a>(
        &'a self,
        target: &'a TargetSettings,
        budget: Duration,
    ) -> BoxFuture<'a, CheckResult> {
        Box::pin(async move {
            let slot = Arc::new(CompletionSlot::new());
            let started = Instant::now();

            let request_slot = Arc::clone(&slot);
            let transport = Arc::clone(&self.transport);
            let late_replies = Arc::clone(&self.late_replies);
            let name = target.name.clone();
            let address = target.address.clone();
            let success_code = target.success_code;
            let request = async move {
                let reply = transport.request(&address).await;
                let elapsed = started.elapsed();
                let outcome = match &reply {
                    Ok(status) => Outcome::from_status(*status, success_code),
                    Err(e) => {
                        debug!(target_name = %name, error = %e, "probe transport error");
                        Outcome::NetworkError {
                            classifier: e.classifier().to_string(),
                        }
                    }
                };
                let result = CheckResult::new(name, outcome, elapsed);
                if let Err(late) = request_slot.complete(result) {
                    late_replies.fetch_add(1, Ordering::Relaxed);
                    log_late_reply(&late, matches!(reply, Err(TransportError::Deadline)));
                }
            };
            tokio::spawn(request.in_current_span());

            tokio::select! {
                result = slot.wait() => result,
                _ = tokio::time::sleep(budget) => {
                    let timed_out = CheckResult::new(target.name.clone(), Outcome::TimedOut, budget);
                    if slot.complete(timed_out).is_err() {
                        debug!(target_name = %target.name, "reply arrived as the timeout fired");
                    }
                    slot.wait().await
                }
            }
        })
    }
}

/// Only a request that hit its own deadline "never replied"; any other late
/// result, including a refused connection, is an answer.
fn log_late_reply(late: &CheckResult, never_replied: bool) {
    let elapsed_ms = late.elapsed.as_millis() as u64;
    if !never_replied {
        info!(
            target_name = %late.target,
            outcome = %late.outcome,
            elapsed_ms,
            "timed out target replied late"
        );
    } else {
        warn!(
            target_name = %late.target,
            outcome = %late.outcome,
            elapsed_ms,
            "timed out target never replied"
        );
    }
}
