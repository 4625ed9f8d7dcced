//! Registration — a concrete routable handle for one (endpoint, node)
//! pair, with unavailability hysteresis.

use crate::envelope::{self, RequestEnvelope, ResponseEnvelope};
use crate::error::{CoreError, ErrorCategory};
use crate::ring::RingKey;
use crate::security::{Signer, Verifier};
use crate::spantree::SpanTracer;
use crate::transport::OutboundTransport;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A registration is marked unavailable once it has accrued more than this
/// many consecutive strikes.
pub const UNAVAILABLE_STRIKE_THRESHOLD: u32 = 5;
/// Minimum time between two health probes against the same registration.
pub const HEALTH_PROBE_COOLDOWN: Duration = Duration::from_secs(10);

/// A routable handle for one endpoint hosted on one peer node.
pub struct Registration {
    pub id: String,
    pub name: String,
    pub internal: bool,
    pub address: String,
    pub ssl: bool,
    client: Arc<dyn OutboundTransport>,
    signer: Arc<dyn Signer>,
    unavailable_times: AtomicU32,
    /// `None` means no probe has ever run; a probe is then always due.
    last_probe: Mutex<Option<Instant>>,
    /// Guarantees only one probe runs at a time per registration.
    probe_lock: tokio::sync::Mutex<()>,
}

impl Registration {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        internal: bool,
        address: impl Into<String>,
        ssl: bool,
        client: Arc<dyn OutboundTransport>,
        signer: Arc<dyn Signer>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            internal,
            address: address.into(),
            ssl,
            client,
            signer,
            unavailable_times: AtomicU32::new(0),
            last_probe: Mutex::new(None),
            probe_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn scheme(&self) -> &'static str {
        if self.ssl { "https" } else { "http" }
    }

    fn base_url(&self) -> String {
        format!("{}://{}", self.scheme(), self.address)
    }

    fn bump_unavailable(&self) {
        self.unavailable_times.fetch_add(1, Ordering::SeqCst);
    }

    fn reset_unavailable(&self) {
        self.unavailable_times.store(0, Ordering::SeqCst);
    }

    pub fn strikes(&self) -> u32 {
        self.unavailable_times.load(Ordering::SeqCst)
    }

    /// True iff `unavailableTimes > 5`. As a side effect, if the threshold is
    /// crossed and at least `HEALTH_PROBE_COOLDOWN` has elapsed since the
    /// last probe, synchronously probes `/health` and resets the counter on
    /// a running reply.
    pub async fn unavailable(&self) -> bool {
        if self.strikes() <= UNAVAILABLE_STRIKE_THRESHOLD {
            return false;
        }
        let due = {
            let last = self.last_probe.lock();
            match *last {
                None => true,
                Some(instant) => instant.elapsed() >= HEALTH_PROBE_COOLDOWN,
            }
        };
        if !due {
            return true;
        }
        let _guard = self.probe_lock.lock().await;
        // Re-check under the probe lock: another task may have just probed.
        let still_due = {
            let last = self.last_probe.lock();
            match *last {
                None => true,
                Some(instant) => instant.elapsed() >= HEALTH_PROBE_COOLDOWN,
            }
        };
        if !still_due {
            return self.strikes() > UNAVAILABLE_STRIKE_THRESHOLD;
        }
        *self.last_probe.lock() = Some(Instant::now());
        let url = format!("{}/health", self.base_url());
        let running = self
            .client
            .get(&url, Duration::from_secs(3))
            .await
            .ok()
            .filter(|resp| resp.is_success())
            .and_then(|resp| serde_json::from_slice::<serde_json::Value>(&resp.body).ok())
            .and_then(|v| v.get("running").and_then(|r| r.as_bool()).map(Some))
            .flatten()
            .unwrap_or(false);
        if running {
            self.reset_unavailable();
            false
        } else {
            true
        }
    }

    /// Sends an internal POST to `<scheme>://<address>/<name>/<fn>` with
    /// content-type `application/fns+proxy`.
    pub async fn request(
        &self,
        headers: &[(String, String)],
        timeout: Duration,
        function: &str,
        user: serde_json::Value,
        locals: serde_json::Value,
        argument: serde_json::Value,
        tracer: &SpanTracer,
    ) -> Result<serde_json::Value, CoreError> {
        let envelope = RequestEnvelope {
            user,
            locals,
            argument,
        };
        let frame = envelope::encode_signed(&envelope, self.signer.as_ref())?;
        let url = format!("{}/{}/{}", self.base_url(), self.name, function);
        let resp = match self
            .client
            .post(&url, "application/fns+proxy", headers, frame, timeout)
            .await
        {
            Ok(resp) => resp,
            Err(err) => {
                self.bump_unavailable();
                return Err(err);
            }
        };

        if resp.status == ErrorCategory::Unavailable.http_status() {
            self.bump_unavailable();
            return Err(CoreError::from_wire(resp.status, &resp.body));
        }
        if !resp.is_success() {
            return Err(CoreError::from_wire(resp.status, &resp.body));
        }
        let response_envelope: ResponseEnvelope = serde_json::from_slice(&resp.body)?;
        if let Some(span) = response_envelope.span {
            tracer.append_child(span);
        }
        Ok(response_envelope.data)
    }
}

impl RingKey for Arc<Registration> {
    fn ring_key(&self) -> &str {
        &self.id
    }
}
