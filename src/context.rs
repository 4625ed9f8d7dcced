//! `CallContext`: the per-call context threaded through Endpoints, the
//! worker pool, proxying, and the HTTP handler.

use crate::locals::LocalsBag;
use crate::request::Headers;
use crate::spantree::SpanTracer;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Where a call originated. Only a `Peer` context may reach an `internal`
/// endpoint or call `GetExact`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Arrived over `/<service>/<fn>` from an external caller.
    Public,
    /// Arrived carrying a verified signed envelope from another peer, or
    /// originated locally while proxying on a peer's behalf.
    Peer,
}

/// Everything a handler or proxy step needs about the call in flight.
#[derive(Clone)]
pub struct CallContext {
    pub origin: Origin,
    pub request_id: String,
    pub remote_ip: String,
    pub headers: Headers,
    pub user: serde_json::Value,
    pub locals: Arc<LocalsBag>,
    pub tracer: SpanTracer,
    deadline: Option<Instant>,
}

impl CallContext {
    pub fn new(
        origin: Origin,
        request_id: impl Into<String>,
        remote_ip: impl Into<String>,
        headers: Headers,
        user: serde_json::Value,
        locals: Arc<LocalsBag>,
        tracer: SpanTracer,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            origin,
            request_id: request_id.into(),
            remote_ip: remote_ip.into(),
            headers,
            user,
            locals,
            tracer,
            deadline: timeout.map(|d| Instant::now() + d),
        }
    }

    pub fn is_internal(&self) -> bool {
        self.origin == Origin::Peer
    }

    /// Remaining time before the call's deadline, or `None` if no deadline
    /// was set.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline.map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Builds a child context for a locally-dispatched call, sharing the
    /// same tracer so a child span lands on the same tree.
    pub fn child(&self) -> Self {
        self.clone()
    }
}
