//! Tracing span tree.
//!
//! This is a lightweight, JSON-serialisable tree, distinct from the
//! process-local `tracing` spans each component also emits for local
//! observability. A `SpanNode` is what actually rides inside a
//! `ResponseEnvelope`: a child span produced on a peer is appended to the
//! caller's current span on response, appended in the order responses
//! arrive; no global ordering is claimed.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpanNode {
    pub name: String,
    pub start_unix_ms: u64,
    pub duration_ms: u64,
    #[serde(default)]
    pub children: Vec<SpanNode>,
}

impl SpanNode {
    fn now_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }
}

/// A single caller-side span tracer. Cheap to clone (`Arc`-backed); every
/// clone observes appends to the same root node.
#[derive(Clone)]
pub struct SpanTracer {
    root: Arc<Mutex<SpanNode>>,
}

impl SpanTracer {
    pub fn new(root_name: impl Into<String>) -> Self {
        Self {
            root: Arc::new(Mutex::new(SpanNode {
                name: root_name.into(),
                start_unix_ms: SpanNode::now_ms(),
                duration_ms: 0,
                children: Vec::new(),
            })),
        }
    }

    /// Appends a completed child span (typically decoded from a peer's
    /// `ResponseEnvelope`) to the root. No ordering is enforced beyond
    /// arrival order.
    pub fn append_child(&self, child: SpanNode) {
        self.root.lock().children.push(child);
    }

    /// Snapshots the current tree for inclusion in an outgoing
    /// `ResponseEnvelope`.
    pub fn snapshot(&self) -> SpanNode {
        self.root.lock().clone()
    }

    pub fn finish(&self) {
        let mut root = self.root.lock();
        let elapsed = SpanNode::now_ms().saturating_sub(root.start_unix_ms);
        root.duration_ms = elapsed;
    }
}

/// Measures one local span, producing a `SpanNode` without requiring the
/// caller to track start/stop bookkeeping.
pub struct SpanGuard {
    name: String,
    start_ms: u64,
}

impl SpanGuard {
    pub fn start(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            start_ms: SpanNode::now_ms(),
        }
    }

    pub fn finish(self, children: Vec<SpanNode>) -> SpanNode {
        SpanNode {
            name: self.name,
            start_unix_ms: self.start_ms,
            duration_ms: SpanNode::now_ms().saturating_sub(self.start_ms),
            children,
        }
    }
}
