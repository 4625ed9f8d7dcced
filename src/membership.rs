//! Membership manager — event-driven node registry that maintains
//! `NodeIndex` and `EndpointIndex`, and resolves lookups.

use crate::node::Node;
use crate::registration::Registration;
use crate::ring::Ring;
use crate::security::Signer;
use crate::transport::OutboundTransport;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Default capacity of the membership event channel — a policy choice,
/// not an invariant.
pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 512;

/// `Get(name)` tries at most this many ring advancements before giving up.
pub const GET_MAX_ATTEMPTS: usize = 5;

#[derive(Debug)]
pub enum MembershipEvent {
    Register(Node),
    Deregister { node_id: String },
}

/// `NodeIndex`: `nodeId -> Node`, concurrent, written only by the
/// membership consumer task.
pub type NodeIndex = DashMap<String, Node>;
/// `EndpointIndex`: `name -> Ring<Registration>`. An empty ring is removed
/// so absence of key means absence of providers.
pub type EndpointIndex = DashMap<String, Arc<Ring<Arc<Registration>>>>;

/// Owns `NodeIndex`/`EndpointIndex` and the single-consumer event loop that
/// applies `register`/`deregister` events serially.
pub struct MembershipManager {
    self_id: String,
    nodes: Arc<NodeIndex>,
    endpoints: Arc<EndpointIndex>,
    sender: mpsc::Sender<MembershipEvent>,
    client: Arc<dyn OutboundTransport>,
    signer: Arc<dyn Signer>,
    events_applied: AtomicU64,
}

impl MembershipManager {
    /// Spawns the single-consumer event loop and returns the manager handle.
    pub fn spawn(
        self_id: impl Into<String>,
        client: Arc<dyn OutboundTransport>,
        signer: Arc<dyn Signer>,
    ) -> Arc<Self> {
        Self::spawn_with_capacity(self_id, client, signer, DEFAULT_EVENT_CHANNEL_CAPACITY)
    }

    pub fn spawn_with_capacity(
        self_id: impl Into<String>,
        client: Arc<dyn OutboundTransport>,
        signer: Arc<dyn Signer>,
        capacity: usize,
    ) -> Arc<Self> {
        let (sender, receiver) = mpsc::channel(capacity);
        let nodes: Arc<NodeIndex> = Arc::new(DashMap::new());
        let endpoints: Arc<EndpointIndex> = Arc::new(DashMap::new());
        let manager = Arc::new(Self {
            self_id: self_id.into(),
            nodes,
            endpoints,
            sender,
            client,
            signer,
            events_applied: AtomicU64::new(0),
        });
        manager.clone().spawn_consumer(receiver);
        manager
    }

    fn spawn_consumer(self: Arc<Self>, mut receiver: mpsc::Receiver<MembershipEvent>) {
        tokio::spawn(async move {
            while let Some(event) = receiver.recv().await {
                self.apply(event);
            }
        });
    }

    fn apply(&self, event: MembershipEvent) {
        match event {
            MembershipEvent::Register(node) => self.apply_register(node),
            MembershipEvent::Deregister { node_id } => self.apply_deregister(&node_id),
        }
        self.events_applied.fetch_add(1, Ordering::Relaxed);
    }

    fn apply_register(&self, node: Node) {
        if self.nodes.contains_key(&node.id) {
            debug!(node_id = %node.id, "register is idempotent, node already known");
            return;
        }
        for endpoint in &node.endpoints {
            let registration = Arc::new(Registration::new(
                node.id.clone(),
                endpoint.name.clone(),
                endpoint.internal,
                node.address.clone(),
                node.ssl,
                self.client.clone(),
                self.signer.clone(),
            ));
            let ring = self
                .endpoints
                .entry(endpoint.name.clone())
                .or_insert_with(|| Arc::new(Ring::new()))
                .clone();
            ring.append(registration);
        }
        info!(node_id = %node.id, address = %node.address, "node registered");
        self.nodes.insert(node.id.clone(), node);
    }

    fn apply_deregister(&self, node_id: &str) {
        let Some((_, node)) = self.nodes.remove(node_id) else {
            return;
        };
        for endpoint in &node.endpoints {
            if let Some(ring) = self.endpoints.get(&endpoint.name) {
                ring.remove(node_id);
                if ring.is_empty() {
                    drop(ring);
                    self.endpoints.remove(&endpoint.name);
                }
            }
        }
        warn!(node_id, "node deregistered");
    }

    /// Enqueues a register event. Callers must not block on backpressure;
    /// a full channel is a deployment sizing problem.
    pub async fn register(&self, node: Node) {
        let _ = self.sender.send(MembershipEvent::Register(node)).await;
    }

    pub async fn deregister(&self, node_id: impl Into<String>) {
        let _ = self
            .sender
            .send(MembershipEvent::Deregister {
                node_id: node_id.into(),
            })
            .await;
    }

    pub fn self_id(&self) -> &str {
        &self.self_id
    }

    pub fn known_node_ids(&self) -> Vec<String> {
        self.nodes.iter().map(|e| e.key().clone()).collect()
    }

    pub fn known_addresses(&self) -> Vec<String> {
        self.nodes.iter().map(|e| e.value().address.clone()).collect()
    }

    pub fn node(&self, id: &str) -> Option<Node> {
        self.nodes.get(id).map(|e| e.value().clone())
    }

    pub fn events_applied(&self) -> u64 {
        self.events_applied.load(Ordering::Relaxed)
    }

    /// `Get(name)`: up to 5 `Next` calls, returns the first available
    /// registration.
    pub async fn get(&self, name: &str) -> Option<Arc<Registration>> {
        let ring = self.endpoints.get(name)?.clone();
        for _ in 0..GET_MAX_ATTEMPTS {
            let Some(candidate) = ring.next() else {
                return None;
            };
            if !candidate.unavailable().await {
                return Some(candidate);
            }
        }
        None
    }

    /// `GetExact(name, id)`: traverses at most `ring.size()` times; if the
    /// matching registration is unavailable, returns `None` rather than
    /// picking another — the caller is asking for a specific peer.
    pub async fn get_exact(&self, name: &str, node_id: &str) -> Option<Arc<Registration>> {
        let ring = self.endpoints.get(name)?.clone();
        let candidate = ring.get(node_id)?;
        if candidate.unavailable().await {
            None
        } else {
            Some(candidate)
        }
    }

    /// Returns the raw ring backing `name`, for callers (the endpoints
    /// registry) that need to iterate it themselves rather than go through
    /// the bounded-attempt `get`/`get_exact` helpers.
    pub fn ring(&self, name: &str) -> Option<Arc<Ring<Arc<Registration>>>> {
        self.endpoints.get(name).map(|e| e.value().clone())
    }

    /// Removes a single registration from its name's ring, without
    /// deregistering the whole node.
    pub fn remove_unavailable_registration(&self, name: &str, node_id: &str) {
        if let Some(ring) = self.endpoints.get(name) {
            ring.remove(node_id);
            if ring.is_empty() {
                drop(ring);
                self.endpoints.remove(name);
            }
        }
    }

    /// Periodically probes every known node's `/health` and deregisters
    /// those that fail. Must not hold locks across I/O — node ids
    /// are snapshotted first, then probed without holding any map entry.
    pub async fn sweep_unhealthy_nodes(&self) {
        let snapshot: Vec<Node> = self.nodes.iter().map(|e| e.value().clone()).collect();
        for node in snapshot {
            let url = format!("{}/health", node.base_url());
            let healthy = self
                .client
                .get(&url, Duration::from_secs(3))
                .await
                .ok()
                .filter(|resp| resp.is_success())
                .is_some();
            if !healthy {
                warn!(node_id = %node.id, "health sweep marking node dead");
                self.deregister(node.id).await;
            }
        }
    }
}
