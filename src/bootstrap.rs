//! Bootstrap + join/keepalive.
//!
//! `Bootstrap` is the pluggable discovery capability; `ClusterAgent` owns
//! the join-then-keepalive state machine and the graceful-leave sequence.

use crate::config::{BootstrapOptions, ClusterConfig};
use crate::envelope;
use crate::error::CoreError;
use crate::membership::MembershipManager;
use crate::node::Node;
use crate::security::Signer;
use crate::transport::OutboundTransport;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Default keep-alive interval: the only cluster-wide convergence mechanism
/// besides the initial join.
pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(60);

/// Pluggable member discovery. The default implementation reads
/// addresses straight out of `ClusterConfig`.
#[async_trait]
pub trait Bootstrap: Send + Sync {
    fn id(&self) -> &str;
    fn ip(&self) -> &str;
    async fn find_members(&self) -> Result<Vec<String>, CoreError>;
}

/// Reads member addresses from the `members` bootstrap option and derives
/// self-address from the provided id/ip.
pub struct ConfigBootstrap {
    id: String,
    ip: String,
    addresses: Vec<String>,
}

impl ConfigBootstrap {
    pub fn new(id: impl Into<String>, ip: impl Into<String>, config: &ClusterConfig) -> Self {
        let addresses = match &config.options {
            BootstrapOptions::Members { addresses } => addresses.clone(),
            BootstrapOptions::Other(_) => Vec::new(),
        };
        Self {
            id: id.into(),
            ip: ip.into(),
            addresses,
        }
    }
}

#[async_trait]
impl Bootstrap for ConfigBootstrap {
    fn id(&self) -> &str {
        &self.id
    }

    fn ip(&self) -> &str {
        &self.ip
    }

    async fn find_members(&self) -> Result<Vec<String>, CoreError> {
        Ok(self.addresses.clone())
    }
}

/// Owns the join/keepalive/leave lifecycle for one peer.
pub struct ClusterAgent {
    self_node: Node,
    bootstrap: Arc<dyn Bootstrap>,
    membership: Arc<MembershipManager>,
    client: Arc<dyn OutboundTransport>,
    signer: Arc<dyn Signer>,
    keepalive_interval: Duration,
}

impl ClusterAgent {
    pub fn new(
        self_node: Node,
        bootstrap: Arc<dyn Bootstrap>,
        membership: Arc<MembershipManager>,
        client: Arc<dyn OutboundTransport>,
        signer: Arc<dyn Signer>,
        keepalive_interval: Duration,
    ) -> Self {
        Self {
            self_node,
            bootstrap,
            membership,
            client,
            signer,
            keepalive_interval,
        }
    }

    /// Runs the full join sequence: gather member
    /// addresses, link to each recursively, then sweep unavailable nodes.
    pub async fn join(&self) {
        let mut member_addresses: HashSet<String> = self
            .bootstrap
            .find_members()
            .await
            .unwrap_or_default()
            .into_iter()
            .collect();
        member_addresses.extend(self.membership.known_addresses());

        let mut visited: HashSet<String> = HashSet::new();
        for address in member_addresses.clone() {
            self.link(&address, &member_addresses, &mut visited).await;
        }
        self.membership.sweep_unhealthy_nodes().await;
    }

    /// POSTs the self node to `address`'s `/cluster/join`, registers the
    /// responder, and recursively links to any previously-unknown member
    /// whose address was not already in `member_addresses` (DFS discovery
    /// with natural pruning).
    ///
    /// Boxed explicitly because async fns cannot recurse directly (the
    /// returned future would have unbounded size).
    fn link<'a>(
        &'a self,
        address: &'a str,
        member_addresses: &'a HashSet<String>,
        visited: &'a mut HashSet<String>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            if !visited.insert(address.to_string()) {
                return;
            }
            let url = format!("http://{address}/cluster/join");
            let payload = match serde_json::to_vec(&self.self_node) {
                Ok(bytes) => bytes,
                Err(_) => return,
            };
            let frame = envelope::frame_signed(&payload, self.signer.as_ref());
            let resp = match self
                .client
                .post(&url, "application/fns+cluster", &[], frame, Duration::from_secs(5))
                .await
            {
                Ok(resp) if resp.is_success() => resp,
                Ok(resp) => {
                    warn!(%address, status = resp.status, "cluster join rejected");
                    return;
                }
                Err(err) => {
                    warn!(%address, error = %err, "cluster join failed, will retry on next keep-alive");
                    return;
                }
            };
            let nodes: Vec<Node> = match serde_json::from_slice(&resp.body) {
                Ok(nodes) => nodes,
                Err(_) => return,
            };
            let Some((responder, rest)) = nodes.split_first() else {
                return;
            };
            self.membership.register(responder.clone()).await;
            for node in rest {
                if self.membership.node(&node.id).is_some() {
                    continue;
                }
                if member_addresses.contains(&node.address) {
                    continue;
                }
                self.link(&node.address, member_addresses, visited).await;
            }
        })
    }

    /// Spawns the periodic keep-alive task. Returns a handle that can be
    /// aborted on shutdown.
    pub fn spawn_keepalive(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.keepalive_interval);
            ticker.tick().await; // first tick fires immediately; skip it
            loop {
                ticker.tick().await;
                info!("keep-alive tick: relinking cluster");
                self.join().await;
            }
        })
    }

    /// Best-effort leave: POSTs `{"id": self.id}` to every known member.
    /// Failures are logged and ignored.
    pub async fn leave(&self) {
        let payload = serde_json::json!({ "id": self.self_node.id });
        let body = match serde_json::to_vec(&payload) {
            Ok(body) => body,
            Err(_) => return,
        };
        let frame = envelope::frame_signed(&body, self.signer.as_ref());
        for node_id in self.membership.known_node_ids() {
            let Some(node) = self.membership.node(&node_id) else {
                continue;
            };
            let url = format!("{}/cluster/leave", node.base_url());
            if let Err(err) = self
                .client
                .post(&url, "application/fns+cluster", &[], frame.clone(), Duration::from_secs(5))
                .await
            {
                warn!(%node_id, error = %err, "leave notification failed, ignoring");
            }
        }
    }
}

/// Server-side handling of an inbound `/cluster/join`.
///
/// Returns the JSON body to send back. If `incoming.id` or `incoming.address`
/// matches self, returns an empty array without mutating state (idempotent
/// no-op, prevents self-registration on bounce). The reply is built
/// *before* registering the incoming node so the caller never observes
/// itself in the member list.
pub async fn handle_cluster_join(
    self_node: &Node,
    membership: &MembershipManager,
    incoming: Node,
    dev_mode: bool,
) -> Vec<Node> {
    if incoming.id == self_node.id || incoming.address == self_node.address {
        return Vec::new();
    }
    let mut reply = vec![self_node.clone()];
    reply.extend(
        membership
            .known_node_ids()
            .into_iter()
            .filter_map(|id| membership.node(&id)),
    );
    if !dev_mode {
        membership.register(incoming).await;
    }
    reply
}

/// Server-side handling of an inbound `/cluster/leave`.
pub async fn handle_cluster_leave(membership: &MembershipManager, node_id: String, dev_mode: bool) {
    if !dev_mode {
        membership.deregister(node_id).await;
    }
}

/// Process-wide running flag backing `/health`.
#[derive(Default)]
pub struct RunningFlag(AtomicBool);

impl RunningFlag {
    pub fn new(running: bool) -> Self {
        Self(AtomicBool::new(running))
    }

    pub fn set(&self, running: bool) {
        self.0.store(running, Ordering::SeqCst);
    }

    pub fn get(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
