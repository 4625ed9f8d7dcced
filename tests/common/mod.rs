//! Shared scaffolding for the end-to-end cluster scenarios under `tests/`.
//!
//! Each helper spins a real peer: a bound TCP listener, an axum router
//! wired through `http_handler::router`, and the in-process components
//! (`MembershipManager`, `Endpoints`, `WorkerPool`) a peer needs. Tests
//! drive these peers with a real `reqwest::Client`, exercising the wire
//! format end to end rather than calling handler functions directly.

use async_trait::async_trait;
use meshfabric::http_handler::{self, AppState, InFlightGuard};
use meshfabric::{
    Bootstrap, CallContext, ClusterAgent, ConfigBootstrap, CoreError, Endpoints, HmacSha256Signer,
    LocalHandler, MembershipManager, Node, ReqwestTransport, RunningFlag, SingleFlight, WorkerPool,
};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Shared HMAC key across every peer and test client in a scenario — these
/// tests model a single trust domain, not key distribution.
pub const SHARED_KEY: &[u8] = b"scenario-shared-secret";

/// Installs a `tracing` subscriber once per process so join/keepalive and
/// dispatch logs surface under `cargo test -- --nocapture`. Safe to call
/// from every test; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Local handler that returns its argument unchanged, counting invocations
/// so single-flight de-duplication is directly observable.
pub struct CountingEcho {
    pub calls: AtomicUsize,
    pub delay: Duration,
}

impl CountingEcho {
    pub fn new(delay: Duration) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            delay,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LocalHandler for CountingEcho {
    async fn call(
        &self,
        _ctx: CallContext,
        _function: &str,
        argument: serde_json::Value,
    ) -> Result<serde_json::Value, CoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(argument)
    }
}

/// A running peer under test: its node identity, membership/endpoints
/// handles, and the server task backing its HTTP surface.
pub struct Peer {
    pub node: Node,
    pub addr: SocketAddr,
    pub membership: Arc<MembershipManager>,
    pub endpoints: Arc<Endpoints>,
    pub signer: Arc<HmacSha256Signer>,
    pub server: tokio::task::JoinHandle<()>,
}

impl Peer {
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// A `ClusterAgent` for this peer, seeded with the given bootstrap
    /// addresses.
    pub fn agent(&self, seed_addresses: Vec<String>) -> Arc<ClusterAgent> {
        let config = meshfabric::ClusterConfig {
            kind: "members".into(),
            client: meshfabric::ClientPoolConfig::default(),
            check_health_second: 60,
            options: meshfabric::BootstrapOptions::Members {
                addresses: seed_addresses,
            },
        };
        let bootstrap: Arc<dyn Bootstrap> =
            Arc::new(ConfigBootstrap::new(self.node.id.clone(), self.addr.ip().to_string(), &config));
        Arc::new(ClusterAgent::new(
            self.node.clone(),
            bootstrap,
            self.membership.clone(),
            Arc::new(ReqwestTransport::new()),
            self.signer.clone() as Arc<dyn meshfabric::Signer>,
            Duration::from_secs(60),
        ))
    }
}

/// Spins a real peer process in-test: binds an ephemeral port, builds the
/// cluster components, mounts `locals` onto its `Endpoints`, and serves the
/// router in a background task.
pub async fn spin_peer(
    id: &str,
    locals: Vec<(&str, bool, Arc<dyn LocalHandler>)>,
) -> Peer {
    init_tracing();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let mut node = Node::new(id, addr.to_string(), false);
    for (name, internal, _) in &locals {
        node = node.with_endpoint(*name, *internal);
    }

    let signer = Arc::new(HmacSha256Signer::new(SHARED_KEY.to_vec()));
    let client = Arc::new(ReqwestTransport::new());
    let membership =
        MembershipManager::spawn(id, client.clone(), signer.clone() as Arc<dyn meshfabric::Signer>);
    let endpoints = Arc::new(Endpoints::new(id, membership.clone()));
    for (name, internal, handler) in locals {
        endpoints.mount(name, internal, handler);
    }

    let state = Arc::new(AppState {
        self_node: node.clone(),
        membership: membership.clone(),
        endpoints: endpoints.clone(),
        pool: Arc::new(WorkerPool::new(16)),
        single_flight: Arc::new(SingleFlight::new()),
        verifier: signer.clone() as Arc<dyn meshfabric::Verifier>,
        running: Arc::new(RunningFlag::new(true)),
        in_flight: Arc::new(InFlightGuard::default()),
    });
    let router = http_handler::router(state);
    let server = tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    // Give the accept loop a moment to start taking connections.
    tokio::time::sleep(Duration::from_millis(10)).await;

    Peer {
        node,
        addr,
        membership,
        endpoints,
        signer,
        server,
    }
}

impl Drop for Peer {
    fn drop(&mut self) {
        self.server.abort();
    }
}

/// Builds a signed proxy-call frame for `{user, locals, argument}`.
pub fn signed_envelope_frame(
    signer: &HmacSha256Signer,
    user: serde_json::Value,
    locals: serde_json::Value,
    argument: serde_json::Value,
) -> Vec<u8> {
    let envelope = meshfabric::RequestEnvelope {
        user,
        locals,
        argument,
    };
    meshfabric::envelope::encode_signed(&envelope, signer).unwrap()
}
