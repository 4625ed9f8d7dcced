//! Endpoints registry — resolves a name to a local handler or a remote
//! ring.

use crate::context::CallContext;
use crate::error::CoreError;
use crate::membership::MembershipManager;
use crate::registration::Registration;
use crate::ring::Ring;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;

/// A locally-mounted handler for one `(service, fn)` family.
#[async_trait]
pub trait LocalHandler: Send + Sync {
    async fn call(
        &self,
        ctx: CallContext,
        function: &str,
        argument: serde_json::Value,
    ) -> Result<serde_json::Value, CoreError>;
}

struct LocalMount {
    internal: bool,
    handler: Arc<dyn LocalHandler>,
}

/// A name bound to a remote ring, resolved lazily at execute time so
/// mid-call fail-over can advance past an unavailable peer.
#[derive(Clone)]
pub struct RemoteEndpoint {
    name: String,
    ring: Arc<Ring<Arc<Registration>>>,
    membership: Arc<MembershipManager>,
    exact_node_id: Option<String>,
}

impl RemoteEndpoint {
    pub fn is_exact(&self) -> bool {
        self.exact_node_id.is_some()
    }

    /// The single bound registration, for `exact=true` endpoints.
    pub fn exact(&self) -> Option<Arc<Registration>> {
        self.exact_node_id.as_deref().and_then(|id| self.ring.get(id))
    }

    /// Advances the ring, for `exact=false` endpoints.
    pub fn next(&self) -> Option<Arc<Registration>> {
        self.ring.next()
    }

    /// Evicts a registration that answered with 503, without deregistering
    /// the whole node.
    pub fn evict(&self, node_id: &str) {
        self.membership.remove_unavailable_registration(&self.name, node_id);
    }
}

/// Resolution result of `Endpoints::get`/`get_exact`.
pub enum Resolved {
    Local(Arc<dyn LocalHandler>),
    Remote(RemoteEndpoint),
}

/// Resolves endpoint names to either a local handler or a remote ring,
/// enforcing the internal/public visibility rule.
pub struct Endpoints {
    self_id: String,
    locals: DashMap<String, LocalMount>,
    membership: Arc<MembershipManager>,
}

impl Endpoints {
    pub fn new(self_id: impl Into<String>, membership: Arc<MembershipManager>) -> Self {
        Self {
            self_id: self_id.into(),
            locals: DashMap::new(),
            membership,
        }
    }

    /// Mounts a local handler under `name`. Mounting twice replaces the
    /// previous handler.
    pub fn mount(&self, name: impl Into<String>, internal: bool, handler: Arc<dyn LocalHandler>) {
        self.locals.insert(name.into(), LocalMount { internal, handler });
    }

    /// `Get(ctx, name)`.
    pub fn get(&self, ctx: &CallContext, name: &str) -> Result<Resolved, CoreError> {
        if let Some(mount) = self.locals.get(name) {
            if mount.internal && !ctx.is_internal() {
                return Err(CoreError::not_acceptable(format!(
                    "endpoint {name} is internal-only"
                )));
            }
            return Ok(Resolved::Local(mount.handler.clone()));
        }
        if !ctx.is_internal() {
            return Err(CoreError::not_found(format!(
                "public caller cannot reach remote endpoint {name}"
            )));
        }
        let ring = self
            .membership
            .ring(name)
            .ok_or_else(|| CoreError::not_found(format!("no provider known for {name}")))?;
        Ok(Resolved::Remote(RemoteEndpoint {
            name: name.to_string(),
            ring,
            membership: self.membership.clone(),
            exact_node_id: None,
        }))
    }

    /// `GetExact(ctx, name, nodeId)`. Only callable from internal
    /// contexts.
    pub fn get_exact(
        &self,
        ctx: &CallContext,
        name: &str,
        node_id: &str,
    ) -> Result<Resolved, CoreError> {
        if !ctx.is_internal() {
            return Err(CoreError::not_acceptable(
                "getExact is only callable from an internal context",
            ));
        }
        if node_id == self.self_id {
            return self
                .locals
                .get(name)
                .map(|mount| Resolved::Local(mount.handler.clone()))
                .ok_or_else(|| CoreError::not_found(format!("no local handler for {name}")));
        }
        let ring = self
            .membership
            .ring(name)
            .ok_or_else(|| CoreError::not_found(format!("no provider known for {name}")))?;
        Ok(Resolved::Remote(RemoteEndpoint {
            name: name.to_string(),
            ring,
            membership: self.membership.clone(),
            exact_node_id: Some(node_id.to_string()),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Origin;
    use crate::locals::LocalsBag;
    use crate::node::Node;
    use crate::security::HmacSha256Signer;
    use crate::spantree::SpanTracer;
    use crate::transport::test_support::MockTransport;

    struct Echo;

    #[async_trait]
    impl LocalHandler for Echo {
        async fn call(
            &self,
            _ctx: CallContext,
            _function: &str,
            argument: serde_json::Value,
        ) -> Result<serde_json::Value, CoreError> {
            Ok(argument)
        }
    }

    fn ctx(origin: Origin) -> CallContext {
        CallContext::new(
            origin,
            "req-1",
            "10.0.0.1",
            Default::default(),
            serde_json::json!({}),
            Arc::new(LocalsBag::default()),
            SpanTracer::new("root"),
            None,
        )
    }

    fn membership() -> Arc<MembershipManager> {
        MembershipManager::spawn(
            "self",
            Arc::new(MockTransport::new()),
            Arc::new(HmacSha256Signer::new(b"k".to_vec())),
        )
    }

    #[tokio::test]
    async fn public_caller_reaches_public_local_handler() {
        let mgr = membership();
        let endpoints = Endpoints::new("self", mgr);
        endpoints.mount("echo", false, Arc::new(Echo));
        let resolved = endpoints.get(&ctx(Origin::Public), "echo").unwrap();
        assert!(matches!(resolved, Resolved::Local(_)));
    }

    #[tokio::test]
    async fn public_caller_is_refused_by_internal_local_handler() {
        let mgr = membership();
        let endpoints = Endpoints::new("self", mgr);
        endpoints.mount("secrets", true, Arc::new(Echo));
        let err = endpoints.get(&ctx(Origin::Public), "secrets").unwrap_err();
        assert_eq!(err.category(), crate::error::ErrorCategory::NotAcceptable);
    }

    #[tokio::test]
    async fn public_caller_cannot_reach_remote_ring() {
        let mgr = membership();
        mgr.register(Node::new("n1", "127.0.0.1:1", false).with_endpoint("remote-svc", false))
            .await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let endpoints = Endpoints::new("self", mgr);
        let err = endpoints
            .get(&ctx(Origin::Public), "remote-svc")
            .unwrap_err();
        assert_eq!(err.category(), crate::error::ErrorCategory::NotFound);
    }

    #[tokio::test]
    async fn peer_caller_resolves_remote_ring() {
        let mgr = membership();
        mgr.register(Node::new("n1", "127.0.0.1:1", false).with_endpoint("remote-svc", false))
            .await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let endpoints = Endpoints::new("self", mgr);
        let resolved = endpoints.get(&ctx(Origin::Peer), "remote-svc").unwrap();
        match resolved {
            Resolved::Remote(remote) => assert!(!remote.is_exact()),
            Resolved::Local(_) => panic!("expected remote"),
        }
    }

    #[tokio::test]
    async fn get_exact_with_self_id_returns_local() {
        let mgr = membership();
        let endpoints = Endpoints::new("self", mgr);
        endpoints.mount("echo", true, Arc::new(Echo));
        let resolved = endpoints
            .get_exact(&ctx(Origin::Peer), "echo", "self")
            .unwrap();
        assert!(matches!(resolved, Resolved::Local(_)));
    }
}
