//! meshfabric: peer membership, routing and proxy core for a FaaS-style
//! service mesh.
//!
//! Four subsystems make up the core: membership/discovery, ring-based
//! routing, a signed request-transport codec, and a bounded worker pool.
//! HTTP client/server plumbing is consumed (via `axum`/`reqwest`, behind
//! the `http` feature) rather than hand-rolled.

pub mod bootstrap;
pub mod config;
pub mod context;
pub mod endpoints;
pub mod envelope;
pub mod error;
#[cfg(feature = "http")]
pub mod http_handler;
pub mod locals;
pub mod membership;
pub mod node;
pub mod proxy;
pub mod registration;
pub mod request;
pub mod ring;
pub mod security;
pub mod singleflight;
pub mod spantree;
pub mod transport;
pub mod workerpool;

pub use bootstrap::{Bootstrap, ClusterAgent, ConfigBootstrap, RunningFlag};
pub use config::{BootstrapOptions, ClientPoolConfig, ClusterConfig};
pub use context::{CallContext, Origin};
pub use endpoints::{Endpoints, LocalHandler, RemoteEndpoint, Resolved};
pub use envelope::{RequestEnvelope, ResponseEnvelope};
pub use error::{CoreError, ErrorCategory, Result};
pub use membership::MembershipManager;
pub use node::{EndpointDescriptor, Node};
pub use proxy::proxy_request;
pub use registration::Registration;
pub use ring::{Ring, RingKey};
pub use security::{HmacSha256Signer, Signer, Verifier};
pub use singleflight::SingleFlight;
pub use spantree::{SpanGuard, SpanNode, SpanTracer};
pub use transport::OutboundTransport;
pub use workerpool::{WorkItem, WorkerPool};

#[cfg(feature = "http")]
pub use transport::ReqwestTransport;
