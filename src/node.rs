//! Node identity and the endpoints it hosts.

use serde::{Deserialize, Serialize};

/// One callable a node hosts. `internal` endpoints are only reachable from
/// other peers carrying a verified signed envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EndpointDescriptor {
    pub name: String,
    pub internal: bool,
}

/// A peer process: identity, address and the endpoints it currently hosts.
/// Created at startup from bootstrap output, mutated only by adding
/// services before join, and destroyed on leave or eviction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Node {
    pub id: String,
    pub address: String,
    #[serde(default)]
    pub ssl: bool,
    #[serde(default)]
    pub endpoints: Vec<EndpointDescriptor>,
}

impl Node {
    pub fn new(id: impl Into<String>, address: impl Into<String>, ssl: bool) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
            ssl,
            endpoints: Vec::new(),
        }
    }

    pub fn with_endpoint(mut self, name: impl Into<String>, internal: bool) -> Self {
        self.endpoints.push(EndpointDescriptor {
            name: name.into(),
            internal,
        });
        self
    }

    pub fn scheme(&self) -> &'static str {
        if self.ssl { "https" } else { "http" }
    }

    pub fn base_url(&self) -> String {
        format!("{}://{}", self.scheme(), self.address)
    }
}
