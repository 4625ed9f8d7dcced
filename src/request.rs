//! Request object — canonicalises an inbound proxy request.

use crate::envelope;
use crate::error::CoreError;
use crate::locals::LocalsBag;
use crate::security::Verifier;
use crate::spantree::SpanTracer;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

pub const REQUEST_ID_HEADER: &str = "x-fns-request-id";
pub const DEVMODE_HEADER: &str = "x-fns-devmode";
pub const DEVICE_ID_HEADER: &str = "x-fns-device-id";
pub const REQUEST_VERSION_HEADER: &str = "x-fns-request-version";
pub const REQUEST_TIMEOUT_HEADER: &str = "x-fns-request-timeout";
pub const REAL_IP_HEADER: &str = "x-real-ip";
pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";
pub const TRUE_CLIENT_IP_HEADER: &str = "true-client-ip";

/// A case-insensitive header bag, matching the wire's "headers are
/// case-insensitive" contract.
#[derive(Debug, Clone, Default)]
pub struct Headers(Vec<(String, String)>);

impl Headers {
    pub fn new(pairs: Vec<(String, String)>) -> Self {
        Self(
            pairs
                .into_iter()
                .map(|(k, v)| (k.to_ascii_lowercase(), v))
                .collect(),
        )
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        let name = name.to_ascii_lowercase();
        self.0
            .iter()
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn get_all(&self, name: &str) -> Vec<&str> {
        let name = name.to_ascii_lowercase();
        self.0
            .iter()
            .filter(|(k, _)| *k == name)
            .map(|(_, v)| v.as_str())
            .collect()
    }

    pub fn as_pairs(&self) -> &[(String, String)] {
        &self.0
    }
}

/// Derives the client's canonicalised IP: prefer `True-Client-Ip`, then
/// `X-Real-Ip`, then the last entry of `X-Forwarded-For`, else the
/// transport's remote address — the precedence order the external header
/// table specifies.
pub fn derive_remote_ip(headers: &Headers, transport_remote_addr: &str) -> String {
    if let Some(ip) = headers.get(TRUE_CLIENT_IP_HEADER) {
        if !ip.is_empty() {
            return ip.to_string();
        }
    }
    if let Some(ip) = headers.get(REAL_IP_HEADER) {
        if !ip.is_empty() {
            return ip.to_string();
        }
    }
    if let Some(forwarded) = headers.get(FORWARDED_FOR_HEADER) {
        if let Some(last) = forwarded.split(',').map(str::trim).last() {
            if !last.is_empty() {
                return last.to_string();
            }
        }
    }
    transport_remote_addr
        .rsplit_once(':')
        .map(|(host, _)| host.to_string())
        .unwrap_or_else(|| transport_remote_addr.to_string())
}

/// 64-bit hash over `service ∥ fn ∥ authorization ∥ remoteIp ∥ userAgent ∥ body`.
/// Only needs to be stable for one process's lifetime — it is a
/// single-flight key, not a distributed identifier.
pub fn fingerprint(
    service: &str,
    function: &str,
    authorization: &str,
    remote_ip: &str,
    user_agent: &str,
    body: &[u8],
) -> u64 {
    let mut hasher = DefaultHasher::new();
    service.hash(&mut hasher);
    function.hash(&mut hasher);
    authorization.hash(&mut hasher);
    remote_ip.hash(&mut hasher);
    user_agent.hash(&mut hasher);
    body.hash(&mut hasher);
    hasher.finish()
}

/// A canonicalised inbound proxy request.
pub struct Request {
    pub id: String,
    pub service: String,
    pub function: String,
    pub remote_ip: String,
    pub headers: Headers,
    pub user: serde_json::Value,
    pub locals: Arc<LocalsBag>,
    pub argument: serde_json::Value,
    pub hash: u64,
    pub tracer: SpanTracer,
}

impl Request {
    /// Parses `/<service>/<fn>` out of a path, rejecting anything else with
    /// `NotAcceptable`.
    pub fn parse_path(path: &str) -> Result<(String, String), CoreError> {
        let trimmed = path.trim_start_matches('/');
        let mut parts = trimmed.splitn(2, '/');
        let service = parts.next().filter(|s| !s.is_empty());
        let function = parts.next().filter(|s| !s.is_empty());
        match (service, function) {
            (Some(service), Some(function)) => Ok((service.to_string(), function.to_string())),
            _ => Err(CoreError::not_acceptable(format!(
                "path {path} is not /<service>/<fn>"
            ))),
        }
    }

    /// Builds a `Request` from an inbound frame, verifying the signature
    /// and deriving the fingerprint.
    pub fn from_signed_frame(
        path: &str,
        headers: Headers,
        transport_remote_addr: &str,
        frame: &[u8],
        verifier: &dyn Verifier,
    ) -> Result<Self, CoreError> {
        let (service, function) = Self::parse_path(path)?;
        let id = headers
            .get(REQUEST_ID_HEADER)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| CoreError::not_acceptable("X-Fns-Request-Id header is mandatory"))?
            .to_string();
        let payload = envelope::decode_verified(frame, verifier)?;
        let envelope: envelope::RequestEnvelope = serde_json::from_slice(payload)?;
        let remote_ip = derive_remote_ip(&headers, transport_remote_addr);
        let authorization = headers.get("authorization").unwrap_or_default();
        let user_agent = headers.get("user-agent").unwrap_or_default();
        let hash = fingerprint(
            &service,
            &function,
            authorization,
            &remote_ip,
            user_agent,
            payload,
        );
        Ok(Self {
            id,
            service,
            function,
            remote_ip,
            user: envelope.user,
            locals: Arc::new(LocalsBag::from_remote(envelope.locals)),
            argument: envelope.argument,
            hash,
            headers,
            tracer: SpanTracer::new("inbound"),
        })
    }

    pub fn dev_mode(&self) -> bool {
        self.headers
            .get(DEVMODE_HEADER)
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::HmacSha256Signer;

    fn verifier() -> HmacSha256Signer {
        HmacSha256Signer::new(b"k".to_vec())
    }

    #[test]
    fn parse_path_accepts_service_and_fn() {
        assert_eq!(
            Request::parse_path("/echo/do").unwrap(),
            ("echo".to_string(), "do".to_string())
        );
    }

    #[test]
    fn parse_path_rejects_missing_fn() {
        assert!(Request::parse_path("/echo").is_err());
    }

    #[test]
    fn missing_request_id_is_rejected() {
        let signer = verifier();
        let env = envelope::RequestEnvelope {
            argument: serde_json::json!(1),
            ..Default::default()
        };
        let frame = envelope::encode_signed(&env, &signer).unwrap();
        let err = Request::from_signed_frame(
            "/echo/do",
            Headers::new(vec![]),
            "10.0.0.1:1234",
            &frame,
            &signer,
        )
        .unwrap_err();
        assert!(err.message().contains("Request-Id"));
    }

    #[test]
    fn fingerprint_is_identical_for_identical_inputs() {
        let a = fingerprint("svc", "fn", "auth", "1.2.3.4", "ua", b"body");
        let b = fingerprint("svc", "fn", "auth", "1.2.3.4", "ua", b"body");
        assert_eq!(a, b);
        let c = fingerprint("svc", "fn", "auth", "1.2.3.5", "ua", b"body");
        assert_ne!(a, c);
    }

    #[test]
    fn remote_ip_prefers_true_client_ip_then_real_ip_then_forwarded_for_then_transport() {
        let headers = Headers::new(vec![
            ("True-Client-Ip".into(), "0.0.0.0".into()),
            ("X-Real-Ip".into(), "1.1.1.1".into()),
        ]);
        assert_eq!(derive_remote_ip(&headers, "9.9.9.9:80"), "0.0.0.0");

        let headers = Headers::new(vec![("X-Real-Ip".into(), "1.1.1.1".into())]);
        assert_eq!(derive_remote_ip(&headers, "9.9.9.9:80"), "1.1.1.1");

        let headers = Headers::new(vec![(
            "X-Forwarded-For".into(),
            "2.2.2.2, 3.3.3.3".into(),
        )]);
        assert_eq!(derive_remote_ip(&headers, "9.9.9.9:80"), "3.3.3.3");

        let headers = Headers::new(vec![]);
        assert_eq!(derive_remote_ip(&headers, "9.9.9.9:80"), "9.9.9.9");
    }

    #[test]
    fn valid_request_round_trips_into_canonical_form() {
        let signer = verifier();
        let env = envelope::RequestEnvelope {
            user: serde_json::json!({"id": "u1"}),
            locals: serde_json::json!({"k": "v"}),
            argument: serde_json::json!("hi"),
        };
        let frame = envelope::encode_signed(&env, &signer).unwrap();
        let headers = Headers::new(vec![("X-Fns-Request-Id".into(), "req-1".into())]);
        let request =
            Request::from_signed_frame("/echo/do", headers, "10.0.0.1:1234", &frame, &signer)
                .unwrap();
        assert_eq!(request.id, "req-1");
        assert_eq!(request.service, "echo");
        assert_eq!(request.function, "do");
        assert_eq!(request.locals.get("k"), Some(serde_json::json!("v")));
    }
}
