//! Pluggable body signing.
//!
//! TLS material loading is explicitly out of scope for this crate; what
//! *is* in scope is the signature that rides inside the body of every
//! internal request, independent of whether the transport is also wrapped
//! in TLS. `HmacSha256Signer` is the default concrete implementation,
//! pairing `sha2` with `hmac` from the same RustCrypto family.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Signs an outgoing payload. Implementors must be safe to call from many
/// tasks concurrently.
pub trait Signer: Send + Sync {
    fn sign(&self, payload: &[u8]) -> Vec<u8>;
}

/// Verifies an incoming `(payload, signature)` pair.
pub trait Verifier: Send + Sync {
    fn verify(&self, payload: &[u8], signature: &[u8]) -> bool;
}

/// Shared-secret HMAC-SHA256 signer/verifier. A single instance implements
/// both traits since the secret key material is identical for signing and
/// verifying in a symmetric scheme.
pub struct HmacSha256Signer {
    key: Vec<u8>,
}

impl HmacSha256Signer {
    pub fn new(key: impl Into<Vec<u8>>) -> Self {
        Self { key: key.into() }
    }
}

impl Signer for HmacSha256Signer {
    fn sign(&self, payload: &[u8]) -> Vec<u8> {
        let mut mac =
            HmacSha256::new_from_slice(&self.key).expect("HMAC accepts keys of any length");
        mac.update(payload);
        mac.finalize().into_bytes().to_vec()
    }
}

impl Verifier for HmacSha256Signer {
    fn verify(&self, payload: &[u8], signature: &[u8]) -> bool {
        let mut mac =
            HmacSha256::new_from_slice(&self.key).expect("HMAC accepts keys of any length");
        mac.update(payload);
        mac.verify_slice(signature).is_ok()
    }
}
