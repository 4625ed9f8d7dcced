//! Request envelope codec — signs/verifies and frames the internal
//! request/response bodies carried between peers.

use crate::error::CoreError;
use crate::security::{Signer, Verifier};
use crate::spantree::SpanNode;
use serde::{Deserialize, Serialize};

/// `{user, locals, argument}` as sent in an outgoing internal request body,
/// before signing. `user`/`locals` are opaque bytes from the caller's
/// perspective (already-serialised JSON objects); `argument` is the raw
/// JSON argument value.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RequestEnvelope {
    #[serde(default)]
    pub user: serde_json::Value,
    #[serde(default)]
    pub locals: serde_json::Value,
    pub argument: serde_json::Value,
}

/// `{span, data}` as returned by a peer. `data` is either the success value
/// or, when the HTTP status is >= 400, a JSON-encoded `CoreError`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ResponseEnvelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span: Option<SpanNode>,
    pub data: serde_json::Value,
}

/// Encodes `envelope` into the signed wire format:
/// `[u64 BE siglen] ∥ sig ∥ payload`.
pub fn encode_signed(envelope: &RequestEnvelope, signer: &dyn Signer) -> Result<Vec<u8>, CoreError> {
    let payload = serde_json::to_vec(envelope)?;
    Ok(frame_signed(&payload, signer))
}

/// Signs an already-serialised payload and frames it. Shared by the
/// envelope codec and the cluster join/leave handshake, which signs a
/// `Node` rather than a `RequestEnvelope`.
pub fn frame_signed(payload: &[u8], signer: &dyn Signer) -> Vec<u8> {
    let sig = signer.sign(payload);
    let mut out = Vec::with_capacity(8 + sig.len() + payload.len());
    out.extend_from_slice(&(sig.len() as u64).to_be_bytes());
    out.extend_from_slice(&sig);
    out.extend_from_slice(payload);
    out
}

/// Splits a signed wire frame into `(signature, payload)` without verifying.
pub fn split_frame(frame: &[u8]) -> Result<(&[u8], &[u8]), CoreError> {
    if frame.len() < 8 {
        return Err(CoreError::not_acceptable("signed frame shorter than length prefix"));
    }
    let mut len_bytes = [0u8; 8];
    len_bytes.copy_from_slice(&frame[0..8]);
    let siglen = u64::from_be_bytes(len_bytes) as usize;
    let rest = &frame[8..];
    if rest.len() < siglen {
        return Err(CoreError::not_acceptable("signed frame truncated before end of signature"));
    }
    Ok((&rest[..siglen], &rest[siglen..]))
}

/// Decodes and verifies a signed wire frame, returning the payload bytes.
/// Verification failure is terminal: no retry, no fallback.
pub fn decode_verified<'a>(frame: &'a [u8], verifier: &dyn Verifier) -> Result<&'a [u8], CoreError> {
    let (sig, payload) = split_frame(frame)?;
    if !verifier.verify(payload, sig) {
        return Err(CoreError::not_acceptable("signature not verified"));
    }
    Ok(payload)
}

/// Decodes, verifies, and JSON-parses a signed `RequestEnvelope`.
pub fn decode_envelope(frame: &[u8], verifier: &dyn Verifier) -> Result<RequestEnvelope, CoreError> {
    let payload = decode_verified(frame, verifier)?;
    Ok(serde_json::from_slice(payload)?)
}
