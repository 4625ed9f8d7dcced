//! Proxy request — issues a signed POST to a chosen registration,
//! propagating the caller's headers

use crate::context::CallContext;
use crate::error::CoreError;
use crate::registration::Registration;
use crate::request::{
    Headers, DEVICE_ID_HEADER, REQUEST_ID_HEADER, REQUEST_TIMEOUT_HEADER, REQUEST_VERSION_HEADER,
};
use crate::workerpool::{WorkItem, WorkerPool};
use std::sync::Arc;
use tokio::sync::oneshot;

const DEVICE_IP_HEADER: &str = "x-fns-device-ip";
const AUTHORIZATION_HEADER: &str = "authorization";

/// The subset of caller headers forwarded onto a proxied call:
/// request id, authorization, timeout hint, version constraint, and device
/// identity. `Content-Type` is deliberately excluded — `Registration::request`
/// sets it to `application/fns+proxy` itself.
const FORWARDED_HEADERS: &[&str] = &[
    REQUEST_ID_HEADER,
    AUTHORIZATION_HEADER,
    REQUEST_TIMEOUT_HEADER,
    REQUEST_VERSION_HEADER,
    DEVICE_ID_HEADER,
    DEVICE_IP_HEADER,
];

fn forwarded_headers(caller: &Headers) -> Headers {
    let pairs = FORWARDED_HEADERS
        .iter()
        .filter_map(|name| caller.get(name).map(|value| (name.to_string(), value.to_string())))
        .collect();
    Headers::new(pairs)
}

/// Submits a proxied call against a specific, already-chosen registration
///. Unlike `Endpoints::get`'s remote resolution, there is no ring
/// fail-over here — the caller picked this peer deliberately (e.g. an
/// `exact` call, or a caller re-using a sticky registration).
pub async fn proxy_request(
    pool: &WorkerPool,
    ctx: &CallContext,
    registration: Arc<Registration>,
    function: &str,
    argument: serde_json::Value,
) -> Result<serde_json::Value, CoreError> {
    let mut forwarding_ctx = ctx.clone();
    forwarding_ctx.headers = forwarded_headers(&ctx.headers);

    let (tx, rx) = oneshot::channel();
    let accepted = pool.submit(WorkItem::Remote {
        ctx: forwarding_ctx,
        function: function.to_string(),
        argument,
        registration,
        result: tx,
    });
    if !accepted {
        return Err(CoreError::warning("send to endpoint failed"));
    }
    rx.await
        .unwrap_or_else(|_| Err(CoreError::warning("worker pool dropped the result")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Origin;
    use crate::locals::LocalsBag;
    use crate::security::HmacSha256Signer;
    use crate::spantree::SpanTracer;
    use crate::transport::test_support::MockTransport;
    use crate::transport::HttpResponse;

    fn ctx_with_headers(headers: Headers) -> CallContext {
        CallContext::new(
            Origin::Peer,
            "req-1",
            "10.0.0.1",
            headers,
            serde_json::json!({}),
            Arc::new(LocalsBag::default()),
            SpanTracer::new("root"),
            None,
        )
    }

    #[test]
    fn forwarded_headers_keeps_only_the_allow_listed_set() {
        let caller = Headers::new(vec![
            ("X-Fns-Request-Id".into(), "req-1".into()),
            ("Authorization".into(), "Bearer abc".into()),
            ("X-Custom-Internal".into(), "should-not-forward".into()),
        ]);
        let forwarded = forwarded_headers(&caller);
        assert_eq!(forwarded.get("x-fns-request-id"), Some("req-1"));
        assert_eq!(forwarded.get("authorization"), Some("Bearer abc"));
        assert_eq!(forwarded.get("x-custom-internal"), None);
    }

    #[tokio::test]
    async fn proxy_request_dispatches_through_the_pool() {
        let mock = Arc::new(MockTransport::new());
        mock.on(
            "http://127.0.0.1:9001/echo/do",
            Box::new(|_, _| {
                let body = serde_json::to_vec(&crate::envelope::ResponseEnvelope {
                    span: None,
                    data: serde_json::json!("ok"),
                })
                .unwrap();
                Ok(HttpResponse {
                    status: 200,
                    headers: vec![],
                    body,
                })
            }),
        );
        let registration = Arc::new(Registration::new(
            "n1",
            "echo",
            false,
            "127.0.0.1:9001",
            false,
            mock,
            Arc::new(HmacSha256Signer::new(b"k".to_vec())),
        ));
        let pool = WorkerPool::new(4);
        let ctx = ctx_with_headers(Headers::new(vec![(
            "X-Fns-Request-Id".into(),
            "req-1".into(),
        )]));
        let result = proxy_request(&pool, &ctx, registration, "do", serde_json::json!(1))
            .await
            .unwrap();
        assert_eq!(result, serde_json::json!("ok"));
    }
}
