//! Cluster HTTP handler — axum wiring for `/cluster/join`,
//! `/cluster/leave`, `/<service>/<fn>`, and `/health`.
//!
//! Gated behind the `http` feature, the same way the rest of the transport
//! layer is: the core's dispatch logic lives in plain functions so
//! it is reachable without axum; this module is only the glue that maps
//! axum's extractors onto them.

#![cfg(feature = "http")]

use crate::bootstrap::{handle_cluster_join, handle_cluster_leave, RunningFlag};
use crate::context::{CallContext, Origin};
use crate::endpoints::Endpoints;
use crate::error::CoreError;
use crate::locals::LocalsBag;
use crate::membership::MembershipManager;
use crate::node::Node;
use crate::request::{derive_remote_ip, Headers, DEVMODE_HEADER, REQUEST_ID_HEADER};
use crate::security::Verifier;
use crate::singleflight::{CallOutcome, SingleFlight};
use crate::spantree::SpanTracer;
use crate::workerpool::{submit_resolved, WorkerPool};
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

const PROXY_CONTENT_TYPE: &str = "application/fns+proxy";
const CLUSTER_CONTENT_TYPE: &str = "application/fns+cluster";

/// Tracks in-flight application requests so shutdown can drain cleanly.
#[derive(Default)]
pub struct InFlightGuard {
    count: AtomicUsize,
    idle: Notify,
}

pub struct InFlightToken<'a>(&'a InFlightGuard);

impl Drop for InFlightToken<'_> {
    fn drop(&mut self) {
        if self.0.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

impl InFlightGuard {
    pub fn enter(&self) -> InFlightToken<'_> {
        self.count.fetch_add(1, Ordering::SeqCst);
        InFlightToken(self)
    }

    /// Waits until there are zero in-flight requests — a `WaitGroup`-style
    /// barrier for in-flight application requests.
    pub async fn drain(&self) {
        loop {
            if self.count.load(Ordering::SeqCst) == 0 {
                return;
            }
            self.idle.notified().await;
        }
    }
}

pub struct AppState {
    pub self_node: Node,
    pub membership: Arc<MembershipManager>,
    pub endpoints: Arc<Endpoints>,
    pub pool: Arc<WorkerPool>,
    pub single_flight: Arc<SingleFlight>,
    pub verifier: Arc<dyn Verifier>,
    pub running: Arc<RunningFlag>,
    pub in_flight: Arc<InFlightGuard>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/cluster/join", post(join_handler))
        .route("/cluster/leave", post(leave_handler))
        .route("/health", get(health_handler))
        .route("/:service/:function", post(dispatch_handler))
        .with_state(state)
}

fn dev_mode(headers: &HeaderMap) -> bool {
    headers
        .get(DEVMODE_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

pub async fn join_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let incoming: Node = match crate::envelope::decode_verified(&body, state.verifier.as_ref())
        .and_then(|payload| serde_json::from_slice(payload).map_err(CoreError::from))
    {
        Ok(node) => node,
        Err(err) => return error_response(&err),
    };
    let reply = handle_cluster_join(
        &state.self_node,
        &state.membership,
        incoming,
        dev_mode(&headers),
    )
    .await;
    axum::Json(reply).into_response()
}

pub async fn leave_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    #[derive(serde::Deserialize)]
    struct LeaveBody {
        id: String,
    }
    let payload: LeaveBody = match crate::envelope::decode_verified(&body, state.verifier.as_ref())
        .and_then(|payload| serde_json::from_slice(payload).map_err(CoreError::from))
    {
        Ok(payload) => payload,
        Err(err) => return error_response(&err),
    };
    handle_cluster_leave(&state.membership, payload.id, dev_mode(&headers)).await;
    StatusCode::OK.into_response()
}

pub async fn health_handler(State(state): State<Arc<AppState>>) -> Response {
    axum::Json(serde_json::json!({ "running": state.running.get() })).into_response()
}

pub async fn dispatch_handler(
    State(state): State<Arc<AppState>>,
    Path((service, function)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let content_type = headers
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    if content_type != PROXY_CONTENT_TYPE {
        return error_response(&CoreError::not_acceptable(format!(
            "unsupported content-type {content_type}"
        )));
    }

    let _token = state.in_flight.enter();
    let header_pairs: Vec<(String, String)> = headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                value.to_str().unwrap_or_default().to_string(),
            )
        })
        .collect();
    let request_headers = Headers::new(header_pairs);

    let request_id = match request_headers.get(REQUEST_ID_HEADER) {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => {
            return error_response(&CoreError::not_acceptable(
                "X-Fns-Request-Id header is mandatory",
            ))
        }
    };

    let payload = match crate::envelope::decode_verified(&body, state.verifier.as_ref()) {
        Ok(payload) => payload,
        Err(err) => return error_response(&err),
    };
    let envelope: crate::envelope::RequestEnvelope = match serde_json::from_slice(payload) {
        Ok(envelope) => envelope,
        Err(err) => return error_response(&CoreError::from(err)),
    };

    let remote_ip = derive_remote_ip(&request_headers, "0.0.0.0:0");
    let fingerprint = crate::request::fingerprint(
        &service,
        &function,
        request_headers.get("authorization").unwrap_or_default(),
        &remote_ip,
        request_headers.get("user-agent").unwrap_or_default(),
        payload,
    );

    let tracer = SpanTracer::new("inbound");
    let locals = Arc::new(LocalsBag::from_remote(envelope.locals));
    let ctx = CallContext::new(
        Origin::Peer,
        request_id,
        remote_ip,
        request_headers,
        envelope.user,
        locals,
        tracer.clone(),
        None,
    );

    let state_for_call = state.clone();
    let service_name = service.clone();
    let function_name = function.clone();
    let argument = envelope.argument.clone();

    let handle_started = std::time::Instant::now();
    let outcome = state
        .single_flight
        .run(fingerprint, async move {
            let resolved = state_for_call.endpoints.get(&ctx, &service_name);
            let result = match resolved {
                Ok(resolved) => {
                    submit_resolved(
                        &state_for_call.pool,
                        ctx.clone(),
                        service_name.clone(),
                        function_name,
                        argument,
                        resolved,
                    )
                    .await
                }
                Err(err) => Err(err),
            };
            tracer.finish();
            outcome_from_result(result, &tracer)
        })
        .await;
    let handle_latency_ms = handle_started.elapsed().as_millis();

    build_response(outcome, handle_latency_ms)
}

fn outcome_from_result(
    result: Result<serde_json::Value, CoreError>,
    tracer: &SpanTracer,
) -> CallOutcome {
    let envelope = match result {
        Ok(data) => crate::envelope::ResponseEnvelope {
            span: Some(tracer.snapshot()),
            data,
        },
        Err(err) => {
            let body = serde_json::to_vec(&err).unwrap_or_default();
            return CallOutcome {
                status: err.category().http_status(),
                headers: vec![("content-type".into(), "application/json".into())],
                body,
            };
        }
    };
    CallOutcome {
        status: 200,
        headers: vec![("content-type".into(), "application/json".into())],
        body: serde_json::to_vec(&envelope).unwrap_or_default(),
    }
}

/// Builds the final axum `Response`, stamping `X-Fns-Handle-Latency` with
/// the server-measured handler duration regardless of success/failure.
fn build_response(outcome: CallOutcome, handle_latency_ms: u128) -> Response {
    let mut builder = axum::http::Response::builder()
        .status(outcome.status)
        .header("x-fns-handle-latency", handle_latency_ms.to_string());
    for (name, value) in &outcome.headers {
        builder = builder.header(name, value);
    }
    builder
        .body(axum::body::Body::from(outcome.body))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

fn error_response(err: &CoreError) -> Response {
    let body = serde_json::to_vec(err).unwrap_or_default();
    axum::http::Response::builder()
        .status(err.category().http_status())
        .header(axum::http::header::CONTENT_TYPE, "application/json")
        .body(axum::body::Body::from(body))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

/// Connects to the given socket address and serves `router` until shutdown
/// resolves. Exit sequence: close accept, then let callers drain
/// `AppState::in_flight` before tearing down the rest.
pub async fn serve(addr: SocketAddr, router: Router, shutdown: impl std::future::Future<Output = ()> + Send + 'static) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
}
