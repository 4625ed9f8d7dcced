//! Bounded worker pool with tagged-variant dispatch and idle-eviction.

use crate::context::CallContext;
use crate::endpoints::{LocalHandler, RemoteEndpoint, Resolved};
use crate::error::CoreError;
use crate::registration::Registration;
use crate::spantree::SpanGuard;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, warn, Instrument};

/// How long an idle worker waits for its next item before exiting.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

type ResultSender = oneshot::Sender<Result<serde_json::Value, CoreError>>;

/// Tagged-variant dispatch local handler invocation, a single
/// already-bound remote registration (an `exact` call), or a ring the
/// worker must iterate itself to fail over across peers.
pub enum WorkItem {
    Local {
        ctx: CallContext,
        service: String,
        function: String,
        argument: serde_json::Value,
        handler: Arc<dyn LocalHandler>,
        result: ResultSender,
    },
    Remote {
        ctx: CallContext,
        function: String,
        argument: serde_json::Value,
        registration: Arc<Registration>,
        result: ResultSender,
    },
    RemotePool {
        ctx: CallContext,
        function: String,
        argument: serde_json::Value,
        remote: RemoteEndpoint,
        result: ResultSender,
    },
}

/// A bounded worker pool. Submission never blocks: a full queue fails
/// immediately with `false`.
pub struct WorkerPool {
    capacity: usize,
    idle_timeout: Duration,
    sender: mpsc::Sender<WorkItem>,
    receiver: Arc<Mutex<mpsc::Receiver<WorkItem>>>,
    active_workers: Arc<AtomicUsize>,
}

impl WorkerPool {
    pub fn new(capacity: usize) -> Self {
        Self::with_idle_timeout(capacity, DEFAULT_IDLE_TIMEOUT)
    }

    pub fn with_idle_timeout(capacity: usize, idle_timeout: Duration) -> Self {
        let (sender, receiver) = mpsc::channel(capacity);
        Self {
            capacity,
            idle_timeout,
            sender,
            receiver: Arc::new(Mutex::new(receiver)),
            active_workers: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Enqueues `item`, spawning a worker if the pool is below capacity and
    /// currently has none running. Returns `false` if the queue is full
    ///.
    pub fn submit(&self, item: WorkItem) -> bool {
        match self.sender.try_send(item) {
            Ok(()) => {
                self.maybe_spawn_worker();
                true
            }
            Err(_) => false,
        }
    }

    fn maybe_spawn_worker(&self) {
        loop {
            let current = self.active_workers.load(Ordering::SeqCst);
            if current >= self.capacity {
                return;
            }
            if self
                .active_workers
                .compare_exchange(current, current + 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                break;
            }
        }
        let receiver = self.receiver.clone();
        let active_workers = self.active_workers.clone();
        let idle_timeout = self.idle_timeout;
        tokio::spawn(async move {
            loop {
                let item = {
                    let mut rx = receiver.lock().await;
                    tokio::select! {
                        item = rx.recv() => item,
                        _ = tokio::time::sleep(idle_timeout) => None,
                    }
                };
                match item {
                    Some(item) => run_item(item).await,
                    None => {
                        debug!("worker pool evicting idle worker");
                        break;
                    }
                }
            }
            active_workers.fetch_sub(1, Ordering::SeqCst);
        });
    }

    pub fn active_workers(&self) -> usize {
        self.active_workers.load(Ordering::SeqCst)
    }
}

async fn run_item(item: WorkItem) {
    match item {
        WorkItem::Local {
            ctx,
            service,
            function,
            argument,
            handler,
            result,
        } => {
            let span = tracing::info_span!(
                "local_dispatch",
                service = %service,
                function = %function,
                registration = "local",
            );
            let guard = SpanGuard::start(format!("{service}.{function}"));
            let tracer = ctx.tracer.clone();
            let child = ctx.child();
            let outcome = handler
                .call(child, &function, argument)
                .instrument(span)
                .await;
            tracer.append_child(guard.finish(Vec::new()));
            let _ = result.send(outcome);
        }
        WorkItem::Remote {
            ctx,
            function,
            argument,
            registration,
            result,
        } => {
            let timeout = ctx.remaining().unwrap_or(Duration::from_secs(30));
            let outcome = registration
                .request(
                    ctx.headers.as_pairs(),
                    timeout,
                    &function,
                    ctx.user.clone(),
                    ctx.locals.scan(),
                    argument,
                    &ctx.tracer,
                )
                .await;
            let _ = result.send(outcome);
        }
        WorkItem::RemotePool {
            ctx,
            function,
            argument,
            remote,
            result,
        } => {
            let outcome = run_remote_pool(&ctx, &function, argument, &remote).await;
            let _ = result.send(outcome);
        }
    }
}

/// Loops the ring on 503/non-503 outcomes a 503 evicts the
/// registration and tries the next one; any other outcome stops the loop.
async fn run_remote_pool(
    ctx: &CallContext,
    function: &str,
    argument: serde_json::Value,
    remote: &RemoteEndpoint,
) -> Result<serde_json::Value, CoreError> {
    if remote.is_exact() {
        let registration = remote
            .exact()
            .ok_or_else(|| CoreError::not_found("exact registration is no longer available"))?;
        return dispatch_one(ctx, function, argument, &registration).await;
    }

    loop {
        let Some(registration) = remote.next() else {
            return Err(CoreError::not_found(format!(
                "no available registration for {function}"
            )));
        };
        match dispatch_one(ctx, function, argument.clone(), &registration).await {
            Err(err) if err.category() == crate::error::ErrorCategory::Unavailable => {
                // `dispatch_one` already bumped the strike counter. Only
                // evict the registration from the ring once hysteresis actually
                // crosses the threshold — a lone 503 just moves on to the
                // next peer.
                if registration.strikes() > crate::registration::UNAVAILABLE_STRIKE_THRESHOLD {
                    warn!(node_id = %registration.id, strikes = registration.strikes(), "unavailability threshold crossed, evicting");
                    remote.evict(&registration.id);
                }
                continue;
            }
            other => return other,
        }
    }
}

async fn dispatch_one(
    ctx: &CallContext,
    function: &str,
    argument: serde_json::Value,
    registration: &Registration,
) -> Result<serde_json::Value, CoreError> {
    let timeout = ctx.remaining().unwrap_or(Duration::from_secs(30));
    registration
        .request(
            ctx.headers.as_pairs(),
            timeout,
            function,
            ctx.user.clone(),
            ctx.locals.scan(),
            argument,
            &ctx.tracer,
        )
        .await
}

/// Convenience for callers driving `Endpoints::get`/`get_exact` straight
/// into the pool, returning a future that resolves once the worker
/// finishes (or immediately with a `Warning` if the pool is saturated).
pub async fn submit_resolved(
    pool: &WorkerPool,
    ctx: CallContext,
    service: String,
    function: String,
    argument: serde_json::Value,
    resolved: Resolved,
) -> Result<serde_json::Value, CoreError> {
    let (tx, rx) = oneshot::channel();
    let accepted = match resolved {
        Resolved::Local(handler) => pool.submit(WorkItem::Local {
            ctx,
            service,
            function,
            argument,
            handler,
            result: tx,
        }),
        Resolved::Remote(remote) => pool.submit(WorkItem::RemotePool {
            ctx,
            function,
            argument,
            remote,
            result: tx,
        }),
    };
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
    use async_trait::async_trait;

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

    fn ctx() -> CallContext {
        CallContext::new(
            Origin::Public,
            "req-1",
            "10.0.0.1",
            Default::default(),
            serde_json::json!({}),
            Arc::new(LocalsBag::default()),
            SpanTracer::new("root"),
            None,
        )
    }

    #[tokio::test]
    async fn local_item_runs_and_returns_result() {
        let pool = WorkerPool::new(4);
        let result = submit_resolved(
            &pool,
            ctx(),
            "echo".into(),
            "do".into(),
            serde_json::json!("payload"),
            Resolved::Local(Arc::new(Echo)),
        )
        .await
        .unwrap();
        assert_eq!(result, serde_json::json!("payload"));
    }

    #[tokio::test]
    async fn local_dispatch_appends_a_span_for_the_handler_call() {
        let pool = WorkerPool::new(4);
        let tracer = SpanTracer::new("root");
        let call_ctx = CallContext::new(
            Origin::Public,
            "req-1",
            "10.0.0.1",
            Default::default(),
            serde_json::json!({}),
            Arc::new(LocalsBag::default()),
            tracer.clone(),
            None,
        );
        let _ = submit_resolved(
            &pool,
            call_ctx,
            "echo".into(),
            "do".into(),
            serde_json::json!("payload"),
            Resolved::Local(Arc::new(Echo)),
        )
        .await
        .unwrap();
        let snapshot = tracer.snapshot();
        assert_eq!(snapshot.children.len(), 1);
        assert_eq!(snapshot.children[0].name, "echo.do");
    }

    #[tokio::test]
    async fn full_queue_is_reported_as_warning() {
        let pool = WorkerPool::with_idle_timeout(1, Duration::from_secs(60));
        // Occupy the single queue slot directly so the next submit overflows.
        let (tx, _rx) = oneshot::channel();
        assert!(pool.submit(WorkItem::Local {
            ctx: ctx(),
            service: "echo".into(),
            function: "slow".into(),
            argument: serde_json::json!(1),
            handler: Arc::new(SlowEcho),
            result: tx,
        }));
        let (tx2, _rx2) = oneshot::channel();
        let overflowed = pool.submit(WorkItem::Local {
            ctx: ctx(),
            service: "echo".into(),
            function: "slow".into(),
            argument: serde_json::json!(2),
            handler: Arc::new(SlowEcho),
            result: tx2,
        });
        assert!(!overflowed);
    }

    struct SlowEcho;

    #[async_trait]
    impl LocalHandler for SlowEcho {
        async fn call(
            &self,
            _ctx: CallContext,
            _function: &str,
            argument: serde_json::Value,
        ) -> Result<serde_json::Value, CoreError> {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(argument)
        }
    }

    #[tokio::test]
    async fn idle_worker_is_evicted_after_timeout() {
        let pool = WorkerPool::with_idle_timeout(2, Duration::from_millis(20));
        let _ = submit_resolved(
            &pool,
            ctx(),
            "echo".into(),
            "do".into(),
            serde_json::json!(1),
            Resolved::Local(Arc::new(Echo)),
        )
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(pool.active_workers(), 0);
    }
}
