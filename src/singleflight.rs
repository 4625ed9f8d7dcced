//! Single-flight de-duplication of identical concurrent calls.
//!
//! A process-wide `fingerprint -> in-flight call` table, `dashmap`-backed
//! like the other concurrent maps in the cluster module. The first caller
//! for a given fingerprint actually runs the work; any caller arriving
//! while it is in flight waits and receives a clone of the same result.

use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::broadcast;

/// The shape carried through single-flight: an HTTP-ish outcome that can be
/// cloned to every waiter.
#[derive(Debug, Clone)]
pub struct CallOutcome {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

enum Slot {
    /// A call with this fingerprint is running; late arrivals subscribe.
    InFlight(broadcast::Sender<CallOutcome>),
}

/// De-duplicates concurrent calls sharing the same fingerprint.
#[derive(Default)]
pub struct SingleFlight {
    inflight: DashMap<u64, Slot>,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `work` for `key`, unless a call for the same `key` is already
    /// in flight, in which case this call waits for it and returns a clone
    /// of its outcome. `work` is only ever invoked by the call that wins
    /// the race to insert the slot.
    pub async fn run<F>(self: &Arc<Self>, key: u64, work: F) -> CallOutcome
    where
        F: Future<Output = CallOutcome>,
    {
        let mut receiver = None;
        {
            let entry = self.inflight.entry(key);
            match entry {
                dashmap::mapref::entry::Entry::Occupied(occupied) => {
                    let Slot::InFlight(sender) = occupied.get();
                    receiver = Some(sender.subscribe());
                }
                dashmap::mapref::entry::Entry::Vacant(vacant) => {
                    let (sender, _) = broadcast::channel(1);
                    vacant.insert(Slot::InFlight(sender));
                }
            }
        }

        if let Some(mut receiver) = receiver {
            return match receiver.recv().await {
                Ok(outcome) => outcome,
                Err(_) => CallOutcome {
                    status: 500,
                    headers: vec![],
                    body: b"single-flight leader dropped without a result".to_vec(),
                },
            };
        }

        let outcome = work.await;
        if let Some((_, Slot::InFlight(sender))) = self.inflight.remove(&key) {
            let _ = sender.send(outcome.clone());
        }
        outcome
    }

    pub fn inflight_count(&self) -> usize {
        self.inflight.len()
    }
}
