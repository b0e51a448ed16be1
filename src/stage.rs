//! Async stage: moves the synchronous chain onto the priority pool.
//!
//! `poll` is the non-blocking contract the whole pipeline hangs off: it
//! returns whatever has already finished, drops parked outcomes nobody wants
//! anymore, and schedules one unit for every wanted item with neither a
//! finished outcome nor in-flight work. Items still cooking are simply absent
//! from the result; failures park as `Err` outcomes and never cross this
//! boundary as panics or propagated errors.
//!
//! There is no preemptive cancellation: a unit for an evicted item runs to
//! completion, parks its outcome, and the next poll that does not want it
//! drops it. Eviction-based teardown keeps every worker-side path lock-light.

use crate::alloc::PixelBuf;
use crate::error::Result;
use crate::item::ItemId;
use crate::pool::{Priority, PriorityPool};
use crate::source::TileSource;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct StageShared {
    /// Finished outcomes waiting to be claimed by a poll.
    finished: HashMap<ItemId, Result<Arc<PixelBuf>>>,
    /// Items with a scheduled or running unit.
    inflight: HashSet<ItemId>,
}

/// Pool-backed async front for one tier's tile source.
pub struct AsyncStage {
    source: Arc<dyn TileSource>,
    pool: Arc<PriorityPool>,
    priority: Priority,
    shared: Arc<Mutex<StageShared>>,
}

impl AsyncStage {
    pub fn new(source: Arc<dyn TileSource>, pool: Arc<PriorityPool>, priority: Priority) -> Self {
        Self {
            source,
            pool,
            priority,
            shared: Arc::new(Mutex::new(StageShared::default())),
        }
    }

    /// Claim finished outcomes for wanted items and schedule the rest.
    ///
    /// Outcomes are consumed: each finished item is returned exactly once and
    /// the caller owns what happens to it. Finished outcomes for items not in
    /// `wanted` are dropped here, which releases their buffers.
    pub fn poll(&self, wanted: &HashSet<ItemId>) -> HashMap<ItemId, Result<Arc<PixelBuf>>> {
        let mut shared = self.shared.lock().unwrap();

        let mut ready = HashMap::new();
        let parked: Vec<ItemId> = shared.finished.keys().cloned().collect();
        for id in parked {
            if wanted.contains(&id) {
                if let Some(outcome) = shared.finished.remove(&id) {
                    ready.insert(id, outcome);
                }
            } else {
                shared.finished.remove(&id);
                log::debug!("dropped finished result for evicted item {id}");
            }
        }

        for id in wanted {
            if ready.contains_key(id) || shared.inflight.contains(id) {
                continue;
            }
            shared.inflight.insert(id.clone());
            let source = Arc::clone(&self.source);
            let shared = Arc::clone(&self.shared);
            let id = id.clone();
            self.pool.submit(self.priority, move || {
                let outcome = source.produce(&id);
                let mut shared = shared.lock().unwrap();
                shared.inflight.remove(&id);
                shared.finished.insert(id, outcome);
            });
        }

        ready
    }
}
