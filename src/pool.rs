//! Priority thread pool for background decode/fetch/resample work.
//!
//! A bounded worker pool that executes submitted units in priority order, not
//! submission order: focus work beats visible-list work beats fallback-tier
//! work, with FIFO order inside one priority level. Pending units can also be
//! "stolen" - popped and run on a caller thread - which the allocator wrapper
//! uses to break memory-starvation deadlocks. Idle workers time out after a
//! quiet period so OS threads are released once the browser closes.

use crate::config::PoolConfig;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// Priority levels, lowest first. Higher values run first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    /// Minimum-resolution fallback tier (runs when nothing else is pending).
    Fallback = 0,
    /// Regular visible-list tier.
    Visible = 1,
    /// Focused/detail view.
    Focus = 2,
}

/// One schedulable unit of background work.
///
/// Ordered by priority first, then by submission sequence so equal-priority
/// units run FIFO (`BinaryHeap` is a max-heap, hence the reversed sequence
/// comparison).
pub struct Unit {
    priority: Priority,
    seq: u64,
    job: Box<dyn FnOnce() + Send>,
}

impl Unit {
    #[inline]
    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// Execute the unit on the calling thread.
    pub fn run(self) {
        (self.job)();
    }
}

impl PartialEq for Unit {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for Unit {}

impl PartialOrd for Unit {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Unit {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct PoolInner {
    queue: Mutex<BinaryHeap<Unit>>,
    ticket_tx: Sender<()>,
    ticket_rx: Receiver<()>,
    max_workers: usize,
    idle_timeout: Duration,
    /// Workers currently alive (running or waiting).
    live: AtomicUsize,
    /// Workers currently parked in `recv_timeout`.
    idle: AtomicUsize,
    seq: AtomicU64,
    shutdown: AtomicBool,
}

/// Bounded worker pool executing prioritized units of work.
///
/// Workers are spawned lazily up to the configured cap when work arrives and
/// no idle worker exists; they exit after `idle_timeout` without work.
pub struct PriorityPool {
    inner: Arc<PoolInner>,
}

impl PriorityPool {
    pub fn new(config: &PoolConfig) -> Self {
        let (ticket_tx, ticket_rx) = crossbeam_channel::unbounded();
        Self {
            inner: Arc::new(PoolInner {
                queue: Mutex::new(BinaryHeap::new()),
                ticket_tx,
                ticket_rx,
                max_workers: config.worker_count(),
                idle_timeout: config.idle_timeout,
                live: AtomicUsize::new(0),
                idle: AtomicUsize::new(0),
                seq: AtomicU64::new(0),
                shutdown: AtomicBool::new(false),
            }),
        }
    }

    /// Submit a unit of work at the given priority.
    pub fn submit<F>(&self, priority: Priority, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let inner = &self.inner;
        let unit = Unit {
            priority,
            seq: inner.seq.fetch_add(1, AtomicOrdering::SeqCst),
            job: Box::new(job),
        };

        // The spawn decision shares the queue lock with worker exit
        // decisions: a timing-out worker either sees this unit in its final
        // queue check, or has already left the live count and a replacement
        // is spawned here. Otherwise a unit pushed just as the last worker
        // dies would sit in the queue with nobody to run it.
        let spawn_id = {
            let mut queue = inner.queue.lock().unwrap();
            queue.push(unit);
            let live = inner.live.load(AtomicOrdering::SeqCst);
            if inner.idle.load(AtomicOrdering::SeqCst) == 0 && live < inner.max_workers {
                inner.live.fetch_add(1, AtomicOrdering::SeqCst);
                Some(live)
            } else {
                None
            }
        };
        let _ = inner.ticket_tx.send(());
        if let Some(id) = spawn_id {
            spawn_worker(Arc::clone(inner), id);
        }
    }

    /// Pop the highest-priority pending unit without executing it.
    ///
    /// Used by the work-stealing allocator wrapper to make progress on a
    /// caller thread while the pool itself may be blocked on memory.
    pub fn steal(&self) -> Option<Unit> {
        self.inner.queue.lock().unwrap().pop()
    }

    /// Number of units waiting to run.
    pub fn pending(&self) -> usize {
        self.inner.queue.lock().unwrap().len()
    }

    /// Number of worker threads currently alive.
    pub fn live_workers(&self) -> usize {
        self.inner.live.load(AtomicOrdering::SeqCst)
    }
}

impl Drop for PriorityPool {
    fn drop(&mut self) {
        self.inner.shutdown.store(true, AtomicOrdering::SeqCst);
        // Wake every parked worker so it observes the flag.
        for _ in 0..self.inner.live.load(AtomicOrdering::SeqCst) {
            let _ = self.inner.ticket_tx.send(());
        }
    }
}

fn spawn_worker(inner: Arc<PoolInner>, id: usize) {
    let result = thread::Builder::new()
        .name(format!("filmstrip-worker-{id}"))
        .spawn({
            let inner = Arc::clone(&inner);
            move || worker_loop(inner)
        });
    if let Err(e) = result {
        // The submitter already counted this worker; give the slot back.
        inner.live.fetch_sub(1, AtomicOrdering::SeqCst);
        log::warn!("failed to spawn pool worker: {e}");
    }
}

fn worker_loop(inner: Arc<PoolInner>) {
    // Keeps the live count accurate even if a unit panics.
    struct LiveGuard {
        inner: Arc<PoolInner>,
        armed: bool,
    }
    impl Drop for LiveGuard {
        fn drop(&mut self) {
            if self.armed {
                self.inner.live.fetch_sub(1, AtomicOrdering::SeqCst);
            }
        }
    }
    let mut guard = LiveGuard {
        inner: Arc::clone(&inner),
        armed: true,
    };

    loop {
        if inner.shutdown.load(AtomicOrdering::SeqCst) {
            return;
        }
        let unit = inner.queue.lock().unwrap().pop();
        if let Some(unit) = unit {
            unit.run();
            continue;
        }

        inner.idle.fetch_add(1, AtomicOrdering::SeqCst);
        let ticket = inner.ticket_rx.recv_timeout(inner.idle_timeout);
        inner.idle.fetch_sub(1, AtomicOrdering::SeqCst);
        match ticket {
            Ok(()) => continue,
            // Quiet period elapsed (or the pool is gone). The exit happens
            // under the queue lock: either this final check sees a unit a
            // racing submit just pushed, or the submit sees the decremented
            // live count and spawns a replacement.
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                let queue = inner.queue.lock().unwrap();
                if !queue.is_empty() {
                    drop(queue);
                    continue;
                }
                inner.live.fetch_sub(1, AtomicOrdering::SeqCst);
                guard.armed = false;
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn pool_with(workers: usize, idle: Duration) -> PriorityPool {
        PriorityPool::new(&PoolConfig {
            workers,
            idle_timeout: idle,
        })
    }

    #[test]
    fn test_runs_submitted_work() {
        let pool = pool_with(2, Duration::from_secs(5));
        let (tx, rx) = crossbeam_channel::bounded(1);
        pool.submit(Priority::Visible, move || {
            tx.send(42).unwrap();
        });
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), 42);
    }

    #[test]
    fn test_priority_order_beats_submission_order() {
        let pool = pool_with(1, Duration::from_secs(5));
        let (gate_tx, gate_rx) = crossbeam_channel::bounded::<()>(1);
        let order = Arc::new(Mutex::new(Vec::new()));

        // Occupy the single worker so the next units queue up.
        pool.submit(Priority::Focus, move || {
            gate_rx.recv().unwrap();
        });
        // Give the worker time to pick up the gate unit.
        std::thread::sleep(Duration::from_millis(50));

        for (priority, tag) in [
            (Priority::Fallback, "fallback"),
            (Priority::Visible, "visible"),
            (Priority::Focus, "focus"),
        ] {
            let order = Arc::clone(&order);
            pool.submit(priority, move || {
                order.lock().unwrap().push(tag);
            });
        }

        gate_tx.send(()).unwrap();
        for _ in 0..100 {
            if order.lock().unwrap().len() == 3 {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(*order.lock().unwrap(), ["focus", "visible", "fallback"]);
    }

    #[test]
    fn test_fifo_within_priority() {
        let pool = pool_with(1, Duration::from_secs(5));
        let (gate_tx, gate_rx) = crossbeam_channel::bounded::<()>(1);
        let order = Arc::new(Mutex::new(Vec::new()));

        pool.submit(Priority::Focus, move || {
            gate_rx.recv().unwrap();
        });
        std::thread::sleep(Duration::from_millis(50));

        for tag in ["first", "second", "third"] {
            let order = Arc::clone(&order);
            pool.submit(Priority::Visible, move || {
                order.lock().unwrap().push(tag);
            });
        }

        gate_tx.send(()).unwrap();
        for _ in 0..100 {
            if order.lock().unwrap().len() == 3 {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(*order.lock().unwrap(), ["first", "second", "third"]);
    }

    #[test]
    fn test_steal_pops_highest_priority() {
        let pool = pool_with(1, Duration::from_secs(5));
        let (gate_tx, gate_rx) = crossbeam_channel::bounded::<()>(1);
        pool.submit(Priority::Focus, move || {
            gate_rx.recv().unwrap();
        });
        std::thread::sleep(Duration::from_millis(50));

        pool.submit(Priority::Fallback, || {});
        pool.submit(Priority::Visible, || {});

        let stolen = pool.steal().unwrap();
        assert_eq!(stolen.priority(), Priority::Visible);
        assert_eq!(pool.pending(), 1);
        stolen.run();
        gate_tx.send(()).unwrap();
    }

    #[test]
    fn test_submit_racing_an_idle_timeout_never_strands_work() {
        // A very short idle timeout with submits jittered around the
        // timeout boundary: every unit must still run, even when it lands
        // exactly as the pool's only worker is deciding to exit.
        let pool = pool_with(1, Duration::from_micros(200));
        for i in 0..3000u64 {
            std::thread::sleep(Duration::from_micros(i % 400));
            let (tx, rx) = crossbeam_channel::bounded(1);
            pool.submit(Priority::Visible, move || {
                let _ = tx.send(());
            });
            if rx.recv_timeout(Duration::from_millis(500)).is_err() {
                panic!(
                    "unit stranded: pending={}, live_workers={}",
                    pool.pending(),
                    pool.live_workers()
                );
            }
        }
    }

    #[test]
    fn test_idle_workers_time_out() {
        let pool = pool_with(2, Duration::from_millis(50));
        let (tx, rx) = crossbeam_channel::bounded(1);
        pool.submit(Priority::Visible, move || {
            tx.send(()).unwrap();
        });
        rx.recv_timeout(Duration::from_secs(2)).unwrap();

        for _ in 0..100 {
            if pool.live_workers() == 0 {
                return;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        panic!("idle worker never timed out");
    }
}
