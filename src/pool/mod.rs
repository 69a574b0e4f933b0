//! # Dispatcher pool: a peak driven by a bounded set of cooperative tasks.
//!
//! [`Pool`] turns one peak into a call dispatcher. Producers anywhere in the
//! process put [`Call`] records on routes; on the pool's thread a scheduler
//! task hands the backlog to worker tasks, spawning new ones while under the
//! `workers` cap and resuming idle ones otherwise.
//!
//! ## Architecture
//! ```text
//! producer threads                 pool thread (LocalSet)
//!   Route::put(Call) ──► ring ──►   worker: get → run → yield per batch
//!        │                            │ empty: park on own Notify, mark stail
//!        └─ ready callback            ▼
//!           notify_one ─────────►   scheduler: resume idle / spawn new
//!                                     │ stail: park until the next wake
//!                                     ▼
//!                                   detach: cancel, join tasks, detach peak
//! ```
//!
//! ## Rules
//! - The pool lives on one cooperative thread; [`Pool::attach`] must run
//!   inside a `tokio::task::LocalSet` on a current-thread runtime.
//! - The ready callback is the only cross-thread path into the pool: it
//!   fires `Notify::notify_one` on the scheduler's wake handle.
//! - A panicking job is caught and logged; the worker survives.
//! - [`Pool::detach`] resolves once every task joined and every route to
//!   the peak is destroyed.

mod call;

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::rc::Rc;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::bus::{Bus, Peak, ReadyFn, Watcher};
use crate::config::PoolConfig;

pub use call::{call, call_async, Call, Job};

struct PoolShared {
    peak: RefCell<Option<Peak<Call>>>,
    /// Parked workers, each waiting on its own notify handle.
    idle: RefCell<VecDeque<Rc<Notify>>>,
    tasks: RefCell<Vec<JoinHandle<()>>>,
    /// Workers currently in flight.
    used: Cell<usize>,
    /// Set by a worker that found the peak empty; parks the scheduler.
    stail: Cell<bool>,
    /// Calls dispatched since the scheduler last woke.
    round: Cell<u32>,
    cfg: PoolConfig,
    cancel: CancellationToken,
    /// Cross-thread wake handle the ready callback fires.
    wake: Arc<Notify>,
}

/// Handle for one dispatcher pool.
///
/// Created by [`Pool::attach`]; torn down by [`Pool::detach`]. Dropping the
/// handle without detaching cancels the tasks but skips the orderly peak
/// detach.
pub struct Pool {
    shared: Rc<PoolShared>,
    sched: Option<JoinHandle<()>>,
}

impl Pool {
    /// Attaches a peak named `name` and starts the scheduler.
    ///
    /// Waits (cooperatively) while the name is taken. Must be called from
    /// within a `LocalSet` on a current-thread runtime.
    pub async fn attach(bus: &Bus<Call>, name: &str, cfg: PoolConfig) -> Pool {
        let cfg = PoolConfig {
            workers: cfg.workers.max(1),
            batch: cfg.batch.max(1),
        };
        let wake = Arc::new(Notify::new());
        let ready: ReadyFn = {
            let wake = Arc::clone(&wake);
            Arc::new(move || wake.notify_one())
        };
        let peak = attach_peak(bus, name, ready).await;
        let shared = Rc::new(PoolShared {
            peak: RefCell::new(Some(peak)),
            idle: RefCell::new(VecDeque::new()),
            tasks: RefCell::new(Vec::new()),
            used: Cell::new(0),
            stail: Cell::new(false),
            round: Cell::new(0),
            cfg,
            cancel: CancellationToken::new(),
            wake,
        });
        let sched = tokio::task::spawn_local(scheduler(Rc::clone(&shared)));
        debug!(
            peak = name,
            workers = cfg.workers,
            batch = cfg.batch,
            "pool attached"
        );
        Pool {
            shared,
            sched: Some(sched),
        }
    }

    /// Stops the pool and detaches its peak.
    ///
    /// Cancels the scheduler and workers, joins them, then waits until the
    /// last route to the peak is destroyed so the detach can commit.
    pub async fn detach(mut self) {
        self.shared.cancel.cancel();
        if let Some(sched) = self.sched.take() {
            let _ = sched.await;
        }
        let workers: Vec<JoinHandle<()>> = self.shared.tasks.borrow_mut().drain(..).collect();
        for handle in workers {
            let _ = handle.await;
        }
        let peak = self.shared.peak.borrow_mut().take();
        if let Some(peak) = peak {
            let name = peak.name().to_string();
            detach_peak(peak).await;
            debug!(peak = %name, "pool detached");
        }
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        if self.sched.is_some() {
            warn!("pool dropped without detach; cancelling tasks");
            self.shared.cancel.cancel();
        }
    }
}

/// Attach with an async rendezvous: park on a notify-backed watcher while
/// the name is contested.
async fn attach_peak(bus: &Bus<Call>, name: &str, ready: ReadyFn) -> Peak<Call> {
    loop {
        let gate = Arc::new(Notify::new());
        let watcher: Watcher = {
            let gate = Arc::clone(&gate);
            Box::new(move || gate.notify_one())
        };
        match bus.try_attach(name, Arc::clone(&ready), Some(watcher)) {
            Ok(peak) => return peak,
            Err(_) => gate.notified().await,
        }
    }
}

/// Detach with the same async rendezvous, waiting out remaining routes.
async fn detach_peak(peak: Peak<Call>) {
    let mut peak = peak;
    loop {
        let gate = Arc::new(Notify::new());
        let watcher: Watcher = {
            let gate = Arc::clone(&gate);
            Box::new(move || gate.notify_one())
        };
        match peak.try_detach(Some(watcher)) {
            Ok(()) => return,
            Err(handle) => {
                peak = handle;
                gate.notified().await;
            }
        }
    }
}

/// Scheduler task: on each wake, resume idle workers or spawn new ones
/// until the peak runs dry or every worker is busy.
async fn scheduler(pool: Rc<PoolShared>) {
    loop {
        tokio::select! {
            _ = pool.cancel.cancelled() => break,
            _ = pool.wake.notified() => {}
        }
        pool.stail.set(false);
        pool.round.set(0);
        while !pool.stail.get() && !pool.cancel.is_cancelled() {
            let idle = pool.idle.borrow_mut().pop_front();
            if let Some(worker_wake) = idle {
                worker_wake.notify_one();
            } else if pool.used.get() < pool.cfg.workers {
                pool.used.set(pool.used.get() + 1);
                let handle = tokio::task::spawn_local(worker(Rc::clone(&pool)));
                pool.tasks.borrow_mut().push(handle);
            } else {
                // Every worker is in flight; they drain without help.
                break;
            }
            tokio::task::yield_now().await;
        }
    }
}

/// Worker task: pull calls, run them, yield every `batch`, park when the
/// peak runs dry.
async fn worker(pool: Rc<PoolShared>) {
    let wake = Rc::new(Notify::new());
    loop {
        if pool.cancel.is_cancelled() {
            break;
        }
        let mut dry = false;
        loop {
            let job = pool.peak.borrow_mut().as_mut().and_then(|p| p.get());
            let Some(job) = job else {
                dry = true;
                break;
            };
            if AssertUnwindSafe(job.run()).catch_unwind().await.is_err() {
                warn!("pool job panicked; worker continues");
            }
            let round = pool.round.get().wrapping_add(1);
            pool.round.set(round);
            if round % pool.cfg.batch == 0 {
                break;
            }
        }
        if dry {
            pool.stail.set(true);
            pool.idle.borrow_mut().push_back(Rc::clone(&wake));
            tokio::select! {
                _ = pool.cancel.cancelled() => break,
                _ = wake.notified() => {}
            }
        } else {
            tokio::task::yield_now().await;
        }
    }
    pool.used.set(pool.used.get() - 1);
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    use tokio::task::LocalSet;

    use super::*;

    fn counted(hits: &Arc<AtomicUsize>) -> Call {
        let hits = Arc::clone(hits);
        call(move || {
            hits.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[tokio::test]
    async fn dispatches_queued_calls() {
        let local = LocalSet::new();
        local
            .run_until(async {
                let bus: Bus<Call> = Bus::new();
                let pool = Pool::attach(&bus, "exec", PoolConfig::default()).await;
                let mut route = bus.try_route("exec", 1, None).unwrap();

                let hits = Arc::new(AtomicUsize::new(0));
                for _ in 0..100 {
                    route.put(counted(&hits)).unwrap();
                }
                while hits.load(Ordering::SeqCst) < 100 {
                    tokio::task::yield_now().await;
                }

                route.try_destroy(None).unwrap();
                pool.detach().await;
                assert!(bus.peaks().is_empty());
            })
            .await;
    }

    #[tokio::test]
    async fn respects_the_worker_cap() {
        let local = LocalSet::new();
        local
            .run_until(async {
                let bus: Bus<Call> = Bus::new();
                let cfg = PoolConfig {
                    workers: 2,
                    batch: 1,
                };
                let pool = Pool::attach(&bus, "exec", cfg).await;
                let mut route = bus.try_route("exec", 1, None).unwrap();

                let live = Arc::new(AtomicUsize::new(0));
                let peak_live = Arc::new(AtomicUsize::new(0));
                let done = Arc::new(AtomicUsize::new(0));
                for _ in 0..20 {
                    let live = Arc::clone(&live);
                    let peak_live = Arc::clone(&peak_live);
                    let done = Arc::clone(&done);
                    route
                        .put(call_async(move || async move {
                            let now = live.fetch_add(1, Ordering::SeqCst) + 1;
                            peak_live.fetch_max(now, Ordering::SeqCst);
                            tokio::task::yield_now().await;
                            live.fetch_sub(1, Ordering::SeqCst);
                            done.fetch_add(1, Ordering::SeqCst);
                        }))
                        .unwrap();
                }
                while done.load(Ordering::SeqCst) < 20 {
                    tokio::task::yield_now().await;
                }
                assert!(peak_live.load(Ordering::SeqCst) <= 2);

                route.try_destroy(None).unwrap();
                pool.detach().await;
            })
            .await;
    }

    #[tokio::test]
    async fn survives_a_panicking_job() {
        let local = LocalSet::new();
        local
            .run_until(async {
                let bus: Bus<Call> = Bus::new();
                let pool = Pool::attach(&bus, "exec", PoolConfig::default()).await;
                let mut route = bus.try_route("exec", 1, None).unwrap();

                let hits = Arc::new(AtomicUsize::new(0));
                route.put(call(|| panic!("bad job"))).unwrap();
                route.put(counted(&hits)).unwrap();
                while hits.load(Ordering::SeqCst) < 1 {
                    tokio::task::yield_now().await;
                }

                route.try_destroy(None).unwrap();
                pool.detach().await;
            })
            .await;
    }

    #[tokio::test]
    async fn wakes_from_a_foreign_thread() {
        let local = LocalSet::new();
        local
            .run_until(async {
                let bus: Bus<Call> = Bus::new();
                let pool = Pool::attach(&bus, "exec", PoolConfig::default()).await;

                let hits = Arc::new(AtomicUsize::new(0));
                let producer = {
                    let bus = bus.clone();
                    let hits = Arc::clone(&hits);
                    thread::spawn(move || {
                        let mut route = bus.route_blocking("exec", 1);
                        for _ in 0..50 {
                            let hits = Arc::clone(&hits);
                            route
                                .put(call(move || {
                                    hits.fetch_add(1, Ordering::SeqCst);
                                }))
                                .unwrap();
                        }
                        route.destroy_blocking();
                    })
                };

                while hits.load(Ordering::SeqCst) < 50 {
                    tokio::task::yield_now().await;
                }
                producer.join().unwrap();
                pool.detach().await;
            })
            .await;
    }

    #[tokio::test]
    async fn detach_waits_for_routes() {
        let local = LocalSet::new();
        local
            .run_until(async {
                let bus: Bus<Call> = Bus::new();
                let pool = Pool::attach(&bus, "exec", PoolConfig::default()).await;
                let mut route = bus.try_route("exec", 1, None).unwrap();

                let hits = Arc::new(AtomicUsize::new(0));
                route.put(counted(&hits)).unwrap();
                while hits.load(Ordering::SeqCst) < 1 {
                    tokio::task::yield_now().await;
                }

                let detach = tokio::task::spawn_local(pool.detach());
                tokio::task::yield_now().await;
                // The route is still attached, so the detach parks.
                assert!(!detach.is_finished());

                route.try_destroy(None).unwrap();
                detach.await.unwrap();
                assert!(bus.peaks().is_empty());
                assert_eq!(hits.load(Ordering::SeqCst), 1);
            })
            .await;
    }
}
