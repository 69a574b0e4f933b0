//! # Bus registry: named peaks plus the parked watcher queue.
//!
//! One mutex serializes every topology mutation (attach, detach, route,
//! destroy, close) for its whole duration. Watchers parked by operations
//! that could not complete are drained FIFO when any mutation commits: the
//! queue is snapshotted under the mutex and invoked after it is released,
//! so watcher callbacks never run under the bus lock and watchers parked
//! during a drain wait for the next mutation.

use std::collections::VecDeque;
use std::mem;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::debug;

use crate::error::NotReady;
use crate::ring::Ring;

use super::peak::{Peak, PeakCore};
use super::route::{Route, RouteCore};
use super::{ReadyFn, Watcher};

/// Poison-tolerant mutex lock; the bus holds no invariants a panicking
/// holder could break mid-update that a later caller cannot observe safely.
pub(super) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(super) fn read<T>(rw: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    rw.read().unwrap_or_else(PoisonError::into_inner)
}

pub(super) fn write<T>(rw: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    rw.write().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) struct BusInner<T> {
    pub(super) peaks: Vec<Arc<PeakCore<T>>>,
    pub(super) watchers: VecDeque<Watcher>,
}

/// Shared state behind every [`Bus`] handle.
pub(crate) struct BusCore<T> {
    pub(super) inner: Mutex<BusInner<T>>,
}

/// In-process message bus: a registry of named peaks.
///
/// `Bus` is a cheap cloneable handle; producers, consumers and topology
/// callers each keep their own clone. Messages are any `T: Send`,
/// transferred by ownership.
pub struct Bus<T> {
    core: Arc<BusCore<T>>,
}

impl<T> Clone for Bus<T> {
    fn clone(&self) -> Self {
        Bus {
            core: Arc::clone(&self.core),
        }
    }
}

impl<T: Send + 'static> Default for Bus<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + 'static> Bus<T> {
    /// Creates an empty bus: no peaks, no parked watchers.
    pub fn new() -> Self {
        Bus {
            core: Arc::new(BusCore {
                inner: Mutex::new(BusInner {
                    peaks: Vec::new(),
                    watchers: VecDeque::new(),
                }),
            }),
        }
    }

    /// Attaches a named peak and returns its consumer handle.
    ///
    /// `ready` is invoked (from an arbitrary thread) whenever the peak
    /// transitions from empty to non-empty while its consumer is parked.
    ///
    /// When the name is taken the watcher is parked instead and
    /// [`NotReady::NameTaken`] is returned; retry after it fires, or use
    /// [`Bus::attach_blocking`] for the rendezvous variant.
    pub fn try_attach(
        &self,
        name: &str,
        ready: ReadyFn,
        notify: Option<Watcher>,
    ) -> Result<Peak<T>, NotReady> {
        let mut inner = lock(&self.core.inner);
        if inner.peaks.iter().any(|p| p.name == name) {
            if let Some(watcher) = notify {
                inner.watchers.push_back(watcher);
            }
            return Err(NotReady::NameTaken { name: name.into() });
        }
        let peak = Arc::new(PeakCore {
            name: name.to_string(),
            ready,
            parked: AtomicBool::new(true),
            routes: RwLock::new(Vec::new()),
            cursor: AtomicUsize::new(0),
        });
        inner.peaks.push(Arc::clone(&peak));
        let fired = mem::take(&mut inner.watchers);
        drop(inner);
        debug!(peak = name, "peak attached");
        for watcher in fired {
            watcher();
        }
        Ok(Peak::from_parts(peak, Arc::clone(&self.core)))
    }

    /// Creates a route targeting the peak named `name` and returns its
    /// producer handle.
    ///
    /// The new route starts with one chunk and is spliced into the peak's
    /// table next to the round-robin cursor. `priority` is the number of
    /// consecutive pulls the consumer grants this route before rotating;
    /// values below 1 are clamped to 1.
    ///
    /// When no such peak exists the watcher is parked and
    /// [`NotReady::NoSuchPeak`] is returned.
    pub fn try_route(
        &self,
        name: &str,
        priority: u32,
        notify: Option<Watcher>,
    ) -> Result<Route<T>, NotReady> {
        let mut inner = lock(&self.core.inner);
        let Some(peak) = inner.peaks.iter().find(|p| p.name == name).cloned() else {
            if let Some(watcher) = notify {
                inner.watchers.push_back(watcher);
            }
            return Err(NotReady::NoSuchPeak { name: name.into() });
        };
        let route = Arc::new(RouteCore {
            ring: Ring::new(),
            priority: u64::from(priority.max(1)),
            exiting: AtomicBool::new(false),
            exit: Mutex::new(None),
            peak: Arc::clone(&peak),
        });
        {
            let mut routes = write(&peak.routes);
            if routes.is_empty() {
                peak.cursor.store(0, Ordering::Relaxed);
                routes.push(Arc::clone(&route));
            } else {
                let at = peak.cursor.load(Ordering::Relaxed) % routes.len() + 1;
                routes.insert(at, Arc::clone(&route));
            }
        }
        let fired = mem::take(&mut inner.watchers);
        drop(inner);
        debug!(peak = name, priority, "route created");
        for watcher in fired {
            watcher();
        }
        Ok(Route::from_parts(route, Arc::clone(&self.core)))
    }

    /// Confirms the bus topology is empty, so the last handle may be
    /// dropped.
    ///
    /// While peaks remain the watcher is parked and
    /// [`NotReady::PeaksRemain`] is returned.
    pub fn try_close(&self, notify: Option<Watcher>) -> Result<(), NotReady> {
        let mut inner = lock(&self.core.inner);
        if inner.peaks.is_empty() {
            return Ok(());
        }
        if let Some(watcher) = notify {
            inner.watchers.push_back(watcher);
        }
        Err(NotReady::PeaksRemain)
    }

    /// Sorted names of the currently attached peaks.
    pub fn peaks(&self) -> Vec<String> {
        let inner = lock(&self.core.inner);
        let mut names: Vec<String> = inner.peaks.iter().map(|p| p.name.clone()).collect();
        names.sort_unstable();
        names
    }
}

/// Unlinks a drained exiting route from its peak and fires its exit watcher
/// plus the parked topology watchers.
///
/// Idempotent: a route that was already retired is left alone. Callers hold
/// no table lock when entering; the unlink takes the bus mutex and then the
/// table write lock, so it cannot overlap a consumer walk.
pub(crate) fn retire_route<T>(bus: &BusCore<T>, route: &Arc<RouteCore<T>>) {
    let peak = &route.peak;
    let mut inner = lock(&bus.inner);
    let mut removed = false;
    let mut exit = None;
    {
        let mut routes = write(&peak.routes);
        if let Some(pos) = routes.iter().position(|r| Arc::ptr_eq(r, route)) {
            routes.remove(pos);
            let len = routes.len();
            let cursor = peak.cursor.load(Ordering::Relaxed);
            let fixed = if len == 0 {
                0
            } else {
                let shifted = if pos < cursor { cursor - 1 } else { cursor };
                shifted % len
            };
            peak.cursor.store(fixed, Ordering::Relaxed);
            exit = lock(&route.exit).take();
            removed = true;
        }
    }
    let fired = if removed {
        mem::take(&mut inner.watchers)
    } else {
        VecDeque::new()
    };
    drop(inner);
    if removed {
        debug!(peak = %peak.name, "route retired");
    }
    if let Some(exit) = exit {
        exit();
    }
    for watcher in fired {
        watcher();
    }
}
