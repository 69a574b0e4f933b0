//! # Route: one producer endpoint and its draining state machine.
//!
//! A route is Live from creation, Draining once a destroy (or a handle
//! drop) marks it exiting, and Destroyed when its drained ring is unlinked
//! from the peak. The producer side only ever sets the flag and stops; the
//! unlink is done by whichever side proves the ring empty, under the bus
//! mutex and the table write lock.

use std::sync::atomic::{fence, AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::error::{Draining, SendError};
use crate::ring::Ring;

use super::core::{lock, retire_route, BusCore};
use super::peak::PeakCore;
use super::Watcher;

/// Shared state behind a [`Route`] handle; the consumer reaches it through
/// the peak's route table.
pub(crate) struct RouteCore<T> {
    pub(super) ring: Ring<T>,
    /// Consecutive pulls granted by the fan-in before the cursor rotates.
    pub(super) priority: u64,
    /// Once true no further put succeeds.
    pub(super) exiting: AtomicBool,
    /// Fired exactly once when the drained route is unlinked.
    pub(super) exit: Mutex<Option<Watcher>>,
    pub(super) peak: Arc<PeakCore<T>>,
}

impl<T> RouteCore<T> {
    /// A drained route: marked exiting and fully consumed. Both conditions
    /// are sticky because the producer stops at the `exiting` flag.
    pub(super) fn is_drained(&self) -> bool {
        self.exiting.load(Ordering::Acquire) && self.ring.is_empty()
    }
}

/// Producer handle for one route.
///
/// Not `Clone`: a route has exactly one producer, and `put_start` takes
/// `&mut self` so the SPSC write half stays single-threaded. Multiple
/// producers multiplex by creating one route each.
pub struct Route<T> {
    core: Arc<RouteCore<T>>,
    bus: Arc<BusCore<T>>,
}

impl<T> std::fmt::Debug for Route<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route")
            .field("exiting", &self.core.exiting.load(Ordering::Acquire))
            .finish()
    }
}

impl<T: Send + 'static> Route<T> {
    pub(super) fn from_parts(core: Arc<RouteCore<T>>, bus: Arc<BusCore<T>>) -> Self {
        Route { core, bus }
    }

    /// Enqueues a message without waking the consumer.
    ///
    /// Pair with [`Route::put_done`] after a batch; [`Route::put`] is the
    /// single-message composition of the two. Fails once the route is
    /// draining, handing the message back.
    pub fn put_start(&mut self, msg: T) -> Result<(), SendError<T>> {
        if self.core.exiting.load(Ordering::Acquire) {
            return Err(SendError(msg));
        }
        // SAFETY: this handle is the ring's only producer.
        unsafe { self.core.ring.push(msg) };
        Ok(())
    }

    /// Wakes the consumer if it parked on an empty peak.
    ///
    /// The parked→running edge is claimed by a CAS, so one wake-up covers
    /// any number of batched `put_start` calls.
    pub fn put_done(&self) {
        // Full barrier between the wpos publish and the parked probe; pairs
        // with the consumer's barrier between parking and its re-scan.
        fence(Ordering::SeqCst);
        let peak = &self.core.peak;
        if peak
            .parked
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            (peak.ready)();
        }
    }

    /// Enqueues a message and wakes the consumer when needed.
    pub fn put(&mut self, msg: T) -> Result<(), SendError<T>> {
        self.put_start(msg)?;
        self.put_done();
        Ok(())
    }

    /// Number of messages enqueued and not yet consumed.
    pub fn len(&self) -> usize {
        self.core.ring.len()
    }

    /// True when the consumer has caught up with this route.
    pub fn is_empty(&self) -> bool {
        self.core.ring.is_empty()
    }

    /// Destroys the route.
    ///
    /// An empty route is unlinked synchronously. A non-empty one switches to
    /// draining: further puts fail, the consumer finishes the backlog, and
    /// the watcher fires once the route is unlinked
    /// (see [`Route::destroy_blocking`]). Calling again while draining
    /// reports [`Draining`] without replacing the watcher.
    pub fn try_destroy(&mut self, notify: Option<Watcher>) -> Result<(), Draining> {
        if self.core.exiting.load(Ordering::Acquire) {
            return Err(Draining);
        }
        if self.core.ring.is_empty() {
            self.core.exiting.store(true, Ordering::Release);
            retire_route(&self.bus, &self.core);
            return Ok(());
        }
        if let Some(watcher) = notify {
            *lock(&self.core.exit) = Some(watcher);
        }
        self.core.exiting.store(true, Ordering::Release);
        debug!(peak = %self.core.peak.name, backlog = self.core.ring.len(), "route draining");
        // The consumer may have caught up between the emptiness probe and
        // the flag store; it will not revisit this route on its own, so
        // finish the unlink here. The exit watcher still fires.
        if self.core.ring.is_empty() {
            retire_route(&self.bus, &self.core);
        }
        Err(Draining)
    }
}

impl<T> Drop for Route<T> {
    fn drop(&mut self) {
        // Same shutdown as an explicit destroy with no watcher: stop
        // accepting puts and let the consumer retire the backlog. Both
        // stores are idempotent, so a drop after try_destroy is harmless.
        self.core.exiting.store(true, Ordering::Release);
        if self.core.ring.is_empty() {
            retire_route(&self.bus, &self.core);
        }
    }
}
