//! # Peak: one named sink and its round-robin fan-in.
//!
//! A peak owns a table of attached routes and a rolling cursor. Its consumer
//! handle is the only reader of every attached ring; `get` and `get_many`
//! walk the table under a read lock and never touch the bus mutex.
//!
//! ## Rules
//! - `parked` is set only by the consumer (all rings empty) and cleared by
//!   whichever side observes work first; the producer's parked→running CAS
//!   edge is the one that invokes `ready`.
//! - A route's `priority` is the number of consecutive pulls before the
//!   cursor rotates; 1 is strict round-robin.
//! - Drained exiting routes encountered during a walk are retired after the
//!   read lock is released.

use std::sync::atomic::{fence, AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use tracing::{debug, warn};

use super::core::{lock, read, retire_route, BusCore};
use super::route::RouteCore;
use super::{ReadyFn, Watcher};

/// Shared state behind a [`Peak`] handle; producers reach it through their
/// route's back reference.
pub(crate) struct PeakCore<T> {
    pub(super) name: String,
    pub(super) ready: ReadyFn,
    /// True while the consumer sleeps because every ring was empty.
    pub(super) parked: AtomicBool,
    pub(super) routes: RwLock<Vec<Arc<RouteCore<T>>>>,
    /// Round-robin position into `routes`.
    pub(super) cursor: AtomicUsize,
}

/// Consumer handle for one named sink.
///
/// Not `Clone`: a peak has exactly one consumer, and the `&mut` receivers on
/// the data operations keep it single-threaded. Dropping the handle detaches
/// the peak when no routes remain.
pub struct Peak<T> {
    core: Arc<PeakCore<T>>,
    bus: Arc<BusCore<T>>,
    detached: bool,
}

impl<T> std::fmt::Debug for Peak<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Peak")
            .field("name", &self.core.name)
            .field("detached", &self.detached)
            .finish()
    }
}

impl<T: Send + 'static> Peak<T> {
    pub(super) fn from_parts(core: Arc<PeakCore<T>>, bus: Arc<BusCore<T>>) -> Self {
        Peak {
            core,
            bus,
            detached: false,
        }
    }

    /// Name this peak is registered under.
    pub fn name(&self) -> &str {
        &self.core.name
    }

    /// Number of routes currently attached.
    pub fn route_count(&self) -> usize {
        read(&self.core.routes).len()
    }

    /// Pulls the next message, walking the route table round-robin.
    ///
    /// Returns `None` when every ring is empty; the peak is then parked and
    /// the next put wakes it through the ready callback. `None` is also
    /// returned when the park flip is lost to a producer mid-wake, which the
    /// producer resolves by signalling ready.
    pub fn get(&mut self) -> Option<T> {
        let mut drained: Vec<Arc<RouteCore<T>>> = Vec::new();
        let msg = {
            let routes = read(&self.core.routes);
            if routes.is_empty() {
                None
            } else {
                let len = routes.len();
                let start = self.core.cursor.load(Ordering::Relaxed) % len;
                let mut idx = start;
                let mut have = !routes[idx].ring.is_empty();
                if !have {
                    if self
                        .core
                        .parked
                        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                        .is_err()
                    {
                        return None;
                    }
                    // Full barrier between parking and the re-scan: pairs
                    // with the producer's barrier in put_done, so either the
                    // scan sees the freshly published message or the
                    // producer sees the parked flag and signals ready.
                    fence(Ordering::SeqCst);
                    for step in 0..len {
                        let probe = (start + step) % len;
                        if !routes[probe].ring.is_empty() {
                            idx = probe;
                            have = true;
                            break;
                        }
                        if routes[probe].is_drained() {
                            drained.push(Arc::clone(&routes[probe]));
                        }
                    }
                }
                if have {
                    self.core.parked.store(false, Ordering::Release);
                    let route = &routes[idx];
                    // SAFETY: this handle is the peak's only consumer.
                    let msg = unsafe { route.ring.pop() };
                    let next = if route.ring.rpos() % route.priority == 0 {
                        (idx + 1) % len
                    } else {
                        idx
                    };
                    self.core.cursor.store(next, Ordering::Relaxed);
                    if route.is_drained() {
                        drained.push(Arc::clone(route));
                    }
                    msg
                } else {
                    None
                }
            }
        };
        for route in &drained {
            retire_route(&self.bus, route);
        }
        msg
    }

    /// Pulls up to `max` messages into `out`, returning how many arrived.
    ///
    /// Copies contiguous runs that never cross a chunk boundary, lapping the
    /// route table until `max` is reached or a full lap finds no work. The
    /// peak is parked on entry and un-parked as soon as any run is found, so
    /// an empty result always leaves it parked.
    pub fn get_many(&mut self, out: &mut Vec<T>, max: usize) -> usize {
        if self
            .core
            .parked
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return 0;
        }
        // Same park/publish barrier as in get.
        fence(Ordering::SeqCst);
        let mut drained: Vec<Arc<RouteCore<T>>> = Vec::new();
        let mut count = 0;
        {
            let routes = read(&self.core.routes);
            if !routes.is_empty() {
                let len = routes.len();
                let start = self.core.cursor.load(Ordering::Relaxed) % len;
                loop {
                    let mut advanced = false;
                    for step in 0..len {
                        if count >= max {
                            break;
                        }
                        let route = &routes[(start + step) % len];
                        // SAFETY: this handle is the peak's only consumer.
                        let run = unsafe { route.ring.pop_run(out, max - count) };
                        if run > 0 {
                            self.core.parked.store(false, Ordering::Release);
                            advanced = true;
                            count += run;
                        }
                        if route.is_drained()
                            && !drained.iter().any(|r| Arc::ptr_eq(r, route))
                        {
                            drained.push(Arc::clone(route));
                        }
                    }
                    if count >= max || !advanced {
                        break;
                    }
                }
            }
        }
        for route in &drained {
            retire_route(&self.bus, route);
        }
        count
    }

    /// Detaches the peak from the bus.
    ///
    /// Succeeds only once every route is gone; otherwise the watcher is
    /// parked, the handle is returned, and the caller retries after the next
    /// topology change (see [`Peak::detach_blocking`]).
    pub fn try_detach(mut self, notify: Option<Watcher>) -> Result<(), Peak<T>> {
        if self.detach_inner(notify) {
            self.detached = true;
            Ok(())
        } else {
            Err(self)
        }
    }

    fn detach_inner(&self, notify: Option<Watcher>) -> bool {
        let mut inner = lock(&self.bus.inner);
        if !read(&self.core.routes).is_empty() {
            if let Some(watcher) = notify {
                inner.watchers.push_back(watcher);
            }
            return false;
        }
        inner.peaks.retain(|p| !Arc::ptr_eq(p, &self.core));
        let fired = std::mem::take(&mut inner.watchers);
        drop(inner);
        debug!(peak = %self.core.name, "peak detached");
        for watcher in fired {
            watcher();
        }
        true
    }
}

impl<T> Drop for Peak<T> {
    fn drop(&mut self) {
        if self.detached {
            return;
        }
        let mut inner = lock(&self.bus.inner);
        if !read(&self.core.routes).is_empty() {
            // Producers are still attached; the registry entry stays so
            // their draining destroys keep a live target.
            warn!(peak = %self.core.name, "consumer dropped with routes still attached");
            return;
        }
        inner.peaks.retain(|p| !Arc::ptr_eq(p, &self.core));
        let fired = std::mem::take(&mut inner.watchers);
        drop(inner);
        for watcher in fired {
            watcher();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use crate::bus::{Bus, ReadyFn};

    fn noop_ready() -> ReadyFn {
        Arc::new(|| {})
    }

    fn counting_ready(hits: &Arc<AtomicUsize>) -> ReadyFn {
        let hits = Arc::clone(hits);
        Arc::new(move || {
            hits.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn round_robin_interleaves_two_routes() {
        let bus: Bus<u64> = Bus::new();
        let mut peak = bus.try_attach("tx", noop_ready(), None).unwrap();
        let mut r1 = bus.try_route("tx", 1, None).unwrap();
        let mut r2 = bus.try_route("tx", 1, None).unwrap();

        for v in [1u64, 2, 3] {
            r1.put(v).unwrap();
        }
        for v in [10u64, 20, 30] {
            r2.put(v).unwrap();
        }

        let mut got = Vec::new();
        while let Some(v) = peak.get() {
            got.push(v);
        }
        // Either interleaving is valid depending on where the cursor starts.
        let a = vec![1, 10, 2, 20, 3, 30];
        let b = vec![10, 1, 20, 2, 30, 3];
        assert!(got == a || got == b, "unexpected interleaving: {got:?}");
    }

    #[test]
    fn priority_grants_consecutive_pulls() {
        let bus: Bus<u64> = Bus::new();
        let mut peak = bus.try_attach("tx", noop_ready(), None).unwrap();
        let mut fat = bus.try_route("tx", 4, None).unwrap();
        let mut thin = bus.try_route("tx", 1, None).unwrap();

        for v in 0..8u64 {
            fat.put(v).unwrap();
        }
        for v in [100u64, 101] {
            thin.put(v).unwrap();
        }

        let mut got = Vec::new();
        while let Some(v) = peak.get() {
            got.push(v);
        }
        // Four pulls from the priority-4 route, then one from the other.
        let batches: Vec<bool> = got.iter().map(|v| *v >= 100).collect();
        assert_eq!(
            batches,
            vec![false, false, false, false, true, false, false, false, false, true]
        );
    }

    #[test]
    fn ready_fires_once_per_empty_to_nonempty_transition() {
        let bus: Bus<u64> = Bus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let mut peak = bus.try_attach("tx", counting_ready(&hits), None).unwrap();
        let mut route = bus.try_route("tx", 1, None).unwrap();

        // The peak starts parked, so the first put signals ready.
        route.put(1).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        // Further puts while the consumer is awake stay silent.
        route.put(2).unwrap();
        route.put(3).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        while peak.get().is_some() {}
        // Drained: the empty get parked the peak again.
        route.put(4).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert_eq!(peak.get(), Some(4));
    }

    #[test]
    fn batched_put_wakes_once() {
        let bus: Bus<u64> = Bus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let mut peak = bus.try_attach("tx", counting_ready(&hits), None).unwrap();
        let mut route = bus.try_route("tx", 1, None).unwrap();

        for v in 0..16u64 {
            route.put_start(v).unwrap();
        }
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        route.put_done();
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        let mut out = Vec::new();
        assert_eq!(peak.get_many(&mut out, 100), 16);
        assert_eq!(out, (0..16).collect::<Vec<_>>());
    }

    #[test]
    fn get_many_collects_across_routes_and_reparks() {
        let bus: Bus<u64> = Bus::new();
        let mut peak = bus.try_attach("tx", noop_ready(), None).unwrap();
        let mut r1 = bus.try_route("tx", 1, None).unwrap();
        let mut r2 = bus.try_route("tx", 1, None).unwrap();

        for v in 0..5u64 {
            r1.put(v).unwrap();
        }
        for v in 50..55u64 {
            r2.put(v).unwrap();
        }

        let mut out = Vec::new();
        assert_eq!(peak.get_many(&mut out, 100), 10);
        let mut sorted = out.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, vec![0, 1, 2, 3, 4, 50, 51, 52, 53, 54]);

        // Empty follow-up leaves the peak parked: the next put must wake it.
        assert_eq!(peak.get_many(&mut out, 100), 0);
        assert_eq!(peak.get(), None);
    }

    #[test]
    fn get_many_honors_max() {
        let bus: Bus<u64> = Bus::new();
        let mut peak = bus.try_attach("tx", noop_ready(), None).unwrap();
        let mut route = bus.try_route("tx", 1, None).unwrap();
        for v in 0..20u64 {
            route.put(v).unwrap();
        }
        let mut out = Vec::new();
        assert_eq!(peak.get_many(&mut out, 7), 7);
        assert_eq!(out, (0..7).collect::<Vec<_>>());
        assert_eq!(peak.get_many(&mut out, 100), 13);
    }

    #[test]
    fn cursor_survives_a_mid_table_retire() {
        let bus: Bus<u64> = Bus::new();
        let mut peak = bus.try_attach("tx", noop_ready(), None).unwrap();
        let mut r1 = bus.try_route("tx", 1, None).unwrap();
        let mut r2 = bus.try_route("tx", 1, None).unwrap();
        let mut r3 = bus.try_route("tx", 1, None).unwrap();

        r1.put(1).unwrap();
        r2.put(20).unwrap();
        r3.put(30).unwrap();

        assert_eq!(peak.get(), Some(1));
        // Retiring a route behind the cursor must not skew the rotation.
        r1.try_destroy(None).unwrap();
        let mut rest = vec![peak.get().unwrap(), peak.get().unwrap()];
        rest.sort_unstable();
        assert_eq!(rest, vec![20, 30]);
        assert_eq!(peak.get(), None);
        assert_eq!(peak.route_count(), 2);
    }

    #[test]
    fn route_count_tracks_topology() {
        let bus: Bus<u64> = Bus::new();
        let peak = bus.try_attach("tx", noop_ready(), None).unwrap();
        assert_eq!(peak.route_count(), 0);
        let mut r1 = bus.try_route("tx", 1, None).unwrap();
        let mut r2 = bus.try_route("tx", 1, None).unwrap();
        assert_eq!(peak.route_count(), 2);
        r1.try_destroy(None).unwrap();
        r2.try_destroy(None).unwrap();
        assert_eq!(peak.route_count(), 0);
        peak.try_detach(None).unwrap();
    }
}
