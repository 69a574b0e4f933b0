//! # Rendezvous wrappers: blocking variants of the topology operations.
//!
//! Topology is inherently asynchronous (attach may wait for a name to free
//! up, destroy for a backlog to drain), but callers outside a cooperative
//! runtime usually want synchronous semantics. Each wrapper here parks the
//! calling thread on a private `(Mutex, Condvar)` pair, hands the matching
//! watcher to the non-blocking operation, and retries until it succeeds.
//!
//! ## Rules
//! - These block the calling OS thread; do not use them on a cooperative
//!   runtime thread (the pool has its own async rendezvous).
//! - No cancellation or timeout; a caller that needs one supplies its own
//!   watcher around the `try_*` operation instead.

use std::sync::{Arc, Condvar, Mutex};

use crate::bus::{Bus, Peak, ReadyFn, Route, Watcher};
use crate::error::Draining;

/// One thread's parking spot; the watcher side sets the flag so a wake that
/// fires before the wait begins is never lost.
struct Rendezvous {
    fired: Mutex<bool>,
    cond: Condvar,
}

impl Rendezvous {
    fn new() -> Arc<Self> {
        Arc::new(Rendezvous {
            fired: Mutex::new(false),
            cond: Condvar::new(),
        })
    }

    /// A one-shot watcher that releases the parked thread.
    fn watcher(self: &Arc<Self>) -> Watcher {
        let rendezvous = Arc::clone(self);
        Box::new(move || {
            let mut fired = rendezvous.fired.lock().unwrap_or_else(|e| e.into_inner());
            *fired = true;
            rendezvous.cond.notify_one();
        })
    }

    /// Parks until the watcher fires, then re-arms for the next round.
    fn wait(&self) {
        let mut fired = self.fired.lock().unwrap_or_else(|e| e.into_inner());
        while !*fired {
            fired = self.cond.wait(fired).unwrap_or_else(|e| e.into_inner());
        }
        *fired = false;
    }
}

impl<T: Send + 'static> Bus<T> {
    /// Attaches a peak, blocking until the name is available.
    pub fn attach_blocking(&self, name: &str, ready: ReadyFn) -> Peak<T> {
        let rendezvous = Rendezvous::new();
        loop {
            match self.try_attach(name, Arc::clone(&ready), Some(rendezvous.watcher())) {
                Ok(peak) => return peak,
                Err(_) => rendezvous.wait(),
            }
        }
    }

    /// Creates a route, blocking until the target peak is attached.
    pub fn route_blocking(&self, name: &str, priority: u32) -> Route<T> {
        let rendezvous = Rendezvous::new();
        loop {
            match self.try_route(name, priority, Some(rendezvous.watcher())) {
                Ok(route) => return route,
                Err(_) => rendezvous.wait(),
            }
        }
    }

    /// Blocks until the topology is empty.
    pub fn close_blocking(&self) {
        let rendezvous = Rendezvous::new();
        while self.try_close(Some(rendezvous.watcher())).is_err() {
            rendezvous.wait();
        }
    }
}

impl<T: Send + 'static> Peak<T> {
    /// Detaches the peak, blocking until every route is gone.
    pub fn detach_blocking(self) {
        let rendezvous = Rendezvous::new();
        let mut peak = self;
        loop {
            match peak.try_detach(Some(rendezvous.watcher())) {
                Ok(()) => return,
                Err(handle) => {
                    peak = handle;
                    rendezvous.wait();
                }
            }
        }
    }
}

impl<T: Send + 'static> Route<T> {
    /// Destroys the route, blocking until the consumer drains any backlog.
    pub fn destroy_blocking(mut self) {
        let rendezvous = Rendezvous::new();
        match self.try_destroy(Some(rendezvous.watcher())) {
            Ok(()) => {}
            Err(Draining) => rendezvous.wait(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use crate::bus::{Bus, ReadyFn};

    fn noop_ready() -> ReadyFn {
        Arc::new(|| {})
    }

    #[test]
    fn attach_blocking_waits_for_the_name() {
        let bus: Bus<u64> = Bus::new();
        let first = bus.try_attach("x", noop_ready(), None).unwrap();

        let entered = Arc::new(AtomicBool::new(false));
        let waiter = {
            let bus = bus.clone();
            let entered = Arc::clone(&entered);
            thread::spawn(move || {
                entered.store(true, Ordering::SeqCst);
                let peak = bus.attach_blocking("x", Arc::new(|| {}));
                peak.try_detach(None).unwrap();
            })
        };

        // Give the waiter a moment to park on the contested name.
        while !entered.load(Ordering::SeqCst) {
            thread::yield_now();
        }
        thread::sleep(Duration::from_millis(20));
        assert!(!waiter.is_finished());

        first.try_detach(None).unwrap();
        waiter.join().unwrap();
        assert!(bus.peaks().is_empty());
    }

    #[test]
    fn route_blocking_waits_for_attach() {
        let bus: Bus<u64> = Bus::new();
        let producer = {
            let bus = bus.clone();
            thread::spawn(move || {
                let mut route = bus.route_blocking("late", 1);
                route.put(42).unwrap();
            })
        };

        thread::sleep(Duration::from_millis(20));
        let mut peak = bus.attach_blocking("late", noop_ready());
        producer.join().unwrap();
        assert_eq!(peak.get(), Some(42));
    }

    #[test]
    fn destroy_blocking_returns_after_drain() {
        let bus: Bus<u64> = Bus::new();
        let mut peak = bus.attach_blocking("x", noop_ready());
        let mut route = bus.route_blocking("x", 1);
        for v in 0..10u64 {
            route.put(v).unwrap();
        }

        let destroyer = thread::spawn(move || {
            route.destroy_blocking();
        });

        thread::sleep(Duration::from_millis(20));
        assert!(!destroyer.is_finished());

        let mut got = Vec::new();
        while got.len() < 10 {
            if let Some(v) = peak.get() {
                got.push(v);
            } else {
                thread::yield_now();
            }
        }
        destroyer.join().unwrap();
        assert_eq!(got, (0..10).collect::<Vec<_>>());
        peak.detach_blocking();
    }

    #[test]
    fn close_blocking_waits_for_the_last_peak() {
        let bus: Bus<u64> = Bus::new();
        let peak = bus.attach_blocking("x", noop_ready());

        let closer = {
            let bus = bus.clone();
            thread::spawn(move || bus.close_blocking())
        };

        thread::sleep(Duration::from_millis(20));
        assert!(!closer.is_finished());
        peak.detach_blocking();
        closer.join().unwrap();
    }
}
