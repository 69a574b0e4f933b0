//! # Bus core: topology, fan-in, and the lock-free data path.
//!
//! This module contains the embedded implementation of the bus. The public
//! API re-exported from here is [`Bus`], [`Peak`], [`Route`] and the
//! [`Watcher`]/[`ReadyFn`] callback aliases. Everything else is an internal
//! building block the handles wire together.
//!
//! ## Files & responsibilities
//! - **core.rs**: the registry. One mutex guards the peak list and the parked
//!   watcher queue; every topology mutation commits under it and then fires
//!   the snapshot of parked watchers.
//! - **peak.rs**: one named sink. Owns the route table, the round-robin
//!   cursor, and the `parked` flag; performs fan-in (`get` / `get_many`).
//! - **route.rs**: one producer endpoint. Owns the SPSC ring write half and
//!   the draining state machine (Live → Draining → Destroyed).
//!
//! ## Wiring (module-level flow)
//! ```text
//! producers (any thread)                    consumer (one thread per peak)
//!   Route::put ──► Ring ──┐
//!   Route::put ──► Ring ──┼──► Peak::get / get_many (round-robin cursor)
//!   Route::put ──► Ring ──┘         │
//!        │                          └─ retires drained exiting routes
//!        └─ parked→running CAS edge invokes the peak's ready callback
//!
//! topology (any thread, serialized by the bus mutex)
//!   Bus::try_attach / Peak::try_detach / Bus::try_route / Route::try_destroy
//!        └─ commit, snapshot parked watchers, release, fire FIFO
//! ```
//!
//! ## Rules
//! - Data operations never touch the bus mutex.
//! - The consumer walks the route table under its read lock; unlink takes
//!   the write lock, so a walk and a free are mutually exclusive.
//! - Watchers parked during a watcher drain are deferred to the next
//!   topology mutation.

mod core;
mod peak;
mod route;

use std::sync::Arc;

pub use self::core::Bus;
pub use self::peak::Peak;
pub use self::route::Route;

/// One-shot notifier parked on the bus, fired on the next topology change.
pub type Watcher = Box<dyn FnOnce() + Send + 'static>;

/// Callback invoked when a peak transitions from empty to non-empty.
///
/// Called from whichever producer thread observed the transition, so it must
/// be safe to invoke from any thread.
pub type ReadyFn = Arc<dyn Fn() + Send + Sync + 'static>;
