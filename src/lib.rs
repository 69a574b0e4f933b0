//! # ridgeline
//!
//! **Ridgeline** is an in-process message bus with a cooperative dispatcher.
//!
//! It carries opaque owned messages from any number of producer threads to
//! named single-consumer sinks over lock-free per-producer rings, and can
//! drive a sink with a bounded pool of cooperative tasks. The crate is
//! designed as a building block for servers that fan requests in from many
//! threads onto dedicated processing threads.
//!
//! ## Features
//!
//! | Area           | Description                                                        | Key types / traits             |
//! |----------------|--------------------------------------------------------------------|--------------------------------|
//! | **Topology**   | Attach named sinks, create routes, watch for changes.              | [`Bus`], [`Watcher`]           |
//! | **Data path**  | Lock-free puts, round-robin fan-in, batched pulls.                 | [`Route`], [`Peak`]            |
//! | **Rendezvous** | Blocking variants of every topology operation.                     | `*_blocking` methods           |
//! | **Dispatch**   | Turn a sink into a bounded pool of cooperative workers.            | [`Pool`], [`Job`], [`Call`]    |
//! | **Errors**     | Typed errors that keep message ownership with the caller.          | [`SendError`], [`NotReady`]    |
//! | **Configuration** | Pool sizing and batching.                                       | [`PoolConfig`]                 |
//!
//! ## Model
//!
//! - A **peak** is a named sink with exactly one consumer. Its consumer
//!   pulls with [`Peak::get`]/[`Peak::get_many`], which never block and
//!   never touch a lock shared with other peaks.
//! - A **route** is one producer endpoint bound to a peak. Each route owns
//!   an SPSC ring of 1024-slot chunks that grows when the writer would lap
//!   the reader. Producers on different threads use one route each.
//! - **Topology** operations (attach, detach, route, destroy, close) are
//!   serialized by one bus mutex and may report "not ready", parking a
//!   one-shot [`Watcher`] that fires on the next topology change.
//! - A **pool** drives a peak from a cooperative runtime: messages are
//!   [`Call`] records run by a bounded set of worker tasks, woken across
//!   threads through the peak's ready callback.
//!
//! ```
//! use std::sync::Arc;
//! use ridgeline::Bus;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let bus: Bus<u64> = Bus::new();
//! let mut peak = bus.try_attach("ingest", Arc::new(|| {}), None)?;
//! let mut route = bus.try_route("ingest", 1, None)?;
//!
//! route.put(7)?;
//! assert_eq!(peak.get(), Some(7));
//! assert_eq!(peak.get(), None);
//! # Ok(())
//! # }
//! ```
//!
//! Driving a peak with the dispatcher pool:
//!
//! ```no_run
//! use ridgeline::{call, Bus, Call, Pool, PoolConfig};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     let local = tokio::task::LocalSet::new();
//!     local
//!         .run_until(async {
//!             let bus: Bus<Call> = Bus::new();
//!             let pool = Pool::attach(&bus, "exec", PoolConfig::default()).await;
//!
//!             let mut route = bus.try_route("exec", 1, None).unwrap();
//!             route.put(call(|| println!("ran on the pool"))).unwrap();
//!
//!             // The pool drains the route, then the detach commits.
//!             let _ = route.try_destroy(None);
//!             pool.detach().await;
//!         })
//!         .await;
//! }
//! ```
//!
//! ---

mod bus;
mod config;
mod error;
mod pool;
mod ring;
mod sync;

// ---- Public re-exports ----

pub use bus::{Bus, Peak, ReadyFn, Route, Watcher};
pub use config::PoolConfig;
pub use error::{Draining, NotReady, SendError};
pub use pool::{call, call_async, Call, Job, Pool};
