//! # Call records dispatched by the pool.
//!
//! A pool peak carries [`Call`]s: boxed single-shot jobs built on any
//! producer thread and executed on the pool's cooperative thread. The future
//! a job produces never leaves that thread, so it does not need to be
//! `Send`; the boxed record itself does, because it crosses the ring.

use std::future::Future;

use async_trait::async_trait;

/// A single-shot unit of work the pool executes.
///
/// Implement it directly for reusable job types, or build one from a
/// closure with [`call`] / [`call_async`].
#[async_trait(?Send)]
pub trait Job: Send {
    /// Runs the job, consuming it.
    async fn run(self: Box<Self>);
}

/// The message type a pool peak carries.
pub type Call = Box<dyn Job>;

struct FnJob<F>(F);

#[async_trait(?Send)]
impl<F> Job for FnJob<F>
where
    F: FnOnce() + Send + 'static,
{
    async fn run(self: Box<Self>) {
        (self.0)();
    }
}

struct AsyncJob<F>(F);

#[async_trait(?Send)]
impl<F, Fut> Job for AsyncJob<F>
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + 'static,
{
    async fn run(self: Box<Self>) {
        (self.0)().await;
    }
}

/// Wraps a plain closure into a [`Call`].
pub fn call<F>(f: F) -> Call
where
    F: FnOnce() + Send + 'static,
{
    Box::new(FnJob(f))
}

/// Wraps a future-producing closure into a [`Call`]; the future runs on the
/// pool thread and may suspend cooperatively.
pub fn call_async<F, Fut>(f: F) -> Call
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + 'static,
{
    Box::new(AsyncJob(f))
}
