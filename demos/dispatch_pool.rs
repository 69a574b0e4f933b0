//! # Demo: dispatch_pool
//!
//! Foreign threads submit work to a cooperative dispatcher pool.
//!
//! Demonstrates how to:
//! - Attach a [`Pool`] to a peak inside a current-thread `LocalSet`.
//! - Submit plain and suspending jobs from producer threads.
//! - Tear the pool down once the producers destroy their routes.
//!
//! ## Flow
//! ```text
//! thread A ─ put(call …)       ──┐                      ┌─ worker
//! thread B ─ put(call_async …) ──┼──► Peak "exec" ──►  scheduler
//!                                │     (ready → Notify) └─ worker
//!                                └──────── pool thread (LocalSet)
//! ```
//!
//! ## Run
//! ```bash
//! cargo run --example dispatch_pool
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use ridgeline::{call, call_async, Bus, Call, Pool, PoolConfig};

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let bus: Bus<Call> = Bus::new();
            let cfg = PoolConfig {
                workers: 2,
                batch: 8,
            };
            let pool = Pool::attach(&bus, "exec", cfg).await;

            let done = Arc::new(AtomicUsize::new(0));
            let mut submitters = Vec::new();
            for id in 0..2u32 {
                let bus = bus.clone();
                let done = Arc::clone(&done);
                submitters.push(thread::spawn(move || {
                    let mut route = bus.route_blocking("exec", 1);
                    for seq in 0..10u32 {
                        let done = Arc::clone(&done);
                        let job = if seq % 2 == 0 {
                            call(move || {
                                println!("[job {id}:{seq}] plain");
                                done.fetch_add(1, Ordering::SeqCst);
                            })
                        } else {
                            call_async(move || async move {
                                tokio::task::yield_now().await;
                                println!("[job {id}:{seq}] suspended once");
                                done.fetch_add(1, Ordering::SeqCst);
                            })
                        };
                        route.put(job).expect("route is live");
                    }
                    route.destroy_blocking();
                }));
            }

            while done.load(Ordering::SeqCst) < 20 {
                tokio::task::yield_now().await;
            }
            for s in submitters {
                s.join().expect("submitter thread");
            }
            pool.detach().await;
            println!("pool drained 20 jobs and detached");
        })
        .await;
}
