//! # Demo: fan_in
//!
//! Several producer threads feed one consumer thread through a named peak.
//!
//! Demonstrates how to:
//! - Attach a peak with a ready callback that wakes the consumer.
//! - Create one route per producer thread with different priorities.
//! - Drain with [`Peak::get_many`] and observe round-robin fan-in.
//!
//! ## Flow
//! ```text
//! producer 0 ─ Route(priority 1) ──┐
//! producer 1 ─ Route(priority 2) ──┼──► Peak "ingest" ──► consumer thread
//! producer 2 ─ Route(priority 4) ──┘
//! ```
//!
//! ## Run
//! ```bash
//! cargo run --example fan_in
//! ```

use std::sync::mpsc;
use std::sync::Arc;
use std::thread;

use ridgeline::Bus;

fn main() {
    let bus: Bus<(u64, u64)> = Bus::new();

    // 1. Wake the consumer through a plain channel signal.
    let (wake_tx, wake_rx) = mpsc::channel::<()>();
    let ready = {
        let wake_tx = wake_tx.clone();
        Arc::new(move || {
            let _ = wake_tx.send(());
        })
    };
    let mut peak = bus.try_attach("ingest", ready, None).expect("fresh name");

    // 2. One route per producer, with growing priorities.
    let mut producers = Vec::new();
    for id in 0..3u64 {
        let bus = bus.clone();
        producers.push(thread::spawn(move || {
            let mut route = bus.route_blocking("ingest", 1u32 << id);
            for seq in 0..10u64 {
                route.put((id, seq)).expect("route is live");
            }
            // Waits until the consumer drains the backlog.
            route.destroy_blocking();
            println!("[producer {id}] done");
        }));
    }

    // 3. Drain in batches until every route is gone.
    let mut batch = Vec::new();
    let mut received = 0;
    while received < 30 {
        batch.clear();
        let n = peak.get_many(&mut batch, 8);
        if n == 0 {
            // Parked: sleep until a producer raises the ready signal.
            let _ = wake_rx.recv();
            continue;
        }
        received += n;
        println!("[consumer] batch of {n}: {batch:?}");
    }

    for p in producers {
        p.join().expect("producer thread");
    }
    peak.detach_blocking();
    bus.close_blocking();
    println!("[consumer] bus closed after {received} messages");
}
