//! # Lock-free chunked ring: the per-route data path.
//!
//! Internal modules:
//! - [`chunk`]  fixed 1024-slot block with an atomic forward link
//! - [`spsc`]   growable SPSC queue over a linked ring of chunks

mod chunk;
mod spsc;

pub(crate) use spsc::Ring;
