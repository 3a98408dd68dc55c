//! Interaction record and replay for cell outputs.
//!
//! # Overview
//!
//! A cell's [`trail::ActionTrail`] is the ordered list of pointer events a user
//! made against its rendered outputs. The pieces, leaf first:
//! 1. **trail** – the parallel-sequence data model and its metadata form
//! 2. **store** – per-cell trails, hydrated lazily from cell metadata
//! 3. **recorder** – turns forwarded pointer events into trail samples
//! 4. **scheduler** – replays queued trails one at a time with fixed pacing
//!
//! Positions are stored relative to the output element's box and recomputed
//! at replay time, so a re-rendered output of a different size still lines up.

pub mod recorder;
pub mod resolve;
pub mod scheduler;
pub mod store;
pub mod trail;
