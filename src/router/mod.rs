//! Router Module
//!
//! The cache server's core logic. For every operation the router recomputes
//! the key's replica set from the latest membership view and decides whether
//! to serve from the local store, forward to an owning peer, or fan out to
//! replicas.
//!
//! ## Core Concepts
//! - **Bounded retries**: One attempt per remaining replica, each under a
//!   deadline; exhausting them is a miss (reads) or a reported write failure
//!   (writes), never an indefinite retry.
//! - **Read-repair**: A blob fetched from a peer is committed locally when
//!   this node is an owner that was missing it.
//! - **Single-flight**: Concurrent fetches of the same missing key collapse
//!   into one peer fetch whose outcome all callers share.
//! - **Async replication**: Writes ack after the primary commit; copies reach
//!   the remaining owners in the background with bounded retry.

pub mod service;
pub mod singleflight;

#[cfg(test)]
mod tests;
