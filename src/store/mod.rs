//! Local Blob Store Module
//!
//! On-disk key -> blob storage with byte accounting. No knowledge of
//! clustering: the router decides what lands here, the store only persists,
//! serves, and evicts.
//!
//! ## Core Concepts
//! - **Layout**: One file per artifact under a two-level fan-out directory,
//!   filename derived from the opaque key. Restart re-enumerates the tree to
//!   rebuild the in-memory index and the occupied-bytes counter.
//! - **Spools**: Incoming blobs stream into temp files first and are committed
//!   with an atomic rename, so readers never observe partial writes.
//! - **Pins**: Every served blob holds an in-flight marker that the eviction
//!   loop respects, so a key is never evicted mid-transfer.
//! - **Eviction**: A background pass trims least-recently-accessed entries
//!   from the high watermark down to the low watermark.

pub mod disk;
pub mod eviction;
pub mod types;
