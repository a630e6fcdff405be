//! Streaming RPC Module
//!
//! The binary transport adapter: a length-prefixed bincode protocol over TCP
//! used both by cache clients and for all inter-node traffic (forwarded
//! reads/writes, replication, delete fan-out).
//!
//! ## Wire Format
//! - **Header frames**: `u32` big-endian length + bincode-encoded
//!   `Request`/`Response`.
//! - **Blob bodies**: a sequence of bounded raw chunks (`u32` length + bytes),
//!   terminated by a zero-length chunk. Memory use is independent of blob
//!   size on both ends.
//!
//! The server delegates every operation to the shared router; the client side
//! is what the router dials when a key lives on a peer.

pub mod client;
pub mod protocol;
pub mod server;

#[cfg(test)]
mod tests;
