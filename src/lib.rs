//! Distributed Build-Artifact Cache Library
//!
//! This library crate defines the core modules that make up the cache cluster.
//! It serves as the foundation for the node executable (`main.rs`).
//!
//! ## Architecture Modules
//! The system is composed of five loosely coupled subsystems:
//!
//! - **`membership`**: The cluster coordination layer. Uses a UDP-based Gossip protocol
//!   (SWIM-like) to manage node discovery, failure detection, and cluster topology.
//! - **`placement`**: The ownership layer. Maps artifact keys onto the live node set via
//!   a consistent hash ring (primary + replicas), recomputed per request from the
//!   latest membership view.
//! - **`store`**: The local persistence layer. An on-disk blob store with byte
//!   accounting and a watermark-driven LRU eviction loop.
//! - **`router`**: The operational core. Decides per request whether to serve from the
//!   local store, forward to an owning peer, or fan out to replicas; performs
//!   read-repair and single-flight de-duplication.
//! - **`rpc` / `http`**: Two transport adapters exposing identical Get/Put/Delete
//!   semantics over a streaming binary protocol and plain HTTP, both backed by the
//!   same router instance.

pub mod config;
pub mod http;
pub mod membership;
pub mod placement;
pub mod router;
pub mod rpc;
pub mod store;
