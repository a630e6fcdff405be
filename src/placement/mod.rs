//! Placement Module
//!
//! Maps artifact keys onto the live node set. Placement is a pure function of
//! `(key, membership view, replication factor)`: every request recomputes it
//! against the latest locally known view, so there is no cached ring to go
//! stale.
//!
//! ## Core Concepts
//! - **Hash Ring**: Nodes occupy positions derived from a stable hash of their id;
//!   a key lands at its own hashed position and is owned by the next nodes clockwise.
//! - **Replica Set**: The first R distinct non-dead nodes on the clockwise walk.
//!   The first entry is the primary.
//! - **Divergence**: Nodes with differing views may transiently compute different
//!   replica sets; gossip convergence heals this without coordination.

pub mod ring;
