//! HTTP Adapter Module
//!
//! The plain request/response front end: `GET/POST/DELETE /<key>` for clients
//! plus internal peer routes mirroring the RPC forwarding surface, all backed
//! by the same router instance as the binary protocol. Bodies stream in both
//! directions; adapter choice is a client-compatibility concern, never a
//! behavioral one.

pub mod handlers;

#[cfg(test)]
mod tests;
