//! Streaming fan-out: stream sessions, consumer queues and rooms.
//!
//! One producer (a backend's token stream or a tool's incremental output)
//! feeds a [`services::StreamChannelManager`] session; every subscribed
//! consumer receives the chunks, in push order, through its own bounded
//! queue. Rooms group connections for broadcast delivery.
//!
//! - Domain types in [`domain`]
//! - Consumer queue adapters in [`adapters`]
//! - The channel manager and room registry in [`services`]

pub mod adapters;
pub mod domain;
pub mod services;

#[cfg(test)]
mod tests;
