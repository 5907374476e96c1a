#![warn(missing_docs)]

//! bitlane-core: foundational types and utilities.
//!
//! This crate provides the minimal set of core types shared across all
//! layers:
//! - Error handling
//! - Protocol constants
//! - Time base for tick-driven updates
//! - Shared byte blocks
//! - Transport abstraction
//!
//! Protocol-specific logic lives in the specialized crates:
//! - `bitlane-protocol`: bit-level serialization, sliding windows, factories
//! - `bitlane-conn`: connections and message channels
//! - `bitlane-net`: addresses, sockets, DNS resolution, network simulation

/// Protocol constants shared across layers.
pub mod constants {
    /// Hard upper bound on the size of a block delivered as a single
    /// message. `BlockMessage` encodes its length against this bound, so a
    /// channel's `max_small_block_size` must not exceed it.
    pub const MAX_SMALL_BLOCK_SIZE: usize = 256;
    /// Default ceiling for a serialized packet, framing included.
    pub const DEFAULT_MAX_PACKET_SIZE: usize = 1200;
    /// Default capacity of the per-connection send/receive packet windows.
    pub const DEFAULT_SLIDING_WINDOW_SIZE: u16 = 256;
    /// Default size of each large-block fragment in bytes.
    pub const DEFAULT_FRAGMENT_SIZE: usize = 64;
    /// Default capacity of a channel's message send queue (power of two).
    pub const DEFAULT_SEND_QUEUE_SIZE: u16 = 1024;
    /// Default capacity of a channel's message receive queue (power of two).
    pub const DEFAULT_RECEIVE_QUEUE_SIZE: u16 = 1024;
}

/// Shared, reference-counted byte blocks with zero-copy slicing.
pub mod block;
/// Error types and results.
pub mod error;
/// Time base passed into per-tick updates.
pub mod time;
/// Transport abstraction for pluggable I/O.
pub mod transport;

pub use block::Block;
pub use error::{ErrorKind, Result};
pub use time::TimeBase;
pub use transport::Transport;
