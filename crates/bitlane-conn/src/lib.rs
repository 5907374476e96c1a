#![warn(missing_docs)]

//! bitlane-conn: the connection layer.
//!
//! A [`Connection`](connection::Connection) frames, sequences, and acks
//! packets, fanning payload to the channels declared in its
//! [`ChannelStructure`](channel::ChannelStructure). The
//! [`ReliableMessageChannel`](reliable::ReliableMessageChannel) layered on
//! top provides reliable ordered delivery of variable-size messages plus
//! fragmentation and reassembly of large blocks.
//!
//! Everything here is strictly single-threaded and non-suspending: the
//! caller drives `update`, `write_packet`, and `read_packet` once per tick
//! from one thread, and no call blocks or acquires locks.

/// Channel traits and the ordered channel declaration.
pub mod channel;
/// Packet framing, sequencing, and ack feedback.
pub mod connection;
/// Reliable ordered message delivery with block transfer.
pub mod reliable;

pub use channel::{Channel, ChannelData, ChannelStructure};
pub use connection::{Connection, ConnectionConfig, ConnectionPacket, ConnectionStatistics};
pub use reliable::{
    ChannelStatistics, ReliableChannelConfig, ReliableChannelData, ReliableMessageChannel,
};
