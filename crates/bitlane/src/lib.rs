//! bitlane: reliable-ordered message channels multiplexed over unreliable
//! datagram transports.
//!
//! The crates compose bottom-up:
//! - [`bitlane_core`]: constants, errors, time base, shared blocks, the
//!   transport contract
//! - [`bitlane_protocol`]: bit packer, bidirectional stream, sliding
//!   windows, message/packet factories
//! - [`bitlane_conn`]: the connection (framing, sequencing, acks) and the
//!   reliable message channel (ordered delivery, block transfer)
//! - [`bitlane_net`]: addresses, UDP transport, DNS resolution, and the
//!   test network simulator
//!
//! This facade re-exports the commonly used types.

pub use bitlane_core::{constants, Block, ErrorKind, Result, TimeBase, Transport};

pub use bitlane_protocol::{
    bits_required, read_packet, sequence_greater_than, sequence_less_than, serialize_packet,
    BitReader, BitWriter, BlockMessage, Factory, Message, MessageFactory, Packet, PacketFactory,
    SequenceNumber, SlidingWindow, Stream, BLOCK_MESSAGE_TYPE,
};

pub use bitlane_conn::{
    Channel, ChannelData, ChannelStatistics, ChannelStructure, Connection, ConnectionConfig,
    ConnectionPacket, ConnectionStatistics, ReliableChannelConfig, ReliableChannelData,
    ReliableMessageChannel,
};

pub use bitlane_net::{
    Address, DnsResolver, NetworkSimulator, ResolveEntry, ResolveStatus, SimulatorState,
    SocketOptions, UdpTransport,
};
