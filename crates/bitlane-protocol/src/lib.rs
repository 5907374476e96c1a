#![warn(missing_docs)]

//! bitlane-protocol: bit-level serialization and the building blocks of the
//! packet pipeline.
//!
//! One `serialize` routine per wire object serves both directions: the same
//! code path that writes a packet also reads it, which keeps encode and
//! decode from drifting apart.

/// Bit-granular read/write over byte buffers.
pub mod bitpack;
/// CRC32 packet trailers.
pub mod checksum;
/// Type-id to constructor registries.
pub mod factory;
/// Message trait and the reserved block message.
pub mod message;
/// Top-level packet trait and framing helpers.
pub mod packet;
/// Wrapping 16-bit sequence arithmetic.
pub mod sequence;
/// Fixed-capacity circular buffers indexed by sequence.
pub mod sliding_window;
/// Mode-switched serializer built on the bit packer.
pub mod stream;

pub use bitpack::{bits_required, BitReader, BitWriter};
pub use factory::{Factory, MessageFactory, PacketFactory};
pub use message::{BlockMessage, Message, BLOCK_MESSAGE_TYPE};
pub use packet::{read_packet, serialize_packet, Packet};
pub use sequence::{sequence_greater_than, sequence_less_than, SequenceNumber};
pub use sliding_window::SlidingWindow;
pub use stream::Stream;
