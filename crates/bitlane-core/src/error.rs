use std::fmt;

/// Convenience alias used across the bitlane crates.
pub type Result<T> = std::result::Result<T, ErrorKind>;

/// Errors that can occur in the protocol core.
///
/// Malformed inbound data is reported through these variants and counted by
/// the connection; none of them abort the endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// A read or write ran past the end of the serialization buffer.
    StreamOverflow,
    /// A decoded integer fell outside its declared `[min, max]` range.
    ValueOutOfRange {
        /// The decoded value.
        value: i64,
        /// Lower bound of the declared range.
        min: i64,
        /// Upper bound of the declared range.
        max: i64,
    },
    /// A serialized check cookie did not match the expected magic value.
    CheckMismatch {
        /// The magic value the stream expected.
        expected: u32,
        /// The value actually read.
        actual: u32,
    },
    /// The packet trailer failed CRC32 validation.
    ChecksumFailed,
    /// The buffer was too short to contain a well-formed packet.
    PacketTooShort,
    /// A message type id had no registered constructor.
    UnknownMessageType(u16),
    /// A packet type id had no registered constructor.
    UnknownPacketType(u16),
    /// A packet decoded to a different type than the connection expects.
    PacketTypeMismatch {
        /// The type id the connection was configured with.
        expected: u16,
        /// The type id carried by the packet.
        actual: u16,
    },
    /// An inbound packet sequence was older than the receive window tail.
    StalePacket(u16),
    /// A received message id fell beyond the receive window.
    MessageOutOfWindow(u16),
    /// A fragment disagreed with the active block's fragment layout.
    FragmentMismatch,
    /// A channel was handed payload data of a different channel's type.
    ChannelDataMismatch,
    /// The send queue has no room at the next message id; the caller has
    /// outrun the sliding-window contract.
    SendQueueFull,
    /// A message serialized to more bits than the channel allows.
    MessageTooLarge {
        /// Serialized size of the message in bits.
        bits: usize,
        /// Channel limit in bits.
        max_bits: usize,
    },
    /// A block exceeded the channel's `max_large_block_size`.
    BlockTooLarge {
        /// Size of the rejected block in bytes.
        size: usize,
        /// Channel limit in bytes.
        max: usize,
    },
    /// `send_block` was called on a channel configured without block support.
    BlocksNotEnabled,
    /// A channel was added to a structure after it was locked.
    ChannelStructureLocked,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::StreamOverflow => write!(f, "serialization ran past the end of the buffer"),
            ErrorKind::ValueOutOfRange { value, min, max } => {
                write!(f, "value {} outside serialized range [{}, {}]", value, min, max)
            }
            ErrorKind::CheckMismatch { expected, actual } => {
                write!(f, "stream check failed: expected {:#010x}, got {:#010x}", expected, actual)
            }
            ErrorKind::ChecksumFailed => write!(f, "packet checksum validation failed"),
            ErrorKind::PacketTooShort => write!(f, "packet too short to decode"),
            ErrorKind::UnknownMessageType(ty) => write!(f, "unknown message type {}", ty),
            ErrorKind::UnknownPacketType(ty) => write!(f, "unknown packet type {}", ty),
            ErrorKind::PacketTypeMismatch { expected, actual } => {
                write!(f, "packet type mismatch: expected {}, got {}", expected, actual)
            }
            ErrorKind::StalePacket(sequence) => {
                write!(f, "packet sequence {} is older than the receive window", sequence)
            }
            ErrorKind::MessageOutOfWindow(id) => {
                write!(f, "message id {} is beyond the receive window", id)
            }
            ErrorKind::FragmentMismatch => write!(f, "fragment does not match the active block"),
            ErrorKind::ChannelDataMismatch => {
                write!(f, "channel payload does not match the channel's data type")
            }
            ErrorKind::SendQueueFull => write!(f, "send queue is full"),
            ErrorKind::MessageTooLarge { bits, max_bits } => {
                write!(f, "message serializes to {} bits, limit is {}", bits, max_bits)
            }
            ErrorKind::BlockTooLarge { size, max } => {
                write!(f, "block of {} bytes exceeds limit of {}", size, max)
            }
            ErrorKind::BlocksNotEnabled => write!(f, "channel is not configured to send blocks"),
            ErrorKind::ChannelStructureLocked => {
                write!(f, "channel structure is locked and cannot be modified")
            }
        }
    }
}

impl std::error::Error for ErrorKind {}
