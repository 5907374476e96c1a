use std::{
    any::Any,
    fmt,
    sync::Arc,
    time::{Duration, Instant},
};

use bitlane_core::{constants, ErrorKind, Result, TimeBase};
use bitlane_protocol::{
    bits_required,
    checksum::{append_checksum_in_place, validate_and_strip_checksum},
    read_packet, serialize_packet, Packet, PacketFactory, SequenceNumber, SlidingWindow, Stream,
};
use tracing::warn;

use crate::channel::{Channel, ChannelData, ChannelStructure};

/// Configuration for a [`Connection`].
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Type id of the connection packet in the packet factory.
    pub packet_type: u16,
    /// Hard ceiling for a serialized packet, framing included. Must be a
    /// multiple of 4 bytes.
    pub max_packet_size: usize,
    /// Capacity of the sent/received packet windows.
    pub sliding_window_size: u16,
    /// Append and validate a CRC32 trailer on the byte-level path.
    pub use_checksums: bool,
    /// Registry used to decode inbound packets.
    pub packet_factory: Arc<PacketFactory>,
    /// Ordered channel declaration shared by both endpoints.
    pub channel_structure: Arc<ChannelStructure>,
}

impl ConnectionConfig {
    /// Creates a configuration with default sizes for the given factory and
    /// channel structure.
    pub fn new(
        packet_type: u16,
        packet_factory: Arc<PacketFactory>,
        channel_structure: Arc<ChannelStructure>,
    ) -> Self {
        Self {
            packet_type,
            max_packet_size: constants::DEFAULT_MAX_PACKET_SIZE,
            sliding_window_size: constants::DEFAULT_SLIDING_WINDOW_SIZE,
            use_checksums: false,
            packet_factory,
            channel_structure,
        }
    }
}

/// The wire unit exchanged between two connections: sequence, ack vector,
/// and one optional payload slice per declared channel.
#[derive(Debug)]
pub struct ConnectionPacket {
    packet_type: u16,
    structure: Arc<ChannelStructure>,
    /// Sequence number assigned by the sending connection.
    pub sequence: SequenceNumber,
    /// Most recent sequence received from the peer.
    pub ack: SequenceNumber,
    /// Bit *i* set ⇔ sequence `ack - i` was received.
    pub ack_bits: u32,
    channel_data: Vec<Option<Box<dyn ChannelData>>>,
}

impl ConnectionPacket {
    /// Creates an empty packet for the given channel structure.
    pub fn new(packet_type: u16, structure: Arc<ChannelStructure>) -> Self {
        let channel_data = (0..structure.num_channels()).map(|_| None).collect();
        Self { packet_type, structure, sequence: 0, ack: 0, ack_bits: 0, channel_data }
    }

    fn set_channel_data(&mut self, index: usize, data: Box<dyn ChannelData>) {
        self.channel_data[index] = Some(data);
    }

    fn channel_data_ref(&self, index: usize) -> Option<&dyn ChannelData> {
        self.channel_data[index].as_deref()
    }

    fn take_channel_data(&mut self, index: usize) -> Option<Box<dyn ChannelData>> {
        self.channel_data[index].take()
    }
}

impl Packet for ConnectionPacket {
    fn type_id(&self) -> u16 {
        self.packet_type
    }

    fn serialize(&mut self, stream: &mut Stream<'_>) -> Result<()> {
        stream.serialize_u16(&mut self.sequence)?;
        stream.serialize_u16(&mut self.ack)?;
        stream.serialize_u32(&mut self.ack_bits)?;

        for index in 0..self.structure.num_channels() {
            if stream.is_writing() {
                let mut has_data = self.channel_data[index].is_some();
                stream.serialize_bool(&mut has_data)?;
                if let Some(data) = &mut self.channel_data[index] {
                    data.serialize(stream)?;
                }
            } else {
                let mut has_data = false;
                stream.serialize_bool(&mut has_data)?;
                if has_data {
                    let mut data = self.structure.create_channel_data(index);
                    data.serialize(stream)?;
                    self.channel_data[index] = Some(data);
                }
            }
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

/// Monotone per-connection counters, exposed for tests and diagnostics.
#[derive(Debug, Clone, Default)]
pub struct ConnectionStatistics {
    /// Packets handed to `read_packet`, accepted or not.
    pub packets_read: u64,
    /// Packets produced by `write_packet`.
    pub packets_written: u64,
    /// Packets rejected because their sequence fell behind the window.
    pub packets_discarded: u64,
    /// Sent packets acked for the first time.
    pub packets_acked: u64,
    /// Packets rejected as malformed, with no state retained.
    pub read_packet_failures: u64,
}

impl ConnectionStatistics {
    /// Resets all counters.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[derive(Debug)]
struct SentPacketEntry {
    acked: bool,
}

#[derive(Debug)]
struct ReceivedPacketEntry;

/// Packet framing, sequencing, and ack feedback over one peer relationship.
///
/// The caller drives `update` once per tick and marshals bytes between the
/// transport and `write_packet_bytes` / `read_packet_bytes` (or the
/// packet-object variants). All calls must come from one thread.
pub struct Connection {
    config: ConnectionConfig,
    sequence: SequenceNumber,
    sent_packets: SlidingWindow<SentPacketEntry>,
    received_packets: SlidingWindow<ReceivedPacketEntry>,
    channels: Vec<Box<dyn Channel>>,
    statistics: ConnectionStatistics,
}

impl Connection {
    /// Creates a connection and instantiates its channels.
    pub fn new(config: ConnectionConfig, time: Instant) -> Self {
        assert!(config.max_packet_size % 4 == 0, "max_packet_size must be a multiple of 4");
        assert!(config.channel_structure.is_locked(), "channel structure must be locked");

        let channels: Vec<Box<dyn Channel>> = (0..config.channel_structure.num_channels())
            .map(|index| config.channel_structure.create_channel(index))
            .collect();

        let mut connection = Self {
            sequence: 0,
            sent_packets: SlidingWindow::with_capacity(config.sliding_window_size),
            received_packets: SlidingWindow::with_capacity(config.sliding_window_size),
            channels,
            statistics: ConnectionStatistics::default(),
            config,
        };
        let time_base = TimeBase::new(time, Duration::ZERO);
        for channel in &mut connection.channels {
            channel.update(&time_base);
        }
        connection
    }

    /// Advances time for every channel. Call once per tick.
    pub fn update(&mut self, time_base: &TimeBase) {
        for channel in &mut self.channels {
            channel.update(time_base);
        }
    }

    /// Returns the connection's counters.
    pub fn statistics(&self) -> &ConnectionStatistics {
        &self.statistics
    }

    /// Returns the channel at `index`.
    pub fn channel(&self, index: usize) -> &dyn Channel {
        &*self.channels[index]
    }

    /// Returns the channel at `index` mutably.
    pub fn channel_mut(&mut self, index: usize) -> &mut dyn Channel {
        &mut *self.channels[index]
    }

    /// Returns the channel at `index` downcast to its concrete type.
    pub fn channel_downcast_mut<T: Channel + 'static>(&mut self, index: usize) -> Option<&mut T> {
        self.channels[index].as_any_mut().downcast_mut::<T>()
    }

    fn ack_vector(&self) -> (SequenceNumber, u32) {
        let ack = self.received_packets.sequence_num().wrapping_sub(1);
        let mut ack_bits = 0u32;
        for i in 0..32u16 {
            if self.received_packets.exists(ack.wrapping_sub(i)) {
                ack_bits |= 1 << i;
            }
        }
        (ack, ack_bits)
    }

    /// Assembles the next outbound packet: assigns a sequence, computes the
    /// ack vector, and asks each channel in declaration order to fill the
    /// remaining budget.
    pub fn write_packet(&mut self) -> ConnectionPacket {
        let sequence = self.sequence;
        self.sequence = self.sequence.wrapping_add(1);
        let (ack, ack_bits) = self.ack_vector();

        let mut packet =
            ConnectionPacket::new(self.config.packet_type, self.config.channel_structure.clone());
        packet.sequence = sequence;
        packet.ack = ack;
        packet.ack_bits = ack_bits;

        let type_bits =
            bits_required(0, i64::from(self.config.packet_factory.max_type_id())) as usize;
        let checksum_bits = if self.config.use_checksums { 32 } else { 0 };
        let header_bits = type_bits + 64 + self.channels.len() + checksum_bits + 32;
        let mut budget_bits = (self.config.max_packet_size * 8).saturating_sub(header_bits);

        for (index, channel) in self.channels.iter_mut().enumerate() {
            if let Some((data, bits)) = channel.write_data(sequence, budget_bits) {
                budget_bits = budget_bits.saturating_sub(bits);
                packet.set_channel_data(index, data);
            }
        }

        self.sent_packets.insert(sequence, SentPacketEntry { acked: false });
        self.statistics.packets_written += 1;
        packet
    }

    /// Consumes an inbound packet: validates every channel's payload,
    /// updates the receive window, processes acks, and dispatches payload
    /// to the channels. A packet that fails at any step is discarded whole
    /// and leaves no state behind.
    pub fn read_packet(&mut self, mut packet: ConnectionPacket) -> Result<()> {
        self.statistics.packets_read += 1;

        for index in 0..self.channels.len() {
            if let Some(data) = packet.channel_data_ref(index) {
                if let Err(error) = self.channels[index].validate_data(data) {
                    self.statistics.read_packet_failures += 1;
                    warn!(channel = index, %error, "discarding packet with invalid channel data");
                    return Err(error);
                }
            }
        }

        if !self.received_packets.insert(packet.sequence, ReceivedPacketEntry) {
            self.statistics.packets_discarded += 1;
            return Err(ErrorKind::StalePacket(packet.sequence));
        }

        self.process_acks(packet.ack, packet.ack_bits);

        for index in 0..self.channels.len() {
            if let Some(data) = packet.take_channel_data(index) {
                if let Err(error) = self.channels[index].read_data(data) {
                    self.statistics.read_packet_failures += 1;
                    return Err(error);
                }
            }
        }
        Ok(())
    }

    fn process_acks(&mut self, ack: SequenceNumber, ack_bits: u32) {
        for i in 0..32u16 {
            if ack_bits & (1 << i) != 0 {
                let sequence = ack.wrapping_sub(i);
                if let Some(entry) = self.sent_packets.get_mut(sequence) {
                    if !entry.acked {
                        entry.acked = true;
                        self.statistics.packets_acked += 1;
                        for channel in &mut self.channels {
                            channel.on_packet_acked(sequence);
                        }
                    }
                }
            }
        }
    }

    /// Assembles and serializes the next outbound packet, returning the
    /// bytes to hand to the transport.
    pub fn write_packet_bytes(&mut self) -> Result<Vec<u8>> {
        let mut packet = self.write_packet();
        let mut buffer = vec![0u8; self.config.max_packet_size];
        let bytes = serialize_packet(
            &mut packet,
            self.config.packet_factory.max_type_id(),
            &mut buffer,
        )?;
        buffer.truncate(bytes);
        if self.config.use_checksums {
            append_checksum_in_place(&mut buffer);
        }
        debug_assert!(buffer.len() <= self.config.max_packet_size);
        Ok(buffer)
    }

    /// Deserializes and consumes a packet received from the transport.
    /// Malformed input discards the packet and bumps
    /// `read_packet_failures`.
    pub fn read_packet_bytes(&mut self, data: &[u8]) -> Result<()> {
        match self.parse_packet_bytes(data) {
            Ok(packet) => self.read_packet(packet),
            Err(error) => {
                self.statistics.read_packet_failures += 1;
                warn!(%error, "failed to parse inbound packet");
                Err(error)
            }
        }
    }

    fn parse_packet_bytes(&self, data: &[u8]) -> Result<ConnectionPacket> {
        let payload =
            if self.config.use_checksums { validate_and_strip_checksum(data)? } else { data };
        if payload.is_empty() {
            return Err(ErrorKind::PacketTooShort);
        }

        // The bit reader works on whole words; serialized packets were
        // truncated to their used bytes, so pad back out with zeros.
        let mut padded = vec![0u8; (payload.len() + 3) & !3];
        padded[..payload.len()].copy_from_slice(payload);

        let packet = read_packet(&self.config.packet_factory, &padded)?;
        if Packet::type_id(&*packet) != self.config.packet_type {
            return Err(ErrorKind::PacketTypeMismatch {
                expected: self.config.packet_type,
                actual: Packet::type_id(&*packet),
            });
        }
        let packet = packet
            .into_any()
            .downcast::<ConnectionPacket>()
            .map_err(|_| ErrorKind::UnknownPacketType(self.config.packet_type))?;
        Ok(*packet)
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("sequence", &self.sequence)
            .field("num_channels", &self.channels.len())
            .field("statistics", &self.statistics)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reliable::{ReliableChannelConfig, ReliableChannelData, ReliableMessageChannel};
    use bitlane_protocol::{Message, MessageFactory};

    const PACKET_CONNECTION: u16 = 0;
    const MESSAGE_TEST: u16 = 1;

    #[derive(Debug, Clone, Default)]
    struct TestMessage {
        value: u16,
    }

    impl Message for TestMessage {
        fn type_id(&self) -> u16 {
            MESSAGE_TEST
        }

        fn serialize(&mut self, stream: &mut Stream<'_>) -> Result<()> {
            stream.serialize_u16(&mut self.value)?;
            stream.serialize_check(0xDEAD_BEEF)
        }

        fn clone_message(&self) -> Box<dyn Message> {
            Box::new(self.clone())
        }

        fn as_any(&self) -> &dyn Any {
            self
        }

        fn into_any(self: Box<Self>) -> Box<dyn Any> {
            self
        }
    }

    fn test_config(use_checksums: bool) -> ConnectionConfig {
        let mut message_factory = MessageFactory::new();
        message_factory
            .register(MESSAGE_TEST, || Box::new(TestMessage::default()) as Box<dyn Message>);
        let channel_config = Arc::new(ReliableChannelConfig::new(Arc::new(message_factory)));

        let mut structure = ChannelStructure::new();
        let for_channel = channel_config.clone();
        let for_data = channel_config;
        structure
            .add_channel(
                "reliable message channel",
                move || Box::new(ReliableMessageChannel::new(for_channel.clone())) as Box<dyn Channel>,
                move || Box::new(ReliableChannelData::empty(for_data.clone())) as Box<dyn ChannelData>,
            )
            .unwrap();
        structure.lock();
        let structure = Arc::new(structure);

        let mut packet_factory = PacketFactory::new();
        let for_packet = structure.clone();
        packet_factory.register(PACKET_CONNECTION, move || {
            Box::new(ConnectionPacket::new(PACKET_CONNECTION, for_packet.clone()))
                as Box<dyn Packet>
        });

        let mut config =
            ConnectionConfig::new(PACKET_CONNECTION, Arc::new(packet_factory), structure);
        config.max_packet_size = 256;
        config.use_checksums = use_checksums;
        config
    }

    #[test]
    fn test_loopback_delivers_and_acks() {
        let time = Instant::now();
        let mut sender = Connection::new(test_config(false), time);
        let mut receiver = Connection::new(test_config(false), time);

        let channel = sender
            .channel_downcast_mut::<ReliableMessageChannel>(0)
            .unwrap();
        for value in 0..4u16 {
            channel.send_message(Box::new(TestMessage { value })).unwrap();
        }

        let bytes = sender.write_packet_bytes().unwrap();
        receiver.read_packet_bytes(&bytes).unwrap();
        assert_eq!(receiver.statistics().packets_read, 1);

        // The receiver's next packet acks the sender's.
        let reply = receiver.write_packet_bytes().unwrap();
        sender.read_packet_bytes(&reply).unwrap();
        assert_eq!(sender.statistics().packets_acked, 1);

        let channel = receiver
            .channel_downcast_mut::<ReliableMessageChannel>(0)
            .unwrap();
        for expected in 0..4u16 {
            let (id, message) = channel.receive_message().unwrap();
            assert_eq!(id, expected);
            let test = message.into_any().downcast::<TestMessage>().unwrap();
            assert_eq!(test.value, expected);
        }
    }

    #[test]
    fn test_checksummed_packets_round_trip_and_reject_corruption() {
        let time = Instant::now();
        let mut sender = Connection::new(test_config(true), time);
        let mut receiver = Connection::new(test_config(true), time);

        sender
            .channel_downcast_mut::<ReliableMessageChannel>(0)
            .unwrap()
            .send_message(Box::new(TestMessage { value: 42 }))
            .unwrap();

        let mut bytes = sender.write_packet_bytes().unwrap();
        receiver.read_packet_bytes(&bytes).unwrap();
        assert_eq!(receiver.statistics().read_packet_failures, 0);

        // Corrupt one byte of a second copy: the packet must be dropped.
        let mut sender2 = Connection::new(test_config(true), time);
        sender2
            .channel_downcast_mut::<ReliableMessageChannel>(0)
            .unwrap()
            .send_message(Box::new(TestMessage { value: 43 }))
            .unwrap();
        bytes = sender2.write_packet_bytes().unwrap();
        bytes[4] ^= 0xFF;
        assert_eq!(receiver.read_packet_bytes(&bytes), Err(ErrorKind::ChecksumFailed));
        assert_eq!(receiver.statistics().read_packet_failures, 1);
    }

    #[test]
    fn test_stale_packet_is_discarded() {
        let time = Instant::now();
        let mut receiver = Connection::new(test_config(false), time);
        let structure = receiver.config.channel_structure.clone();

        // Fill the receive window far ahead, then replay a packet from
        // behind the tail.
        let mut ahead = ConnectionPacket::new(PACKET_CONNECTION, structure.clone());
        ahead.sequence = 1000;
        receiver.read_packet(ahead).unwrap();

        let mut stale = ConnectionPacket::new(PACKET_CONNECTION, structure);
        stale.sequence = 500;
        assert_eq!(receiver.read_packet(stale), Err(ErrorKind::StalePacket(500)));
        assert_eq!(receiver.statistics().packets_discarded, 1);
        assert_eq!(receiver.statistics().packets_read, 2);
    }

    #[test]
    fn test_ack_vector_reflects_received_window() {
        let time = Instant::now();
        let mut connection = Connection::new(test_config(false), time);
        let structure = connection.config.channel_structure.clone();

        // Receive sequences 0, 1, 3 (2 is missing).
        for sequence in [0u16, 1, 3] {
            let mut packet = ConnectionPacket::new(PACKET_CONNECTION, structure.clone());
            packet.sequence = sequence;
            connection.read_packet(packet).unwrap();
        }

        let (ack, ack_bits) = connection.ack_vector();
        assert_eq!(ack, 3);
        // Bit i corresponds to sequence ack - i: 3, 2, 1, 0.
        assert_eq!(ack_bits & 0b1111, 0b1101);
    }

    #[test]
    fn test_duplicate_ack_counted_once() {
        let time = Instant::now();
        let mut sender = Connection::new(test_config(false), time);
        let mut receiver = Connection::new(test_config(false), time);

        let bytes = sender.write_packet_bytes().unwrap();
        receiver.read_packet_bytes(&bytes).unwrap();

        let reply = receiver.write_packet_bytes().unwrap();
        sender.read_packet_bytes(&reply).unwrap();
        assert_eq!(sender.statistics().packets_acked, 1);

        // A second reply acking the same packet does not double count.
        let reply2 = receiver.write_packet_bytes().unwrap();
        sender.read_packet_bytes(&reply2).unwrap();
        assert_eq!(sender.statistics().packets_acked, 1);
    }
}
