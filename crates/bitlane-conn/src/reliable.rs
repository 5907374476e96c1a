//! Reliable ordered message delivery with block transfer.
//!
//! The channel keeps a sliding send window of unacked messages and resends
//! each one no more often than the configured resend rate until a packet
//! containing it is acked. Blocks that do not fit in a single packet occupy
//! one message id and are transmitted as individually acked fragments; the
//! receiver reassembles them and delivers a [`BlockMessage`] at the block's
//! id, so messages and blocks share one ordered id space.

use std::{
    any::Any,
    sync::Arc,
    time::{Duration, Instant},
};

use bitlane_core::{constants, Block, ErrorKind, Result, TimeBase};
use bitlane_protocol::{
    bits_required, sequence_greater_than, sequence_less_than, BlockMessage, Message,
    MessageFactory, SequenceNumber, SlidingWindow, Stream,
};
use tracing::trace;

use crate::channel::{Channel, ChannelData};

/// Configuration for a [`ReliableMessageChannel`].
#[derive(Debug, Clone)]
pub struct ReliableChannelConfig {
    /// Capacity of the send queue (power of two, at least 4).
    pub send_queue_size: u16,
    /// Capacity of the receive queue (power of two, at least 4).
    pub receive_queue_size: u16,
    /// Capacity of the per-channel sent-packets table.
    pub sent_packets_size: u16,
    /// Most messages packed into one packet (at least 2).
    pub max_messages_per_packet: u8,
    /// Largest serialized message in bytes.
    pub max_message_size: usize,
    /// Blocks up to this size ship as a single message; must not exceed
    /// `constants::MAX_SMALL_BLOCK_SIZE`.
    pub max_small_block_size: usize,
    /// Largest block accepted by `send_block`.
    pub max_large_block_size: usize,
    /// Size of each block fragment in bytes.
    pub fragment_size: usize,
    /// Ceiling on how often an individual fragment is retransmitted.
    pub fragments_per_second: f32,
    /// Minimum interval between retransmissions of the same message.
    pub message_resend_rate: Duration,
    /// Whether `send_block` is available on this channel.
    pub sending_blocks: bool,
    /// Registry used to decode inbound message types.
    pub message_factory: Arc<MessageFactory>,
}

impl ReliableChannelConfig {
    /// Creates a configuration with the default tuning.
    pub fn new(message_factory: Arc<MessageFactory>) -> Self {
        Self {
            send_queue_size: constants::DEFAULT_SEND_QUEUE_SIZE,
            receive_queue_size: constants::DEFAULT_RECEIVE_QUEUE_SIZE,
            sent_packets_size: 256,
            max_messages_per_packet: 64,
            max_message_size: 64,
            max_small_block_size: 64,
            max_large_block_size: 256 * 1024,
            fragment_size: constants::DEFAULT_FRAGMENT_SIZE,
            fragments_per_second: 60.0,
            message_resend_rate: Duration::from_millis(100),
            sending_blocks: true,
            message_factory,
        }
    }

    /// Returns the most fragments any block can split into.
    pub fn max_fragments(&self) -> usize {
        (self.max_large_block_size + self.fragment_size - 1) / self.fragment_size
    }

    fn fragment_resend_interval(&self) -> Duration {
        Duration::from_secs_f32(1.0 / self.fragments_per_second)
    }
}

/// Monotone per-channel counters, exposed for tests and diagnostics.
#[derive(Debug, Clone, Default)]
pub struct ChannelStatistics {
    /// Messages accepted by `send_message` / `send_block`.
    pub messages_sent: u64,
    /// Messages handed to the application by `receive_message`.
    pub messages_received: u64,
    /// Inbound message ids that fell beyond the receive window.
    pub messages_early: u64,
    /// Messages removed from the send queue by an ack.
    pub messages_acked: u64,
    /// Fragments written into outbound packets.
    pub fragments_sent: u64,
    /// Fragments stored into the active receive block.
    pub fragments_received: u64,
    /// Fragments acked for the first time.
    pub fragments_acked: u64,
}

impl ChannelStatistics {
    /// Alias kept for callers using the older counter name.
    pub fn messages_discarded_early(&self) -> u64 {
        self.messages_early
    }

    /// Resets all counters.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[derive(Debug)]
struct SendQueueEntry {
    message: Box<dyn Message>,
    large_block: bool,
    measured_bits: usize,
    time_last_sent: Option<Instant>,
}

#[derive(Debug)]
struct ReceiveQueueEntry {
    message: Box<dyn Message>,
}

#[derive(Debug)]
enum SentPacketRecord {
    Messages(Vec<SequenceNumber>),
    Fragment { block_id: SequenceNumber, fragment_index: usize },
}

#[derive(Debug)]
struct SendBlockState {
    block_id: SequenceNumber,
    block: Block,
    num_fragments: usize,
    acked: Vec<bool>,
    num_acked: usize,
    time_fragment_last_sent: Vec<Option<Instant>>,
}

#[derive(Debug)]
struct ReceiveBlockState {
    block_id: SequenceNumber,
    num_fragments: usize,
    received: Vec<bool>,
    num_received: usize,
    buffer: Vec<u8>,
    last_fragment_bytes: usize,
}

/// Reliable ordered delivery of messages and blocks over a lossy transport.
pub struct ReliableMessageChannel {
    config: Arc<ReliableChannelConfig>,
    time: Option<Instant>,
    send_message_id: SequenceNumber,
    receive_message_id: SequenceNumber,
    oldest_unacked_message_id: SequenceNumber,
    send_queue: SlidingWindow<SendQueueEntry>,
    receive_queue: SlidingWindow<ReceiveQueueEntry>,
    sent_packets: SlidingWindow<SentPacketRecord>,
    send_block: Option<SendBlockState>,
    receive_block: Option<ReceiveBlockState>,
    statistics: ChannelStatistics,
    measure_buffer: Vec<u8>,
}

impl ReliableMessageChannel {
    /// Creates a channel from its configuration.
    pub fn new(config: Arc<ReliableChannelConfig>) -> Self {
        debug_assert!(config.send_queue_size.is_power_of_two());
        debug_assert!(config.receive_queue_size.is_power_of_two());
        debug_assert!(config.send_queue_size >= 4 && config.receive_queue_size >= 4);
        debug_assert!(config.max_messages_per_packet >= 2);
        debug_assert!(config.max_small_block_size <= constants::MAX_SMALL_BLOCK_SIZE);
        debug_assert!(config.fragment_size >= 2);
        debug_assert!(config.max_fragments() >= 2);

        // Measurement buffer covers the largest message or small block plus
        // framing, rounded up to whole words.
        let measure_bytes = (config.max_message_size.max(config.max_small_block_size) + 19) & !3;

        Self {
            send_queue: SlidingWindow::with_capacity(config.send_queue_size),
            receive_queue: SlidingWindow::with_capacity(config.receive_queue_size),
            sent_packets: SlidingWindow::with_capacity(config.sent_packets_size),
            config,
            time: None,
            send_message_id: 0,
            receive_message_id: 0,
            oldest_unacked_message_id: 0,
            send_block: None,
            receive_block: None,
            statistics: ChannelStatistics::default(),
            measure_buffer: vec![0u8; measure_bytes],
        }
    }

    /// Returns the channel configuration.
    pub fn config(&self) -> &ReliableChannelConfig {
        &self.config
    }

    /// Returns the channel's counters.
    pub fn statistics(&self) -> &ChannelStatistics {
        &self.statistics
    }

    /// Returns true if the send queue has room for another message.
    pub fn can_send_message(&self) -> bool {
        self.send_message_id.wrapping_sub(self.oldest_unacked_message_id)
            < self.config.send_queue_size
    }

    /// Enqueues a message for reliable ordered delivery.
    ///
    /// Fails with [`ErrorKind::SendQueueFull`] if the caller has outrun the
    /// sliding window; respecting `can_send_message` is the caller's
    /// contract.
    pub fn send_message(&mut self, mut message: Box<dyn Message>) -> Result<()> {
        if !self.can_send_message() {
            return Err(ErrorKind::SendQueueFull);
        }
        let measured_bits = self.measure_message_bits(message.as_mut())?;

        let id = self.send_message_id;
        self.send_queue.insert(
            id,
            SendQueueEntry { message, large_block: false, measured_bits, time_last_sent: None },
        );
        self.send_message_id = self.send_message_id.wrapping_add(1);
        self.statistics.messages_sent += 1;
        Ok(())
    }

    /// Enqueues a block for reliable ordered delivery.
    ///
    /// Blocks no larger than `max_small_block_size` ship as a single
    /// [`BlockMessage`]; larger blocks occupy one message id and are
    /// transmitted fragment by fragment once they reach the head of the
    /// send queue.
    pub fn send_block(&mut self, block: Block) -> Result<()> {
        if !self.config.sending_blocks {
            return Err(ErrorKind::BlocksNotEnabled);
        }
        debug_assert!(!block.is_empty());
        if block.len() <= self.config.max_small_block_size {
            return self.send_message(Box::new(BlockMessage::new(block)));
        }
        if block.len() > self.config.max_large_block_size {
            return Err(ErrorKind::BlockTooLarge {
                size: block.len(),
                max: self.config.max_large_block_size,
            });
        }
        if !self.can_send_message() {
            return Err(ErrorKind::SendQueueFull);
        }

        let id = self.send_message_id;
        self.send_queue.insert(
            id,
            SendQueueEntry {
                message: Box::new(BlockMessage::new(block)),
                large_block: true,
                measured_bits: 0,
                time_last_sent: None,
            },
        );
        self.send_message_id = self.send_message_id.wrapping_add(1);
        self.statistics.messages_sent += 1;
        Ok(())
    }

    /// Returns the next in-order message, or `None` if it has not arrived.
    /// This is the only delivery path, so ordering holds by construction.
    pub fn receive_message(&mut self) -> Option<(SequenceNumber, Box<dyn Message>)> {
        let entry = self.receive_queue.remove(self.receive_message_id)?;
        let id = self.receive_message_id;
        self.receive_message_id = self.receive_message_id.wrapping_add(1);
        self.statistics.messages_received += 1;
        Some((id, entry.message))
    }

    fn measure_message_bits(&mut self, message: &mut dyn Message) -> Result<usize> {
        let max_bits = self.measure_buffer.len() * 8;
        let mut stream = Stream::write(&mut self.measure_buffer);
        match message.serialize(&mut stream) {
            Ok(()) => Ok(stream.bits_processed()),
            Err(ErrorKind::StreamOverflow) => {
                Err(ErrorKind::MessageTooLarge { bits: stream.bits_processed(), max_bits })
            }
            Err(error) => Err(error),
        }
    }

    fn write_fragment_data(
        &mut self,
        packet_sequence: SequenceNumber,
        budget_bits: usize,
        now: Instant,
    ) -> Option<(Box<dyn ChannelData>, usize)> {
        let head_id = self.oldest_unacked_message_id;
        let fragment_size = self.config.fragment_size;

        // Activate the transmission state when the block reaches the head
        // of the send queue.
        if self.send_block.as_ref().map(|state| state.block_id != head_id).unwrap_or(true) {
            let entry = self.send_queue.get(head_id)?;
            let block = entry.message.as_any().downcast_ref::<BlockMessage>()?.block().clone();
            let num_fragments = (block.len() + fragment_size - 1) / fragment_size;
            self.send_block = Some(SendBlockState {
                block_id: head_id,
                block,
                num_fragments,
                acked: vec![false; num_fragments],
                num_acked: 0,
                time_fragment_last_sent: vec![None; num_fragments],
            });
        }

        let interval = self.config.fragment_resend_interval();
        let max_fragments = self.config.max_fragments();
        let index_bits = bits_required(0, max_fragments as i64 - 1) as usize;
        let count_bits = bits_required(1, max_fragments as i64) as usize;
        let size_bits = bits_required(1, fragment_size as i64) as usize;

        let state = self.send_block.as_mut()?;
        let fragment_index = (0..state.num_fragments).find(|&index| {
            !state.acked[index]
                && state.time_fragment_last_sent[index]
                    .map(|last| now.duration_since(last) >= interval)
                    .unwrap_or(true)
        })?;

        let offset = fragment_index * fragment_size;
        let fragment_bytes = fragment_size.min(state.block.len() - offset);
        let needed_bits = 1 + 16 + index_bits + count_bits + size_bits + 8 + fragment_bytes * 8;
        if needed_bits > budget_bits {
            return None;
        }

        state.time_fragment_last_sent[fragment_index] = Some(now);
        let data = ReliableChannelData {
            config: self.config.clone(),
            payload: Some(Payload::Fragment {
                block_id: state.block_id,
                fragment_index: fragment_index as u16,
                num_fragments: state.num_fragments as u16,
                bytes: state.block.slice(offset, fragment_bytes),
            }),
        };
        let block_id = state.block_id;
        self.statistics.fragments_sent += 1;
        self.sent_packets.insert(packet_sequence, SentPacketRecord::Fragment { block_id, fragment_index });
        Some((Box::new(data), needed_bits))
    }

    fn write_message_data(
        &mut self,
        packet_sequence: SequenceNumber,
        budget_bits: usize,
        now: Instant,
    ) -> Option<(Box<dyn ChannelData>, usize)> {
        let count_bits = bits_required(1, i64::from(self.config.max_messages_per_packet)) as usize;
        let delta_bits = bits_required(1, i64::from(self.config.send_queue_size) - 1) as usize;
        let type_bits =
            bits_required(0, i64::from(self.config.message_factory.max_type_id())) as usize;
        let resend_rate = self.config.message_resend_rate;

        let mut used_bits = 1 + count_bits;
        let mut selected: Vec<(SequenceNumber, Box<dyn Message>)> = Vec::new();

        let mut id = self.oldest_unacked_message_id;
        while id != self.send_message_id
            && selected.len() < self.config.max_messages_per_packet as usize
        {
            if let Some(entry) = self.send_queue.get_mut(id) {
                // Fragments never share a packet with messages, and nothing
                // after the block can be delivered before it completes.
                if entry.large_block {
                    break;
                }
                let eligible = entry
                    .time_last_sent
                    .map(|last| now.duration_since(last) >= resend_rate)
                    .unwrap_or(true);
                if eligible {
                    let id_bits = if selected.is_empty() { 16 } else { delta_bits };
                    let message_bits = id_bits + type_bits + entry.measured_bits + 8;
                    if used_bits + message_bits <= budget_bits {
                        entry.time_last_sent = Some(now);
                        let clone = entry.message.clone_message();
                        selected.push((id, clone));
                        used_bits += message_bits;
                    }
                }
            }
            id = id.wrapping_add(1);
        }

        if selected.is_empty() {
            return None;
        }

        let ids = selected.iter().map(|(id, _)| *id).collect();
        self.sent_packets.insert(packet_sequence, SentPacketRecord::Messages(ids));
        let data = ReliableChannelData {
            config: self.config.clone(),
            payload: Some(Payload::Messages(selected)),
        };
        Some((Box::new(data), used_bits))
    }

    fn advance_oldest_unacked(&mut self) {
        while self.oldest_unacked_message_id != self.send_message_id
            && !self.send_queue.exists(self.oldest_unacked_message_id)
        {
            self.oldest_unacked_message_id = self.oldest_unacked_message_id.wrapping_add(1);
        }
    }

    fn is_early(&self, id: SequenceNumber) -> bool {
        !sequence_less_than(id, self.receive_message_id)
            && id.wrapping_sub(self.receive_message_id) >= self.config.receive_queue_size
    }

    fn process_fragment(
        &mut self,
        block_id: SequenceNumber,
        fragment_index: usize,
        num_fragments: usize,
        bytes: Block,
    ) -> Result<()> {
        // A block id behind the cursor, or one already reassembled and
        // waiting for delivery, is a duplicate.
        if sequence_less_than(block_id, self.receive_message_id)
            || self.receive_queue.exists(block_id)
        {
            return Ok(());
        }

        let needs_new_state = match &self.receive_block {
            Some(state) if state.block_id == block_id => false,
            Some(state) => {
                if sequence_greater_than(block_id, state.block_id) {
                    trace!(
                        old_block = state.block_id,
                        new_block = block_id,
                        "replacing incomplete receive block with newer one"
                    );
                    true
                } else {
                    // Fragment of an older block than the active one.
                    return Ok(());
                }
            }
            None => true,
        };
        if needs_new_state {
            self.receive_block = Some(ReceiveBlockState {
                block_id,
                num_fragments,
                received: vec![false; num_fragments],
                num_received: 0,
                buffer: vec![0u8; num_fragments * self.config.fragment_size],
                last_fragment_bytes: 0,
            });
        }

        let fragment_size = self.config.fragment_size;
        let Some(state) = self.receive_block.as_mut() else {
            return Ok(());
        };
        if state.received[fragment_index] {
            return Ok(());
        }

        let offset = fragment_index * fragment_size;
        state.buffer[offset..offset + bytes.len()].copy_from_slice(bytes.as_slice());
        state.received[fragment_index] = true;
        state.num_received += 1;
        if fragment_index + 1 == num_fragments {
            state.last_fragment_bytes = bytes.len();
        }
        self.statistics.fragments_received += 1;

        if state.num_received == state.num_fragments {
            let total = (state.num_fragments - 1) * fragment_size + state.last_fragment_bytes;
            let mut buffer = std::mem::take(&mut state.buffer);
            buffer.truncate(total);
            let completed_id = state.block_id;
            self.receive_block = None;
            let message = Box::new(BlockMessage::new(Block::from_vec(buffer)));
            self.receive_queue.insert(completed_id, ReceiveQueueEntry { message });
        }
        Ok(())
    }
}

impl Channel for ReliableMessageChannel {
    fn update(&mut self, time_base: &TimeBase) {
        self.time = Some(time_base.time);
    }

    fn write_data(
        &mut self,
        packet_sequence: SequenceNumber,
        budget_bits: usize,
    ) -> Option<(Box<dyn ChannelData>, usize)> {
        let now = self.time?;
        let head_is_block = self
            .send_queue
            .get(self.oldest_unacked_message_id)
            .map(|entry| entry.large_block)
            .unwrap_or(false);
        if head_is_block {
            self.write_fragment_data(packet_sequence, budget_bits, now)
        } else {
            self.write_message_data(packet_sequence, budget_bits, now)
        }
    }

    fn validate_data(&mut self, data: &dyn ChannelData) -> Result<()> {
        let data = data
            .as_any()
            .downcast_ref::<ReliableChannelData>()
            .ok_or(ErrorKind::ChannelDataMismatch)?;
        match &data.payload {
            None => Ok(()),
            Some(Payload::Messages(messages)) => {
                for (id, _) in messages {
                    if self.is_early(*id) {
                        self.statistics.messages_early += 1;
                        return Err(ErrorKind::MessageOutOfWindow(*id));
                    }
                }
                Ok(())
            }
            Some(Payload::Fragment { block_id, fragment_index, num_fragments, bytes }) => {
                let fragment_index = *fragment_index as usize;
                let num_fragments = *num_fragments as usize;
                if fragment_index >= num_fragments {
                    return Err(ErrorKind::FragmentMismatch);
                }
                // Every fragment except the last is exactly fragment_size.
                if fragment_index + 1 < num_fragments && bytes.len() != self.config.fragment_size {
                    return Err(ErrorKind::FragmentMismatch);
                }
                if let Some(state) = &self.receive_block {
                    if state.block_id == *block_id && state.num_fragments != num_fragments {
                        return Err(ErrorKind::FragmentMismatch);
                    }
                }
                if self.is_early(*block_id) {
                    self.statistics.messages_early += 1;
                    return Err(ErrorKind::MessageOutOfWindow(*block_id));
                }
                Ok(())
            }
        }
    }

    fn read_data(&mut self, data: Box<dyn ChannelData>) -> Result<()> {
        let data = data
            .into_any()
            .downcast::<ReliableChannelData>()
            .map_err(|_| ErrorKind::ChannelDataMismatch)?;
        match data.payload {
            None => Ok(()),
            Some(Payload::Messages(messages)) => {
                for (id, message) in messages {
                    // Ids behind the cursor or already queued are duplicates.
                    if sequence_less_than(id, self.receive_message_id)
                        || self.receive_queue.exists(id)
                    {
                        continue;
                    }
                    self.receive_queue.insert(id, ReceiveQueueEntry { message });
                }
                Ok(())
            }
            Some(Payload::Fragment { block_id, fragment_index, num_fragments, bytes }) => self
                .process_fragment(block_id, fragment_index as usize, num_fragments as usize, bytes),
        }
    }

    fn on_packet_acked(&mut self, sequence: SequenceNumber) {
        let Some(record) = self.sent_packets.remove(sequence) else {
            return;
        };
        match record {
            SentPacketRecord::Messages(ids) => {
                for id in ids {
                    if self.send_queue.remove(id).is_some() {
                        self.statistics.messages_acked += 1;
                    }
                }
                self.advance_oldest_unacked();
            }
            SentPacketRecord::Fragment { block_id, fragment_index } => {
                let mut block_complete = false;
                if let Some(state) = self.send_block.as_mut() {
                    if state.block_id == block_id && !state.acked[fragment_index] {
                        state.acked[fragment_index] = true;
                        state.num_acked += 1;
                        self.statistics.fragments_acked += 1;
                        block_complete = state.num_acked == state.num_fragments;
                    }
                }
                if block_complete {
                    self.send_block = None;
                    if self.send_queue.remove(block_id).is_some() {
                        self.statistics.messages_acked += 1;
                    }
                    self.advance_oldest_unacked();
                }
            }
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl std::fmt::Debug for ReliableMessageChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReliableMessageChannel")
            .field("send_message_id", &self.send_message_id)
            .field("receive_message_id", &self.receive_message_id)
            .field("oldest_unacked_message_id", &self.oldest_unacked_message_id)
            .field("statistics", &self.statistics)
            .finish()
    }
}

#[derive(Debug)]
enum Payload {
    Messages(Vec<(SequenceNumber, Box<dyn Message>)>),
    Fragment { block_id: SequenceNumber, fragment_index: u16, num_fragments: u16, bytes: Block },
}

/// The reliable channel's slice of a connection packet: either a list of
/// messages or a single block fragment, never both.
#[derive(Debug)]
pub struct ReliableChannelData {
    config: Arc<ReliableChannelConfig>,
    payload: Option<Payload>,
}

impl ReliableChannelData {
    /// Creates an empty data object, as the channel structure's data
    /// constructor does for the read path.
    pub fn empty(config: Arc<ReliableChannelConfig>) -> Self {
        Self { config, payload: None }
    }

    fn serialize_messages(&mut self, stream: &mut Stream<'_>) -> Result<()> {
        let max_messages = i64::from(self.config.max_messages_per_packet);
        let delta_max = i64::from(self.config.send_queue_size) - 1;
        let max_type = self.config.message_factory.max_type_id();

        if stream.is_writing() {
            let Some(Payload::Messages(messages)) = &mut self.payload else {
                debug_assert!(false, "write-mode data must carry its payload");
                return Err(ErrorKind::ChannelDataMismatch);
            };
            let mut count = messages.len() as i32;
            stream.serialize_int(&mut count, 1, max_messages as i32)?;

            let mut first_id = messages[0].0;
            stream.serialize_u16(&mut first_id)?;
            for index in 1..messages.len() {
                let mut delta = i32::from(messages[index].0.wrapping_sub(first_id));
                stream.serialize_int(&mut delta, 1, delta_max as i32)?;
            }
            for (_, message) in messages.iter_mut() {
                if max_type > 0 {
                    let mut type_id = i32::from(Message::type_id(message.as_ref()));
                    stream.serialize_int(&mut type_id, 0, i32::from(max_type))?;
                }
                message.serialize(stream)?;
            }
        } else {
            let mut count = 0i32;
            stream.serialize_int(&mut count, 1, max_messages as i32)?;

            let mut first_id = 0u16;
            stream.serialize_u16(&mut first_id)?;
            let mut ids = Vec::with_capacity(count as usize);
            ids.push(first_id);
            for _ in 1..count {
                let mut delta = 0i32;
                stream.serialize_int(&mut delta, 1, delta_max as i32)?;
                ids.push(first_id.wrapping_add(delta as u16));
            }

            let mut messages = Vec::with_capacity(count as usize);
            for id in ids {
                let mut type_id = 0i32;
                if max_type > 0 {
                    stream.serialize_int(&mut type_id, 0, i32::from(max_type))?;
                }
                let mut message = self.config.message_factory.create(type_id as u16)?;
                message.serialize(stream)?;
                messages.push((id, message));
            }
            self.payload = Some(Payload::Messages(messages));
        }
        Ok(())
    }

    fn serialize_fragment(&mut self, stream: &mut Stream<'_>) -> Result<()> {
        let max_fragments = self.config.max_fragments() as i64;
        let fragment_size = self.config.fragment_size;

        if stream.is_writing() {
            let Some(Payload::Fragment { block_id, fragment_index, num_fragments, bytes }) =
                &mut self.payload
            else {
                debug_assert!(false, "write-mode data must carry its payload");
                return Err(ErrorKind::ChannelDataMismatch);
            };
            stream.serialize_u16(block_id)?;
            let mut index = i32::from(*fragment_index);
            stream.serialize_int(&mut index, 0, max_fragments as i32 - 1)?;
            let mut count = i32::from(*num_fragments);
            stream.serialize_int(&mut count, 1, max_fragments as i32)?;
            let mut num_bytes = bytes.len() as i32;
            stream.serialize_int(&mut num_bytes, 1, fragment_size as i32)?;
            stream.write_bytes(bytes.as_slice())?;
        } else {
            let mut block_id = 0u16;
            stream.serialize_u16(&mut block_id)?;
            let mut index = 0i32;
            stream.serialize_int(&mut index, 0, max_fragments as i32 - 1)?;
            let mut count = 0i32;
            stream.serialize_int(&mut count, 1, max_fragments as i32)?;
            let mut num_bytes = 0i32;
            stream.serialize_int(&mut num_bytes, 1, fragment_size as i32)?;
            let mut bytes = vec![0u8; num_bytes as usize];
            stream.serialize_bytes(&mut bytes)?;
            self.payload = Some(Payload::Fragment {
                block_id,
                fragment_index: index as u16,
                num_fragments: count as u16,
                bytes: Block::from_vec(bytes),
            });
        }
        Ok(())
    }
}

impl ChannelData for ReliableChannelData {
    fn serialize(&mut self, stream: &mut Stream<'_>) -> Result<()> {
        let mut is_block_fragment = matches!(&self.payload, Some(Payload::Fragment { .. }));
        stream.serialize_bool(&mut is_block_fragment)?;
        if is_block_fragment {
            self.serialize_fragment(stream)
        } else {
            self.serialize_messages(stream)
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}
