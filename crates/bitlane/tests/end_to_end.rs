//! End-to-end tests for the reliable message channel.
//!
//! These drive a full connection against the network simulator the way a
//! game loop would: write a packet, push it through the simulated network,
//! read whatever arrives, drain delivered messages, tick time forward.

use std::{
    any::Any,
    sync::Arc,
    time::{Duration, Instant},
};

use bitlane::{
    Address, Block, BlockMessage, Channel, ChannelData, ChannelStructure, Connection,
    ConnectionConfig, ConnectionPacket, Message, MessageFactory, NetworkSimulator, Packet,
    PacketFactory, ReliableChannelConfig, ReliableChannelData, ReliableMessageChannel,
    SimulatorState, Stream, TimeBase, BLOCK_MESSAGE_TYPE,
};
use rand::{rngs::StdRng, Rng, SeedableRng};

const PACKET_CONNECTION: u16 = 0;
const MESSAGE_TEST: u16 = 1;

#[derive(Debug, Clone, Default)]
struct TestMessage {
    sequence: u16,
}

impl Message for TestMessage {
    fn type_id(&self) -> u16 {
        MESSAGE_TEST
    }

    fn serialize(&mut self, stream: &mut Stream<'_>) -> bitlane::Result<()> {
        stream.serialize_u16(&mut self.sequence)?;
        for _ in 0..(self.sequence % 8) {
            let mut padding = 0u32;
            stream.serialize_bits(&mut padding, 32)?;
        }
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

fn test_message_factory() -> Arc<MessageFactory> {
    let mut factory = MessageFactory::new();
    factory.register(MESSAGE_TEST, || Box::new(TestMessage::default()) as Box<dyn Message>);
    Arc::new(factory)
}

fn build_connection(channel_config: Arc<ReliableChannelConfig>, time: Instant) -> Connection {
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
        Box::new(ConnectionPacket::new(PACKET_CONNECTION, for_packet.clone())) as Box<dyn Packet>
    });

    let mut config = ConnectionConfig::new(PACKET_CONNECTION, Arc::new(packet_factory), structure);
    config.max_packet_size = 256;
    Connection::new(config, time)
}

fn test_address() -> Address {
    "::1".parse().unwrap()
}

/// One tick of the loopback pump: write a packet into the simulator, pull
/// out whatever is due, advance time.
fn pump_once(
    connection: &mut Connection,
    simulator: &mut NetworkSimulator,
    time_base: &mut TimeBase,
) {
    let bytes = connection.write_packet_bytes().unwrap();
    simulator.send_packet(test_address(), bytes);
    simulator.update(time_base);
    while let Some((_, payload)) = simulator.receive_packet() {
        let _ = connection.read_packet_bytes(&payload);
    }
    connection.update(time_base);
    time_base.advance();
}

/// Pumps the loop until `total_messages` have been delivered, asserting
/// in-order ids and handing each message to `verify`.
fn run_until_received(
    connection: &mut Connection,
    simulator: &mut NetworkSimulator,
    time_base: &mut TimeBase,
    total_messages: u64,
    mut verify: impl FnMut(u16, Box<dyn Message>),
) {
    let mut num_received: u64 = 0;
    let mut iteration = 0u32;
    while num_received < total_messages {
        pump_once(connection, simulator, time_base);

        let channel = connection.channel_downcast_mut::<ReliableMessageChannel>(0).unwrap();
        while let Some((id, message)) = channel.receive_message() {
            assert_eq!(u64::from(id), num_received, "messages must arrive in id order");
            verify(id, message);
            num_received += 1;
        }
        assert_eq!(channel.statistics().messages_early, 0);

        iteration += 1;
        assert!(iteration < 10_000, "transfer did not complete in bounded iterations");
    }
}

#[test]
fn test_messages_lossless() {
    let start = Instant::now();
    let channel_config = Arc::new(ReliableChannelConfig::new(test_message_factory()));
    let mut connection = build_connection(channel_config, start);

    const NUM_MESSAGES: u16 = 32;
    {
        let channel = connection.channel_downcast_mut::<ReliableMessageChannel>(0).unwrap();
        for sequence in 0..NUM_MESSAGES {
            channel.send_message(Box::new(TestMessage { sequence })).unwrap();
        }
        assert_eq!(channel.statistics().messages_sent, u64::from(NUM_MESSAGES));
    }

    let mut simulator = NetworkSimulator::with_seed(7, start);
    simulator.add_state(SimulatorState::new(Duration::from_millis(1), Duration::ZERO, 0.0));
    let mut time_base = TimeBase::new(start, Duration::from_millis(10));

    run_until_received(
        &mut connection,
        &mut simulator,
        &mut time_base,
        u64::from(NUM_MESSAGES),
        |id, message| {
            assert_eq!(Message::type_id(message.as_ref()), MESSAGE_TEST);
            let test = message.into_any().downcast::<TestMessage>().unwrap();
            assert_eq!(test.sequence, id);
        },
    );

    assert_eq!(connection.statistics().packets_discarded, 0);
    assert_eq!(connection.statistics().read_packet_failures, 0);
}

#[test]
fn test_messages_heavy_loss_and_jitter() {
    let start = Instant::now();
    let channel_config = Arc::new(ReliableChannelConfig::new(test_message_factory()));
    let mut connection = build_connection(channel_config, start);

    const NUM_MESSAGES: u16 = 32;
    {
        let channel = connection.channel_downcast_mut::<ReliableMessageChannel>(0).unwrap();
        for sequence in 0..NUM_MESSAGES {
            channel.send_message(Box::new(TestMessage { sequence })).unwrap();
        }
    }

    let mut simulator = NetworkSimulator::with_seed(19, start);
    simulator.add_state(SimulatorState::new(
        Duration::from_millis(1),
        Duration::from_millis(90),
        0.5,
    ));
    let mut time_base = TimeBase::new(start, Duration::from_millis(10));

    run_until_received(
        &mut connection,
        &mut simulator,
        &mut time_base,
        u64::from(NUM_MESSAGES),
        |id, message| {
            let test = message.into_any().downcast::<TestMessage>().unwrap();
            assert_eq!(test.sequence, id);
        },
    );

    let channel = connection.channel_downcast_mut::<ReliableMessageChannel>(0).unwrap();
    assert_eq!(channel.statistics().messages_received, u64::from(NUM_MESSAGES));
}

#[test]
fn test_small_blocks() {
    let start = Instant::now();
    let channel_config = Arc::new(ReliableChannelConfig::new(test_message_factory()));
    let num_blocks = channel_config.max_small_block_size as u16;
    let mut connection = build_connection(channel_config, start);

    {
        let channel = connection.channel_downcast_mut::<ReliableMessageChannel>(0).unwrap();
        for index in 0..num_blocks {
            let size = usize::from(index) + 1;
            let bytes: Vec<u8> =
                (0..size).map(|j| ((usize::from(index) + j) % 256) as u8).collect();
            channel.send_block(Block::from_vec(bytes)).unwrap();
        }
    }

    let mut simulator = NetworkSimulator::with_seed(11, start);
    simulator.add_state(SimulatorState::new(Duration::from_millis(1), Duration::ZERO, 0.0));
    let mut time_base = TimeBase::new(start, Duration::from_millis(10));

    run_until_received(
        &mut connection,
        &mut simulator,
        &mut time_base,
        u64::from(num_blocks),
        |id, message| {
            assert_eq!(Message::type_id(message.as_ref()), BLOCK_MESSAGE_TYPE);
            let block = message.into_any().downcast::<BlockMessage>().unwrap().into_block();
            assert_eq!(block.len(), usize::from(id) + 1);
            for (j, &byte) in block.as_slice().iter().enumerate() {
                assert_eq!(byte, ((usize::from(id) + j) % 256) as u8);
            }
        },
    );
}

#[test]
fn test_large_blocks() {
    let start = Instant::now();
    let mut config = ReliableChannelConfig::new(test_message_factory());
    config.fragment_size = 64;
    let fragment_size = config.fragment_size;
    let mut connection = build_connection(Arc::new(config), start);

    const NUM_BLOCKS: usize = 16;
    let mut expected_fragments: u64 = 0;
    {
        let channel = connection.channel_downcast_mut::<ReliableMessageChannel>(0).unwrap();
        for index in 0..NUM_BLOCKS {
            let size = (index + 1) * 1024 + index;
            expected_fragments += ((size + fragment_size - 1) / fragment_size) as u64;
            let bytes: Vec<u8> = (0..size).map(|j| ((index + j) % 256) as u8).collect();
            channel.send_block(Block::from_vec(bytes)).unwrap();
        }
    }

    let mut simulator = NetworkSimulator::with_seed(13, start);
    simulator.add_state(SimulatorState::new(Duration::from_millis(1), Duration::ZERO, 0.0));
    let mut time_base = TimeBase::new(start, Duration::from_millis(10));

    run_until_received(
        &mut connection,
        &mut simulator,
        &mut time_base,
        NUM_BLOCKS as u64,
        |id, message| {
            assert_eq!(Message::type_id(message.as_ref()), BLOCK_MESSAGE_TYPE);
            let block = message.into_any().downcast::<BlockMessage>().unwrap().into_block();
            let index = usize::from(id);
            assert_eq!(block.len(), (index + 1) * 1024 + index);
            for (j, &byte) in block.as_slice().iter().enumerate() {
                assert_eq!(byte, ((index + j) % 256) as u8);
            }
        },
    );

    // Keep pumping until the acks for the tail fragments come home.
    let mut extra = 0u32;
    loop {
        {
            let channel = connection.channel_downcast_mut::<ReliableMessageChannel>(0).unwrap();
            if channel.statistics().fragments_acked == expected_fragments {
                break;
            }
        }
        pump_once(&mut connection, &mut simulator, &mut time_base);
        extra += 1;
        assert!(extra < 1_000, "fragment acks did not settle");
    }
}

#[test]
fn test_mixed_messages_and_blocks() {
    let start = Instant::now();
    let channel_config = Arc::new(ReliableChannelConfig::new(test_message_factory()));
    let mut connection = build_connection(channel_config, start);

    #[derive(Debug)]
    enum Expected {
        Message,
        Block(usize),
    }

    const NUM_ITEMS: usize = 256;
    let mut rng = StdRng::seed_from_u64(23);
    let mut expected_items = Vec::with_capacity(NUM_ITEMS);
    {
        let channel = connection.channel_downcast_mut::<ReliableMessageChannel>(0).unwrap();
        for index in 0..NUM_ITEMS {
            if rng.random_range(0..10) != 0 {
                channel.send_message(Box::new(TestMessage { sequence: index as u16 })).unwrap();
                expected_items.push(Expected::Message);
            } else {
                let size = (index + 1) * 8 + index;
                let bytes: Vec<u8> = (0..size).map(|j| ((index + j) % 256) as u8).collect();
                channel.send_block(Block::from_vec(bytes)).unwrap();
                expected_items.push(Expected::Block(size));
            }
        }
    }

    let mut simulator = NetworkSimulator::with_seed(29, start);
    simulator.add_state(SimulatorState::new(Duration::from_millis(1), Duration::ZERO, 0.0));
    let mut time_base = TimeBase::new(start, Duration::from_millis(10));

    let expected = &expected_items;
    run_until_received(
        &mut connection,
        &mut simulator,
        &mut time_base,
        NUM_ITEMS as u64,
        |id, message| {
            let index = usize::from(id);
            match &expected[index] {
                Expected::Message => {
                    assert_eq!(Message::type_id(message.as_ref()), MESSAGE_TEST);
                    let test = message.into_any().downcast::<TestMessage>().unwrap();
                    assert_eq!(usize::from(test.sequence), index);
                }
                Expected::Block(size) => {
                    assert_eq!(Message::type_id(message.as_ref()), BLOCK_MESSAGE_TYPE);
                    let block =
                        message.into_any().downcast::<BlockMessage>().unwrap().into_block();
                    assert_eq!(block.len(), *size);
                    for (j, &byte) in block.as_slice().iter().enumerate() {
                        assert_eq!(byte, ((index + j) % 256) as u8);
                    }
                }
            }
        },
    );
}

#[test]
fn test_packet_replay_is_idempotent() {
    let start = Instant::now();
    let channel_config = Arc::new(ReliableChannelConfig::new(test_message_factory()));
    let mut sender = build_connection(channel_config.clone(), start);
    let mut receiver = build_connection(channel_config, start);

    {
        let channel = sender.channel_downcast_mut::<ReliableMessageChannel>(0).unwrap();
        for sequence in 0..3u16 {
            channel.send_message(Box::new(TestMessage { sequence })).unwrap();
        }
    }

    let bytes = sender.write_packet_bytes().unwrap();
    receiver.read_packet_bytes(&bytes).unwrap();

    let delivered: Vec<u16> = {
        let channel = receiver.channel_downcast_mut::<ReliableMessageChannel>(0).unwrap();
        std::iter::from_fn(|| channel.receive_message()).map(|(id, _)| id).collect()
    };
    assert_eq!(delivered, vec![0, 1, 2]);

    // The exact same serialized packet again: nothing new may come out.
    receiver.read_packet_bytes(&bytes).unwrap();
    let channel = receiver.channel_downcast_mut::<ReliableMessageChannel>(0).unwrap();
    assert!(channel.receive_message().is_none());
    assert_eq!(channel.statistics().messages_received, 3);
    assert_eq!(receiver.statistics().packets_discarded, 0);
}

#[test]
fn test_serialize_round_trip_fuzz() {
    let factory = test_message_factory();
    let mut rng = StdRng::seed_from_u64(31);

    for _ in 0..256 {
        let mut buffer = [0u8; 128];
        let (type_id, original_sequence, original_bytes) = if rng.random_bool(0.5) {
            let sequence: u16 = rng.random();
            let mut message = TestMessage { sequence };
            let mut write = Stream::write(&mut buffer);
            Message::serialize(&mut message, &mut write).unwrap();
            write.flush();
            (MESSAGE_TEST, Some(sequence), None)
        } else {
            let size = rng.random_range(1..=64usize);
            let bytes: Vec<u8> = (0..size).map(|_| rng.random()).collect();
            let mut message = BlockMessage::new(Block::from_vec(bytes.clone()));
            let mut write = Stream::write(&mut buffer);
            Message::serialize(&mut message, &mut write).unwrap();
            write.flush();
            (BLOCK_MESSAGE_TYPE, None, Some(bytes))
        };

        let mut decoded = factory.create(type_id).unwrap();
        let mut read = Stream::read(&buffer);
        decoded.serialize(&mut read).unwrap();

        match (original_sequence, original_bytes) {
            (Some(sequence), None) => {
                let test = decoded.into_any().downcast::<TestMessage>().unwrap();
                assert_eq!(test.sequence, sequence);
            }
            (None, Some(bytes)) => {
                let block = decoded.into_any().downcast::<BlockMessage>().unwrap().into_block();
                assert_eq!(block.as_slice(), &bytes[..]);
            }
            _ => unreachable!(),
        }
    }
}
