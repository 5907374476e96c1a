use std::{any::Any, fmt};

use bitlane_core::{constants::MAX_SMALL_BLOCK_SIZE, Block, Result};

use crate::stream::Stream;

/// Type id reserved for [`BlockMessage`]. Application message types start
/// at 1.
pub const BLOCK_MESSAGE_TYPE: u16 = 0;

/// Application-level object carried by a message channel.
///
/// Each message serializes itself through the bidirectional [`Stream`]; the
/// framework supplies the per-channel message id and the 16-bit type id on
/// the wire. Implementations are registered with a
/// [`MessageFactory`](crate::factory::MessageFactory) under their type id.
pub trait Message: fmt::Debug {
    /// Returns this message's registered type id.
    fn type_id(&self) -> u16;

    /// Reads or writes the message body.
    fn serialize(&mut self, stream: &mut Stream<'_>) -> Result<()>;

    /// Clones the message behind the trait object. Implementations backed by
    /// [`Block`]s share the underlying allocation.
    fn clone_message(&self) -> Box<dyn Message>;

    /// Upcast for downcasting to the concrete message type.
    fn as_any(&self) -> &dyn Any;

    /// Consuming upcast for downcasting to the concrete message type.
    fn into_any(self: Box<Self>) -> Box<dyn Any>;
}

/// The reserved message carrying a small block, or a reassembled large one.
///
/// Small blocks (at most [`MAX_SMALL_BLOCK_SIZE`] bytes) travel on the wire
/// as an ordinary message; large blocks never serialize through this path —
/// the channel reassembles their fragments and materializes a `BlockMessage`
/// locally.
#[derive(Debug, Clone)]
pub struct BlockMessage {
    block: Block,
}

impl BlockMessage {
    /// Creates a block message around `block`.
    pub fn new(block: Block) -> Self {
        Self { block }
    }

    /// Creates an empty block message, as registered with the factory.
    pub fn empty() -> Self {
        Self { block: Block::from_vec(Vec::new()) }
    }

    /// Returns the carried block.
    pub fn block(&self) -> &Block {
        &self.block
    }

    /// Consumes the message and returns the block.
    pub fn into_block(self) -> Block {
        self.block
    }
}

impl Message for BlockMessage {
    fn type_id(&self) -> u16 {
        BLOCK_MESSAGE_TYPE
    }

    fn serialize(&mut self, stream: &mut Stream<'_>) -> Result<()> {
        let mut length_minus_one = if stream.is_writing() {
            debug_assert!(!self.block.is_empty());
            debug_assert!(self.block.len() <= MAX_SMALL_BLOCK_SIZE);
            (self.block.len() - 1) as i32
        } else {
            0
        };
        stream.serialize_int(&mut length_minus_one, 0, MAX_SMALL_BLOCK_SIZE as i32 - 1)?;
        let length = length_minus_one as usize + 1;

        if stream.is_writing() {
            stream.write_bytes(self.block.as_slice())?;
        } else {
            let mut bytes = vec![0u8; length];
            stream.serialize_bytes(&mut bytes)?;
            self.block = Block::from_vec(bytes);
        }
        Ok(())
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_message_round_trip() {
        let payload: Vec<u8> = (0u8..=63).collect();
        let mut original = BlockMessage::new(Block::from_vec(payload.clone()));

        let mut buffer = [0u8; 128];
        let mut write = Stream::write(&mut buffer);
        original.serialize(&mut write).unwrap();
        write.flush();

        let mut decoded = BlockMessage::empty();
        let mut read = Stream::read(&buffer);
        decoded.serialize(&mut read).unwrap();

        assert_eq!(decoded.block().as_slice(), &payload[..]);
    }

    #[test]
    fn test_block_message_single_byte() {
        let mut original = BlockMessage::new(Block::from_vec(vec![0xAB]));

        let mut buffer = [0u8; 8];
        let mut write = Stream::write(&mut buffer);
        original.serialize(&mut write).unwrap();
        write.flush();

        let mut decoded = BlockMessage::empty();
        let mut read = Stream::read(&buffer);
        decoded.serialize(&mut read).unwrap();
        assert_eq!(decoded.block().as_slice(), &[0xAB]);
    }
}
