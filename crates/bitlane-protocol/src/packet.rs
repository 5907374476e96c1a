use std::{any::Any, fmt};

use bitlane_core::Result;

use crate::{factory::PacketFactory, stream::Stream};

/// Top-level wire unit. The type id identifies the packet variant so that
/// several packet kinds can share one transport.
pub trait Packet: fmt::Debug {
    /// Returns this packet's registered type id.
    fn type_id(&self) -> u16;

    /// Reads or writes the packet body.
    fn serialize(&mut self, stream: &mut Stream<'_>) -> Result<()>;

    /// Upcast for downcasting to the concrete packet type.
    fn as_any(&self) -> &dyn Any;

    /// Consuming upcast for downcasting to the concrete packet type.
    fn into_any(self: Box<Self>) -> Box<dyn Any>;
}

/// Serializes `packet` into `buffer` with its type id framed in front.
/// Returns the number of bytes used.
pub fn serialize_packet(
    packet: &mut dyn Packet,
    max_packet_type: u16,
    buffer: &mut [u8],
) -> Result<usize> {
    let mut stream = Stream::write(buffer);
    if max_packet_type > 0 {
        let mut type_id = i32::from(Packet::type_id(packet));
        stream.serialize_int(&mut type_id, 0, i32::from(max_packet_type))?;
    }
    packet.serialize(&mut stream)?;
    stream.flush();
    Ok(stream.bytes_processed())
}

/// Reads a type-framed packet out of `buffer` using the factory's
/// constructors.
pub fn read_packet(factory: &PacketFactory, buffer: &[u8]) -> Result<Box<dyn Packet>> {
    let mut stream = Stream::read(buffer);
    let mut type_id = 0i32;
    if factory.max_type_id() > 0 {
        stream.serialize_int(&mut type_id, 0, i32::from(factory.max_type_id()))?;
    }
    let mut packet = factory.create(type_id as u16)?;
    packet.serialize(&mut stream)?;
    Ok(packet)
}
