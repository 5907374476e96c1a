use std::{any::Any, fmt};

use bitlane_core::{ErrorKind, Result, TimeBase};
use bitlane_protocol::{SequenceNumber, Stream};

/// Per-channel slice of a connection packet.
///
/// Each channel type pairs with a data type that knows how to serialize the
/// channel's contribution in both directions; the structure's data
/// constructor produces empty instances for the read path.
pub trait ChannelData: fmt::Debug {
    /// Reads or writes the channel payload.
    fn serialize(&mut self, stream: &mut Stream<'_>) -> Result<()>;

    /// Upcast for downcasting to the concrete data type.
    fn as_any(&self) -> &dyn Any;

    /// Consuming upcast for downcasting to the concrete data type.
    fn into_any(self: Box<Self>) -> Box<dyn Any>;
}

/// A delivery discipline layered atop a connection.
///
/// Channels contribute payload to outbound packets, consume payload from
/// inbound ones, and are notified when a packet they contributed to is
/// acked.
pub trait Channel {
    /// Advances the channel's time. Called once per tick by the connection.
    fn update(&mut self, time_base: &TimeBase);

    /// Contributes payload for the packet being assembled, given the
    /// remaining bit budget. Returns the data and the number of bits it
    /// will occupy, or `None` if the channel has nothing eligible to send.
    fn write_data(
        &mut self,
        packet_sequence: SequenceNumber,
        budget_bits: usize,
    ) -> Option<(Box<dyn ChannelData>, usize)>;

    /// Checks inbound payload against the channel's windows without
    /// applying it. The connection validates every channel's payload before
    /// applying any, so a rejected packet leaves no side effects.
    fn validate_data(&mut self, data: &dyn ChannelData) -> Result<()>;

    /// Applies previously validated inbound payload.
    fn read_data(&mut self, data: Box<dyn ChannelData>) -> Result<()>;

    /// Notifies the channel that the given packet sequence was acked.
    fn on_packet_acked(&mut self, sequence: SequenceNumber);

    /// Upcast for downcasting to the concrete channel type.
    fn as_any(&self) -> &dyn Any;

    /// Mutable upcast for downcasting to the concrete channel type.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

type ChannelConstructor = Box<dyn Fn() -> Box<dyn Channel>>;
type DataConstructor = Box<dyn Fn() -> Box<dyn ChannelData>>;

struct ChannelEntry {
    name: String,
    create_channel: ChannelConstructor,
    create_data: DataConstructor,
}

/// Ordered declaration of the channels attached to a connection.
///
/// Channels are declared once at startup and the structure is then locked;
/// from that point their indices and data types are immutable for the
/// connection's lifetime. Both endpoints must declare the same structure or
/// their packets will not decode.
pub struct ChannelStructure {
    entries: Vec<ChannelEntry>,
    locked: bool,
}

impl ChannelStructure {
    /// Creates an empty, unlocked structure.
    pub fn new() -> Self {
        Self { entries: Vec::new(), locked: false }
    }

    /// Appends a channel declaration. Fails once the structure is locked.
    pub fn add_channel(
        &mut self,
        name: &str,
        create_channel: impl Fn() -> Box<dyn Channel> + 'static,
        create_data: impl Fn() -> Box<dyn ChannelData> + 'static,
    ) -> Result<()> {
        if self.locked {
            return Err(ErrorKind::ChannelStructureLocked);
        }
        self.entries.push(ChannelEntry {
            name: name.to_owned(),
            create_channel: Box::new(create_channel),
            create_data: Box::new(create_data),
        });
        Ok(())
    }

    /// Locks the structure, freezing channel indices and types.
    pub fn lock(&mut self) {
        self.locked = true;
    }

    /// Returns true once the structure is locked.
    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Returns the number of declared channels.
    pub fn num_channels(&self) -> usize {
        self.entries.len()
    }

    /// Returns the name a channel was declared under.
    pub fn channel_name(&self, index: usize) -> Option<&str> {
        self.entries.get(index).map(|entry| entry.name.as_str())
    }

    /// Constructs the channel declared at `index`.
    pub fn create_channel(&self, index: usize) -> Box<dyn Channel> {
        debug_assert!(self.locked);
        (self.entries[index].create_channel)()
    }

    /// Constructs an empty data object for the channel declared at `index`.
    pub fn create_channel_data(&self, index: usize) -> Box<dyn ChannelData> {
        debug_assert!(self.locked);
        (self.entries[index].create_data)()
    }
}

impl Default for ChannelStructure {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ChannelStructure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelStructure")
            .field("channels", &self.entries.iter().map(|e| e.name.as_str()).collect::<Vec<_>>())
            .field("locked", &self.locked)
            .finish()
    }
}
