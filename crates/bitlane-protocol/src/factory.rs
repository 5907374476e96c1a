use std::collections::HashMap;

use bitlane_core::{ErrorKind, Result};

use crate::{
    message::{BlockMessage, Message, BLOCK_MESSAGE_TYPE},
    packet::Packet,
};

/// Registry mapping 16-bit type ids to constructors for polymorphic wire
/// objects.
///
/// Type ids should be dense starting at 0: the highest registered id bounds
/// the bit width used to serialize ids on the wire.
pub struct Factory<T: ?Sized> {
    constructors: HashMap<u16, Box<dyn Fn() -> Box<T>>>,
    max_type_id: u16,
}

impl<T: ?Sized> Factory<T> {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self { constructors: HashMap::new(), max_type_id: 0 }
    }

    /// Registers a constructor under `type_id`, replacing any previous one.
    pub fn register(&mut self, type_id: u16, constructor: impl Fn() -> Box<T> + 'static) {
        self.max_type_id = self.max_type_id.max(type_id);
        self.constructors.insert(type_id, Box::new(constructor));
    }

    /// Constructs a fresh instance of the type registered under `type_id`.
    pub fn create(&self, type_id: u16) -> Option<Box<T>> {
        self.constructors.get(&type_id).map(|constructor| constructor())
    }

    /// Returns the highest registered type id.
    pub fn max_type_id(&self) -> u16 {
        self.max_type_id
    }

    /// Returns the number of registered types.
    pub fn num_types(&self) -> usize {
        self.constructors.len()
    }
}

impl<T: ?Sized> Default for Factory<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized> std::fmt::Debug for Factory<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Factory")
            .field("num_types", &self.constructors.len())
            .field("max_type_id", &self.max_type_id)
            .finish()
    }
}

/// Registry for message types. Type id 0 is always [`BlockMessage`].
#[derive(Debug)]
pub struct MessageFactory {
    factory: Factory<dyn Message>,
}

impl MessageFactory {
    /// Creates a factory with the reserved block message pre-registered.
    pub fn new() -> Self {
        let mut factory = Factory::new();
        factory.register(BLOCK_MESSAGE_TYPE, || {
            Box::new(BlockMessage::empty()) as Box<dyn Message>
        });
        Self { factory }
    }

    /// Registers an application message type. Id 0 is reserved.
    pub fn register(&mut self, type_id: u16, constructor: impl Fn() -> Box<dyn Message> + 'static) {
        debug_assert!(type_id != BLOCK_MESSAGE_TYPE, "type id 0 is reserved for block messages");
        self.factory.register(type_id, constructor);
    }

    /// Constructs a fresh message of the given type.
    pub fn create(&self, type_id: u16) -> Result<Box<dyn Message>> {
        self.factory.create(type_id).ok_or(ErrorKind::UnknownMessageType(type_id))
    }

    /// Returns the highest registered message type id.
    pub fn max_type_id(&self) -> u16 {
        self.factory.max_type_id()
    }
}

impl Default for MessageFactory {
    fn default() -> Self {
        Self::new()
    }
}

/// Registry for top-level packet types.
#[derive(Debug)]
pub struct PacketFactory {
    factory: Factory<dyn Packet>,
}

impl PacketFactory {
    /// Creates an empty packet registry.
    pub fn new() -> Self {
        Self { factory: Factory::new() }
    }

    /// Registers a packet type.
    pub fn register(&mut self, type_id: u16, constructor: impl Fn() -> Box<dyn Packet> + 'static) {
        self.factory.register(type_id, constructor);
    }

    /// Constructs a fresh packet of the given type.
    pub fn create(&self, type_id: u16) -> Result<Box<dyn Packet>> {
        self.factory.create(type_id).ok_or(ErrorKind::UnknownPacketType(type_id))
    }

    /// Returns the highest registered packet type id.
    pub fn max_type_id(&self) -> u16 {
        self.factory.max_type_id()
    }
}

impl Default for PacketFactory {
    fn default() -> Self {
        Self::new()
    }
}
