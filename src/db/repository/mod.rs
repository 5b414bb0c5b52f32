pub mod message_registry;

pub use message_registry::MessageRegistryRepository;
