//! Transport-facing events and contracts.

pub mod events;
pub mod transport;

pub use events::{InboundEvent, InboundPayload, OutboundMessage};
pub use transport::{ChatTransport, MessageId, COMMAND_SURFACE};
