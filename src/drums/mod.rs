//! Drums: agent-to-agent messages.

pub mod address;
pub mod mailbox;
pub mod message;
pub mod router;

pub use address::Address;
pub use mailbox::{Mailbox, SearchQuery};
pub use message::{Message, MessageKind, Priority};
pub use router::Router;
