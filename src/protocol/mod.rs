//! The witness ↔ forge merge protocol carried over drums.

pub mod body;
pub mod handlers;
pub mod messages;

pub use handlers::{HandlerRegistry, PatrolReport, Witness, process_inbox};
pub use messages::{MessageType, parse_message_type};
