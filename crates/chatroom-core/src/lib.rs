pub mod identity;
pub mod message;

pub use identity::{IdentityError, Username, DEFAULT_USERNAME};
pub use message::{InboundMessage, Message, MessageKind, UnknownKind};
