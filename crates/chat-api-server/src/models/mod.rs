pub mod message;

pub use message::{Message, MessageKind, NewMessage, Role, Turn};
