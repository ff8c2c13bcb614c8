pub mod chat;
pub mod session;

pub use chat::{ChatMessage, ChatRole};
pub use session::SessionRecord;
