pub mod chat;
pub mod config;
pub mod error;
pub mod models;
pub mod session;
pub mod vision;

pub use chat::{ChatAgent, ChatError, GradientChatClient};
pub use config::TherapawConfig;
pub use error::TherapawError;
pub use models::{ChatMessage, ChatRole, SessionRecord};
pub use session::{
    DegradeReason, DurableStore, LookupError, MemoryTier, OversizePolicy, PersistedSession,
    SessionCodec, SessionError, SessionManager, SpacesStore, StoreError, StoreOutcome, Tier,
};
pub use vision::{ReplicateVisionClient, VisionError, VisionModel};
