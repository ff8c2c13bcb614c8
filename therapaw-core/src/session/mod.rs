//! Session persistence for behavioral evaluations.
//!
//! Three tiers, tried in a fixed order:
//! - **Durable**: S3-compatible object storage (`store::SpacesStore`)
//! - **Memory**: process-local map (`memory::MemoryTier`)
//! - **Self-contained**: the whole record packed into the identifier (`codec`)
//!
//! `manager::SessionManager` hides which tier served a call.

pub mod codec;
pub mod manager;
pub mod memory;
pub mod store;

pub use codec::{CodecError, OversizePolicy, SessionCodec, DEFAULT_INLINE_IMAGE_CAP};
pub use manager::{
    generate_key, DegradeReason, Located, LookupError, PersistedSession, SessionError,
    SessionManager, StoreOutcome, Tier,
};
pub use memory::MemoryTier;
pub use store::{DurableStore, SpacesStore, StoreError};
