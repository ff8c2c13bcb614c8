//! Session manager: store → fallback → self-contained identifier policy
//!
//! `store` never raises: it reports which tier took the write through
//! `StoreOutcome`. `retrieve` never raises either: decode and transport
//! errors are kept distinct in `lookup` and coarsened to `None` at the
//! public boundary.

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use uuid::Uuid;

use crate::config::StorageConfig;
use crate::error::TherapawError;
use crate::models::SessionRecord;

use super::codec::{CodecError, SessionCodec, ENVELOPE_SEPARATOR};
use super::memory::MemoryTier;
use super::store::{DurableStore, SpacesStore};

/// The persistence strategy that served a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Durable,
    Memory,
    SelfContained,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Durable => "durable",
            Tier::Memory => "memory",
            Tier::SelfContained => "self_contained",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a write landed in memory instead of the durable store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DegradeReason {
    NotConfigured,
    BackendFailure(String),
}

impl fmt::Display for DegradeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DegradeReason::NotConfigured => f.write_str("durable store not configured"),
            DegradeReason::BackendFailure(msg) => write!(f, "durable store failed: {}", msg),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOutcome {
    /// Written to the durable store.
    Durable,
    /// Written to the in-memory tier only.
    Degraded(DegradeReason),
    /// Nothing was written.
    Failure(String),
}

impl StoreOutcome {
    pub fn is_stored(&self) -> bool {
        !matches!(self, StoreOutcome::Failure(_))
    }

    pub fn tier(&self) -> Option<Tier> {
        match self {
            StoreOutcome::Durable => Some(Tier::Durable),
            StoreOutcome::Degraded(_) => Some(Tier::Memory),
            StoreOutcome::Failure(_) => None,
        }
    }
}

#[derive(Error, Debug)]
pub enum LookupError {
    #[error("Session not found")]
    NotFound,

    #[error("Session payload could not be decoded: {0}")]
    Decode(#[from] CodecError),
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Session rejected: {0}")]
    Rejected(String),

    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// A record found by `lookup`, with the tier that held it.
#[derive(Debug, Clone)]
pub struct Located {
    pub record: SessionRecord,
    pub tier: Tier,
}

/// Result of `persist`: the identifier to hand to the client.
#[derive(Debug, Clone)]
pub struct PersistedSession {
    pub session_id: String,
    pub key: String,
    pub outcome: StoreOutcome,
}

impl PersistedSession {
    /// True when the session is not in durable storage.
    pub fn degraded(&self) -> bool {
        !matches!(self.outcome, StoreOutcome::Durable)
    }
}

/// Keys become object paths under the store prefix.
fn is_path_safe(key: &str) -> bool {
    !key.is_empty() && key != "." && key != ".." && !key.contains(|c: char| c == '/' || c == '\\')
}

/// Generate a fresh session key: `session-<unix-millis>-<uuid>`.
///
/// Never contains the envelope separator.
pub fn generate_key() -> String {
    format!(
        "session-{}-{}",
        Utc::now().timestamp_millis(),
        Uuid::new_v4().simple()
    )
}

pub struct SessionManager {
    durable: Option<Arc<dyn DurableStore>>,
    memory: Arc<MemoryTier>,
    codec: SessionCodec,
}

impl SessionManager {
    pub fn new(
        durable: Option<Arc<dyn DurableStore>>,
        memory: Arc<MemoryTier>,
        codec: SessionCodec,
    ) -> Self {
        Self {
            durable,
            memory,
            codec,
        }
    }

    /// Build the tiers from storage config. The durable tier is present only
    /// when every Spaces credential is set.
    pub fn from_config(
        config: &StorageConfig,
        memory: Arc<MemoryTier>,
    ) -> Result<Self, TherapawError> {
        let durable = SpacesStore::from_config(config)?
            .map(|store| Arc::new(store) as Arc<dyn DurableStore>);

        if durable.is_none() {
            tracing::warn!("DigitalOcean Spaces not configured, sessions are kept in memory");
        }

        Ok(Self::new(durable, memory, SessionCodec::from_config(config)))
    }

    pub fn is_durable_store_configured(&self) -> bool {
        self.durable.is_some()
    }

    pub fn durable_backend_name(&self) -> Option<&str> {
        self.durable.as_ref().map(|d| d.name())
    }

    pub fn memory(&self) -> &Arc<MemoryTier> {
        &self.memory
    }

    pub fn codec(&self) -> &SessionCodec {
        &self.codec
    }

    /// Write `record` under `key`: durable store first, memory on any failure.
    pub async fn store(&self, key: &str, record: &SessionRecord) -> StoreOutcome {
        if !is_path_safe(key) || key.contains(ENVELOPE_SEPARATOR) {
            tracing::error!(key = %key, "Refusing to store session under invalid key");
            return StoreOutcome::Failure(format!(
                "session key must be non-empty and must not contain '{}' or path separators",
                ENVELOPE_SEPARATOR
            ));
        }

        let Some(durable) = &self.durable else {
            tracing::warn!(key = %key, "Durable store not configured, using in-memory storage");
            self.memory.insert(key, record.clone());
            return StoreOutcome::Degraded(DegradeReason::NotConfigured);
        };

        let body = match self.codec.encode_transport(record) {
            Ok(body) => body,
            Err(e) => {
                tracing::error!(key = %key, error = %e, "Failed to encode session");
                return StoreOutcome::Failure(e.to_string());
            }
        };

        match durable.put(key, body).await {
            Ok(()) => {
                tracing::info!(key = %key, backend = durable.name(), "Session stored durably");
                StoreOutcome::Durable
            }
            Err(e) => {
                tracing::error!(
                    key = %key,
                    backend = durable.name(),
                    error = %e,
                    "Failed to store session durably, falling back to in-memory"
                );
                self.memory.insert(key, record.clone());
                StoreOutcome::Degraded(DegradeReason::BackendFailure(e.to_string()))
            }
        }
    }

    /// Public read path: any failure is reported as absent.
    pub async fn retrieve(&self, key: &str) -> Option<SessionRecord> {
        match self.lookup(key).await {
            Ok(located) => {
                tracing::debug!(tier = %located.tier, "Session retrieved");
                Some(located.record)
            }
            Err(LookupError::NotFound) => {
                tracing::debug!(key = %key, "Session not found");
                None
            }
            Err(e) => {
                tracing::warn!(error = %e, "Session lookup failed, reporting not found");
                None
            }
        }
    }

    /// Read path with distinct error kinds. Never mutates any tier.
    pub async fn lookup(&self, key: &str) -> Result<Located, LookupError> {
        if let Some((_, envelope)) = SessionCodec::split_identifier(key) {
            let record = self.codec.decode_embedded(envelope)?;
            return Ok(Located {
                record,
                tier: Tier::SelfContained,
            });
        }

        if !is_path_safe(key) {
            tracing::warn!(key = %key, "Rejecting session lookup with unsafe key");
            return Err(LookupError::NotFound);
        }

        let mut decode_failure = None;

        if let Some(durable) = &self.durable {
            match durable.get(key).await {
                Ok(Some(bytes)) => match self.codec.decode_transport(&bytes) {
                    Ok(record) => {
                        return Ok(Located {
                            record,
                            tier: Tier::Durable,
                        })
                    }
                    Err(e) => {
                        tracing::warn!(key = %key, error = %e, "Stored session payload is malformed");
                        decode_failure = Some(e);
                    }
                },
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(
                        key = %key,
                        backend = durable.name(),
                        error = %e,
                        "Failed to retrieve session durably, trying in-memory"
                    );
                }
            }
        }

        if let Some(record) = self.memory.get(key) {
            return Ok(Located {
                record,
                tier: Tier::Memory,
            });
        }

        match decode_failure {
            Some(e) => Err(LookupError::Decode(e)),
            None => Err(LookupError::NotFound),
        }
    }

    /// Persist a freshly created record under a generated key and choose the
    /// identifier form: reference when durable, self-contained otherwise.
    pub async fn persist(&self, record: SessionRecord) -> Result<PersistedSession, SessionError> {
        let key = generate_key();
        let outcome = self.store(&key, &record).await;

        let session_id = match &outcome {
            StoreOutcome::Durable => key.clone(),
            StoreOutcome::Degraded(reason) => {
                tracing::warn!(key = %key, reason = %reason, "Embedding session in its identifier");
                match self.codec.self_contained_id(&key, &record) {
                    Ok(id) => id,
                    Err(e) => {
                        // Nobody will ever hold this key
                        self.memory.remove(&key);
                        tracing::warn!(key = %key, error = %e, "Session not embeddable, discarding");
                        return Err(e.into());
                    }
                }
            }
            StoreOutcome::Failure(reason) => return Err(SessionError::Rejected(reason.clone())),
        };

        Ok(PersistedSession {
            session_id,
            key,
            outcome,
        })
    }
}
