//! Session codec: transport JSON and self-contained identifier envelopes
//!
//! Transport form is plain JSON of the record. The embeddable form caps the
//! image reference, JSON-encodes, then base64url-encodes (no padding) so the
//! result can sit in a URL path after `<key>_`.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::StorageConfig;
use crate::models::SessionRecord;

/// Separates the lookup key from the envelope in a self-contained identifier.
pub const ENVELOPE_SEPARATOR: char = '_';

/// Default byte cap on an inlined image reference.
pub const DEFAULT_INLINE_IMAGE_CAP: usize = 50_000;

/// What to do when an image reference exceeds the inline cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OversizePolicy {
    /// Cut the reference at the cap (lossy).
    #[default]
    Truncate,
    /// Refuse to build the envelope.
    Reject,
}

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid base64 envelope: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Inline image is {actual} bytes, limit is {limit}")]
    ImageTooLarge { actual: usize, limit: usize },
}

#[derive(Debug, Clone)]
pub struct SessionCodec {
    inline_image_cap: usize,
    oversize: OversizePolicy,
}

impl Default for SessionCodec {
    fn default() -> Self {
        Self::new(DEFAULT_INLINE_IMAGE_CAP, OversizePolicy::Truncate)
    }
}

impl SessionCodec {
    pub fn new(inline_image_cap: usize, oversize: OversizePolicy) -> Self {
        Self {
            inline_image_cap,
            oversize,
        }
    }

    pub fn from_config(config: &StorageConfig) -> Self {
        Self::new(config.inline_image_cap, config.oversize_image)
    }

    pub fn inline_image_cap(&self) -> usize {
        self.inline_image_cap
    }

    pub fn oversize_policy(&self) -> OversizePolicy {
        self.oversize
    }

    pub fn encode_transport(&self, record: &SessionRecord) -> Result<Vec<u8>, CodecError> {
        Ok(serde_json::to_vec(record)?)
    }

    pub fn decode_transport(&self, bytes: &[u8]) -> Result<SessionRecord, CodecError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Encode a record for embedding in an identifier, applying the inline cap.
    pub fn encode_embedded(&self, record: &SessionRecord) -> Result<String, CodecError> {
        let fitted = self.fit_image(record)?;
        let json = match &fitted {
            Some(truncated) => serde_json::to_vec(truncated)?,
            None => serde_json::to_vec(record)?,
        };
        Ok(URL_SAFE_NO_PAD.encode(json))
    }

    pub fn decode_embedded(&self, envelope: &str) -> Result<SessionRecord, CodecError> {
        let json = URL_SAFE_NO_PAD.decode(envelope.trim())?;
        Ok(serde_json::from_slice(&json)?)
    }

    /// Build `<key>_<envelope>`.
    pub fn self_contained_id(&self, key: &str, record: &SessionRecord) -> Result<String, CodecError> {
        let envelope = self.encode_embedded(record)?;
        Ok(format!("{}{}{}", key, ENVELOPE_SEPARATOR, envelope))
    }

    /// Split a self-contained identifier into `(key, envelope)`.
    ///
    /// Returns `None` for reference-form identifiers. Keys never contain the
    /// separator, so the first one marks the envelope start.
    pub fn split_identifier(id: &str) -> Option<(&str, &str)> {
        id.split_once(ENVELOPE_SEPARATOR)
            .filter(|(key, envelope)| !key.is_empty() && !envelope.is_empty())
    }

    /// `Ok(None)` when the record already fits.
    fn fit_image(&self, record: &SessionRecord) -> Result<Option<SessionRecord>, CodecError> {
        let image = record.image_reference();
        if image.len() <= self.inline_image_cap {
            return Ok(None);
        }

        match self.oversize {
            OversizePolicy::Reject => Err(CodecError::ImageTooLarge {
                actual: image.len(),
                limit: self.inline_image_cap,
            }),
            OversizePolicy::Truncate => {
                let kept = truncate_on_char_boundary(image, self.inline_image_cap);
                tracing::warn!(
                    original_bytes = image.len(),
                    kept_bytes = kept.len(),
                    "Truncating inline image for self-contained session id"
                );
                Ok(Some(record.with_image_reference(kept.to_string())))
            }
        }
    }
}

fn truncate_on_char_boundary(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};

    fn fixed_record(image: &str) -> SessionRecord {
        let ts: DateTime<Utc> = "2025-01-01T00:00:00Z".parse().unwrap();
        SessionRecord::with_timestamp("Dog is anxious", image, ts)
    }

    #[test]
    fn test_transport_is_lossless() {
        let codec = SessionCodec::default();
        let record = fixed_record(&"x".repeat(200_000));

        let bytes = codec.encode_transport(&record).unwrap();
        let decoded = codec.decode_transport(&bytes).unwrap();
        assert_eq!(decoded, record, "transport encoding must not apply the inline cap");
    }

    #[test]
    fn test_transport_rejects_malformed_json() {
        let codec = SessionCodec::default();
        let result = codec.decode_transport(b"{\"analysis\": 42}");
        assert!(matches!(result, Err(CodecError::Json(_))));
    }

    #[test]
    fn test_embedded_truncates_large_image_to_cap() {
        let codec = SessionCodec::default();
        let record = fixed_record(&"a".repeat(200_000));

        let envelope = codec.encode_embedded(&record).unwrap();
        let decoded = codec.decode_embedded(&envelope).unwrap();

        assert_eq!(decoded.image_reference().len(), 50_000);
        assert_eq!(decoded.analysis(), record.analysis());
        assert_eq!(decoded.timestamp(), record.timestamp());
    }

    #[test]
    fn test_embedded_truncation_is_idempotent() {
        let codec = SessionCodec::new(1_000, OversizePolicy::Truncate);
        let record = fixed_record(&"b".repeat(5_000));

        let first = codec
            .decode_embedded(&codec.encode_embedded(&record).unwrap())
            .unwrap();
        let second = codec
            .decode_embedded(&codec.encode_embedded(&first).unwrap())
            .unwrap();

        assert_eq!(first.image_reference().len(), 1_000);
        assert_eq!(first, second, "repeated round trips must not lose more data");
    }

    #[test]
    fn test_embedded_keeps_small_image_intact() {
        let codec = SessionCodec::default();
        let record = fixed_record("ref://img1");
        let decoded = codec
            .decode_embedded(&codec.encode_embedded(&record).unwrap())
            .unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_truncation_respects_utf8_boundaries() {
        // 'é' is two bytes; a cap of 5 would split the third one
        let codec = SessionCodec::new(5, OversizePolicy::Truncate);
        let record = fixed_record("ééééé");

        let decoded = codec
            .decode_embedded(&codec.encode_embedded(&record).unwrap())
            .unwrap();
        assert_eq!(decoded.image_reference(), "éé");
    }

    #[test]
    fn test_reject_policy_refuses_oversize_image() {
        let codec = SessionCodec::new(10, OversizePolicy::Reject);
        let record = fixed_record(&"c".repeat(11));

        match codec.encode_embedded(&record) {
            Err(CodecError::ImageTooLarge { actual, limit }) => {
                assert_eq!(actual, 11);
                assert_eq!(limit, 10);
            }
            other => panic!("Expected ImageTooLarge, got {:?}", other),
        }

        let fits = fixed_record(&"c".repeat(10));
        assert!(codec.encode_embedded(&fits).is_ok());
    }

    #[test]
    fn test_envelope_is_url_safe() {
        let codec = SessionCodec::default();
        // Bytes that produce '+' and '/' in the standard alphabet
        let record = fixed_record("data:image/png;base64,>>>???~~~");
        let envelope = codec.encode_embedded(&record).unwrap();

        assert!(envelope
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn test_self_contained_id_splits_at_first_separator() {
        let codec = SessionCodec::default();
        let record = fixed_record("ref://img1");
        let id = codec.self_contained_id("session-1-abc", &record).unwrap();

        let (key, envelope) = SessionCodec::split_identifier(&id).expect("has envelope");
        assert_eq!(key, "session-1-abc");
        assert_eq!(codec.decode_embedded(envelope).unwrap(), record);
    }

    #[test]
    fn test_split_identifier_reference_form() {
        assert!(SessionCodec::split_identifier("session-1-abc").is_none());
        assert!(SessionCodec::split_identifier("s1").is_none());
        assert!(SessionCodec::split_identifier("s1_").is_none());
        assert!(SessionCodec::split_identifier("_payload").is_none());
    }

    #[test]
    fn test_decode_embedded_rejects_garbage() {
        let codec = SessionCodec::default();
        assert!(matches!(
            codec.decode_embedded("!!not base64!!"),
            Err(CodecError::Base64(_))
        ));
        let not_json = URL_SAFE_NO_PAD.encode(b"hello");
        assert!(matches!(
            codec.decode_embedded(&not_json),
            Err(CodecError::Json(_))
        ));
    }
}
