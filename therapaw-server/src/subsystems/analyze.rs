//! Analyze subsystem: photo in, session id out
//!
//! The uploaded image is inlined as a `data:` URL, sent to the vision model,
//! and the resulting evaluation is persisted through the session manager.

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use bytes::Bytes;
use therapaw_core::session::{PersistedSession, SessionError};
use therapaw_core::{SessionManager, SessionRecord, VisionError, VisionModel};
use thiserror::Error;

/// An uploaded file from the `image` form field.
#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub content_type: String,
    pub bytes: Bytes,
}

impl ImageUpload {
    pub fn is_image(&self) -> bool {
        self.content_type.starts_with("image/") && !self.bytes.is_empty()
    }

    pub fn to_data_url(&self) -> String {
        format!(
            "data:{};base64,{}",
            self.content_type,
            BASE64_STANDARD.encode(&self.bytes)
        )
    }
}

#[derive(Error, Debug)]
pub enum AnalyzeError {
    #[error("No image provided")]
    NoImage,

    #[error("Vision model failed: {0}")]
    Vision(#[from] VisionError),

    #[error(transparent)]
    Session(#[from] SessionError),
}

pub async fn analyze_image(
    upload: &ImageUpload,
    vision: &dyn VisionModel,
    sessions: &SessionManager,
) -> Result<PersistedSession, AnalyzeError> {
    if !upload.is_image() {
        return Err(AnalyzeError::NoImage);
    }

    let data_url = upload.to_data_url();
    tracing::info!(
        backend = vision.name(),
        content_type = %upload.content_type,
        bytes = upload.bytes.len(),
        "Requesting behavioral evaluation"
    );

    let analysis = vision.evaluate(&data_url).await?;
    let record = SessionRecord::new(analysis, data_url);
    let persisted = sessions.persist(record).await?;

    tracing::info!(
        key = %persisted.key,
        degraded = persisted.degraded(),
        "Analysis session created"
    );
    Ok(persisted)
}
