use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One behavioral evaluation: the generated text and the image it describes.
///
/// Fields are private and there are no setters; a record is written whole or
/// not at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    analysis: String,
    #[serde(rename = "imageUrl")]
    image_reference: String,
    timestamp: DateTime<Utc>,
}

impl SessionRecord {
    pub fn new(analysis: impl Into<String>, image_reference: impl Into<String>) -> Self {
        Self::with_timestamp(analysis, image_reference, Utc::now())
    }

    pub fn with_timestamp(
        analysis: impl Into<String>,
        image_reference: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            analysis: analysis.into(),
            image_reference: image_reference.into(),
            timestamp,
        }
    }

    pub fn analysis(&self) -> &str {
        &self.analysis
    }

    /// A remote reference or an inlined `data:` URL.
    pub fn image_reference(&self) -> &str {
        &self.image_reference
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Copy of this record carrying a different image reference.
    pub(crate) fn with_image_reference(&self, image_reference: String) -> Self {
        Self {
            analysis: self.analysis.clone(),
            image_reference,
            timestamp: self.timestamp,
        }
    }
}
