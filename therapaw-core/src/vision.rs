//! Vision model client: behavioral evaluation of a dog photo
//!
//! Submits the image as a data URL to a Replicate prediction and waits for a
//! terminal status. Replicate may answer synchronously (`Prefer: wait`); when
//! it doesn't, the prediction is polled at a fixed interval.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_retry::strategy::FixedInterval;
use tokio_retry::RetryIf;

use crate::config::VisionConfig;

/// Instructions sent alongside the photo.
pub const EVALUATION_PROMPT: &str = "\
You are a professional canine behavioral therapist writing a psychological evaluation of the dog in this photo. \
Judge emotional state, body language, temperament and needs from what is visible. Be warm, funny and thorough.

Use exactly these sections:

PATIENT PROFILE:
- Breed/Mix
- Estimated Age (puppy, young adult, adult, senior)
- Physical Characteristics

BEHAVIORAL ASSESSMENT:
- Current Emotional State
- Body Language Analysis (posture, ears, tail, eyes)
- Temperament Indicators
- Social Behavior Patterns

PSYCHOLOGICAL EVALUATION:
- Anxiety Indicators
- Confidence Level
- Attachment Style
- Coping Mechanisms

DIAGNOSIS:
One to three playful but perceptive diagnoses.

TREATMENT RECOMMENDATIONS:
Three to five concrete therapy, training or lifestyle suggestions.

PROGNOSIS:
An upbeat outlook on the dog's behavioral wellbeing.

Keep a professional therapeutic tone while staying entertaining; this is for fun.";

#[async_trait]
pub trait VisionModel: Send + Sync {
    /// Produce the evaluation text for an image given as a `data:` URL.
    async fn evaluate(&self, image_data_url: &str) -> Result<String, VisionError>;

    /// Backend name for logging.
    fn name(&self) -> &str;
}

#[derive(Error, Debug)]
pub enum VisionError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("Missing Replicate API token")]
    MissingApiToken,

    #[error("Prediction {status}: {message}")]
    PredictionFailed { status: String, message: String },

    #[error("Prediction still {status}")]
    Pending { status: String },

    #[error("Prediction did not finish after {attempts} polls")]
    PollingExhausted { attempts: usize },

    #[error("Prediction returned no output")]
    EmptyOutput,
}

#[derive(Debug, Serialize)]
struct PredictionRequest<'a> {
    version: &'a str,
    input: PredictionInput<'a>,
}

#[derive(Debug, Serialize)]
struct PredictionInput<'a> {
    image: &'a str,
    prompt: &'a str,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct Prediction {
    id: String,
    status: String,
    #[serde(default)]
    output: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

impl Prediction {
    fn is_terminal(&self) -> bool {
        matches!(self.status.as_str(), "succeeded" | "failed" | "canceled")
    }
}

#[derive(Debug, Clone)]
pub struct ReplicateVisionClient {
    client: Client,
    config: VisionConfig,
    api_token: String,
    base_url: String,
}

impl ReplicateVisionClient {
    pub fn new(config: &VisionConfig) -> Result<Self, VisionError> {
        Self::with_base_url(config, config.base_url.clone())
    }

    /// Create a client with a custom base URL (for testing / integration)
    pub fn with_base_url(config: &VisionConfig, base_url: String) -> Result<Self, VisionError> {
        let api_token = config
            .api_token
            .clone()
            .filter(|t| !t.is_empty())
            .ok_or(VisionError::MissingApiToken)?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self {
            client,
            config: config.clone(),
            api_token,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn create_prediction(&self, image_data_url: &str) -> Result<Prediction, VisionError> {
        let url = format!("{}/v1/predictions", self.base_url);
        let request = PredictionRequest {
            version: &self.config.model_version,
            input: PredictionInput {
                image: image_data_url,
                prompt: EVALUATION_PROMPT,
                max_tokens: self.config.max_tokens,
                temperature: self.config.temperature,
            },
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_token)
            .header("Prefer", "wait")
            .json(&request)
            .send()
            .await?;

        read_prediction(response).await
    }

    async fn poll_once(&self, id: &str) -> Result<Prediction, VisionError> {
        let url = format!("{}/v1/predictions/{}", self.base_url, id);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.api_token)
            .send()
            .await?;

        let prediction = read_prediction(response).await?;
        if prediction.is_terminal() {
            Ok(prediction)
        } else {
            Err(VisionError::Pending {
                status: prediction.status,
            })
        }
    }

    async fn wait_for(&self, prediction: Prediction) -> Result<Prediction, VisionError> {
        if prediction.is_terminal() {
            return Ok(prediction);
        }

        tracing::debug!(id = %prediction.id, status = %prediction.status, "Polling prediction");
        let strategy = FixedInterval::from_millis(self.config.poll_interval_ms)
            .take(self.config.max_polls);

        let id: &str = &prediction.id;
        // Only a still-running prediction is worth another poll
        let still_running = |e: &VisionError| matches!(e, VisionError::Pending { .. });
        match RetryIf::spawn(strategy, || self.poll_once(id), still_running).await {
            Ok(done) => Ok(done),
            Err(VisionError::Pending { .. }) => Err(VisionError::PollingExhausted {
                attempts: self.config.max_polls + 1,
            }),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl VisionModel for ReplicateVisionClient {
    async fn evaluate(&self, image_data_url: &str) -> Result<String, VisionError> {
        let created = self.create_prediction(image_data_url).await?;
        let prediction = self.wait_for(created).await?;

        if prediction.status != "succeeded" {
            let message = prediction
                .error
                .map(|e| match e {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                })
                .unwrap_or_else(|| "no error detail".to_string());
            tracing::error!(id = %prediction.id, status = %prediction.status, message = %message, "Prediction did not succeed");
            return Err(VisionError::PredictionFailed {
                status: prediction.status,
                message,
            });
        }

        let text = output_text(prediction.output)?;
        tracing::info!(id = %prediction.id, chars = text.len(), "Behavioral evaluation generated");
        Ok(text)
    }

    fn name(&self) -> &str {
        "replicate"
    }
}

async fn read_prediction(response: reqwest::Response) -> Result<Prediction, VisionError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| v["detail"].as_str().map(str::to_string))
            .unwrap_or(body);
        tracing::error!(code = status.as_u16(), message = %message, "Replicate API error");
        return Err(VisionError::Api {
            code: status.as_u16(),
            message,
        });
    }
    Ok(response.json().await?)
}

/// Streaming models return a list of fragments; others return one string.
fn output_text(output: Option<serde_json::Value>) -> Result<String, VisionError> {
    let text = match output {
        Some(serde_json::Value::Array(parts)) => parts
            .iter()
            .filter_map(|p| p.as_str())
            .collect::<Vec<_>>()
            .join(""),
        Some(serde_json::Value::String(s)) => s,
        _ => String::new(),
    };

    if text.trim().is_empty() {
        return Err(VisionError::EmptyOutput);
    }
    Ok(text)
}
