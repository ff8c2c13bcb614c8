use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::session::codec::{OversizePolicy, DEFAULT_INLINE_IMAGE_CAP};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct TherapawConfig {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub vision: VisionConfig,
    #[serde(default)]
    pub chat: ChatConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServiceConfig {
    pub log_level: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
    /// Upper bound on request bodies, uploads included
    pub max_upload_bytes: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            max_upload_bytes: 10 * 1024 * 1024,
        }
    }
}

/// Durable session storage on an S3-compatible service (DigitalOcean Spaces).
///
/// Credentials are normally left out of the file and picked up from
/// `DO_SPACES_KEY`, `DO_SPACES_SECRET`, `DO_SPACES_BUCKET` and
/// `DO_SPACES_REGION`. The durable tier exists only when all four are present.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub bucket: Option<String>,
    pub region: Option<String>,
    /// Overrides `https://<region>.digitaloceanspaces.com`
    pub endpoint: Option<String>,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub prefix: String,
    /// Byte cap on the image reference carried inside a self-contained identifier
    pub inline_image_cap: usize,
    pub oversize_image: OversizePolicy,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            bucket: None,
            region: None,
            endpoint: None,
            access_key: None,
            secret_key: None,
            prefix: "sessions/".to_string(),
            inline_image_cap: DEFAULT_INLINE_IMAGE_CAP,
            oversize_image: OversizePolicy::default(),
        }
    }
}

impl StorageConfig {
    /// Fill missing credentials from the `DO_SPACES_*` environment variables.
    pub fn with_env_credentials(mut self) -> Self {
        self.access_key = non_empty(self.access_key).or_else(|| env_var("DO_SPACES_KEY"));
        self.secret_key = non_empty(self.secret_key).or_else(|| env_var("DO_SPACES_SECRET"));
        self.bucket = non_empty(self.bucket).or_else(|| env_var("DO_SPACES_BUCKET"));
        self.region = non_empty(self.region).or_else(|| env_var("DO_SPACES_REGION"));
        self
    }

    pub fn is_durable_store_configured(&self) -> bool {
        [&self.access_key, &self.secret_key, &self.bucket, &self.region]
            .iter()
            .all(|v| v.as_deref().is_some_and(|s| !s.trim().is_empty()))
    }

    pub fn endpoint_url(&self) -> Option<String> {
        if let Some(endpoint) = self.endpoint.as_deref().filter(|e| !e.is_empty()) {
            return Some(endpoint.trim_end_matches('/').to_string());
        }
        self.region
            .as_deref()
            .map(|region| format!("https://{}.digitaloceanspaces.com", region))
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct VisionConfig {
    pub api_token: Option<String>,
    pub base_url: String,
    pub model_version: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub poll_interval_ms: u64,
    pub max_polls: usize,
    pub timeout_seconds: u64,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            api_token: None,
            base_url: "https://api.replicate.com".to_string(),
            // yorickvp/llava-13b
            model_version: "80537f9eead1a5bfa72d5ac6ea6414379be41d4d4f6679fd776e9535d1eb58bb"
                .to_string(),
            max_tokens: 1500,
            temperature: 0.8,
            poll_interval_ms: 1000,
            max_polls: 120,
            timeout_seconds: 120,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ChatConfig {
    pub endpoint: Option<String>,
    pub api_token: Option<String>,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub reply_language: String,
    pub timeout_seconds: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_token: None,
            model: "llama3.3-70b-instruct".to_string(),
            temperature: 0.7,
            max_tokens: 500,
            reply_language: "Spanish".to_string(),
            timeout_seconds: 60,
        }
    }
}

impl TherapawConfig {
    /// Load from an optional TOML file, then `THERAPAW__SECTION__KEY`
    /// environment overrides, then the provider-specific secret variables.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(Environment::with_prefix("THERAPAW").separator("__"))
            .build()?;
        let config: Self = s.try_deserialize()?;
        Ok(config.with_env_secrets())
    }

    pub fn with_env_secrets(mut self) -> Self {
        self.storage = self.storage.with_env_credentials();
        self.vision.api_token =
            non_empty(self.vision.api_token).or_else(|| env_var("REPLICATE_API_TOKEN"));
        self.chat.endpoint = non_empty(self.chat.endpoint).or_else(|| env_var("DO_AGENT_ENDPOINT"));
        self.chat.api_token = non_empty(self.chat.api_token).or_else(|| env_var("DO_API_TOKEN"));
        self
    }
}

fn env_var(name: &str) -> Option<String> {
    non_empty(std::env::var(name).ok())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
