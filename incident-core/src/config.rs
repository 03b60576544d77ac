//! Collaborator configuration read from the environment.
//!
//! A collaborator whose key or endpoint is missing comes back as `None`; the
//! stage that owns it then degrades to its sentinel instead of failing.

use crate::llm::LlmConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_APP_NAME: &str = "Incident Sensei";

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SenseiConfig {
    pub app_name: String,
    pub datadog: DatadogConfig,
    pub gather: GatherConfig,
    pub stream: Option<StreamConfig>,
    pub llm: Option<LlmConfig>,
    pub voice: Option<VoiceConfig>,
}

impl SenseiConfig {
    pub fn from_env() -> Self {
        Self {
            app_name: env_or("APP_NAME", DEFAULT_APP_NAME),
            datadog: DatadogConfig::from_env(),
            gather: GatherConfig::from_env(),
            stream: StreamConfig::from_env(),
            llm: LlmConfig::from_env(),
            voice: VoiceConfig::from_env(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DatadogConfig {
    pub api_key: Option<String>,
    pub app_key: Option<String>,
    pub site: String,
    /// Overrides the site-derived API root. Used against mock servers.
    pub base_url: Option<String>,
    pub timeout: Duration,
}

impl Default for DatadogConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            app_key: None,
            site: "datadoghq.com".into(),
            base_url: None,
            timeout: Duration::from_secs(10),
        }
    }
}

impl DatadogConfig {
    pub fn from_env() -> Self {
        Self {
            api_key: env_opt("DATADOG_API_KEY"),
            app_key: env_opt("DATADOG_APP_KEY"),
            site: env_or("DATADOG_SITE", "datadoghq.com"),
            base_url: env_opt("DATADOG_BASE_URL"),
            ..Self::default()
        }
    }

    /// `https://api.<site>/api/v1`, with any `app.` prefix on the site removed.
    pub fn api_root(&self) -> String {
        if let Some(base) = &self.base_url {
            return base.trim_end_matches('/').to_string();
        }
        let site = self.site.replace("app.", "");
        format!("https://api.{site}/api/v1")
    }
}

/// What the context gatherer asks the monitoring API for.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GatherConfig {
    pub metrics_query: String,
    pub logs_query: String,
    pub window: Duration,
    pub log_limit: usize,
    pub event_limit: usize,
}

impl Default for GatherConfig {
    fn default() -> Self {
        Self {
            metrics_query: "system.cpu.idle".into(),
            logs_query: "source:my-service".into(),
            window: Duration::from_secs(300),
            log_limit: 5,
            event_limit: 5,
        }
    }
}

impl GatherConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            metrics_query: env_or("DATADOG_METRICS_QUERY", &defaults.metrics_query),
            logs_query: env_or("DATADOG_LOGS_QUERY", &defaults.logs_query),
            ..defaults
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OffsetReset {
    Latest,
    Earliest,
}

impl OffsetReset {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Latest => "latest",
            Self::Earliest => "earliest",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StreamConfig {
    /// REST proxy endpoint of the event stream cluster.
    pub bootstrap_servers: String,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub group_id: String,
    pub topic: String,
    pub offset_reset: OffsetReset,
    pub poll_wait: Duration,
}

impl StreamConfig {
    pub fn new(bootstrap_servers: impl Into<String>) -> Self {
        Self {
            bootstrap_servers: bootstrap_servers.into(),
            api_key: None,
            api_secret: None,
            group_id: "incident-sensei-backend-1".into(),
            topic: "incident-events".into(),
            offset_reset: OffsetReset::Latest,
            poll_wait: Duration::from_secs(1),
        }
    }

    /// `None` when `CONFLUENT_BOOTSTRAP_SERVERS` is unset or blank.
    pub fn from_env() -> Option<Self> {
        let servers = env_opt("CONFLUENT_BOOTSTRAP_SERVERS")?;
        let mut config = Self::new(servers);
        config.api_key = env_opt("CONFLUENT_API_KEY");
        config.api_secret = env_opt("CONFLUENT_API_SECRET");
        if let Some(group) = env_opt("CONFLUENT_GROUP_ID") {
            config.group_id = group;
        }
        if let Some(topic) = env_opt("CONFLUENT_TOPIC") {
            config.topic = topic;
        }
        if env_opt("CONFLUENT_OFFSET_RESET").is_some_and(|v| v.eq_ignore_ascii_case("earliest")) {
            config.offset_reset = OffsetReset::Earliest;
        }
        Some(config)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VoiceConfig {
    pub api_key: String,
    pub voice_id: String,
    pub model_id: String,
    pub base_url: String,
    pub timeout: Duration,
}

impl VoiceConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            voice_id: "21m00Tcm4TlvDq8ikWAM".into(),
            model_id: "eleven_multilingual_v2".into(),
            base_url: "https://api.elevenlabs.io".into(),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn from_env() -> Option<Self> {
        let mut config = Self::new(env_opt("ELEVENLABS_API_KEY")?);
        if let Some(voice) = env_opt("ELEVENLABS_VOICE_ID") {
            config.voice_id = voice;
        }
        if let Some(model) = env_opt("ELEVENLABS_MODEL_ID") {
            config.model_id = model;
        }
        Some(config)
    }
}

pub(crate) fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

pub(crate) fn env_or(key: &str, default: &str) -> String {
    env_opt(key).unwrap_or_else(|| default.to_string())
}
