use crate::config::env_opt;
use crate::context::Context;
use crate::error::ProviderError;
use async_trait::async_trait;
use rig::client::completion::CompletionClient;
use rig::completion::Prompt;
use rig::providers::{gemini, openai};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const ANALYSIS_TIMEOUT: Duration = Duration::from_secs(60);

const PREAMBLE: &str = "You are an expert site reliability engineer.";

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LlmConfig {
    pub provider: String,
    pub model: String,
    pub api_key_env: String,
    pub temperature: f64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "gemini".into(),
            model: "gemini-2.5-flash".into(),
            api_key_env: "GEMINI_API_KEY".into(),
            temperature: 0.2,
        }
    }
}

impl LlmConfig {
    /// `None` when the variable named by `LLM_API_KEY_ENV` is unset.
    pub fn from_env() -> Option<Self> {
        let defaults = Self::default();
        let api_key_env = env_opt("LLM_API_KEY_ENV").unwrap_or(defaults.api_key_env);
        env_opt(&api_key_env)?;

        Some(Self {
            provider: env_opt("LLM_PROVIDER").unwrap_or(defaults.provider),
            model: env_opt("LLM_MODEL").unwrap_or(defaults.model),
            api_key_env,
            temperature: env_opt("LLM_TEMPERATURE")
                .and_then(|v| v.parse::<f64>().ok())
                .unwrap_or(defaults.temperature),
        })
    }
}

/// Structured result of incident analysis.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Analysis {
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub root_cause: Option<String>,
    #[serde(default)]
    pub recommendations: Vec<String>,
}

impl Analysis {
    /// Returned when no generation backend is configured.
    pub fn unavailable() -> Self {
        Self::sentinel("AI Analysis Unavailable (No Key)", "Unknown")
    }

    /// Returned when the backend call or its output parsing fails.
    pub fn failed() -> Self {
        Self::sentinel("Analysis failed due to error.", "Error")
    }

    fn sentinel(summary: &str, root_cause: &str) -> Self {
        Self {
            summary: Some(summary.into()),
            root_cause: Some(root_cause.into()),
            recommendations: Vec::new(),
        }
    }

    /// The summary, if the model produced a non-blank one.
    pub fn spoken_summary(&self) -> Option<&str> {
        self.summary.as_deref().filter(|s| !s.trim().is_empty())
    }
}

/// Text generation behind the analysis stage.
#[async_trait]
pub trait AnalysisBackend: Send + Sync {
    async fn generate(&self, preamble: &str, prompt: &str) -> Result<String, ProviderError>;
}

/// rig-core agent over the configured provider.
pub struct RigBackend {
    config: LlmConfig,
    api_key: String,
}

impl RigBackend {
    pub fn new(config: LlmConfig) -> Result<Self, ProviderError> {
        let api_key = std::env::var(&config.api_key_env)
            .map_err(|_| ProviderError::NotConfigured("llm api key"))?;
        match config.provider.to_lowercase().as_str() {
            "gemini" | "openai" => Ok(Self { config, api_key }),
            other => Err(ProviderError::Malformed(format!(
                "unsupported llm provider '{other}'"
            ))),
        }
    }
}

#[async_trait]
impl AnalysisBackend for RigBackend {
    async fn generate(&self, preamble: &str, prompt: &str) -> Result<String, ProviderError> {
        let out = match self.config.provider.to_lowercase().as_str() {
            "openai" => {
                let client: openai::Client = openai::Client::new(&self.api_key)
                    .map_err(|e| ProviderError::Malformed(format!("openai client error: {e}")))?;
                let agent = client
                    .agent(&self.config.model)
                    .preamble(preamble)
                    .temperature(self.config.temperature)
                    .build();
                agent.prompt(prompt).await
            }
            _ => {
                let client: gemini::Client = gemini::Client::new(&self.api_key)
                    .map_err(|e| ProviderError::Malformed(format!("gemini client error: {e}")))?;
                let agent = client
                    .agent(&self.config.model)
                    .preamble(preamble)
                    .temperature(self.config.temperature)
                    .build();
                agent.prompt(prompt).await
            }
        };
        out.map_err(|e| ProviderError::Malformed(format!("llm prompt failed: {e}")))
    }
}

pub struct AnalysisStage {
    backend: Option<Arc<dyn AnalysisBackend>>,
    timeout: Duration,
}

impl AnalysisStage {
    pub fn new(backend: Option<Arc<dyn AnalysisBackend>>) -> Self {
        Self {
            backend,
            timeout: ANALYSIS_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn from_config(config: Option<&LlmConfig>) -> Self {
        let backend = config.and_then(|c| match RigBackend::new(c.clone()) {
            Ok(backend) => Some(Arc::new(backend) as Arc<dyn AnalysisBackend>),
            Err(e) => {
                warn!(error = %e, "analysis backend unavailable");
                None
            }
        });
        if backend.is_none() {
            info!("no analysis backend configured");
        }
        Self::new(backend)
    }

    pub async fn analyze(&self, title: &str, severity: &str, context: &Context) -> Analysis {
        let Some(backend) = &self.backend else {
            return Analysis::unavailable();
        };

        let result = match build_prompt(title, severity, context) {
            Ok(prompt) => {
                let generated =
                    tokio::time::timeout(self.timeout, backend.generate(PREAMBLE, &prompt)).await;
                match generated {
                    Ok(raw) => raw.and_then(|raw| parse_analysis(&raw)),
                    Err(_) => Err(ProviderError::Timeout),
                }
            }
            Err(e) => Err(ProviderError::Decode(e)),
        };
        degrade(result)
    }
}

/// Maps any analysis failure to [`Analysis::failed`].
pub fn degrade(result: Result<Analysis, ProviderError>) -> Analysis {
    match result {
        Ok(analysis) => {
            debug!("analysis completed");
            analysis
        }
        Err(e) => {
            warn!(error = %e, "analysis failed");
            Analysis::failed()
        }
    }
}

fn build_prompt(
    title: &str,
    severity: &str,
    context: &Context,
) -> Result<String, serde_json::Error> {
    Ok(format!(
        "Analyze the incident context and return JSON only.\n\
         Schema: {{\"summary\":\"one sentence suitable for a voice alert\",\
         \"root_cause\":\"string\",\"recommendations\":[\"string\"]}}\n\
         Incident: {title}\n\
         Severity: {severity}\n\
         Metrics: {}\n\
         Logs: {}\n\
         Recent events: {}",
        serde_json::to_string(&context.metrics)?,
        serde_json::to_string(&context.logs)?,
        serde_json::to_string(&context.recent_events)?,
    ))
}

/// Parses model output, tolerating a surrounding markdown code fence.
pub fn parse_analysis(raw: &str) -> Result<Analysis, ProviderError> {
    let cleaned = raw.replace("```json", "").replace("```", "");
    let value: serde_json::Value = serde_json::from_str(cleaned.trim())?;
    if !value.is_object() {
        return Err(ProviderError::Malformed("analysis is not a JSON object".into()));
    }
    Ok(serde_json::from_value(value)?)
}
