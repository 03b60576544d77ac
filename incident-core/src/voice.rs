use crate::config::VoiceConfig;
use crate::error::ProviderError;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, ProviderError>;
}

#[derive(Serialize)]
struct SpeechRequest<'a> {
    text: &'a str,
    model_id: &'a str,
    voice_settings: VoiceSettings,
}

#[derive(Serialize)]
struct VoiceSettings {
    stability: f32,
    similarity_boost: f32,
}

/// ElevenLabs text-to-speech, returning MPEG audio.
pub struct ElevenLabsClient {
    config: VoiceConfig,
    client: reqwest::Client,
}

impl ElevenLabsClient {
    pub fn new(config: VoiceConfig) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self { config, client })
    }
}

#[async_trait]
impl SpeechSynthesizer for ElevenLabsClient {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, ProviderError> {
        let url = format!(
            "{}/v1/text-to-speech/{}",
            self.config.base_url.trim_end_matches('/'),
            self.config.voice_id
        );
        let body = SpeechRequest {
            text,
            model_id: &self.config.model_id,
            voice_settings: VoiceSettings {
                stability: 0.5,
                similarity_boost: 0.5,
            },
        };

        let response = self
            .client
            .post(&url)
            .header(reqwest::header::ACCEPT, "audio/mpeg")
            .header("xi-api-key", &self.config.api_key)
            .json(&body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(ProviderError::from_response(response).await);
        }
        Ok(response.bytes().await?.to_vec())
    }
}

pub struct NarrationStage {
    synthesizer: Option<Arc<dyn SpeechSynthesizer>>,
}

impl NarrationStage {
    pub fn new(synthesizer: Option<Arc<dyn SpeechSynthesizer>>) -> Self {
        Self { synthesizer }
    }

    pub fn from_config(config: Option<&VoiceConfig>) -> Self {
        let synthesizer = config.and_then(|c| match ElevenLabsClient::new(c.clone()) {
            Ok(client) => Some(Arc::new(client) as Arc<dyn SpeechSynthesizer>),
            Err(e) => {
                warn!(error = %e, "speech synthesizer unavailable");
                None
            }
        });
        if synthesizer.is_none() {
            info!("no speech synthesizer configured, incidents will have no audio");
        }
        Self::new(synthesizer)
    }

    /// Audio for `text`; empty means no audio is available.
    pub async fn narrate(&self, text: &str) -> Vec<u8> {
        let Some(synthesizer) = &self.synthesizer else {
            debug!("narration skipped, no synthesizer");
            return Vec::new();
        };

        match synthesizer.synthesize(text).await {
            Ok(audio) => {
                debug!(bytes = audio.len(), "narration synthesized");
                audio
            }
            Err(e) => {
                warn!(error = %e, "narration failed");
                Vec::new()
            }
        }
    }
}
