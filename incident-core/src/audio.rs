use crate::error::AudioError;
use async_trait::async_trait;
use std::path::PathBuf;

/// File name under which an incident's narration is stored.
pub fn audio_file_name(incident_id: &str) -> String {
    format!("{incident_id}.mp3")
}

/// Where synthesized narration ends up.
#[async_trait]
pub trait AudioStore: Send + Sync {
    /// Persists `audio` for `incident_id` and returns the URL it is served at.
    async fn put(&self, incident_id: &str, audio: &[u8]) -> Result<String, AudioError>;
}

/// Writes `<id>.mp3` into a directory served under `/static/audio`.
pub struct FsAudioStore {
    dir: PathBuf,
    public_base_url: String,
}

impl FsAudioStore {
    pub fn new(dir: impl Into<PathBuf>, public_base_url: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn url_for(&self, incident_id: &str) -> String {
        format!(
            "{}/static/audio/{}",
            self.public_base_url,
            audio_file_name(incident_id)
        )
    }
}

#[async_trait]
impl AudioStore for FsAudioStore {
    async fn put(&self, incident_id: &str, audio: &[u8]) -> Result<String, AudioError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        tokio::fs::write(self.dir.join(audio_file_name(incident_id)), audio).await?;
        Ok(self.url_for(incident_id))
    }
}
