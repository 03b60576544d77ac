//! Incident enrichment pipeline.
//!
//! Alerts come in, get enriched with monitoring context and recent stream
//! events, are summarized by a language model, narrated to audio, and stored
//! as immutable [`incident::IncidentRecord`]s.
//!
//! Components are constructed explicitly and shared by handle; nothing here is
//! a global. [`build`] wires the production collaborators from a
//! [`config::SenseiConfig`].

pub mod audio;
pub mod config;
pub mod context;
pub mod datadog;
pub mod error;
pub mod events;
pub mod incident;
pub mod llm;
pub mod pipeline;
pub mod store;
pub mod stream;
pub mod voice;

use std::path::PathBuf;
use std::sync::Arc;

pub use error::{AudioError, ProviderError, StreamError};
pub use events::{Event, EventBuffer};
pub use incident::{IncidentRecord, IncidentStatus, Severity};
pub use pipeline::IncidentPipeline;
pub use store::IncidentStore;
pub use stream::StreamConsumer;

/// The long-lived pieces a server needs.
pub struct Components {
    pub consumer: StreamConsumer,
    pub pipeline: Arc<IncidentPipeline>,
    pub store: Arc<IncidentStore>,
}

pub fn build(
    config: &config::SenseiConfig,
    audio_dir: impl Into<PathBuf>,
    public_base_url: &str,
) -> Result<Components, ProviderError> {
    let buffer = Arc::new(EventBuffer::default());
    let store = Arc::new(IncidentStore::new());
    let consumer = StreamConsumer::from_config(config.stream.as_ref(), Arc::clone(&buffer));

    let monitoring = Arc::new(datadog::DatadogClient::new(&config.datadog)?);
    let gatherer =
        context::ContextGatherer::new(monitoring, Arc::clone(&buffer), config.gather.clone());
    let pipeline = IncidentPipeline::new(
        gatherer,
        llm::AnalysisStage::from_config(config.llm.as_ref()),
        voice::NarrationStage::from_config(config.voice.as_ref()),
        Arc::new(audio::FsAudioStore::new(audio_dir, public_base_url)),
        Arc::clone(&store),
    );

    Ok(Components {
        consumer,
        pipeline: Arc::new(pipeline),
        store,
    })
}
