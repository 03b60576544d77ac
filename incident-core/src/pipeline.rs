use crate::audio::AudioStore;
use crate::context::ContextGatherer;
use crate::incident::{IncidentRecord, IncidentStatus, Severity};
use crate::llm::AnalysisStage;
use crate::store::IncidentStore;
use crate::voice::NarrationStage;
use alert_registry::AlertPayload;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Turns one alert into one stored incident.
///
/// Every stage degrades internally, so [`IncidentPipeline::process`] always
/// completes and appends exactly one record.
pub struct IncidentPipeline {
    gatherer: ContextGatherer,
    analysis: AnalysisStage,
    narration: NarrationStage,
    audio: Arc<dyn AudioStore>,
    store: Arc<IncidentStore>,
}

impl IncidentPipeline {
    pub fn new(
        gatherer: ContextGatherer,
        analysis: AnalysisStage,
        narration: NarrationStage,
        audio: Arc<dyn AudioStore>,
        store: Arc<IncidentStore>,
    ) -> Self {
        Self {
            gatherer,
            analysis,
            narration,
            audio,
            store,
        }
    }

    #[tracing::instrument(
        skip_all,
        fields(alert_id = %alert.id, incident_id = tracing::field::Empty)
    )]
    pub async fn process(&self, alert: &AlertPayload) -> IncidentRecord {
        let started = Instant::now();
        let incident_id = uuid::Uuid::new_v4().to_string();
        tracing::Span::current().record("incident_id", incident_id.as_str());
        info!(title = %alert.title, "processing alert");

        let context = self.gatherer.gather(alert).await;
        let analysis = self
            .analysis
            .analyze(&alert.title, &alert.alert_type, &context)
            .await;

        let voice_text = analysis
            .spoken_summary()
            .map(ToString::to_string)
            .unwrap_or_else(|| fallback_voice_text(&alert.title));

        let audio = self.narration.narrate(&voice_text).await;
        let audio_url = if audio.is_empty() {
            None
        } else {
            match self.audio.put(&incident_id, &audio).await {
                Ok(url) => Some(url),
                Err(e) => {
                    warn!(error = %e, "could not store narration");
                    None
                }
            }
        };

        let record = IncidentRecord {
            id: incident_id,
            title: alert.title.clone(),
            severity: Severity::from_alert_type(&alert.alert_type),
            status: IncidentStatus::Active,
            summary: Some(voice_text),
            root_cause: analysis.root_cause,
            audio_url,
            created_at: chrono::Utc::now(),
            metrics: context.metrics,
            logs: context.logs,
            kafka_events: context.recent_events,
        };
        self.store.append(record.clone());

        info!(
            severity = record.severity.as_str(),
            has_audio = record.audio_url.is_some(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "incident created"
        );
        record
    }
}

pub fn fallback_voice_text(title: &str) -> String {
    format!("Alert: {title}. Check dashboard.")
}
