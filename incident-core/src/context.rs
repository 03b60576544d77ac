use crate::config::GatherConfig;
use crate::datadog::MonitoringApi;
use crate::events::{Event, EventBuffer};
use alert_registry::AlertPayload;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// Everything gathered about one alert before analysis.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Context {
    pub metrics: serde_json::Map<String, serde_json::Value>,
    pub logs: Vec<String>,
    pub recent_events: Vec<Event>,
}

pub struct ContextGatherer {
    monitoring: Arc<dyn MonitoringApi>,
    buffer: Arc<EventBuffer>,
    config: GatherConfig,
}

impl ContextGatherer {
    pub fn new(
        monitoring: Arc<dyn MonitoringApi>,
        buffer: Arc<EventBuffer>,
        config: GatherConfig,
    ) -> Self {
        Self {
            monitoring,
            buffer,
            config,
        }
    }

    /// Never fails: a failed upstream call contributes an empty part.
    #[tracing::instrument(skip_all, fields(alert_id = %alert.id))]
    pub async fn gather(&self, alert: &AlertPayload) -> Context {
        let to = chrono::Utc::now().timestamp();
        let from = to - self.config.window.as_secs() as i64;

        let (metrics, logs) = tokio::join!(
            self.monitoring.query_metrics(&self.config.metrics_query, from, to),
            self.monitoring.query_logs(&self.config.logs_query, from, to),
        );

        let metrics = metrics.unwrap_or_else(|e| {
            warn!(error = %e, query = %self.config.metrics_query, "metrics query failed");
            serde_json::Map::new()
        });
        let mut logs = logs.unwrap_or_else(|e| {
            warn!(error = %e, query = %self.config.logs_query, "logs query failed");
            Vec::new()
        });
        logs.truncate(self.config.log_limit);

        let recent_events = self.buffer.recent(self.config.event_limit);
        debug!(
            metrics = metrics.len(),
            logs = logs.len(),
            events = recent_events.len(),
            "context gathered"
        );

        Context {
            metrics,
            logs,
            recent_events,
        }
    }
}
