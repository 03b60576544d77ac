use crate::events::Event;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Two-level severity shown on incidents.
///
/// The webhook's four `alert_type` values collapse onto these by a substring
/// rule, see [`Severity::from_alert_type`]; `warning`, `success` and `info`
/// are indistinguishable afterwards.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    Warning,
}

impl Severity {
    pub fn from_alert_type(alert_type: &str) -> Self {
        if alert_type.contains("error") {
            Self::Critical
        } else {
            Self::Warning
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::Warning => "warning",
        }
    }
}

/// Incidents are created active and never transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IncidentStatus {
    Active,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IncidentRecord {
    pub id: String,
    pub title: String,
    pub severity: Severity,
    pub status: IncidentStatus,
    pub summary: Option<String>,
    pub root_cause: Option<String>,
    pub audio_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub metrics: serde_json::Map<String, serde_json::Value>,
    pub logs: Vec<String>,
    pub kafka_events: Vec<Event>,
}
