use serde::{Deserialize, Serialize};

/// Alert vocabulary used by the monitoring webhook.
pub const ALERT_TYPES: [&str; 4] = ["error", "warning", "success", "info"];

/// Inbound monitoring alert, in the shape the Datadog webhook template emits.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AlertPayload {
    pub id: String,
    /// e.g. `metric_alert_monitor`
    pub event_type: String,
    pub title: String,
    pub body: String,
    pub alert_type: String,
    /// Epoch seconds.
    pub date: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org: Option<serde_json::Map<String, serde_json::Value>>,
    /// Comma separated, the way the webhook sends them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<String>,
}

impl AlertPayload {
    pub fn tag_list(&self) -> Vec<String> {
        self.tags.as_deref().map(parse_tags).unwrap_or_default()
    }

    /// Whether `alert_type` is one of [`ALERT_TYPES`]. Unknown values are
    /// still accepted by [`validate_alert`].
    pub fn has_known_alert_type(&self) -> bool {
        ALERT_TYPES.contains(&self.alert_type.as_str())
    }
}

pub fn parse_tags(csv: &str) -> Vec<String> {
    csv.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(ToString::to_string)
        .collect()
}

pub fn parse_alert(payload: &serde_json::Value) -> Result<AlertPayload, String> {
    let alert: AlertPayload = serde_json::from_value(payload.clone())
        .map_err(|e| format!("invalid alert payload: {e}"))?;
    validate_alert(&alert)?;
    Ok(alert)
}

pub fn validate_alert(alert: &AlertPayload) -> Result<(), String> {
    if alert.id.trim().is_empty() {
        return Err("id is required".into());
    }
    if alert.title.trim().is_empty() {
        return Err("title is required".into());
    }
    if alert.alert_type.trim().is_empty() {
        return Err("alert_type is required".into());
    }
    if alert.date < 0 {
        return Err(format!("invalid date '{}'", alert.date));
    }
    Ok(())
}
