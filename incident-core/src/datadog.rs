use crate::config::DatadogConfig;
use crate::error::ProviderError;
use async_trait::async_trait;
use serde::Deserialize;

/// Read access to the monitoring backend.
#[async_trait]
pub trait MonitoringApi: Send + Sync {
    /// Metric timeseries for `query` over `[from, to]` (epoch seconds).
    async fn query_metrics(
        &self,
        query: &str,
        from: i64,
        to: i64,
    ) -> Result<serde_json::Map<String, serde_json::Value>, ProviderError>;

    /// Text of the monitoring events matching `query` over `[from, to]`.
    async fn query_logs(
        &self,
        query: &str,
        from: i64,
        to: i64,
    ) -> Result<Vec<String>, ProviderError>;
}

#[derive(Deserialize)]
struct EventsResponse {
    #[serde(default)]
    events: Vec<DatadogEvent>,
}

#[derive(Deserialize)]
struct DatadogEvent {
    #[serde(default)]
    text: Option<String>,
}

pub struct DatadogClient {
    api_root: String,
    api_key: Option<String>,
    app_key: Option<String>,
    client: reqwest::Client,
}

impl DatadogClient {
    pub fn new(config: &DatadogConfig) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            api_root: config.api_root(),
            api_key: config.api_key.clone(),
            app_key: config.app_key.clone(),
            client,
        })
    }

    fn get(&self, endpoint: &str) -> Result<reqwest::RequestBuilder, ProviderError> {
        let (Some(api_key), Some(app_key)) = (&self.api_key, &self.app_key) else {
            return Err(ProviderError::NotConfigured("datadog"));
        };
        Ok(self
            .client
            .get(format!("{}/{endpoint}", self.api_root))
            .header("DD-API-KEY", api_key)
            .header("DD-APPLICATION-KEY", app_key))
    }
}

#[async_trait]
impl MonitoringApi for DatadogClient {
    async fn query_metrics(
        &self,
        query: &str,
        from: i64,
        to: i64,
    ) -> Result<serde_json::Map<String, serde_json::Value>, ProviderError> {
        let response = self
            .get("query")?
            .query(&[
                ("query", query.to_string()),
                ("from", from.to_string()),
                ("to", to.to_string()),
            ])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(ProviderError::from_response(response).await);
        }

        match response.json::<serde_json::Value>().await? {
            serde_json::Value::Object(map) => Ok(map),
            _ => Err(ProviderError::Malformed("metrics response is not an object".into())),
        }
    }

    async fn query_logs(
        &self,
        query: &str,
        from: i64,
        to: i64,
    ) -> Result<Vec<String>, ProviderError> {
        // The v1 events stream stands in for logs; the tag filter carries the query.
        let response = self
            .get("events")?
            .query(&[
                ("start", from.to_string()),
                ("end", to.to_string()),
                ("tags", query.to_string()),
            ])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(ProviderError::from_response(response).await);
        }

        let body: EventsResponse = response.json().await?;
        Ok(body
            .events
            .into_iter()
            .map(|e| e.text.unwrap_or_default())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(server: &MockServer) -> DatadogConfig {
        DatadogConfig {
            api_key: Some("api".into()),
            app_key: Some("app".into()),
            base_url: Some(server.uri()),
            ..DatadogConfig::default()
        }
    }

    #[tokio::test]
    async fn metrics_query_sends_keys_and_window() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/query"))
            .and(query_param("query", "system.cpu.idle"))
            .and(query_param("from", "100"))
            .and(query_param("to", "400"))
            .and(header("DD-API-KEY", "api"))
            .and(header("DD-APPLICATION-KEY", "app"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "ok",
                "series": [{"metric": "system.cpu.idle", "pointlist": [[100000.0, 3.5]]}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = DatadogClient::new(&config(&server)).expect("client");
        let metrics = client
            .query_metrics("system.cpu.idle", 100, 400)
            .await
            .expect("metrics");
        assert_eq!(metrics.get("status"), Some(&serde_json::json!("ok")));
    }

    #[tokio::test]
    async fn logs_query_returns_event_texts() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/events"))
            .and(query_param("tags", "source:my-service"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "events": [{"text": "OOMKilled web-1"}, {"title": "no text"}, {"text": "restart"}]
            })))
            .mount(&server)
            .await;

        let client = DatadogClient::new(&config(&server)).expect("client");
        let logs = client
            .query_logs("source:my-service", 100, 400)
            .await
            .expect("logs");
        assert_eq!(logs, vec!["OOMKilled web-1", "", "restart"]);
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/query"))
            .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
            .mount(&server)
            .await;

        let client = DatadogClient::new(&config(&server)).expect("client");
        let err = client.query_metrics("q", 0, 1).await.expect_err("status");
        assert!(matches!(err, ProviderError::Status { status: 403, .. }));
    }

    #[tokio::test]
    async fn missing_keys_skip_the_call() {
        let client = DatadogClient::new(&DatadogConfig::default()).expect("client");
        let err = client.query_logs("q", 0, 1).await.expect_err("not configured");
        assert!(matches!(err, ProviderError::NotConfigured("datadog")));
    }
}
