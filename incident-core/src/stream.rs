//! Background consumer that keeps the [`EventBuffer`] filled from the event
//! stream.
//!
//! The consumer is an explicit state machine: `Stopped` until [`StreamConsumer::start`]
//! spawns the poll loop, `Running` until [`StreamConsumer::stop`] raises the
//! stop flag and waits (bounded) for the loop to end. There is no reconnect:
//! if the session cannot be established the loop logs and exits.

use crate::config::StreamConfig;
use crate::error::StreamError;
use crate::events::{Event, EventBuffer};
use async_trait::async_trait;
use base64::Engine as _;
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(2);

/// One item handed back by a poll.
#[derive(Clone, Debug, PartialEq)]
pub enum StreamRecord {
    Payload(Vec<u8>),
    /// The stream reported a problem with a single message.
    Error(String),
}

/// A pull-based event stream session.
#[async_trait]
pub trait StreamSource: Send {
    /// Establishes the session. An error here is fatal for the consumer.
    async fn connect(&mut self) -> Result<(), StreamError>;

    /// Waits at most roughly `wait` for new records.
    async fn poll(&mut self, wait: Duration) -> Result<Vec<StreamRecord>, StreamError>;

    async fn close(&mut self);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConsumerStatus {
    Stopped,
    Running,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    AlreadyRunning,
    /// No stream endpoint configured; nothing was spawned.
    Disabled,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped,
    /// The loop did not finish in time and was aborted.
    TimedOut,
    NotRunning,
}

enum ConsumerState {
    Stopped,
    Running {
        stop: Arc<AtomicBool>,
        handle: JoinHandle<()>,
    },
}

type SharedSource = Arc<tokio::sync::Mutex<Box<dyn StreamSource>>>;

pub struct StreamConsumer {
    buffer: Arc<EventBuffer>,
    source: Option<SharedSource>,
    poll_wait: Duration,
    state: Mutex<ConsumerState>,
}

impl StreamConsumer {
    pub fn new(
        buffer: Arc<EventBuffer>,
        source: Option<Box<dyn StreamSource>>,
        poll_wait: Duration,
    ) -> Self {
        Self {
            buffer,
            source: source.map(|s| Arc::new(tokio::sync::Mutex::new(s))),
            poll_wait,
            state: Mutex::new(ConsumerState::Stopped),
        }
    }

    /// Builds a consumer over the REST proxy, or a disabled one when no
    /// endpoint is configured.
    pub fn from_config(config: Option<&StreamConfig>, buffer: Arc<EventBuffer>) -> Self {
        match config {
            Some(config) => match RestProxySource::new(config.clone()) {
                Ok(source) => Self::new(buffer, Some(Box::new(source)), config.poll_wait),
                Err(e) => {
                    error!(error = %e, "could not build stream client, consumer disabled");
                    Self::new(buffer, None, config.poll_wait)
                }
            },
            None => Self::new(buffer, None, Duration::from_secs(1)),
        }
    }

    pub fn status(&self) -> ConsumerStatus {
        match &*self.lock_state() {
            ConsumerState::Running { handle, .. } if !handle.is_finished() => {
                ConsumerStatus::Running
            }
            _ => ConsumerStatus::Stopped,
        }
    }

    /// Spawns the poll loop on the current tokio runtime.
    pub fn start(&self) -> StartOutcome {
        let mut state = self.lock_state();
        if let ConsumerState::Running { handle, .. } = &*state {
            if !handle.is_finished() {
                debug!("stream consumer already running");
                return StartOutcome::AlreadyRunning;
            }
        }

        let Some(source) = self.source.clone() else {
            info!("no stream endpoint configured, skipping consumer");
            return StartOutcome::Disabled;
        };

        let stop = Arc::new(AtomicBool::new(false));
        let handle = tokio::spawn(consume_loop(
            source,
            Arc::clone(&self.buffer),
            Arc::clone(&stop),
            self.poll_wait,
        ));
        *state = ConsumerState::Running { stop, handle };
        info!("stream consumer started");
        StartOutcome::Started
    }

    /// Asks the loop to exit after its current poll and waits up to `timeout`.
    pub async fn stop(&self, timeout: Duration) -> StopOutcome {
        let previous = std::mem::replace(&mut *self.lock_state(), ConsumerState::Stopped);
        let ConsumerState::Running { stop, mut handle } = previous else {
            return StopOutcome::NotRunning;
        };

        stop.store(true, Ordering::Release);
        match tokio::time::timeout(timeout, &mut handle).await {
            Ok(_) => {
                info!("stream consumer stopped");
                StopOutcome::Stopped
            }
            Err(_) => {
                warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    "stream consumer did not stop in time, aborting"
                );
                handle.abort();
                StopOutcome::TimedOut
            }
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, ConsumerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[tracing::instrument(name = "stream_consumer", skip_all)]
async fn consume_loop(
    source: SharedSource,
    buffer: Arc<EventBuffer>,
    stop: Arc<AtomicBool>,
    poll_wait: Duration,
) {
    let mut source = source.lock().await;
    if let Err(e) = source.connect().await {
        error!(error = %e, "stream connection failed, consumer exiting");
        return;
    }

    while !stop.load(Ordering::Acquire) {
        match source.poll(poll_wait).await {
            Ok(records) => {
                for record in records {
                    ingest(&buffer, record);
                }
            }
            Err(StreamError::Connect(e)) => {
                error!(error = %e, "stream session lost, consumer exiting");
                return;
            }
            Err(e) => {
                warn!(error = %e, "stream poll failed");
                tokio::time::sleep(poll_wait).await;
            }
        }
    }

    source.close().await;
}

fn ingest(buffer: &EventBuffer, record: StreamRecord) {
    match record {
        StreamRecord::Payload(raw) => match Event::decode(&raw) {
            Ok(event) => buffer.push(event),
            Err(e) => warn!(error = %e, "dropping malformed stream message"),
        },
        StreamRecord::Error(e) => warn!(error = %e, "stream reported message error"),
    }
}

const KAFKA_V2_JSON: &str = "application/vnd.kafka.v2+json";
const KAFKA_BINARY_V2_JSON: &str = "application/vnd.kafka.binary.v2+json";

#[derive(Deserialize)]
struct ConsumerInstance {
    instance_id: String,
    base_uri: String,
}

#[derive(Deserialize)]
struct ProxyRecord {
    #[serde(default)]
    partition: Option<i64>,
    #[serde(default)]
    offset: Option<i64>,
    value: Option<String>,
}

/// Stream session over the Kafka REST proxy (v2 consumer API).
pub struct RestProxySource {
    config: StreamConfig,
    client: reqwest::Client,
    instance: Option<ConsumerInstance>,
}

impl RestProxySource {
    pub fn new(config: StreamConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(config.poll_wait + Duration::from_secs(5))
            .build()?;
        Ok(Self {
            config,
            client,
            instance: None,
        })
    }

    fn authed(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.api_key {
            Some(key) => request.basic_auth(key, self.config.api_secret.as_deref()),
            None => request,
        }
    }

    /// Best effort: the proxy expires idle instances on its own.
    async fn delete_instance(&mut self) {
        let Some(instance) = self.instance.take() else {
            return;
        };
        let result = self
            .authed(self.client.delete(&instance.base_uri))
            .header(reqwest::header::CONTENT_TYPE, KAFKA_V2_JSON)
            .send()
            .await;
        if let Err(e) = result {
            debug!(
                error = %e,
                instance = %instance.instance_id,
                "failed to delete consumer instance"
            );
        }
    }

    fn instance_uri(&self) -> Result<&str, StreamError> {
        self.instance
            .as_ref()
            .map(|i| i.base_uri.as_str())
            .ok_or_else(|| StreamError::Connect("consumer instance not created".into()))
    }
}

#[async_trait]
impl StreamSource for RestProxySource {
    async fn connect(&mut self) -> Result<(), StreamError> {
        // An aborted loop never reaches close(); release its instance first.
        self.delete_instance().await;

        let root = self.config.bootstrap_servers.trim_end_matches('/');
        let url = format!("{root}/consumers/{}", self.config.group_id);
        let body = serde_json::json!({
            "name": format!("{}-{}", self.config.group_id, uuid::Uuid::new_v4()),
            "format": "binary",
            "auto.offset.reset": self.config.offset_reset.as_str(),
        });

        let response = self
            .authed(self.client.post(&url))
            .header(reqwest::header::CONTENT_TYPE, KAFKA_V2_JSON)
            .json(&body)
            .send()
            .await
            .map_err(|e| StreamError::Connect(e.to_string()))?;
        if !response.status().is_success() {
            return Err(StreamError::Connect(format!(
                "create consumer returned {}",
                response.status()
            )));
        }
        let instance: ConsumerInstance = response
            .json()
            .await
            .map_err(|e| StreamError::Connect(e.to_string()))?;
        debug!(instance = %instance.instance_id, "stream consumer instance created");

        let subscription = format!("{}/subscription", instance.base_uri);
        self.instance = Some(instance);
        let response = self
            .authed(self.client.post(&subscription))
            .header(reqwest::header::CONTENT_TYPE, KAFKA_V2_JSON)
            .json(&serde_json::json!({ "topics": [self.config.topic] }))
            .send()
            .await
            .map_err(|e| StreamError::Connect(e.to_string()))?;
        if !response.status().is_success() {
            return Err(StreamError::Connect(format!(
                "subscribe to {} returned {}",
                self.config.topic,
                response.status()
            )));
        }
        info!(
            topic = %self.config.topic,
            group = %self.config.group_id,
            "subscribed to event stream"
        );
        Ok(())
    }

    async fn poll(&mut self, wait: Duration) -> Result<Vec<StreamRecord>, StreamError> {
        let url = format!("{}/records", self.instance_uri()?);
        let response = self
            .authed(self.client.get(&url))
            .header(reqwest::header::ACCEPT, KAFKA_BINARY_V2_JSON)
            .query(&[("timeout", wait.as_millis().to_string())])
            .send()
            .await?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            // The proxy dropped our instance; the session is gone.
            self.instance = None;
            return Err(StreamError::Connect("consumer instance no longer exists".into()));
        }
        if !status.is_success() {
            return Err(StreamError::Poll(format!("records returned {status}")));
        }
        let records: Vec<ProxyRecord> = response.json().await?;

        Ok(records.into_iter().map(decode_record).collect())
    }

    async fn close(&mut self) {
        self.delete_instance().await;
    }
}

fn decode_record(record: ProxyRecord) -> StreamRecord {
    let position = format!(
        "partition {} offset {}",
        record.partition.unwrap_or(-1),
        record.offset.unwrap_or(-1)
    );
    match record.value {
        Some(value) => match base64::engine::general_purpose::STANDARD.decode(value) {
            Ok(raw) => StreamRecord::Payload(raw),
            Err(e) => StreamRecord::Error(format!("{position}: bad base64 value: {e}")),
        },
        None => StreamRecord::Error(format!("{position}: record has no value")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Replays scripted poll results, then returns nothing.
    struct ScriptedSource {
        connect_fails: bool,
        polls: VecDeque<Result<Vec<StreamRecord>, StreamError>>,
        closed: Arc<AtomicBool>,
    }

    impl ScriptedSource {
        fn new(polls: Vec<Result<Vec<StreamRecord>, StreamError>>) -> Self {
            Self {
                connect_fails: false,
                polls: polls.into(),
                closed: Arc::new(AtomicBool::new(false)),
            }
        }
    }

    #[async_trait]
    impl StreamSource for ScriptedSource {
        async fn connect(&mut self) -> Result<(), StreamError> {
            if self.connect_fails {
                return Err(StreamError::Connect("unreachable".into()));
            }
            Ok(())
        }

        async fn poll(&mut self, wait: Duration) -> Result<Vec<StreamRecord>, StreamError> {
            match self.polls.pop_front() {
                Some(next) => next,
                None => {
                    tokio::time::sleep(wait).await;
                    Ok(Vec::new())
                }
            }
        }

        async fn close(&mut self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    /// Connects, then never returns from a poll.
    struct StuckSource;

    #[async_trait]
    impl StreamSource for StuckSource {
        async fn connect(&mut self) -> Result<(), StreamError> {
            Ok(())
        }

        async fn poll(&mut self, _wait: Duration) -> Result<Vec<StreamRecord>, StreamError> {
            std::future::pending().await
        }

        async fn close(&mut self) {}
    }

    fn payload(json: &str) -> StreamRecord {
        StreamRecord::Payload(json.as_bytes().to_vec())
    }

    async fn wait_for_len(buffer: &EventBuffer, len: usize) {
        for _ in 0..200 {
            if buffer.len() >= len {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("buffer never reached {len} events (has {})", buffer.len());
    }

    #[tokio::test]
    async fn start_without_endpoint_is_disabled() {
        let buffer = Arc::new(EventBuffer::new(10));
        let consumer = StreamConsumer::from_config(None, Arc::clone(&buffer));

        assert_eq!(consumer.start(), StartOutcome::Disabled);
        assert_eq!(consumer.status(), ConsumerStatus::Stopped);
        assert_eq!(consumer.stop(Duration::from_millis(50)).await, StopOutcome::NotRunning);
        assert!(buffer.is_empty());
    }

    #[tokio::test]
    async fn consumes_skips_bad_messages_and_stops() {
        let buffer = Arc::new(EventBuffer::new(10));
        let source = ScriptedSource::new(vec![
            Ok(vec![payload(r#"{"kind":"deploy"}"#), payload("{oops")]),
            Err(StreamError::Poll("broker hiccup".into())),
            Ok(vec![
                StreamRecord::Error("partition eof".into()),
                payload(r#"{"kind":"scale","timestamp":7}"#),
            ]),
        ]);
        let closed = Arc::clone(&source.closed);
        let consumer = StreamConsumer::new(
            Arc::clone(&buffer),
            Some(Box::new(source)),
            Duration::from_millis(10),
        );

        assert_eq!(consumer.start(), StartOutcome::Started);
        assert_eq!(consumer.start(), StartOutcome::AlreadyRunning);
        wait_for_len(&buffer, 2).await;

        let recent = buffer.recent(5);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].get("kind"), Some(&serde_json::json!("scale")));
        assert_eq!(recent[0].timestamp(), Some(7.0));
        assert!(recent[1].timestamp().is_some());

        assert_eq!(consumer.stop(Duration::from_secs(1)).await, StopOutcome::Stopped);
        assert_eq!(consumer.status(), ConsumerStatus::Stopped);
        assert!(closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn connect_failure_ends_loop_without_reconnect() {
        let buffer = Arc::new(EventBuffer::new(10));
        let mut source = ScriptedSource::new(vec![Ok(vec![payload("{}")])]);
        source.connect_fails = true;
        let consumer = StreamConsumer::new(
            Arc::clone(&buffer),
            Some(Box::new(source)),
            Duration::from_millis(10),
        );

        assert_eq!(consumer.start(), StartOutcome::Started);
        for _ in 0..100 {
            if consumer.status() == ConsumerStatus::Stopped {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(consumer.status(), ConsumerStatus::Stopped);
        assert!(buffer.is_empty());
    }

    #[tokio::test]
    async fn consumer_can_restart_after_stop() {
        let buffer = Arc::new(EventBuffer::new(10));
        let source = ScriptedSource::new(vec![]);
        let consumer = StreamConsumer::new(
            Arc::clone(&buffer),
            Some(Box::new(source)),
            Duration::from_millis(10),
        );

        assert_eq!(consumer.start(), StartOutcome::Started);
        assert_eq!(consumer.stop(Duration::from_secs(1)).await, StopOutcome::Stopped);
        assert_eq!(consumer.start(), StartOutcome::Started);
        assert_eq!(consumer.status(), ConsumerStatus::Running);
        assert_eq!(consumer.stop(Duration::from_secs(1)).await, StopOutcome::Stopped);
    }

    #[tokio::test]
    async fn stuck_loop_is_aborted_and_consumer_restarts() {
        let consumer = StreamConsumer::new(
            Arc::new(EventBuffer::new(10)),
            Some(Box::new(StuckSource)),
            Duration::from_millis(10),
        );

        assert_eq!(consumer.start(), StartOutcome::Started);
        assert_eq!(consumer.stop(Duration::from_millis(50)).await, StopOutcome::TimedOut);
        assert_eq!(consumer.status(), ConsumerStatus::Stopped);

        assert_eq!(consumer.start(), StartOutcome::Started);
        assert_eq!(consumer.status(), ConsumerStatus::Running);
        assert_eq!(consumer.stop(Duration::from_millis(50)).await, StopOutcome::TimedOut);
    }

    #[tokio::test]
    async fn session_lost_during_poll_ends_loop() {
        let buffer = Arc::new(EventBuffer::new(10));
        let source = ScriptedSource::new(vec![
            Err(StreamError::Connect("instance expired".into())),
            Ok(vec![payload(r#"{"kind":"late"}"#)]),
        ]);
        let consumer = StreamConsumer::new(
            Arc::clone(&buffer),
            Some(Box::new(source)),
            Duration::from_millis(10),
        );

        assert_eq!(consumer.start(), StartOutcome::Started);
        for _ in 0..100 {
            if consumer.status() == ConsumerStatus::Stopped {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(consumer.status(), ConsumerStatus::Stopped);
        assert!(buffer.is_empty());
    }

    fn proxy_config(server: &MockServer) -> StreamConfig {
        let mut config = StreamConfig::new(server.uri());
        config.group_id = "grp".into();
        config.api_key = Some("key".into());
        config.api_secret = Some("secret".into());
        config.poll_wait = Duration::from_millis(100);
        config
    }

    async fn mount_instance(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/consumers/grp"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "instance_id": "inst-1",
                "base_uri": format!("{}/consumers/grp/instances/inst-1", server.uri()),
            })))
            .expect(1)
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(path("/consumers/grp/instances/inst-1/subscription"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn rest_proxy_polls_and_decodes_records() {
        let server = MockServer::start().await;
        mount_instance(&server).await;
        let encoded = base64::engine::general_purpose::STANDARD.encode(br#"{"kind":"deploy"}"#);
        Mock::given(method("GET"))
            .and(path("/consumers/grp/instances/inst-1/records"))
            .and(query_param("timeout", "100"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"topic": "incident-events", "value": encoded, "partition": 0, "offset": 4},
                {"topic": "incident-events", "value": null, "partition": 0, "offset": 5},
            ])))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/consumers/grp/instances/inst-1"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let mut source = RestProxySource::new(proxy_config(&server)).expect("client");
        source.connect().await.expect("connect");
        let records = source.poll(Duration::from_millis(100)).await.expect("poll");
        assert_eq!(records.len(), 2);
        assert_eq!(records[0], payload(r#"{"kind":"deploy"}"#));
        assert!(matches!(&records[1], StreamRecord::Error(msg) if msg.contains("offset 5")));
        source.close().await;
    }

    #[tokio::test]
    async fn rest_proxy_connect_failure_is_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/consumers/grp"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let mut source = RestProxySource::new(proxy_config(&server)).expect("client");
        assert!(matches!(source.connect().await, Err(StreamError::Connect(_))));
    }

    #[tokio::test]
    async fn rest_proxy_poll_error_is_transient() {
        let server = MockServer::start().await;
        mount_instance(&server).await;
        Mock::given(method("GET"))
            .and(path("/consumers/grp/instances/inst-1/records"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let mut source = RestProxySource::new(proxy_config(&server)).expect("client");
        source.connect().await.expect("connect");
        assert!(matches!(
            source.poll(Duration::from_millis(100)).await,
            Err(StreamError::Poll(_))
        ));
    }

    #[tokio::test]
    async fn rest_proxy_missing_instance_is_fatal() {
        let server = MockServer::start().await;
        mount_instance(&server).await;
        Mock::given(method("GET"))
            .and(path("/consumers/grp/instances/inst-1/records"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .respond_with(ResponseTemplate::new(204))
            .expect(0)
            .mount(&server)
            .await;

        let mut source = RestProxySource::new(proxy_config(&server)).expect("client");
        source.connect().await.expect("connect");
        assert!(matches!(
            source.poll(Duration::from_millis(100)).await,
            Err(StreamError::Connect(_))
        ));
        source.close().await;
    }

    #[tokio::test]
    async fn rest_proxy_reconnect_releases_previous_instance() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/consumers/grp"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "instance_id": "inst-1",
                "base_uri": format!("{}/consumers/grp/instances/inst-1", server.uri()),
            })))
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/consumers/grp/instances/inst-1/subscription"))
            .respond_with(ResponseTemplate::new(204))
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/consumers/grp/instances/inst-1"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let mut source = RestProxySource::new(proxy_config(&server)).expect("client");
        source.connect().await.expect("connect");
        source.connect().await.expect("reconnect");
    }
}
