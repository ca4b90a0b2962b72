use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::LlmConfig;
use crate::utils::retry::{retry_async_if, RetryPolicy};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum AssistantError {
    #[error("assistant not configured: {0}")]
    NotConfigured(&'static str),
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("HTTP {status}: {body}")]
    HttpStatus {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("JSON decode failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("run ended with status {0}")]
    RunFailed(String),
    #[error("run finished without an assistant reply")]
    EmptyReply,
    #[error("run did not finish within {0:?}")]
    Timeout(Duration),
    #[error("run cancelled")]
    Cancelled,
}

impl AssistantError {
    /// Transport failures and throttling are worth another submission; the rest are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            AssistantError::Request(_) => true,
            AssistantError::HttpStatus { status, .. } => is_retryable(*status),
            _ => false,
        }
    }
}

fn is_retryable(status: reqwest::StatusCode) -> bool {
    status == reqwest::StatusCode::TOO_MANY_REQUESTS
        || status == reqwest::StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    Queued,
    InProgress,
    Completed,
    Failed,
    Cancelled,
    Expired,
    Other(String),
}

impl RunStatus {
    pub fn parse(value: &str) -> Self {
        match value {
            "queued" => RunStatus::Queued,
            "in_progress" | "cancelling" => RunStatus::InProgress,
            "completed" => RunStatus::Completed,
            "failed" => RunStatus::Failed,
            "cancelled" => RunStatus::Cancelled,
            "expired" => RunStatus::Expired,
            other => RunStatus::Other(other.to_string()),
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, RunStatus::Queued | RunStatus::InProgress)
    }

    pub fn as_str(&self) -> &str {
        match self {
            RunStatus::Queued => "queued",
            RunStatus::InProgress => "in_progress",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
            RunStatus::Expired => "expired",
            RunStatus::Other(value) => value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunHandle {
    pub thread_id: String,
    pub run_id: String,
}

/// Asynchronous job API behind the assistant: submit, poll, read the reply.
#[async_trait]
pub trait AssistantBackend: Send + Sync {
    async fn start_run(&self, assistant_id: &str, message: &str) -> Result<RunHandle, AssistantError>;

    async fn run_status(&self, run: &RunHandle) -> Result<RunStatus, AssistantError>;

    /// Text of the newest assistant message on the run's thread.
    async fn latest_reply(&self, run: &RunHandle) -> Result<String, AssistantError>;
}

#[derive(Debug, Deserialize)]
struct RunResponse {
    id: String,
    thread_id: String,
    status: String,
}

#[derive(Debug, Deserialize)]
struct MessageList {
    data: Vec<ThreadMessage>,
}

#[derive(Debug, Deserialize)]
struct ThreadMessage {
    role: String,
    #[serde(default)]
    content: Vec<MessageContent>,
}

#[derive(Debug, Deserialize)]
struct MessageContent {
    #[serde(rename = "type")]
    kind: String,
    text: Option<MessageText>,
}

#[derive(Debug, Deserialize)]
struct MessageText {
    value: String,
}

/// OpenAI Assistants v2 over HTTP.
#[derive(Clone)]
pub struct OpenAiAssistantClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl OpenAiAssistantClient {
    pub fn new(config: &LlmConfig) -> Result<Self, AssistantError> {
        let api_key = config
            .api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .ok_or(AssistantError::NotConfigured("OPENAI_API_KEY"))?;
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn read_json<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, AssistantError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AssistantError::HttpStatus { status, body });
        }
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn get(&self, url: String) -> reqwest::RequestBuilder {
        self.client
            .get(url)
            .bearer_auth(&self.api_key)
            .header("OpenAI-Beta", "assistants=v2")
    }
}

#[async_trait]
impl AssistantBackend for OpenAiAssistantClient {
    async fn start_run(&self, assistant_id: &str, message: &str) -> Result<RunHandle, AssistantError> {
        let payload = serde_json::json!({
            "assistant_id": assistant_id,
            "thread": {
                "messages": [{ "role": "user", "content": message }]
            }
        });
        let response = self
            .client
            .post(format!("{}/threads/runs", self.base_url))
            .bearer_auth(&self.api_key)
            .header("OpenAI-Beta", "assistants=v2")
            .json(&payload)
            .send()
            .await?;
        let run: RunResponse = Self::read_json(response).await?;
        debug!(run_id = %run.id, status = %run.status, "Assistant run created");
        Ok(RunHandle {
            thread_id: run.thread_id,
            run_id: run.id,
        })
    }

    async fn run_status(&self, run: &RunHandle) -> Result<RunStatus, AssistantError> {
        let response = self
            .get(format!(
                "{}/threads/{}/runs/{}",
                self.base_url, run.thread_id, run.run_id
            ))
            .send()
            .await?;
        let run: RunResponse = Self::read_json(response).await?;
        Ok(RunStatus::parse(&run.status))
    }

    async fn latest_reply(&self, run: &RunHandle) -> Result<String, AssistantError> {
        let response = self
            .get(format!(
                "{}/threads/{}/messages?order=desc&limit=10",
                self.base_url, run.thread_id
            ))
            .send()
            .await?;
        let messages: MessageList = Self::read_json(response).await?;
        messages
            .data
            .into_iter()
            .find(|message| message.role == "assistant")
            .map(|message| {
                message
                    .content
                    .into_iter()
                    .filter(|part| part.kind == "text")
                    .filter_map(|part| part.text.map(|text| text.value))
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .filter(|text| !text.trim().is_empty())
            .ok_or(AssistantError::EmptyReply)
    }
}

/// Drives one run to a terminal state: retried submission, fixed-interval
/// polling, an overall deadline and a cancellation token.
#[derive(Clone)]
pub struct AssistantRunner {
    backend: Arc<dyn AssistantBackend>,
    poll_interval: Duration,
    timeout: Duration,
    retry: RetryPolicy,
}

impl AssistantRunner {
    pub fn new(backend: Arc<dyn AssistantBackend>, config: &LlmConfig) -> Self {
        Self {
            backend,
            poll_interval: Duration::from_millis(config.poll_interval_ms.max(1)),
            timeout: Duration::from_secs(config.timeout_secs.max(1)),
            retry: RetryPolicy::for_assistant(config.max_attempts),
        }
    }

    pub fn with_timing(mut self, poll_interval: Duration, timeout: Duration) -> Self {
        self.poll_interval = poll_interval;
        self.timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub async fn run(
        &self,
        assistant_id: &str,
        message: &str,
        cancel: &CancellationToken,
    ) -> Result<String, AssistantError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(AssistantError::Cancelled),
            result = tokio::time::timeout(self.timeout, self.run_to_completion(assistant_id, message)) => {
                match result {
                    Ok(reply) => reply,
                    Err(_) => {
                        warn!(timeout = ?self.timeout, "Assistant run timed out");
                        Err(AssistantError::Timeout(self.timeout))
                    }
                }
            }
        }
    }

    async fn run_to_completion(&self, assistant_id: &str, message: &str) -> Result<String, AssistantError> {
        let backend = self.backend.clone();
        let run = retry_async_if(
            self.retry.clone(),
            "assistant_start_run",
            AssistantError::is_retryable,
            || {
                let backend = backend.clone();
                async move { backend.start_run(assistant_id, message).await }
            },
        )
        .await?;

        loop {
            let status = self.backend.run_status(&run).await?;
            if !status.is_pending() {
                if status != RunStatus::Completed {
                    return Err(AssistantError::RunFailed(status.as_str().to_string()));
                }
                break;
            }
            tokio::time::sleep(self.poll_interval).await;
        }

        self.backend.latest_reply(&run).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct ScriptedBackend {
        start_failures: AtomicUsize,
        statuses: Mutex<Vec<RunStatus>>,
        reply: String,
        starts: AtomicUsize,
    }

    impl ScriptedBackend {
        fn new(start_failures: usize, statuses: Vec<RunStatus>) -> Self {
            Self {
                start_failures: AtomicUsize::new(start_failures),
                statuses: Mutex::new(statuses),
                reply: "{\"feature_values\": {}}".to_string(),
                starts: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl AssistantBackend for ScriptedBackend {
        async fn start_run(&self, _assistant_id: &str, _message: &str) -> Result<RunHandle, AssistantError> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            if self.start_failures.load(Ordering::SeqCst) > 0 {
                self.start_failures.fetch_sub(1, Ordering::SeqCst);
                return Err(AssistantError::HttpStatus {
                    status: reqwest::StatusCode::SERVICE_UNAVAILABLE,
                    body: String::new(),
                });
            }
            Ok(RunHandle {
                thread_id: "thread".to_string(),
                run_id: "run".to_string(),
            })
        }

        async fn run_status(&self, _run: &RunHandle) -> Result<RunStatus, AssistantError> {
            let mut statuses = self.statuses.lock().unwrap();
            if statuses.len() > 1 {
                Ok(statuses.remove(0))
            } else {
                Ok(statuses.first().cloned().unwrap_or(RunStatus::InProgress))
            }
        }

        async fn latest_reply(&self, _run: &RunHandle) -> Result<String, AssistantError> {
            Ok(self.reply.clone())
        }
    }

    fn runner(backend: Arc<ScriptedBackend>, timeout: Duration) -> AssistantRunner {
        AssistantRunner::new(backend, &LlmConfig::default())
            .with_timing(Duration::from_millis(1), timeout)
            .with_retry(RetryPolicy {
                max_attempts: 3,
                base_backoff: Duration::from_millis(1),
                max_backoff: Duration::from_millis(2),
                jitter_max: None,
            })
    }

    #[tokio::test]
    async fn polls_until_completed() {
        let backend = Arc::new(ScriptedBackend::new(
            0,
            vec![RunStatus::Queued, RunStatus::InProgress, RunStatus::Completed],
        ));
        let reply = runner(backend, Duration::from_secs(5))
            .run("asst", "hello", &CancellationToken::new())
            .await
            .unwrap();
        assert!(reply.contains("feature_values"));
    }

    #[tokio::test]
    async fn submission_is_retried_on_server_errors() {
        let backend = Arc::new(ScriptedBackend::new(2, vec![RunStatus::Completed]));
        runner(backend.clone(), Duration::from_secs(5))
            .run("asst", "hello", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(backend.starts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn failed_run_is_reported() {
        let backend = Arc::new(ScriptedBackend::new(0, vec![RunStatus::Failed]));
        let err = runner(backend, Duration::from_secs(5))
            .run("asst", "hello", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AssistantError::RunFailed(status) if status == "failed"));
    }

    #[tokio::test]
    async fn stuck_run_times_out() {
        let backend = Arc::new(ScriptedBackend::new(0, vec![RunStatus::InProgress]));
        let err = runner(backend, Duration::from_millis(30))
            .run("asst", "hello", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AssistantError::Timeout(_)));
    }

    #[tokio::test]
    async fn cancellation_stops_polling() {
        let backend = Arc::new(ScriptedBackend::new(0, vec![RunStatus::InProgress]));
        let token = CancellationToken::new();
        token.cancel();
        let err = runner(backend, Duration::from_secs(5))
            .run("asst", "hello", &token)
            .await
            .unwrap_err();
        assert!(matches!(err, AssistantError::Cancelled));
    }

    #[test]
    fn only_transport_and_throttle_errors_retry() {
        assert!(AssistantError::HttpStatus {
            status: reqwest::StatusCode::TOO_MANY_REQUESTS,
            body: String::new()
        }
        .is_retryable());
        assert!(!AssistantError::HttpStatus {
            status: reqwest::StatusCode::UNAUTHORIZED,
            body: String::new()
        }
        .is_retryable());
        assert!(!AssistantError::EmptyReply.is_retryable());
    }
}
