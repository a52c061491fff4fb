//! Coding-agent service client.
//!
//! The agent exposes two calls the driver needs: create a session bound to
//! a working directory, and submit a prompt to it. [`AgentService`] is the
//! seam; [`HttpAgentService`] talks to the agent's HTTP API.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use reqwest::{Client, Url};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::{AppError, Result};

/// Title given to sessions created on the agent side.
const SESSION_TITLE: &str = "Agent Arena Session";

/// A prompt submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptRequest {
    /// Agent-side session id.
    pub remote_session_id: String,
    /// Working directory the agent operates in.
    pub directory: String,
    /// Prompt text.
    pub text: String,
    /// Provider of the model.
    pub provider_id: String,
    /// Model identifier.
    pub model_id: String,
}

/// Operations the session driver needs from the coding agent.
pub trait AgentService: Send + Sync {
    /// Create an agent session bound to `directory`; returns its id.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Agent`] if the agent rejects the request or is
    /// unreachable.
    fn create_session(
        &self,
        directory: &str,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + '_>>;

    /// Submit a prompt and wait for the agent to finish.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Agent`] carrying the agent's error message when
    /// the response envelope reports a failure.
    fn prompt(&self, request: PromptRequest) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

#[derive(Debug, Deserialize)]
struct CreatedSession {
    id: String,
}

/// [`AgentService`] over the agent's HTTP API.
#[derive(Clone)]
pub struct HttpAgentService {
    client: Client,
    base_url: Url,
}

impl HttpAgentService {
    /// Client for the agent at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the URL is invalid and
    /// `AppError::Agent` if the HTTP client cannot be built.
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|err| AppError::Config(format!("invalid agent url '{base_url}': {err}")))?;
        let client = Client::builder().timeout(request_timeout).build()?;
        Ok(Self { client, base_url })
    }

    fn url(&self, path: &str, directory: &str) -> Result<Url> {
        let mut url = self
            .base_url
            .join(path)
            .map_err(|err| AppError::Agent(format!("invalid agent path '{path}': {err}")))?;
        url.query_pairs_mut().append_pair("directory", directory);
        Ok(url)
    }
}

/// Error text from a non-success response body.
fn error_text(status: reqwest::StatusCode, body: &str) -> String {
    let detail = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| envelope_error(&v))
        .unwrap_or_else(|| body.trim().to_owned());
    if detail.is_empty() {
        format!("agent returned {status}")
    } else {
        format!("agent returned {status}: {detail}")
    }
}

/// Error message carried by a response envelope, if any.
///
/// Recognises `{"error": ...}` bodies and an assistant message whose
/// `info.error` is set.
#[must_use]
pub fn envelope_error(body: &Value) -> Option<String> {
    let error = body
        .get("error")
        .or_else(|| body.get("info").and_then(|info| info.get("error")))
        .filter(|e| !e.is_null())?;

    let message = error
        .pointer("/data/message")
        .or_else(|| error.get("data"))
        .or_else(|| error.get("message"))
        .or_else(|| error.get("name"))
        .unwrap_or(error);

    Some(match message {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    })
}

impl AgentService for HttpAgentService {
    fn create_session(
        &self,
        directory: &str,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + '_>> {
        let directory = directory.to_owned();
        Box::pin(async move {
            let url = self.url("session", &directory)?;
            let response = self
                .client
                .post(url)
                .json(&json!({ "title": SESSION_TITLE }))
                .send()
                .await?;

            let status = response.status();
            let body = response.text().await?;
            if !status.is_success() {
                return Err(AppError::Agent(error_text(status, &body)));
            }
            let created: CreatedSession = serde_json::from_str(&body)
                .map_err(|err| AppError::Agent(format!("malformed session response: {err}")))?;
            debug!(remote_session_id = %created.id, "agent session created");
            Ok(created.id)
        })
    }

    fn prompt(&self, request: PromptRequest) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let path = format!("session/{}/message", request.remote_session_id);
            let url = self.url(&path, &request.directory)?;
            let body = json!({
                "parts": [{ "type": "text", "text": request.text }],
                "model": {
                    "providerID": request.provider_id,
                    "modelID": request.model_id,
                },
            });

            let response = self.client.post(url).json(&body).send().await?;
            let status = response.status();
            let text = response.text().await?;
            if !status.is_success() {
                return Err(AppError::Agent(error_text(status, &text)));
            }

            if let Some(message) = serde_json::from_str::<Value>(&text)
                .ok()
                .and_then(|v| envelope_error(&v))
            {
                return Err(AppError::Agent(message));
            }
            Ok(())
        })
    }
}
