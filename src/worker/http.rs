//! Reference worker: form-encoded POST to a chat-style HTTP API.
//!
//! [`HttpWorker`] delivers messages to `<url>/bot<bot_id>/sendMessage` and
//! classifies the upstream answer:
//!
//! - `200` with a body carrying `ok: true` — success;
//! - `408`, `502`, `503`, `504` — retriable, with the retry hint taken from
//!   the body's `retry_after` field first, the `Retry-After` header second;
//! - anything else — terminal rejection.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Method};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::Worker;
use crate::error::{ProxyError, Result};
use crate::message::Message;

/// Total per-request timeout, connection setup included.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Upstream statuses treated as transient.
const RETRIABLE_STATUSES: [u16; 4] = [408, 502, 503, 504];

/// Per-channel options for [`HttpWorker`], deserialized from the channel's
/// `worker` config block.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpWorkerConfig {
    /// Base URL of the upstream API.
    pub url: String,
    /// HTTP verb for the send request. Default: `POST`.
    #[serde(default = "default_method")]
    pub method: String,
    /// Credential embedded in the request path.
    pub bot_id: String,
    /// Opaque upstream addressee, forwarded as the `chat_id` form field.
    #[serde(default)]
    pub chat_id: Option<Value>,
    /// Static form fields merged into every request body.
    #[serde(default)]
    pub fields: HashMap<String, String>,
}

fn default_method() -> String {
    "POST".to_string()
}

/// The reference HTTP delivery worker. Registry name: `http`.
#[derive(Debug)]
pub struct HttpWorker {
    channel: String,
    url: String,
    method: Method,
    form_base: Vec<(String, String)>,
    client: Mutex<Option<Client>>,
}

impl HttpWorker {
    /// Build a worker for `channel` from its config block.
    pub fn new(channel: impl Into<String>, config: HttpWorkerConfig) -> Result<Self> {
        let method = config
            .method
            .to_uppercase()
            .parse::<Method>()
            .map_err(|_| ProxyError::InvalidConfig(format!("unknown HTTP method {:?}", config.method)))?;

        let url = format!(
            "{}/bot{}/sendMessage",
            config.url.trim_end_matches('/'),
            config.bot_id
        );

        let mut form_base = Vec::with_capacity(config.fields.len() + 1);
        if let Some(chat_id) = &config.chat_id {
            form_base.push(("chat_id".to_string(), render_form_value(chat_id)));
        }
        let mut fields: Vec<_> = config.fields.into_iter().collect();
        fields.sort();
        form_base.extend(fields);

        Ok(Self {
            channel: channel.into(),
            url,
            method,
            form_base,
            client: Mutex::new(None),
        })
    }

    fn session(&self) -> Option<Client> {
        self.client
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait::async_trait]
impl Worker for HttpWorker {
    fn prepare(&self) -> Result<()> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        *self.client.lock().unwrap_or_else(PoisonError::into_inner) = Some(client);
        debug!(channel = %self.channel, url = %self.url, "worker session ready");
        Ok(())
    }

    fn release(&self) {
        *self.client.lock().unwrap_or_else(PoisonError::into_inner) = None;
        debug!(channel = %self.channel, "worker session released");
    }

    async fn operate(&self, message: &Message) -> Result<()> {
        let Some(client) = self.session() else {
            return Err(ProxyError::RequestExecution("worker session is not prepared".into()));
        };

        let mut form: Vec<(String, String)> = Vec::with_capacity(self.form_base.len() + message.params.len() + 1);
        if let Some(text) = &message.text {
            form.push(("text".to_string(), text.clone()));
        }
        let mut params: Vec<_> = message
            .params
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        params.sort();
        form.extend(params);
        form.extend(self.form_base.iter().cloned());

        debug!(channel = %self.channel, id = %message.id, "performing upstream request");

        let response = client
            .request(self.method.clone(), &self.url)
            .form(&form)
            .send()
            .await?;

        let status = response.status().as_u16();
        let header_hint = response
            .headers()
            .get("Retry-After")
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);
        let is_json = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.starts_with("application/json"));

        let body: Value = if is_json {
            response.json().await?
        } else {
            json!({ "origin": response.text().await.unwrap_or_default() })
        };

        if status == 200 && body.get("ok").and_then(Value::as_bool) == Some(true) {
            info!(
                channel = %self.channel,
                id = %message.id,
                message_id = ?body.pointer("/result/message_id"),
                "upstream accepted the message"
            );
            return Ok(());
        }

        let reason = body
            .get("description")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .unwrap_or_else(|| format!("Not specified, code: {status}"));

        if RETRIABLE_STATUSES.contains(&status) {
            let retry_hint = body.get("retry_after").map(render_form_value).or(header_hint);
            warn!(
                channel = %self.channel,
                id = %message.id,
                status,
                reason = %reason,
                retry_hint = ?retry_hint,
                "upstream declined the message, worth retrying"
            );
            return Err(ProxyError::WorkerAwait { status, reason, retry_hint });
        }

        warn!(
            channel = %self.channel,
            id = %message.id,
            status,
            reason = %reason,
            "upstream rejected the message"
        );
        Err(ProxyError::WorkerExecution { status, reason })
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

/// Render a JSON scalar the way it would appear in a form field.
fn render_form_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
