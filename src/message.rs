//! The unit of delivery: a message addressed to one virtual channel.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ProxyError, Result};

/// Body fields accepted from a send request.
///
/// Deserialized from either a form-encoded or a JSON request body; every
/// field is optional at the parsing stage, the emptiness check happens in
/// [`Message::from_fields`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessageFields {
    /// Main message text.
    pub text: Option<String>,
    /// Short title shown above the text, if the upstream supports one.
    pub header: Option<String>,
    /// Opaque attachment passed through to the upstream.
    pub payload: Option<String>,
    /// Extra per-message send options forwarded to the worker.
    #[serde(default)]
    pub params: HashMap<String, String>,
}

/// A message travelling through a channel's queue towards its worker.
///
/// The identifier is assigned once at construction and is stable for the
/// whole lifetime of the message; logs and channel statistics correlate on it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique identifier, assigned at construction.
    pub id: Uuid,
    /// Main message text.
    pub text: Option<String>,
    /// Short title shown above the text.
    pub header: Option<String>,
    /// Opaque attachment passed through to the upstream.
    pub payload: Option<String>,
    /// Extra per-message send options forwarded to the worker.
    #[serde(default)]
    pub params: HashMap<String, String>,
}

impl Message {
    /// Build a message from request body fields.
    ///
    /// With `required` set, at least one of `text`, `header` or `payload`
    /// must be present and non-empty; otherwise the request is rejected with
    /// [`ProxyError::RequestParameter`].
    pub fn from_fields(fields: MessageFields, required: bool) -> Result<Self> {
        let has_content = [&fields.text, &fields.header, &fields.payload]
            .into_iter()
            .any(|field| field.as_deref().is_some_and(|value| !value.is_empty()));

        if required && !has_content {
            return Err(ProxyError::RequestParameter("Message could not empty".into()));
        }

        Ok(Self {
            id: Uuid::new_v4(),
            text: fields.text,
            header: fields.header,
            payload: fields.payload,
            params: fields.params,
        })
    }

    /// Shorthand used by tests and demos: a text-only message.
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            text: Some(text.into()),
            header: None,
            payload: None,
            params: HashMap::new(),
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Message header: {}, text: {}, payload is {}empty",
            self.header.as_deref().unwrap_or(""),
            self.text.as_deref().unwrap_or(""),
            if self.payload.is_none() { "" } else { "not " },
        )
    }
}
