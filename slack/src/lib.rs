#![deny(
    missing_docs,
    missing_debug_implementations,
    missing_copy_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unsafe_code,
    unstable_features,
    unused_import_braces,
    unused_qualifications
)]

//! Slack is a small Slack incoming webhook client with attachment fields in Rust 2021 edition.

use std::time::Duration;

use log::debug;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Slack replies with this exact body when a webhook message is accepted.
pub const OK_BODY: &str = "ok";

/// Default timeout of one webhook delivery.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Webhook error.
#[derive(Error, Debug)]
pub enum WebhookError {
    /// Webhook URL cannot be parsed.
    #[error("invalid webhook URL: {0}")]
    Url(#[from] url::ParseError),
    /// Error from [`ureq`] crate.
    #[error("ureq error: {0}")]
    UReq(#[from] Box<ureq::Error>),
    /// Error from [`serde_json`] crate.
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Slack answered with something other than [`OK_BODY`].
    #[error("non-ok response returned from Slack: {0:?}")]
    NotOk(String),
}

/// Color bar of an attachment. <https://api.slack.com/reference/messaging/attachments#fields>
#[derive(
    Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Color {
    /// Green
    Good,
    /// Yellow
    Warning,
    /// Red
    Danger,
}

/// One title/value pair shown as a table cell inside an attachment.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct Field {
    /// Bold heading above the value
    pub title: String,
    /// Text of the field
    pub value: String,
    /// Whether the field is short enough to be displayed side-by-side
    pub short: bool,
}

impl Field {
    /// Creates a long [`Field`].
    ///
    /// ```
    /// # use slack::Field;
    /// let f = Field::new("expired.badssl.com", "timeout");
    /// assert!(!f.short);
    /// ```
    pub fn new<T, U>(title: T, value: U) -> Self
    where
        T: Into<String>,
        U: Into<String>,
    {
        Field {
            title: title.into(),
            value: value.into(),
            short: false,
        }
    }
}

/// Legacy secondary attachment. <https://api.slack.com/reference/messaging/attachments>
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    /// Fields that should be formatted with markdown
    pub mrkdwn_in: Vec<String>,
    /// Color bar, omitted when not set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<Color>,
    /// Text shown above the attachment block
    pub pretext: String,
    /// Main text of the attachment
    pub text: String,
    /// Table of fields
    pub fields: Vec<Field>,
    /// Timestamp in seconds since Unix epoch
    pub ts: i64,
}

/// Webhook payload.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Attachments of the message
    pub attachments: Vec<Attachment>,
}

impl Message {
    /// Number of fields across all attachments.
    ///
    /// ```
    /// # use slack::{Attachment, Field, Message};
    /// let m = Message {
    ///     attachments: vec![Attachment {
    ///         fields: vec![Field::new("a", "b")],
    ///         ..Default::default()
    ///     }],
    /// };
    /// assert_eq!(1, m.field_count());
    /// ```
    pub fn field_count(&self) -> usize {
        self.attachments.iter().map(|a| a.fields.len()).sum()
    }
}

/// Incoming webhook endpoint.
#[derive(Debug, Clone)]
pub struct Webhook {
    url: Url,
    agent: ureq::Agent,
}

impl Webhook {
    /// Creates a [`Webhook`] with [`DEFAULT_TIMEOUT`].
    ///
    /// ```
    /// # use slack::Webhook;
    /// Webhook::new("https://hooks.slack.com/services/T0/B0/X").unwrap();
    /// assert!(Webhook::new("not a url").is_err());
    /// ```
    pub fn new<T>(url: T) -> Result<Self, WebhookError>
    where
        T: AsRef<str>,
    {
        Self::with_timeout(url, DEFAULT_TIMEOUT)
    }

    /// Creates a [`Webhook`] whose deliveries give up after `timeout`.
    pub fn with_timeout<T>(url: T, timeout: Duration) -> Result<Self, WebhookError>
    where
        T: AsRef<str>,
    {
        let url = Url::parse(url.as_ref())?;
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Ok(Webhook { url, agent })
    }

    /// Endpoint of the webhook.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Posts [`Message`] to Slack once. Blocks until Slack answers or the timeout elapses.
    pub fn send(&self, message: &Message) -> Result<(), WebhookError> {
        let body = serde_json::to_string(message)?;
        debug!("post {} bytes to Slack webhook", body.len());

        let response = self
            .agent
            .post(self.url.as_str())
            .set("Content-Type", "application/json")
            .send_string(&body)
            .map_err(|e| WebhookError::UReq(Box::new(e)))?;

        let body = response.into_string()?;
        if body != OK_BODY {
            return Err(WebhookError::NotOk(body));
        }
        Ok(())
    }
}
