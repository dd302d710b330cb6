//! Boundary between the migration pipeline and the issue tracker.
//!
//! The pipeline only ever talks to a [`Tracker`]; the production
//! implementation is [`crate::jira::JiraClient`], tests use in-memory fakes.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Field id of the built-in description field. Always scanned.
pub const DESCRIPTION_FIELD: &str = "description";

/// Staged field updates keyed by field id.
pub type FieldMap = BTreeMap<String, String>;

/// An issue as returned by a search, restricted to the requested fields.
///
/// A field whose value is missing, `null`, or not text maps to `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Issue {
    pub key: String,
    pub fields: BTreeMap<String, Option<String>>,
}

impl Issue {
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Builder-style helper for setting a text field.
    #[must_use]
    pub fn with_field(mut self, id: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(id.into(), Some(value.into()));
        self
    }

    /// Current text value of a field, if present.
    #[must_use]
    pub fn field(&self, id: &str) -> Option<&str> {
        self.fields.get(id).and_then(Option::as_deref)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comment {
    pub id: String,
    pub body: String,
}

impl Comment {
    #[must_use]
    pub fn new(id: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            body: body.into(),
        }
    }
}

/// Opaque notification scheme identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SchemeId(pub u64);

impl fmt::Display for SchemeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationScheme {
    pub id: SchemeId,
    pub name: Option<String>,
}

/// Errors raised by tracker calls.
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    /// The tracker answered with a non-success status.
    #[error("{method} {url} returned HTTP {status}: {body}")]
    Status {
        method: &'static str,
        url: String,
        status: u16,
        body: String,
    },

    /// The request never produced a response (DNS, TLS, timeout, ...).
    #[error("{method} {url} failed: {message}")]
    Transport {
        method: &'static str,
        url: String,
        message: String,
    },

    /// The response body could not be decoded.
    #[error("failed to decode response from {url}: {message}")]
    Decode { url: String, message: String },

    /// Fake/test trackers and future backends report free-form rejections here.
    #[error("{0}")]
    Rejected(String),
}

/// Operations the migration needs from an issue tracker.
///
/// Implementations are shared across worker threads, hence `Sync`.
pub trait Tracker: Sync {
    /// Run a search and return at most `max_results` issues starting at
    /// `start_at`, with only `fields` populated.
    fn search(
        &self,
        jql: &str,
        start_at: usize,
        max_results: usize,
        fields: &[String],
    ) -> Result<Vec<Issue>, TrackerError>;

    /// All comments of an issue.
    fn comments(&self, issue_key: &str) -> Result<Vec<Comment>, TrackerError>;

    /// Update several fields in one call.
    fn update_fields(
        &self,
        issue_key: &str,
        fields: &FieldMap,
        notify: bool,
    ) -> Result<(), TrackerError>;

    fn update_comment(
        &self,
        issue_key: &str,
        comment_id: &str,
        body: &str,
    ) -> Result<(), TrackerError>;

    /// The project's current notification scheme, `None` if it has none.
    fn notification_scheme(&self, project: &str)
    -> Result<Option<NotificationScheme>, TrackerError>;

    /// Assign a notification scheme; `None` removes the assignment.
    fn set_notification_scheme(
        &self,
        project: &str,
        scheme: Option<SchemeId>,
    ) -> Result<(), TrackerError>;
}
