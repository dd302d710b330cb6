//! Per-issue migration.
//!
//! A worker converts every scanned field and comment whose value still looks
//! like HTML. Values that were already converted no longer start with the
//! HTML-open marker, so running a worker twice on the same issue performs no
//! writes the second time.

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::convert::{ConvertError, Converter};
use crate::tracker::{FieldMap, Issue, Tracker, TrackerError};

/// First character of a value that still needs conversion.
pub const HTML_OPEN_MARKER: char = '<';

#[must_use]
pub fn looks_like_html(text: &str) -> bool {
    text.starts_with(HTML_OPEN_MARKER)
}

/// Errors that abort the migration of a single issue.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("converting field {field} failed: {source}")]
    ConvertField {
        field: String,
        #[source]
        source: ConvertError,
    },

    #[error(transparent)]
    Tracker(#[from] TrackerError),
}

/// What happened to one issue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IssueOutcome {
    pub key: String,
    /// Number of fields written by the batched field update.
    pub fields_updated: usize,
    /// The batched field update was rejected.
    pub update_failed: bool,
    pub comments_updated: usize,
    pub comments_failed: usize,
    /// Set when processing stopped on an unexpected error.
    pub error: Option<String>,
}

impl IssueOutcome {
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn errored(key: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::new(key)
        }
    }

    /// True when nothing needed converting.
    #[must_use]
    pub const fn is_clean(&self) -> bool {
        self.fields_updated == 0
            && !self.update_failed
            && self.comments_updated == 0
            && self.comments_failed == 0
            && self.error.is_none()
    }
}

pub struct IssueWorker<'a, T: ?Sized, C: ?Sized> {
    tracker: &'a T,
    converter: &'a C,
    fields: &'a [String],
    dry_run: bool,
}

impl<'a, T, C> IssueWorker<'a, T, C>
where
    T: Tracker + ?Sized,
    C: Converter + ?Sized,
{
    /// `fields` is the full list of field ids to scan, description included.
    #[must_use]
    pub const fn new(tracker: &'a T, converter: &'a C, fields: &'a [String]) -> Self {
        Self {
            tracker,
            converter,
            fields,
            dry_run: false,
        }
    }

    /// Convert but never write.
    #[must_use]
    pub const fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Migrate one issue. Never fails: every problem ends up in the outcome.
    #[must_use]
    pub fn process(&self, issue: &Issue) -> IssueOutcome {
        let mut outcome = IssueOutcome::new(&issue.key);
        if let Err(err) = self.migrate(issue, &mut outcome) {
            error!("Issue {} could not be migrated: {err}", issue.key);
            outcome.error = Some(err.to_string());
        }
        outcome
    }

    fn migrate(&self, issue: &Issue, outcome: &mut IssueOutcome) -> Result<(), WorkerError> {
        let staged = self.stage_fields(issue)?;
        self.apply_fields(issue, &staged, outcome);
        self.migrate_comments(issue, outcome)?;
        Ok(())
    }

    fn stage_fields(&self, issue: &Issue) -> Result<FieldMap, WorkerError> {
        let mut staged = FieldMap::new();
        for field in self.fields {
            let Some(old_value) = issue.field(field) else {
                continue;
            };
            if !looks_like_html(old_value) {
                continue;
            }

            info!("Updating {field} for issue {}", issue.key);
            let converted = self
                .converter
                .convert(old_value)
                .map_err(|source| WorkerError::ConvertField {
                    field: field.clone(),
                    source,
                })?;
            staged.insert(field.clone(), converted);
        }
        Ok(staged)
    }

    fn apply_fields(&self, issue: &Issue, staged: &FieldMap, outcome: &mut IssueOutcome) {
        if staged.is_empty() {
            return;
        }

        if self.dry_run {
            info!(
                "[dry-run] would update {} field(s) on issue {}",
                staged.len(),
                issue.key
            );
            outcome.fields_updated = staged.len();
            return;
        }

        match self.tracker.update_fields(&issue.key, staged, false) {
            Ok(()) => outcome.fields_updated = staged.len(),
            Err(err) => {
                warn!("Issue {} could not be updated: {err}", issue.key);
                outcome.update_failed = true;
            }
        }
    }

    fn migrate_comments(
        &self,
        issue: &Issue,
        outcome: &mut IssueOutcome,
    ) -> Result<(), WorkerError> {
        let comments = self.tracker.comments(&issue.key)?;
        debug!("Issue {} has {} comment(s)", issue.key, comments.len());

        for comment in comments.iter().filter(|comment| looks_like_html(&comment.body)) {
            info!("Updating comment {} for issue {}", comment.id, issue.key);

            let body = match self.converter.convert(&comment.body) {
                Ok(body) => body,
                Err(err) => {
                    warn!(
                        "Comment {} in issue {} could not be converted: {err}",
                        comment.id, issue.key
                    );
                    outcome.comments_failed += 1;
                    continue;
                }
            };

            if self.dry_run {
                info!("[dry-run] would update comment {} in issue {}", comment.id, issue.key);
                outcome.comments_updated += 1;
                continue;
            }

            match self.tracker.update_comment(&issue.key, &comment.id, &body) {
                Ok(()) => outcome.comments_updated += 1,
                Err(err) => {
                    warn!(
                        "Comment {} in issue {} could not be updated: {err}",
                        comment.id, issue.key
                    );
                    outcome.comments_failed += 1;
                }
            }
        }

        Ok(())
    }
}
