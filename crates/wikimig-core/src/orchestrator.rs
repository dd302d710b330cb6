//! Per-project batch run: suspend notifications, page through the search,
//! fan issues out to a bounded pool of worker threads, collect outcomes,
//! restore notifications.
//!
//! # Pagination
//!
//! Results are ordered by issue key descending. Each follow-up page adds an
//! `issuekey < <last key seen>` clause, so the cursor only moves forward no
//! matter how many issues were converted, failed, or are still in flight.
//!
//! # Concurrency
//!
//! Exactly `workers` threads are spawned inside a [`std::thread::scope`].
//! They pull issues from a shared queue and report an [`IssueOutcome`] each
//! over a channel; the orchestrator is the only owner of the failure set.

use serde::Serialize;
use std::any::Any;
use std::collections::BTreeSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Mutex, PoisonError};
use std::thread;
use tracing::{debug, error, info, warn};

use crate::cancel::CancelToken;
use crate::config::MigrationConfig;
use crate::convert::Converter;
use crate::notify;
use crate::tracker::{DESCRIPTION_FIELD, Issue, SchemeId, Tracker, TrackerError};
use crate::worker::{IssueOutcome, IssueWorker};

/// Settings shared by every project in a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    /// Field ids to scan: configured custom fields, then `description`.
    pub fields: Vec<String>,
    pub additional_jql: Option<String>,
    pub search_function: String,
    pub disabled_scheme: SchemeId,
    pub workers: usize,
    pub page_size: usize,
    pub dry_run: bool,
}

impl RunOptions {
    #[must_use]
    pub fn from_config(config: &MigrationConfig) -> Self {
        Self {
            fields: scan_fields(&config.customfields),
            additional_jql: config
                .additional_jql
                .as_ref()
                .map(|clause| clause.trim().to_string())
                .filter(|clause| !clause.is_empty()),
            search_function: config.search_function.clone(),
            disabled_scheme: config.disabled_notification_scheme,
            workers: config.workers.max(1),
            page_size: config.page_size.max(1),
            dry_run: false,
        }
    }
}

/// Custom fields in configured order followed by `description`, without
/// duplicates.
#[must_use]
pub fn scan_fields(customfields: &[String]) -> Vec<String> {
    let mut fields: Vec<String> = Vec::with_capacity(customfields.len() + 1);
    for field in customfields
        .iter()
        .map(|field| field.trim())
        .chain(std::iter::once(DESCRIPTION_FIELD))
    {
        if !field.is_empty() && !fields.iter().any(|seen| seen == field) {
            fields.push(field.to_string());
        }
    }
    fields
}

/// Search filter for issues of `project` that still contain HTML.
#[must_use]
pub fn build_jql(project: &str, options: &RunOptions, after_key: Option<&str>) -> String {
    let mut jql = format!(
        "issueFunction in {}(\"{project}\")",
        options.search_function
    );
    if let Some(clause) = &options.additional_jql {
        jql.push_str(&format!(" AND ({clause})"));
    }
    if let Some(key) = after_key {
        jql.push_str(&format!(" AND issuekey < {key}"));
    }
    jql.push_str(" order by issuekey desc");
    jql
}

/// Outcome of one project run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProjectReport {
    pub project: String,
    pub submitted: usize,
    pub processed: usize,
    pub issues_updated: usize,
    pub comments_updated: usize,
    pub comments_failed: usize,
    /// Issues whose batched field update was rejected.
    pub failed: BTreeSet<String>,
    /// Issues that stopped on an unexpected error. Kept apart from `failed`.
    pub errored: BTreeSet<String>,
    /// Set when notifications could not be disabled and the project was skipped.
    pub skipped: Option<String>,
    pub search_error: Option<String>,
    pub restore_error: Option<String>,
    pub cancelled: bool,
}

impl ProjectReport {
    #[must_use]
    pub fn new(project: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            ..Self::default()
        }
    }

    fn record(&mut self, outcome: IssueOutcome) {
        self.processed += 1;
        self.comments_updated += outcome.comments_updated;
        self.comments_failed += outcome.comments_failed;
        if outcome.fields_updated > 0 {
            self.issues_updated += 1;
        }
        if outcome.update_failed {
            self.failed.insert(outcome.key.clone());
        }
        if let Some(err) = outcome.error {
            debug!("Issue {} recorded as errored: {err}", outcome.key);
            self.errored.insert(outcome.key);
        }
    }

    fn record_all(&mut self, outcomes: impl IntoIterator<Item = IssueOutcome>) {
        for outcome in outcomes {
            self.record(outcome);
        }
    }
}

pub struct Orchestrator<'a, T: ?Sized, C: ?Sized> {
    tracker: &'a T,
    converter: &'a C,
    options: &'a RunOptions,
    cancel: &'a CancelToken,
}

impl<'a, T, C> Orchestrator<'a, T, C>
where
    T: Tracker + ?Sized,
    C: Converter + ?Sized,
{
    #[must_use]
    pub const fn new(
        tracker: &'a T,
        converter: &'a C,
        options: &'a RunOptions,
        cancel: &'a CancelToken,
    ) -> Self {
        Self {
            tracker,
            converter,
            options,
            cancel,
        }
    }

    /// Migrate every qualifying issue of `project`.
    ///
    /// Notifications are restored on every exit path once they were
    /// disabled. A failure to disable them skips the project.
    #[must_use]
    pub fn run_project(&self, project: &str) -> ProjectReport {
        let mut report = ProjectReport::new(project);

        let guard = if self.options.dry_run {
            info!("[dry-run] leaving notifications of project {project} untouched");
            None
        } else {
            match notify::disable(self.tracker, project, self.options.disabled_scheme) {
                Ok(guard) => Some(guard),
                Err(err) => {
                    error!(
                        "Could not disable notifications for project {project}, skipping it: {err}"
                    );
                    report.skipped = Some(err.to_string());
                    return report;
                }
            }
        };

        self.process_issues(project, &mut report);

        if report.cancelled {
            info!("Run cancelled, restoring notification scheme...");
        }

        if let Some(guard) = guard {
            if let Err(err) = guard.restore() {
                error!(
                    "Notification scheme of project {project} was NOT restored, reassign it by hand: {err}"
                );
                report.restore_error = Some(err.to_string());
            }
        }

        info!(
            "Project {project} done: {} processed, {} updated, {} failed, {} errored",
            report.processed,
            report.issues_updated,
            report.failed.len(),
            report.errored.len()
        );
        report
    }

    fn process_issues(&self, project: &str, report: &mut ProjectReport) {
        let worker = IssueWorker::new(self.tracker, self.converter, &self.options.fields)
            .dry_run(self.options.dry_run);
        let (job_tx, job_rx) = mpsc::channel::<Issue>();
        let job_rx = Mutex::new(job_rx);
        let (outcome_tx, outcome_rx) = mpsc::channel::<IssueOutcome>();

        thread::scope(|scope| {
            for _ in 0..self.options.workers {
                let outcome_tx = outcome_tx.clone();
                let job_rx = &job_rx;
                let worker = &worker;
                let cancel = self.cancel;
                scope.spawn(move || worker_loop(job_rx, &outcome_tx, worker, cancel));
            }
            drop(outcome_tx);

            if let Err(err) = self.paginate(project, &job_tx, &outcome_rx, report) {
                error!("Search for project {project} failed, waiting for submitted issues: {err}");
                report.search_error = Some(err.to_string());
            }
            drop(job_tx);

            // Ends once every worker has exited.
            report.record_all(outcome_rx.iter());
        });

        report.cancelled = self.cancel.is_cancelled();
    }

    fn paginate(
        &self,
        project: &str,
        jobs: &Sender<Issue>,
        outcomes: &Receiver<IssueOutcome>,
        report: &mut ProjectReport,
    ) -> Result<(), TrackerError> {
        let page_size = self.options.page_size;
        let mut cursor: Option<String> = None;

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            let jql = build_jql(project, self.options, cursor.as_deref());
            debug!("Searching: {jql}");
            let issues = self
                .tracker
                .search(&jql, 0, page_size, &self.options.fields)?;
            info!("Got {} new issues.", issues.len());

            let page_len = issues.len();
            cursor = issues.last().map(|issue| issue.key.clone());

            for issue in issues {
                if jobs.send(issue).is_err() {
                    warn!("All workers exited early, stopping submission for project {project}");
                    return Ok(());
                }
                report.submitted += 1;
            }

            report.record_all(outcomes.try_iter());

            if page_len < page_size {
                break;
            }
        }

        Ok(())
    }
}

fn worker_loop<T, C>(
    jobs: &Mutex<Receiver<Issue>>,
    outcomes: &Sender<IssueOutcome>,
    worker: &IssueWorker<'_, T, C>,
    cancel: &CancelToken,
) where
    T: Tracker + ?Sized,
    C: Converter + ?Sized,
{
    loop {
        let next = jobs.lock().unwrap_or_else(PoisonError::into_inner).recv();
        let Ok(issue) = next else {
            break;
        };

        if cancel.is_cancelled() {
            debug!("Skipping issue {} after cancellation", issue.key);
            continue;
        }

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| worker.process(&issue)))
            .unwrap_or_else(|payload| {
                let message = panic_message(payload.as_ref());
                error!("Worker panicked on issue {}: {message}", issue.key);
                IssueOutcome::errored(&issue.key, format!("worker panicked: {message}"))
            });

        if outcomes.send(outcome).is_err() {
            break;
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|message| (*message).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
