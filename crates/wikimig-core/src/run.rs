//! Run driver: projects one after another, then a summary.

use serde::Serialize;
use std::collections::BTreeSet;
use tracing::info;

use crate::cancel::CancelToken;
use crate::convert::Converter;
use crate::orchestrator::{Orchestrator, ProjectReport, RunOptions};
use crate::tracker::Tracker;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub projects: Vec<ProjectReport>,
    pub cancelled: bool,
}

impl RunReport {
    /// Issue keys whose field update was rejected, across all projects.
    #[must_use]
    pub fn failed_keys(&self) -> BTreeSet<&str> {
        self.projects
            .iter()
            .flat_map(|project| project.failed.iter().map(String::as_str))
            .collect()
    }

    #[must_use]
    pub fn errored_keys(&self) -> BTreeSet<&str> {
        self.projects
            .iter()
            .flat_map(|project| project.errored.iter().map(String::as_str))
            .collect()
    }

    /// Projects that were skipped or whose notification scheme could not be
    /// restored.
    #[must_use]
    pub fn troubled_projects(&self) -> Vec<&ProjectReport> {
        self.projects
            .iter()
            .filter(|project| project.skipped.is_some() || project.restore_error.is_some())
            .collect()
    }

    /// The end-of-run line listing issues that could not be updated, if any.
    #[must_use]
    pub fn failure_summary(&self) -> Option<String> {
        let failed = self.failed_keys();
        if failed.is_empty() {
            return None;
        }
        let keys: Vec<&str> = failed.into_iter().collect();
        Some(format!(
            "The following issues could not be updated: {}",
            keys.join(", ")
        ))
    }
}

/// Run the orchestrator for each project in order. Projects are never
/// processed in parallel; once cancellation is requested no further project
/// is started.
#[must_use]
pub fn run<T, C>(
    tracker: &T,
    converter: &C,
    projects: &[String],
    options: &RunOptions,
    cancel: &CancelToken,
) -> RunReport
where
    T: Tracker + ?Sized,
    C: Converter + ?Sized,
{
    let orchestrator = Orchestrator::new(tracker, converter, options, cancel);
    let mut report = RunReport::default();

    for project in projects {
        if cancel.is_cancelled() {
            info!("Cancelled, not starting project {project}");
            break;
        }
        info!("Working on project {project}");
        report.projects.push(orchestrator.run_project(project));
    }

    report.cancelled = cancel.is_cancelled();
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project(name: &str, failed: &[&str]) -> ProjectReport {
        ProjectReport {
            failed: failed.iter().map(|key| (*key).to_string()).collect(),
            ..ProjectReport::new(name)
        }
    }

    #[test]
    fn no_failures_means_no_summary() {
        let report = RunReport {
            projects: vec![project("DEMO", &[])],
            cancelled: false,
        };
        assert!(report.failure_summary().is_none());
    }

    #[test]
    fn summary_lists_failures_from_every_project() {
        let report = RunReport {
            projects: vec![project("DEMO", &["DEMO-7", "DEMO-1"]), project("OPS", &["OPS-3"])],
            cancelled: false,
        };
        assert_eq!(
            report.failure_summary().as_deref(),
            Some("The following issues could not be updated: DEMO-1, DEMO-7, OPS-3")
        );
    }

    #[test]
    fn skipped_projects_are_troubled() {
        let mut skipped = project("OPS", &[]);
        skipped.skipped = Some("HTTP 403".to_string());
        let report = RunReport {
            projects: vec![project("DEMO", &[]), skipped],
            cancelled: false,
        };
        let troubled = report.troubled_projects();
        assert_eq!(troubled.len(), 1);
        assert_eq!(troubled[0].project, "OPS");
    }
}
