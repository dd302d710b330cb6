//! In-memory tracker and converter doubles shared by the integration tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use wikimig_core::cancel::CancelToken;
use wikimig_core::convert::{ConvertError, Converter};
use wikimig_core::orchestrator::{RunOptions, scan_fields};
use wikimig_core::tracker::{
    Comment, FieldMap, Issue, NotificationScheme, SchemeId, Tracker, TrackerError,
};
use wikimig_core::worker::looks_like_html;

pub const DISABLED: SchemeId = SchemeId(99_999);
pub const ORIGINAL: SchemeId = SchemeId(10_000);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Search { jql: String, max_results: usize },
    Comments(String),
    UpdateFields { key: String, fields: FieldMap, notify: bool },
    UpdateComment { key: String, comment_id: String, body: String },
    GetScheme(String),
    SetScheme { project: String, scheme: Option<SchemeId> },
}

#[derive(Default)]
struct State {
    issues: BTreeMap<String, Issue>,
    comments: BTreeMap<String, Vec<Comment>>,
    schemes: BTreeMap<String, Option<SchemeId>>,
    calls: Vec<Call>,
    fail_update_fields: BTreeSet<String>,
    fail_update_comment: BTreeSet<String>,
    fail_comment_listing: BTreeSet<String>,
    fail_get_scheme: bool,
    fail_set_scheme: usize,
    rejected_schemes: BTreeSet<Option<SchemeId>>,
    fail_search: bool,
}

/// Tracker double. Search understands the two clauses the orchestrator
/// generates: `htmlIssues("<PROJECT>")` and `issuekey < <KEY>`, only
/// returns issues that still contain HTML somewhere, and only carries the
/// requested fields.
#[derive(Default)]
pub struct FakeTracker {
    state: Mutex<State>,
    delay: Option<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every per-issue call sleeps this long, to make overlap observable.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_project(self, project: &str, scheme: Option<SchemeId>) -> Self {
        self.state().schemes.insert(project.to_string(), scheme);
        self
    }

    pub fn with_issue(self, issue: Issue, comments: Vec<Comment>) -> Self {
        {
            let mut state = self.state();
            state.comments.insert(issue.key.clone(), comments);
            state.issues.insert(issue.key.clone(), issue);
        }
        self
    }

    pub fn fail_update_fields(self, key: &str) -> Self {
        self.state().fail_update_fields.insert(key.to_string());
        self
    }

    pub fn fail_update_comment(self, comment_id: &str) -> Self {
        self.state().fail_update_comment.insert(comment_id.to_string());
        self
    }

    pub fn fail_comment_listing(self, key: &str) -> Self {
        self.state().fail_comment_listing.insert(key.to_string());
        self
    }

    pub fn fail_get_scheme(self) -> Self {
        self.state().fail_get_scheme = true;
        self
    }

    /// Fail the next `times` scheme assignments, whatever their target.
    pub fn set_scheme_failures(&self, times: usize) {
        self.state().fail_set_scheme = times;
    }

    /// Always reject assigning `scheme`.
    pub fn reject_scheme(self, scheme: Option<SchemeId>) -> Self {
        self.state().rejected_schemes.insert(scheme);
        self
    }

    pub fn fail_search(self) -> Self {
        self.state().fail_search = true;
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    pub fn field_updates(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|call| matches!(call, Call::UpdateFields { .. }))
            .collect()
    }

    pub fn comment_updates(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|call| matches!(call, Call::UpdateComment { .. }))
            .collect()
    }

    pub fn searches(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Search { jql, .. } => Some(jql),
                _ => None,
            })
            .collect()
    }

    pub fn scheme(&self, project: &str) -> Option<SchemeId> {
        self.state().schemes.get(project).copied().flatten()
    }

    pub fn issue(&self, key: &str) -> Issue {
        self.state().issues.get(key).cloned().expect("issue exists")
    }

    pub fn comments_of(&self, key: &str) -> Vec<Comment> {
        self.state().comments.get(key).cloned().unwrap_or_default()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().expect("fake tracker state lock")
    }

    fn record(&self, call: Call) {
        self.state().calls.push(call);
    }

    /// Track overlap of per-issue calls.
    fn busy(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            thread::sleep(delay);
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    fn still_html(state: &State, issue: &Issue) -> bool {
        issue.fields.values().flatten().any(|value| looks_like_html(value))
            || state
                .comments
                .get(&issue.key)
                .is_some_and(|comments| comments.iter().any(|c| looks_like_html(&c.body)))
    }
}

pub fn key_number(key: &str) -> u64 {
    key.rsplit_once('-')
        .and_then(|(_, number)| number.parse().ok())
        .expect("issue keys look like PROJECT-N")
}

fn between<'a>(text: &'a str, start: &str, end: &str) -> Option<&'a str> {
    let from = text.find(start)? + start.len();
    let rest = &text[from..];
    let to = rest.find(end).unwrap_or(rest.len());
    Some(&rest[..to])
}

impl Tracker for FakeTracker {
    fn search(
        &self,
        jql: &str,
        _start_at: usize,
        max_results: usize,
        fields: &[String],
    ) -> Result<Vec<Issue>, TrackerError> {
        self.record(Call::Search {
            jql: jql.to_string(),
            max_results,
        });
        let state = self.state();
        if state.fail_search {
            return Err(TrackerError::Rejected("search unavailable".to_string()));
        }

        let project = between(jql, "(\"", "\")").expect("project clause");
        let before = between(jql, "issuekey < ", " ").map(key_number);

        let mut matching: Vec<Issue> = state
            .issues
            .values()
            .filter(|issue| issue.key.starts_with(&format!("{project}-")))
            .filter(|issue| before.is_none_or(|limit| key_number(&issue.key) < limit))
            .filter(|issue| Self::still_html(&state, issue))
            .map(|issue| Issue {
                key: issue.key.clone(),
                fields: issue
                    .fields
                    .iter()
                    .filter(|(id, _)| fields.contains(id))
                    .map(|(id, value)| (id.clone(), value.clone()))
                    .collect(),
            })
            .collect();
        matching.sort_by_key(|issue| std::cmp::Reverse(key_number(&issue.key)));
        matching.truncate(max_results);
        Ok(matching)
    }

    fn comments(&self, issue_key: &str) -> Result<Vec<Comment>, TrackerError> {
        self.record(Call::Comments(issue_key.to_string()));
        self.busy();
        let state = self.state();
        if state.fail_comment_listing.contains(issue_key) {
            return Err(TrackerError::Rejected(format!("comments of {issue_key} unavailable")));
        }
        Ok(state.comments.get(issue_key).cloned().unwrap_or_default())
    }

    fn update_fields(
        &self,
        issue_key: &str,
        fields: &FieldMap,
        notify: bool,
    ) -> Result<(), TrackerError> {
        self.record(Call::UpdateFields {
            key: issue_key.to_string(),
            fields: fields.clone(),
            notify,
        });
        self.busy();
        let mut state = self.state();
        if state.fail_update_fields.contains(issue_key) {
            return Err(TrackerError::Rejected(format!("{issue_key} is locked")));
        }
        let issue = state
            .issues
            .get_mut(issue_key)
            .ok_or_else(|| TrackerError::Rejected(format!("{issue_key} not found")))?;
        for (field, value) in fields {
            issue.fields.insert(field.clone(), Some(value.clone()));
        }
        Ok(())
    }

    fn update_comment(
        &self,
        issue_key: &str,
        comment_id: &str,
        body: &str,
    ) -> Result<(), TrackerError> {
        self.record(Call::UpdateComment {
            key: issue_key.to_string(),
            comment_id: comment_id.to_string(),
            body: body.to_string(),
        });
        self.busy();
        let mut state = self.state();
        if state.fail_update_comment.contains(comment_id) {
            return Err(TrackerError::Rejected(format!("comment {comment_id} is locked")));
        }
        let comment = state
            .comments
            .get_mut(issue_key)
            .and_then(|comments| comments.iter_mut().find(|c| c.id == comment_id))
            .ok_or_else(|| TrackerError::Rejected(format!("comment {comment_id} not found")))?;
        comment.body = body.to_string();
        Ok(())
    }

    fn notification_scheme(
        &self,
        project: &str,
    ) -> Result<Option<NotificationScheme>, TrackerError> {
        self.record(Call::GetScheme(project.to_string()));
        let state = self.state();
        if state.fail_get_scheme {
            return Err(TrackerError::Rejected("permission denied".to_string()));
        }
        Ok(state
            .schemes
            .get(project)
            .copied()
            .flatten()
            .map(|id| NotificationScheme {
                id,
                name: Some("Default Notification Scheme".to_string()),
            }))
    }

    fn set_notification_scheme(
        &self,
        project: &str,
        scheme: Option<SchemeId>,
    ) -> Result<(), TrackerError> {
        self.record(Call::SetScheme {
            project: project.to_string(),
            scheme,
        });
        let mut state = self.state();
        if state.fail_set_scheme > 0 {
            state.fail_set_scheme -= 1;
            return Err(TrackerError::Rejected("scheme update rejected".to_string()));
        }
        if state.rejected_schemes.contains(&scheme) {
            return Err(TrackerError::Rejected("scheme is not assignable".to_string()));
        }
        state.schemes.insert(project.to_string(), scheme);
        Ok(())
    }
}

/// Converter double: strips `<p>` tags unless a mapping says otherwise.
#[derive(Default)]
pub struct FakeConverter {
    mapping: BTreeMap<String, String>,
    fail_on: BTreeSet<String>,
    panic_on: BTreeSet<String>,
    cancel_on: Option<(String, CancelToken)>,
    calls: Mutex<Vec<String>>,
}

impl FakeConverter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn map(mut self, from: &str, to: &str) -> Self {
        self.mapping.insert(from.to_string(), to.to_string());
        self
    }

    pub fn fail_on(mut self, text: &str) -> Self {
        self.fail_on.insert(text.to_string());
        self
    }

    pub fn panic_on(mut self, text: &str) -> Self {
        self.panic_on.insert(text.to_string());
        self
    }

    /// Trip `token` when asked to convert `text`, simulating Ctrl-C arriving
    /// mid-run.
    pub fn cancel_on(mut self, text: &str, token: &CancelToken) -> Self {
        self.cancel_on = Some((text.to_string(), token.clone()));
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("converter calls lock").clone()
    }
}

impl Converter for FakeConverter {
    fn convert(&self, text: &str) -> Result<String, ConvertError> {
        self.calls
            .lock()
            .expect("converter calls lock")
            .push(text.to_string());

        if let Some((trigger, token)) = &self.cancel_on {
            if trigger == text {
                token.cancel();
            }
        }
        if self.panic_on.contains(text) {
            panic!("converter crashed on {text}");
        }
        if self.fail_on.contains(text) {
            return Err(ConvertError::Io(io::Error::other("converter crashed")));
        }
        if let Some(mapped) = self.mapping.get(text) {
            return Ok(mapped.clone());
        }
        Ok(text.replace("<p>", "").replace("</p>", ""))
    }
}

pub fn options(workers: usize, page_size: usize) -> RunOptions {
    RunOptions {
        fields: scan_fields(&[]),
        additional_jql: None,
        search_function: "htmlIssues".to_string(),
        disabled_scheme: DISABLED,
        workers,
        page_size,
        dry_run: false,
    }
}

/// `count` issues `PROJECT-1..=count`, each with an HTML description.
pub fn html_issues(tracker: FakeTracker, project: &str, count: u64) -> FakeTracker {
    (1..=count).fold(tracker, |tracker, n| {
        tracker.with_issue(
            Issue::new(format!("{project}-{n}")).with_field("description", format!("<p>{n}</p>")),
            Vec::new(),
        )
    })
}
