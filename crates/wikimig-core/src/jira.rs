//! Jira REST client implementing [`Tracker`].

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use std::time::Duration;

use crate::auth::Credentials;
use crate::tracker::{
    Comment, FieldMap, Issue, NotificationScheme, SchemeId, Tracker, TrackerError,
};

const COMMENT_PAGE_SIZE: usize = 100;

pub struct JiraClient {
    agent: ureq::Agent,
    base_url: String,
    auth_header: (&'static str, String),
}

#[derive(Debug, Deserialize)]
struct SearchPage {
    #[serde(default)]
    issues: Vec<RawIssue>,
}

#[derive(Debug, Deserialize)]
struct RawIssue {
    key: String,
    #[serde(default)]
    fields: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommentPage {
    #[serde(default)]
    start_at: usize,
    #[serde(default)]
    total: usize,
    #[serde(default)]
    comments: Vec<RawComment>,
}

#[derive(Debug, Deserialize)]
struct RawComment {
    id: String,
    #[serde(default)]
    body: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawScheme {
    #[serde(default)]
    id: Option<u64>,
    #[serde(default)]
    name: Option<String>,
}

impl JiraClient {
    #[must_use]
    pub fn new(base_url: &str, credentials: &Credentials, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(timeout)
            .user_agent(concat!("wikimig/", env!("CARGO_PKG_VERSION")))
            .build();

        Self {
            agent,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_header: credentials.header(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn send(
        &self,
        method: &'static str,
        url: &str,
        body: Option<&Value>,
    ) -> Result<ureq::Response, TrackerError> {
        let (header, value) = &self.auth_header;
        let request = self
            .agent
            .request(method, url)
            .set("Accept", "application/json")
            .set(header, value);

        let result = match body {
            Some(body) => request.send_json(body),
            None => request.call(),
        };

        result.map_err(|err| match err {
            ureq::Error::Status(status, response) => TrackerError::Status {
                method,
                url: url.to_string(),
                status,
                body: response.into_string().unwrap_or_default(),
            },
            ureq::Error::Transport(transport) => TrackerError::Transport {
                method,
                url: url.to_string(),
                message: transport.to_string(),
            },
        })
    }

    fn send_json<T: DeserializeOwned>(
        &self,
        method: &'static str,
        url: &str,
        body: Option<&Value>,
    ) -> Result<T, TrackerError> {
        let response = self.send(method, url, body)?;
        let text = response.into_string().map_err(|err| TrackerError::Decode {
            url: url.to_string(),
            message: err.to_string(),
        })?;
        decode(url, &text)
    }
}

fn decode<T: DeserializeOwned>(url: &str, text: &str) -> Result<T, TrackerError> {
    serde_json::from_str(text).map_err(|err| TrackerError::Decode {
        url: url.to_string(),
        message: err.to_string(),
    })
}

/// Keep only text values; anything else (null, objects, numbers) counts as
/// absent for conversion purposes.
fn into_issue(raw: RawIssue) -> Issue {
    let fields = raw
        .fields
        .into_iter()
        .map(|(id, value)| match value {
            Value::String(text) => (id, Some(text)),
            _ => (id, None),
        })
        .collect();

    Issue {
        key: raw.key,
        fields,
    }
}

impl Tracker for JiraClient {
    fn search(
        &self,
        jql: &str,
        start_at: usize,
        max_results: usize,
        fields: &[String],
    ) -> Result<Vec<Issue>, TrackerError> {
        let url = self.url("/rest/api/2/search");
        let body = json!({
            "jql": jql,
            "startAt": start_at,
            "maxResults": max_results,
            "fields": fields,
        });

        let page: SearchPage = self.send_json("POST", &url, Some(&body))?;
        Ok(page.issues.into_iter().map(into_issue).collect())
    }

    fn comments(&self, issue_key: &str) -> Result<Vec<Comment>, TrackerError> {
        let mut comments = Vec::new();
        let mut start_at = 0_usize;

        loop {
            let url = self.url(&format!(
                "/rest/api/2/issue/{issue_key}/comment?startAt={start_at}&maxResults={COMMENT_PAGE_SIZE}"
            ));
            let page: CommentPage = self.send_json("GET", &url, None)?;

            let fetched = page.comments.len();
            comments.extend(
                page.comments
                    .into_iter()
                    .map(|raw| Comment::new(raw.id, raw.body.unwrap_or_default())),
            );

            if fetched == 0 || page.start_at + fetched >= page.total {
                break;
            }
            start_at = page.start_at + fetched;
        }

        Ok(comments)
    }

    fn update_fields(
        &self,
        issue_key: &str,
        fields: &FieldMap,
        notify: bool,
    ) -> Result<(), TrackerError> {
        let url = self.url(&format!("/rest/api/2/issue/{issue_key}?notifyUsers={notify}"));
        let body = json!({ "fields": fields });
        self.send("PUT", &url, Some(&body)).map(drop)
    }

    fn update_comment(
        &self,
        issue_key: &str,
        comment_id: &str,
        body: &str,
    ) -> Result<(), TrackerError> {
        let url = self.url(&format!("/rest/api/2/issue/{issue_key}/comment/{comment_id}"));
        let body = json!({ "body": body });
        self.send("PUT", &url, Some(&body)).map(drop)
    }

    fn notification_scheme(
        &self,
        project: &str,
    ) -> Result<Option<NotificationScheme>, TrackerError> {
        let url = self.url(&format!(
            "/rest/api/latest/project/{project}/notificationscheme"
        ));
        let raw: RawScheme = self.send_json("GET", &url, None)?;

        Ok(raw.id.map(|id| NotificationScheme {
            id: SchemeId(id),
            name: raw.name,
        }))
    }

    fn set_notification_scheme(
        &self,
        project: &str,
        scheme: Option<SchemeId>,
    ) -> Result<(), TrackerError> {
        let url = self.url(&format!("/rest/api/latest/project/{project}"));
        let body = json!({ "notificationScheme": scheme });
        self.send("PUT", &url, Some(&body)).map(drop)
    }
}
