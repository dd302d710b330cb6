//! Credential acquisition.
//!
//! Credentials come either from the config file (basic auth pair or a raw
//! `Cookie` header) or are harvested from a Firefox profile's
//! `cookies.sqlite` for the tracker's host.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use rusqlite::{Connection, OpenFlags};
use std::path::Path;

use crate::config::AuthConfig;

/// Environment variable consulted when a username is configured without a
/// password.
pub const PASSWORD_ENV: &str = "WIKIMIG_PASSWORD";

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("no credentials configured: set username/password, cookie, or firefox_cookies")]
    MissingCredentials,

    #[error("no password for user '{username}': set `password` or {PASSWORD_ENV}")]
    MissingPassword { username: String },

    #[error("cannot derive a cookie host from base URL '{0}'")]
    NoHost(String),

    #[error("failed to read cookie store {path}: {source}")]
    CookieStore {
        path: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("cookie store contains no cookies for {host}")]
    NoCookies { host: String },
}

#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    Basic { username: String, password: String },
    Cookie(String),
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
            Self::Cookie(_) => f.write_str("Cookie(<redacted>)"),
        }
    }
}

impl Credentials {
    /// Header name and value to attach to every request.
    #[must_use]
    pub fn header(&self) -> (&'static str, String) {
        match self {
            Self::Basic { username, password } => {
                let token = STANDARD.encode(format!("{username}:{password}"));
                ("Authorization", format!("Basic {token}"))
            }
            Self::Cookie(cookie) => ("Cookie", cookie.clone()),
        }
    }
}

/// Resolve the configured credential source into request credentials.
///
/// # Errors
///
/// Returns [`AuthError`] when no usable credential source is configured or
/// the browser cookie store cannot be read.
pub fn resolve_credentials(auth: &AuthConfig, base_url: &str) -> Result<Credentials, AuthError> {
    if let Some(store) = &auth.firefox_cookies {
        let host = url::Url::parse(base_url)
            .ok()
            .and_then(|url| url.host_str().map(str::to_string))
            .ok_or_else(|| AuthError::NoHost(base_url.to_string()))?;
        return firefox_cookie_header(store, &host).map(Credentials::Cookie);
    }

    if let Some(cookie) = &auth.cookie {
        return Ok(Credentials::Cookie(cookie.clone()));
    }

    let Some(username) = &auth.username else {
        return Err(AuthError::MissingCredentials);
    };

    let password = auth
        .password
        .clone()
        .or_else(|| std::env::var(PASSWORD_ENV).ok())
        .ok_or_else(|| AuthError::MissingPassword {
            username: username.clone(),
        })?;

    Ok(Credentials::Basic {
        username: username.clone(),
        password,
    })
}

/// Build a `Cookie` header from every cookie in a Firefox `cookies.sqlite`
/// that applies to `host`.
///
/// The store is opened immutable so a running browser's lock does not block
/// the read.
///
/// # Errors
///
/// Returns [`AuthError::CookieStore`] on SQLite failures and
/// [`AuthError::NoCookies`] if nothing matches the host.
pub fn firefox_cookie_header(store: &Path, host: &str) -> Result<String, AuthError> {
    let map_err = |source| AuthError::CookieStore {
        path: store.display().to_string(),
        source,
    };

    let conn = Connection::open_with_flags(
        immutable_uri(store),
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_URI,
    )
    .map_err(map_err)?;

    let mut stmt = conn
        .prepare("SELECT host, name, value FROM moz_cookies ORDER BY name, host")
        .map_err(map_err)?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })
        .map_err(map_err)?;

    let mut pairs = Vec::new();
    for row in rows {
        let (cookie_host, name, value) = row.map_err(map_err)?;
        if host_matches(&cookie_host, host) {
            pairs.push(format!("{name}={value}"));
        }
    }

    if pairs.is_empty() {
        return Err(AuthError::NoCookies {
            host: host.to_string(),
        });
    }

    tracing::debug!("loaded {} cookies for {host} from {}", pairs.len(), store.display());
    Ok(pairs.join("; "))
}

/// SQLite `file:` URI opening `path` immutably. `%`, `?` and `#` in the path
/// would otherwise be read as URI syntax.
fn immutable_uri(path: &Path) -> String {
    let mut uri = String::from("file:");
    for ch in path.to_string_lossy().chars() {
        match ch {
            '%' => uri.push_str("%25"),
            '?' => uri.push_str("%3F"),
            '#' => uri.push_str("%23"),
            other => uri.push(other),
        }
    }
    uri.push_str("?immutable=1");
    uri
}

/// Cookie domain matching: `.example.com` applies to `example.com` and any
/// subdomain, a bare host only to itself and its subdomains.
fn host_matches(cookie_host: &str, host: &str) -> bool {
    let domain = cookie_host.trim_start_matches('.');
    if domain.is_empty() {
        return false;
    }
    host.eq_ignore_ascii_case(domain)
        || host
            .to_ascii_lowercase()
            .ends_with(&format!(".{}", domain.to_ascii_lowercase()))
}
