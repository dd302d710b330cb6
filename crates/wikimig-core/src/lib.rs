//! wikimig-core library.
//!
//! Migrates issue fields and comments from HTML to the tracker's wiki markup.
//! [`run::run`] drives [`orchestrator::Orchestrator`] once per project; the
//! orchestrator fans issues out to [`worker::IssueWorker`]s while the
//! project's notifications are suspended by [`notify::disable`].
//!
//! # Conventions
//!
//! - **Errors**: `thiserror` enums per module; `anyhow::Result` for config
//!   loading.
//! - **Logging**: `tracing` macros (`info!`, `warn!`, `error!`, `debug!`).

pub mod auth;
pub mod cancel;
pub mod config;
pub mod convert;
pub mod jira;
pub mod notify;
pub mod orchestrator;
pub mod run;
pub mod tracker;
pub mod worker;
