//! Temporarily swapping a project's notification scheme.
//!
//! [`disable`] returns a [`NotificationsSuspended`] guard. Restoring the
//! previous scheme happens either explicitly through
//! [`NotificationsSuspended::restore`] or, if the guard is dropped first
//! (early return, panic), from `Drop`. It never happens twice.

use tracing::{error, info, warn};

use crate::tracker::{SchemeId, Tracker, TrackerError};

/// RAII guard for a project whose notifications are switched off.
#[must_use = "dropping the guard restores notifications immediately"]
pub struct NotificationsSuspended<'a, T: Tracker + ?Sized> {
    tracker: &'a T,
    project: String,
    previous: Option<SchemeId>,
    restored: bool,
}

impl<T: Tracker + ?Sized> std::fmt::Debug for NotificationsSuspended<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationsSuspended")
            .field("project", &self.project)
            .field("previous", &self.previous)
            .field("restored", &self.restored)
            .finish_non_exhaustive()
    }
}

/// Switch `project` to the `disabled` scheme, remembering the current one.
///
/// # Errors
///
/// Returns the tracker error if the current scheme cannot be read or the
/// disabled scheme cannot be assigned. No guard exists in that case, so
/// nothing will be restored.
pub fn disable<'a, T: Tracker + ?Sized>(
    tracker: &'a T,
    project: &str,
    disabled: SchemeId,
) -> Result<NotificationsSuspended<'a, T>, TrackerError> {
    let current = tracker.notification_scheme(project)?;
    match &current {
        Some(scheme) => info!(
            "Current notification scheme for project {project}: {} ({})",
            scheme.name.as_deref().unwrap_or("<unnamed>"),
            scheme.id
        ),
        None => info!("Project {project} has no notification scheme assigned"),
    }

    tracker.set_notification_scheme(project, Some(disabled))?;
    info!("Notifications for project {project} switched to scheme {disabled}");

    Ok(NotificationsSuspended {
        tracker,
        project: project.to_string(),
        previous: current.map(|scheme| scheme.id),
        restored: false,
    })
}

/// Assign `scheme` back to `project`, retrying once on failure.
///
/// # Errors
///
/// Returns the error of the second attempt if both attempts fail.
pub fn enable<T: Tracker + ?Sized>(
    tracker: &T,
    project: &str,
    scheme: Option<SchemeId>,
) -> Result<(), TrackerError> {
    if let Err(err) = tracker.set_notification_scheme(project, scheme) {
        warn!("Restoring notification scheme for project {project} failed, retrying: {err}");
        tracker.set_notification_scheme(project, scheme)?;
    }
    info!("Notification scheme for project {project} restored");
    Ok(())
}

impl<T: Tracker + ?Sized> NotificationsSuspended<'_, T> {
    /// Scheme that was active before [`disable`].
    #[must_use]
    pub const fn previous(&self) -> Option<SchemeId> {
        self.previous
    }

    #[must_use]
    pub fn project(&self) -> &str {
        &self.project
    }

    /// Restore the previous scheme now and report the outcome.
    ///
    /// # Errors
    ///
    /// Returns the tracker error if restoring failed after one retry.
    pub fn restore(mut self) -> Result<(), TrackerError> {
        self.restored = true;
        enable(self.tracker, &self.project, self.previous)
    }
}

impl<T: Tracker + ?Sized> Drop for NotificationsSuspended<'_, T> {
    fn drop(&mut self) {
        if self.restored {
            return;
        }
        self.restored = true;
        if let Err(err) = enable(self.tracker, &self.project, self.previous) {
            let previous = self
                .previous
                .map_or_else(|| "none".to_string(), |id| id.to_string());
            error!(
                "Could not restore notification scheme {previous} for project {}: {err}",
                self.project
            );
        }
    }
}
