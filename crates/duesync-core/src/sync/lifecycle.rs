use tracing::{debug, error, info, instrument, warn};

use crate::calendar::{CALENDAR_NAME, CalendarAttrs, CalendarId, CalendarStore, PermissionGate};
use crate::sync::{SyncConfig, SyncError};

/// Where the owned calendar stands after [`resolve_calendar`]. A blocked
/// store is reported as [`SyncError::PermissionDenied`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalendarState {
    Absent,
    Present(CalendarId),
}

/// Finds, creates or removes the owned calendar so that it exists exactly
/// when syncing is enabled.
#[instrument(skip_all, fields(sync_due = config.sync_due, sync_threshold = config.sync_threshold))]
pub fn resolve_calendar(
    store: &dyn CalendarStore,
    gate: &dyn PermissionGate,
    config: &SyncConfig,
) -> Result<CalendarState, SyncError> {
    let existing = find_calendar(store, gate, config)?;

    if !config.enabled() {
        if existing.is_some() {
            info!("calendar sync not enabled; removing calendar");
            remove_calendar(store);
        }
        return Ok(CalendarState::Absent);
    }

    if let Some(id) = existing {
        debug!(id, "calendar present");
        return Ok(CalendarState::Present(id));
    }

    info!(name = CALENDAR_NAME, "creating calendar");
    store
        .create_calendar(&CalendarAttrs::owned())
        .map_err(SyncError::Store)?;

    // Creation can succeed while reads stay blocked, or silently do nothing.
    match find_calendar(store, gate, config)? {
        Some(id) => {
            info!(id, "calendar created");
            Ok(CalendarState::Present(id))
        }
        None => {
            warn!("no access to calendar after creating it");
            remove_calendar(store);
            Err(SyncError::ProvisioningFailure)
        }
    }
}

/// Looks up the owned calendar, honouring the permission gate.
pub(crate) fn find_calendar(
    store: &dyn CalendarStore,
    gate: &dyn PermissionGate,
    config: &SyncConfig,
) -> Result<Option<CalendarId>, SyncError> {
    if !gate.has_write_permission() {
        if config.enabled() {
            return Err(SyncError::PermissionDenied);
        }
        debug!("no calendar permission and sync disabled; nothing to do");
        return Ok(None);
    }

    store.find_calendar(CALENDAR_NAME).map_err(SyncError::Store)
}

/// Deletes the owned calendar. Failures and odd match counts are logged and
/// otherwise ignored.
pub fn remove_calendar(store: &dyn CalendarStore) {
    debug!("removing calendar");
    match store.delete_calendar(CALENDAR_NAME) {
        Ok(0) => debug!("no calendar to remove"),
        Ok(1) => debug!("calendar removed"),
        Ok(count) => warn!(count, "unexpected match count while removing calendar"),
        Err(err) => error!(error = %format!("{err:#}"), "error while removing calendar"),
    }
}
