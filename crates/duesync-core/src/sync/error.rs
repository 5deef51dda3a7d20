use thiserror::Error;

/// Why a sync run stopped. Every variant ends the current run only; the
/// next trigger starts over from scratch.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("no calendar access")]
    PermissionDenied,

    #[error("calendar not added")]
    ProvisioningFailure,

    #[error("calendar store error: {0:#}")]
    Store(anyhow::Error),

    #[error("failed to read tasks: {0:#}")]
    Tasks(anyhow::Error),
}
