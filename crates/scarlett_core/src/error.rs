use thiserror::Error;

/// Failures surfaced by the tracker core.
///
/// Parse failures on free text are not errors: the parsers in [`crate::time`]
/// return `None` and callers leave the previous value in place.
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("notification permission not granted")]
    PermissionDenied,

    #[error("notification could not be scheduled: {0}")]
    SchedulingFailed(String),

    #[error("limit reached: at most {limit} {what}")]
    LimitReached { what: &'static str, limit: usize },

    #[error("unknown reminder `{0}`")]
    UnknownReminder(String),

    #[error("backup could not be imported: {0}")]
    Import(String),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl TrackerError {
    /// Permission and limit violations are shown to the user; everything else
    /// is absorbed at the boundary.
    pub fn is_user_visible(&self) -> bool {
        matches!(
            self,
            TrackerError::PermissionDenied | TrackerError::LimitReached { .. }
        )
    }
}

pub type TrackerResult<T> = std::result::Result<T, TrackerError>;
