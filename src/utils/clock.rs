use chrono::{DateTime, Utc};

use crate::error::AppError;

/// Current time truncated to the millisecond precision used in storage,
/// so a value returned before a write equals the one read back after it.
pub fn now() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now)
}

pub fn from_millis(millis: i64) -> Result<DateTime<Utc>, AppError> {
    DateTime::from_timestamp_millis(millis).ok_or_else(|| {
        AppError::InternalConsistency(format!("timestamp {} out of range", millis))
    })
}
