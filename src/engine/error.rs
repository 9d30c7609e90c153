use std::fmt;

use serde::Serialize;
use thiserror::Error;
use ulid::Ulid;

use crate::model::ReservationStatus;
use crate::notify::NotifyError;
use crate::pricing::PricingError;
use crate::store::StoreError;

/// Stable rejection codes handed to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectionCode {
    ValidationError,
    MinHoursBeforeExceeded,
    DayHoursLimitExceeded,
    DaySpacesLimitExceeded,
    WeekHoursLimitExceeded,
    OverlappingSpacesLimitExceeded,
    SpaceOverlap,
}

impl RejectionCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectionCode::ValidationError => "VALIDATION_ERROR",
            RejectionCode::MinHoursBeforeExceeded => "MIN_HOURS_BEFORE_EXCEEDED",
            RejectionCode::DayHoursLimitExceeded => "DAY_HOURS_LIMIT_EXCEEDED",
            RejectionCode::DaySpacesLimitExceeded => "DAY_SPACES_LIMIT_EXCEEDED",
            RejectionCode::WeekHoursLimitExceeded => "WEEK_HOURS_LIMIT_EXCEEDED",
            RejectionCode::OverlappingSpacesLimitExceeded => "OVERLAPPING_SPACES_LIMIT_EXCEEDED",
            RejectionCode::SpaceOverlap => "SPACE_OVERLAP",
        }
    }

    /// Quota and lead-time rejections an admin may waive.
    pub fn is_overridable(&self) -> bool {
        !matches!(self, RejectionCode::ValidationError | RejectionCode::SpaceOverlap)
    }
}

impl fmt::Display for RejectionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A booking the rules refuse. The first failing rule wins.
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[error("{code}: {message}")]
pub struct Rejection {
    pub code: RejectionCode,
    pub message: String,
    pub context: serde_json::Value,
}

impl Rejection {
    pub fn new(code: RejectionCode, message: impl Into<String>, context: serde_json::Value) -> Self {
        Self {
            code,
            message: message.into(),
            context,
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::new(RejectionCode::ValidationError, message, serde_json::Value::Null)
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Rejected(#[from] Rejection),

    #[error("reservation not found: {0}")]
    NotFound(Ulid),

    #[error("reservation {id} is {status} and can no longer be edited")]
    NotEditable { id: Ulid, status: ReservationStatus },

    #[error("{0} cannot be overridden")]
    NotOverridable(RejectionCode),

    #[error(transparent)]
    Pricing(#[from] PricingError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Notify(#[from] NotifyError),
}

impl EngineError {
    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            EngineError::Rejected(r) => Some(r),
            _ => None,
        }
    }
}
