//! Duration and money computation shared by reservation create and edit.
//!
//! Totals are frozen onto the reservation when it is written. Later changes
//! to a space's hourly rate never touch existing reservations.

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use thiserror::Error;

use crate::model::{Reservation, Space};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PricingError {
    #[error("invalid time range: end must be after start")]
    InvalidTimeRange,
    #[error("amount out of range")]
    AmountOverflow,
}

/// Whole minutes in `[start, end)`.
pub fn duration_minutes(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<i64, PricingError> {
    if end <= start {
        return Err(PricingError::InvalidTimeRange);
    }
    Ok((end - start).num_minutes())
}

/// `hourly_rate * minutes / 60 * max(1, multiplier)`, rounded half away from zero to cents.
pub fn total_amount(
    hourly_rate: Decimal,
    duration_minutes: i64,
    multiplier: Option<Decimal>,
) -> Result<Decimal, PricingError> {
    let multiplier = multiplier.unwrap_or(Decimal::ONE).max(Decimal::ONE);
    let raw = hourly_rate
        .checked_mul(Decimal::from(duration_minutes))
        .and_then(|v| v.checked_mul(multiplier))
        .and_then(|v| v.checked_div(Decimal::from(60)))
        .ok_or(PricingError::AmountOverflow)?;
    Ok(raw.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero))
}

/// Where the frozen hourly rate comes from.
#[derive(Debug, Clone, Copy)]
pub enum RateSource<'a> {
    /// New reservation: the space's current rate.
    Space(&'a Space),
    /// Edit: keep the existing snapshot unless an override is given.
    Existing {
        reservation: &'a Reservation,
        rate_override: Option<Decimal>,
    },
}

impl RateSource<'_> {
    pub fn hourly_rate(&self) -> Decimal {
        match self {
            RateSource::Space(space) => space.hourly_rate,
            RateSource::Existing {
                reservation,
                rate_override,
            } => rate_override.unwrap_or(reservation.hourly_rate_snapshot),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot {
    pub hourly_rate: Decimal,
    pub duration_minutes: i64,
    pub total_amount: Decimal,
}

pub fn build_snapshot(
    source: RateSource<'_>,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    multiplier: Option<Decimal>,
) -> Result<Snapshot, PricingError> {
    let duration_minutes = duration_minutes(start, end)?;
    let hourly_rate = source.hourly_rate();
    Ok(Snapshot {
        hourly_rate,
        duration_minutes,
        total_amount: total_amount(hourly_rate, duration_minutes, multiplier)?,
    })
}
