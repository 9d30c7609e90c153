use std::sync::Arc;
use std::time::Instant;

use rust_decimal::Decimal;
use serde_json::json;
use tracing::{info, warn};
use ulid::Ulid;

use crate::clock::Clock;
use crate::limits::{MAX_HOURLY_RATE, MAX_OVERRIDE_REASON_LEN, MAX_PRICE_MULTIPLIER};
use crate::model::*;
use crate::notify::{Notification, NotificationPort};
use crate::observability::{BOOKINGS_TOTAL, BOOKING_DURATION_SECONDS, OVERRIDE_REQUESTS_TOTAL};
use crate::pricing::{build_snapshot, RateSource};
use crate::settings::SettingsProvider;
use crate::store::{Store, StoreError};

use super::error::{EngineError, Rejection, RejectionCode};
use super::rules::BookingRules;
use super::validator::{BookingRequest, ReservationValidator, ValidatedWindow};

/// Creates and edits reservations.
///
/// Rules are read from settings before the write lock is taken. Validation,
/// pricing and the write then run inside one store transaction, so two
/// requests for the same slot cannot both pass the overlap check.
pub struct BookingService {
    store: Arc<Store>,
    settings: Arc<SettingsProvider>,
    validator: ReservationValidator,
    clock: Arc<dyn Clock>,
    notify: Arc<dyn NotificationPort>,
}

impl BookingService {
    pub fn new(
        store: Arc<Store>,
        settings: Arc<SettingsProvider>,
        validator: ReservationValidator,
        clock: Arc<dyn Clock>,
        notify: Arc<dyn NotificationPort>,
    ) -> Self {
        Self {
            store,
            settings,
            validator,
            clock,
            notify,
        }
    }

    /// Dry run: would this request be accepted right now?
    pub async fn check(&self, req: &BookingRequest) -> Result<ValidatedWindow, Rejection> {
        let rules = BookingRules::load(&self.settings).await;
        let tables = self.store.read().await;
        self.validator.validate(&tables, req, &rules, self.clock.now())
    }

    pub async fn create(&self, req: BookingRequest) -> Result<Reservation, EngineError> {
        let started = Instant::now();
        let result = self.write(None, req).await;
        record("create", started, &result);
        result
    }

    /// Move or resize an ACTIVE reservation. The owner never changes and the
    /// frozen hourly rate is kept unless `req.rate_override` is set.
    pub async fn update(&self, id: Ulid, req: BookingRequest) -> Result<Reservation, EngineError> {
        let started = Instant::now();
        let result = self.write(Some(id), req).await;
        record("update", started, &result);
        result
    }

    async fn write(&self, editing: Option<Ulid>, mut req: BookingRequest) -> Result<Reservation, EngineError> {
        check_price_inputs(&req, editing.is_some())?;
        let rules = BookingRules::load(&self.settings).await;
        let now = self.clock.now();
        let validator = self.validator;

        self.store
            .transaction(|tx| {
                let existing = match editing {
                    Some(id) => {
                        let current = tx.reservation(&id).ok_or(EngineError::NotFound(id))?;
                        if !current.is_active() {
                            return Err(EngineError::NotEditable {
                                id,
                                status: current.status,
                            });
                        }
                        req.user_id = Some(current.user_id);
                        req.reservation_id_to_exclude = Some(id);
                        Some(current.clone())
                    }
                    None => None,
                };

                let window = validator.validate(&**tx, &req, &rules, now)?;
                let source = match &existing {
                    Some(reservation) => RateSource::Existing {
                        reservation,
                        rate_override: req.rate_override,
                    },
                    None => RateSource::Space(&window.space),
                };
                let snapshot = build_snapshot(source, window.start, window.end, req.multiplier)?;

                let reservation = Reservation {
                    id: existing.as_ref().map_or_else(Ulid::new, |r| r.id),
                    user_id: window.user_id,
                    space_id: window.space.id,
                    date: window.date,
                    start: window.start,
                    end: window.end,
                    status: ReservationStatus::Active,
                    hourly_rate_snapshot: snapshot.hourly_rate,
                    duration_minutes: snapshot.duration_minutes,
                    total_amount: snapshot.total_amount,
                    created_at: existing.as_ref().map_or(now, |r| r.created_at),
                    updated_at: now,
                };
                let written = match existing {
                    Some(_) => tx.update_reservation(reservation.clone()),
                    None => tx.insert_reservation(reservation.clone()),
                };
                written.map_err(overlap_as_rejection)?;
                Ok(reservation)
            })
            .await
    }

    /// Ask an administrator to waive a quota or lead-time rejection.
    /// Returns the id of the published notification.
    pub async fn request_override(
        &self,
        req: &BookingRequest,
        rejection: Rejection,
        reason: &str,
    ) -> Result<Ulid, EngineError> {
        if !rejection.code.is_overridable() {
            return Err(EngineError::NotOverridable(rejection.code));
        }
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(Rejection::invalid("a reason is required").into());
        }
        if reason.len() > MAX_OVERRIDE_REASON_LEN {
            return Err(Rejection::invalid("reason too long").into());
        }
        let (Some(user_id), Some(space_id)) = (req.user_id, req.space_id) else {
            return Err(Rejection::invalid("userId and spaceId are required").into());
        };

        let code = rejection.code;
        let notification =
            Notification::override_requested(req, user_id, space_id, rejection, reason.to_string(), self.clock.now());
        let Notification::LimitOverrideRequested { id, .. } = &notification;
        let id = *id;
        self.notify.notify(notification).await?;

        metrics::counter!(OVERRIDE_REQUESTS_TOTAL, "code" => code.as_str()).increment(1);
        info!(%user_id, %space_id, %code, notification_id = %id, "limit override requested");
        Ok(id)
    }

    pub async fn reservation(&self, id: Ulid) -> Option<Reservation> {
        self.store.read().await.reservation(&id).cloned()
    }
}

fn check_price_inputs(req: &BookingRequest, editing: bool) -> Result<(), Rejection> {
    if let Some(m) = req.multiplier
        && m > Decimal::from(MAX_PRICE_MULTIPLIER)
    {
        return Err(Rejection::new(
            RejectionCode::ValidationError,
            format!("price multiplier may not exceed {MAX_PRICE_MULTIPLIER}"),
            json!({ "multiplier": m.to_string() }),
        ));
    }
    match req.rate_override {
        Some(_) if !editing => Err(Rejection::invalid("a rate override only applies to edits")),
        Some(rate) if rate.is_sign_negative() => Err(Rejection::new(
            RejectionCode::ValidationError,
            "hourly rate may not be negative",
            json!({ "rateOverride": rate.to_string() }),
        )),
        Some(rate) if rate > Decimal::from(MAX_HOURLY_RATE) => Err(Rejection::new(
            RejectionCode::ValidationError,
            format!("hourly rate may not exceed {MAX_HOURLY_RATE}"),
            json!({ "rateOverride": rate.to_string() }),
        )),
        _ => Ok(()),
    }
}

/// The store's exclusion constraint is the last line against double booking.
fn overlap_as_rejection(e: StoreError) -> EngineError {
    match e {
        StoreError::ExclusionViolation { conflicting } => Rejection::new(
            RejectionCode::SpaceOverlap,
            "the space is already reserved for part of this time range",
            json!({ "conflictingReservationId": conflicting.to_string() }),
        )
        .into(),
        other => other.into(),
    }
}

fn record(operation: &'static str, started: Instant, result: &Result<Reservation, EngineError>) {
    let outcome = match result {
        Ok(r) => {
            info!(
                operation,
                reservation_id = %r.id,
                user_id = %r.user_id,
                space_id = %r.space_id,
                start = %r.start,
                end = %r.end,
                total = %r.total_amount,
                "reservation written"
            );
            "ok"
        }
        Err(EngineError::Rejected(rejection)) => {
            info!(operation, code = %rejection.code, message = %rejection.message, "booking rejected");
            rejection.code.as_str()
        }
        Err(e) => {
            warn!(operation, error = %e, "booking failed");
            "error"
        }
    };
    metrics::counter!(BOOKINGS_TOTAL, "operation" => operation, "outcome" => outcome).increment(1);
    metrics::histogram!(BOOKING_DURATION_SECONDS, "operation" => operation).record(started.elapsed().as_secs_f64());
}
