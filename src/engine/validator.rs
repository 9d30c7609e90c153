//! Decides whether a requested slot may be booked.
//!
//! Rules run in a fixed order and the first failure is returned:
//! 1. presence and parseability of every field
//! 2. end after start, then office hours / minimum length / step alignment
//! 3. lead time (`min_hours_before`)
//! 4. space exists and is active
//! 5. per-space-type quotas: day hours, ISO-week hours, distinct spaces per
//!    day, concurrently held spaces
//! 6. no other ACTIVE reservation in the same space intersects the slot

use std::collections::HashSet;

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveTime, Offset, TimeZone, Timelike, Utc, Weekday};
use rust_decimal::Decimal;
use serde_json::json;
use ulid::Ulid;

use crate::model::*;
use crate::store::{ReservationFilter, Tables};

use super::error::{Rejection, RejectionCode};
use super::rules::{BookingRules, TypeRules};

/// A booking or edit request as it arrives from the web layer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BookingRequest {
    pub user_id: Option<Ulid>,
    pub space_id: Option<Ulid>,
    /// `YYYY-MM-DD`
    pub date: Option<String>,
    /// `HH:MM`, local to the office.
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub reservation_id_to_exclude: Option<Ulid>,
    pub multiplier: Option<Decimal>,
    pub rate_override: Option<Decimal>,
}

impl BookingRequest {
    pub fn new(user_id: Ulid, space_id: Ulid, date: &str, start_time: &str, end_time: &str) -> Self {
        Self {
            user_id: Some(user_id),
            space_id: Some(space_id),
            date: Some(date.to_string()),
            start_time: Some(start_time.to_string()),
            end_time: Some(end_time.to_string()),
            ..Default::default()
        }
    }

    pub fn with_multiplier(mut self, multiplier: Decimal) -> Self {
        self.multiplier = Some(multiplier);
        self
    }

    pub fn with_rate_override(mut self, rate: Decimal) -> Self {
        self.rate_override = Some(rate);
        self
    }
}

/// The checked slot. Persist these timestamps as-is; never re-parse the request.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedWindow {
    pub user_id: Ulid,
    pub date: NaiveDate,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub space: Space,
}

impl ValidatedWindow {
    pub fn span(&self) -> Span {
        Span::new(self.start, self.end)
    }
}

struct ParsedRequest {
    user_id: Ulid,
    space_id: Ulid,
    date: NaiveDate,
    start_time: NaiveTime,
    end_time: NaiveTime,
    /// `24:00`: midnight at the end of `date`.
    ends_at_midnight: bool,
}

impl ParsedRequest {
    fn end_minute(&self) -> i64 {
        if self.ends_at_midnight {
            return 24 * 60;
        }
        self.end_time.num_seconds_from_midnight() as i64 / 60
    }
}

fn required<'a, T>(value: &'a Option<T>, field: &str) -> Result<&'a T, Rejection> {
    value
        .as_ref()
        .ok_or_else(|| Rejection::new(RejectionCode::ValidationError, format!("{field} is required"), json!({ "field": field })))
}

fn hours(minutes: i64) -> f64 {
    minutes as f64 / 60.0
}

fn limit_minutes(limit_hours: f64) -> i64 {
    (limit_hours * 60.0).round() as i64
}

#[derive(Debug, Clone, Copy)]
pub struct ReservationValidator {
    /// Offset of the office's local day.
    offset: FixedOffset,
}

impl Default for ReservationValidator {
    fn default() -> Self {
        Self::new(Utc.fix())
    }
}

impl ReservationValidator {
    pub fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    pub fn validate(
        &self,
        tables: &Tables,
        req: &BookingRequest,
        rules: &BookingRules,
        now: DateTime<Utc>,
    ) -> Result<ValidatedWindow, Rejection> {
        let parsed = self.parse(req)?;
        let start = self.local_instant(parsed.date, parsed.start_time)?;
        let end = if parsed.ends_at_midnight {
            self.day_window(parsed.date)?.end
        } else {
            self.local_instant(parsed.date, parsed.end_time)?
        };
        if end <= start {
            return Err(Rejection::new(
                RejectionCode::ValidationError,
                "end time must be after start time",
                json!({ "startTime": req.start_time, "endTime": req.end_time }),
            ));
        }
        let span = Span::new(start, end);

        check_schedule_shape(&parsed, &span, rules)?;
        check_lead_time(&span, rules, now)?;

        let space = match tables.space(&parsed.space_id) {
            Some(space) if space.active => space.clone(),
            Some(_) => {
                return Err(Rejection::new(
                    RejectionCode::ValidationError,
                    "space is not active",
                    json!({ "spaceId": parsed.space_id.to_string() }),
                ));
            }
            None => {
                return Err(Rejection::new(
                    RejectionCode::ValidationError,
                    "space not found",
                    json!({ "spaceId": parsed.space_id.to_string() }),
                ));
            }
        };

        let type_rules = rules.for_type(space.space_type);
        if type_rules != TypeRules::default() {
            self.check_quotas(tables, &parsed, &space, &span, &type_rules, req.reservation_id_to_exclude)?;
        }

        if let Some(conflict) = tables
            .active_overlapping(&space.id, &span, req.reservation_id_to_exclude)
            .first()
        {
            return Err(Rejection::new(
                RejectionCode::SpaceOverlap,
                "the space is already reserved for part of this time range",
                json!({
                    "spaceId": space.id.to_string(),
                    "conflictingReservationId": conflict.id.to_string(),
                }),
            ));
        }

        Ok(ValidatedWindow {
            user_id: parsed.user_id,
            date: parsed.date,
            start,
            end,
            space,
        })
    }

    fn parse(&self, req: &BookingRequest) -> Result<ParsedRequest, Rejection> {
        let user_id = *required(&req.user_id, "userId")?;
        let space_id = *required(&req.space_id, "spaceId")?;
        let date_raw = required(&req.date, "date")?;
        let start_raw = required(&req.start_time, "startTime")?;
        let end_raw = required(&req.end_time, "endTime")?;

        let date = NaiveDate::parse_from_str(date_raw.trim(), "%Y-%m-%d").map_err(|_| {
            Rejection::new(RejectionCode::ValidationError, "date must be YYYY-MM-DD", json!({ "date": date_raw }))
        })?;
        let time = |raw: &str, field: &str| {
            NaiveTime::parse_from_str(raw.trim(), "%H:%M").map_err(|_| {
                Rejection::new(RejectionCode::ValidationError, format!("{field} must be HH:MM"), json!({ field: raw }))
            })
        };
        let start_time = time(start_raw, "startTime")?;
        let ends_at_midnight = end_raw.trim() == "24:00";
        let end_time = if ends_at_midnight { NaiveTime::MIN } else { time(end_raw, "endTime")? };
        Ok(ParsedRequest {
            user_id,
            space_id,
            date,
            start_time,
            end_time,
            ends_at_midnight,
        })
    }

    fn local_instant(&self, date: NaiveDate, time: NaiveTime) -> Result<DateTime<Utc>, Rejection> {
        self.offset
            .from_local_datetime(&date.and_time(time))
            .single()
            .map(|t| t.with_timezone(&Utc))
            .ok_or_else(|| Rejection::invalid(format!("{date} {time} is not a valid local time")))
    }

    /// `[00:00, 24:00)` of `date`, local.
    pub fn day_window(&self, date: NaiveDate) -> Result<Span, Rejection> {
        let next = date.succ_opt().ok_or_else(|| Rejection::invalid("date out of range"))?;
        Ok(Span::new(
            self.local_instant(date, NaiveTime::MIN)?,
            self.local_instant(next, NaiveTime::MIN)?,
        ))
    }

    /// Monday 00:00 of the ISO week containing `date` through the following Monday 00:00.
    pub fn week_window(&self, date: NaiveDate) -> Result<Span, Rejection> {
        let iso = date.iso_week();
        let monday = NaiveDate::from_isoywd_opt(iso.year(), iso.week(), Weekday::Mon)
            .ok_or_else(|| Rejection::invalid("date out of range"))?;
        let next_monday = monday
            .checked_add_signed(Duration::days(7))
            .ok_or_else(|| Rejection::invalid("date out of range"))?;
        Ok(Span::new(
            self.local_instant(monday, NaiveTime::MIN)?,
            self.local_instant(next_monday, NaiveTime::MIN)?,
        ))
    }

    fn check_quotas(
        &self,
        tables: &Tables,
        parsed: &ParsedRequest,
        space: &Space,
        span: &Span,
        rules: &TypeRules,
        exclude: Option<Ulid>,
    ) -> Result<(), Rejection> {
        let day = self.day_window(parsed.date)?;
        let week = self.week_window(parsed.date)?;
        let held = tables.reservations(
            &ReservationFilter::new()
                .user(parsed.user_id)
                .statuses(&[ReservationStatus::Active])
                .space_type(space.space_type)
                .window(week)
                .excluding(exclude),
        );
        let same_day: Vec<&Reservation> = held.iter().copied().filter(|r| r.span().overlaps(&day)).collect();
        let requested = span.minutes();

        if let Some(limit) = rules.max_hours_per_day_per_user {
            let used: i64 = same_day.iter().map(|r| r.span().minutes()).sum();
            if used + requested > limit_minutes(limit) {
                return Err(Rejection::new(
                    RejectionCode::DayHoursLimitExceeded,
                    format!("daily limit of {limit} hours for {} exceeded", space.space_type),
                    json!({
                        "spaceType": space.space_type.as_str(),
                        "limitHours": limit,
                        "usedHours": hours(used),
                        "requestedHours": hours(requested),
                    }),
                ));
            }
        }

        if let Some(limit) = rules.max_hours_per_week_per_user {
            let used: i64 = held.iter().map(|r| r.span().minutes()).sum();
            if used + requested > limit_minutes(limit) {
                return Err(Rejection::new(
                    RejectionCode::WeekHoursLimitExceeded,
                    format!("weekly limit of {limit} hours for {} exceeded", space.space_type),
                    json!({
                        "spaceType": space.space_type.as_str(),
                        "limitHours": limit,
                        "usedHours": hours(used),
                        "requestedHours": hours(requested),
                        "weekStart": week.start.to_rfc3339(),
                    }),
                ));
            }
        }

        if let Some(limit) = rules.max_spaces_per_day_per_user {
            let mut spaces: HashSet<Ulid> = same_day.iter().map(|r| r.space_id).collect();
            spaces.insert(space.id);
            if spaces.len() > limit as usize {
                return Err(Rejection::new(
                    RejectionCode::DaySpacesLimitExceeded,
                    format!("at most {limit} different {} spaces per day", space.space_type),
                    json!({
                        "spaceType": space.space_type.as_str(),
                        "limit": limit,
                        "spacesThatDay": spaces.len(),
                    }),
                ));
            }
        }

        if let Some(limit) = rules.max_overlapping_spaces_per_user {
            let concurrent: HashSet<Ulid> = held
                .iter()
                .filter(|r| r.space_id != space.id && r.span().overlaps(span))
                .map(|r| r.space_id)
                .collect();
            if concurrent.len() >= limit as usize {
                return Err(Rejection::new(
                    RejectionCode::OverlappingSpacesLimitExceeded,
                    format!("at most {limit} {} spaces may be held at the same time", space.space_type),
                    json!({
                        "spaceType": space.space_type.as_str(),
                        "limit": limit,
                        "concurrentSpaces": concurrent.len(),
                    }),
                ));
            }
        }

        Ok(())
    }
}

fn check_schedule_shape(parsed: &ParsedRequest, span: &Span, rules: &BookingRules) -> Result<(), Rejection> {
    let open_minute = rules.office_open_hour as i64 * 60;
    let close_minute = rules.office_close_hour as i64 * 60;
    let start_minute = parsed.start_time.num_seconds_from_midnight() as i64 / 60;
    let end_minute = parsed.end_minute();
    if start_minute < open_minute || end_minute > close_minute {
        return Err(Rejection::new(
            RejectionCode::ValidationError,
            format!(
                "reservations must fall between {:02}:00 and {:02}:00",
                rules.office_open_hour, rules.office_close_hour
            ),
            json!({ "openHour": rules.office_open_hour, "closeHour": rules.office_close_hour }),
        ));
    }

    let minutes = span.minutes();
    if rules.min_minutes > 0 && minutes < rules.min_minutes {
        return Err(Rejection::new(
            RejectionCode::ValidationError,
            format!("reservations must last at least {} minutes", rules.min_minutes),
            json!({ "minMinutes": rules.min_minutes, "requestedMinutes": minutes }),
        ));
    }
    if rules.step_minutes > 0 && (start_minute % rules.step_minutes != 0 || minutes % rules.step_minutes != 0) {
        return Err(Rejection::new(
            RejectionCode::ValidationError,
            format!("reservations must align to {}-minute steps", rules.step_minutes),
            json!({ "stepMinutes": rules.step_minutes }),
        ));
    }
    Ok(())
}

fn check_lead_time(span: &Span, rules: &BookingRules, now: DateTime<Utc>) -> Result<(), Rejection> {
    // Out of range only when the rules were built by hand; loaded rules are bounded.
    let lead = Duration::try_seconds((rules.min_hours_before * 3600.0).round() as i64).unwrap_or_else(Duration::zero);
    let until_start = span.start - now;
    if until_start < lead {
        return Err(Rejection::new(
            RejectionCode::MinHoursBeforeExceeded,
            format!("reservations must be made at least {} hours in advance", rules.min_hours_before),
            json!({
                "minHoursBefore": rules.min_hours_before,
                "hoursUntilStart": until_start.num_minutes() as f64 / 60.0,
            }),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::*;
    use crate::store::Store;
    use rust_decimal_macros::dec;

    const ACTIVE: ReservationStatus = ReservationStatus::Active;

    // Wednesday 4 March 2026 is the booking day in most tests.
    fn now() -> DateTime<Utc> {
        utc(2026, 3, 2, 8, 0)
    }

    fn rules_with(space_type: SpaceType, type_rules: TypeRules) -> BookingRules {
        let mut rules = BookingRules::default();
        rules.per_type.insert(space_type, type_rules);
        rules
    }

    fn day_limit(hours: f64) -> TypeRules {
        TypeRules {
            max_hours_per_day_per_user: Some(hours),
            ..Default::default()
        }
    }

    async fn check(
        store: &Store,
        req: &BookingRequest,
        rules: &BookingRules,
    ) -> Result<ValidatedWindow, Rejection> {
        let tables = store.read().await;
        ReservationValidator::default().validate(&tables, req, rules, now())
    }

    fn code(result: Result<ValidatedWindow, Rejection>) -> RejectionCode {
        result.unwrap_err().code
    }

    #[tokio::test]
    async fn accepts_free_slot_and_normalizes_times() {
        let store = Store::in_memory();
        let room = space(SpaceType::MeetingRoom, dec!(20.00));
        seed(&store, &[&room], &[]).await;
        let user = Ulid::new();

        let ok = check(&store, &BookingRequest::new(user, room.id, "2026-03-04", "09:00", "11:00"), &BookingRules::default())
            .await
            .unwrap();
        assert_eq!(ok.start, utc(2026, 3, 4, 9, 0));
        assert_eq!(ok.end, utc(2026, 3, 4, 11, 0));
        assert_eq!(ok.date, NaiveDate::from_ymd_opt(2026, 3, 4).unwrap());
        assert_eq!(ok.space, room);
        assert_eq!(ok.user_id, user);
    }

    #[tokio::test]
    async fn local_offset_shifts_absolute_times() {
        let store = Store::in_memory();
        let room = space(SpaceType::Desk, dec!(5.00));
        seed(&store, &[&room], &[]).await;
        let validator = ReservationValidator::new(FixedOffset::east_opt(2 * 3600).unwrap());
        let tables = store.read().await;
        let ok = validator
            .validate(
                &tables,
                &BookingRequest::new(Ulid::new(), room.id, "2026-03-04", "09:00", "10:00"),
                &BookingRules::default(),
                now(),
            )
            .unwrap();
        assert_eq!(ok.start, utc(2026, 3, 4, 7, 0));
    }

    #[tokio::test]
    async fn missing_or_malformed_fields_are_validation_errors() {
        let store = Store::in_memory();
        let room = space(SpaceType::Desk, dec!(5.00));
        seed(&store, &[&room], &[]).await;
        let rules = BookingRules::default();

        let mut missing = BookingRequest::new(Ulid::new(), room.id, "2026-03-04", "09:00", "10:00");
        missing.end_time = None;
        let err = check(&store, &missing, &rules).await.unwrap_err();
        assert_eq!(err.code, RejectionCode::ValidationError);
        assert_eq!(err.context["field"], "endTime");

        let bad_time = BookingRequest::new(Ulid::new(), room.id, "2026-03-04", "9am", "10:00");
        assert_eq!(code(check(&store, &bad_time, &rules).await), RejectionCode::ValidationError);

        let bad_date = BookingRequest::new(Ulid::new(), room.id, "04/03/2026", "09:00", "10:00");
        assert_eq!(code(check(&store, &bad_date, &rules).await), RejectionCode::ValidationError);

        let backwards = BookingRequest::new(Ulid::new(), room.id, "2026-03-04", "10:00", "10:00");
        assert_eq!(code(check(&store, &backwards, &rules).await), RejectionCode::ValidationError);
    }

    #[tokio::test]
    async fn end_of_day_is_written_as_24_00() {
        let store = Store::in_memory();
        let room = space(SpaceType::Desk, dec!(5.00));
        seed(&store, &[&room], &[]).await;

        let ok = check(
            &store,
            &BookingRequest::new(Ulid::new(), room.id, "2026-03-04", "22:00", "24:00"),
            &BookingRules::default(),
        )
        .await
        .unwrap();
        assert_eq!(ok.start, utc(2026, 3, 4, 22, 0));
        assert_eq!(ok.end, utc(2026, 3, 5, 0, 0));
        assert_eq!(ok.date, NaiveDate::from_ymd_opt(2026, 3, 4).unwrap());

        // Still bounded by an earlier close hour, and never a start time.
        let closes_at_20 = BookingRules {
            office_close_hour: 20,
            ..Default::default()
        };
        let late = BookingRequest::new(Ulid::new(), room.id, "2026-03-05", "19:00", "24:00");
        assert_eq!(code(check(&store, &late, &closes_at_20).await), RejectionCode::ValidationError);
        let from_midnight = BookingRequest::new(Ulid::new(), room.id, "2026-03-05", "24:00", "24:00");
        assert_eq!(code(check(&store, &from_midnight, &BookingRules::default()).await), RejectionCode::ValidationError);
    }

    #[tokio::test]
    async fn out_of_range_lead_time_does_not_panic() {
        let store = Store::in_memory();
        let room = space(SpaceType::Desk, dec!(5.00));
        seed(&store, &[&room], &[]).await;
        let rules = BookingRules {
            min_hours_before: 1e13,
            ..Default::default()
        };
        let req = BookingRequest::new(Ulid::new(), room.id, "2026-03-04", "09:00", "10:00");
        assert!(check(&store, &req, &rules).await.is_ok());
    }

    #[tokio::test]
    async fn office_hours_min_length_and_step() {
        let store = Store::in_memory();
        let room = space(SpaceType::Desk, dec!(5.00));
        seed(&store, &[&room], &[]).await;
        let rules = BookingRules {
            office_open_hour: 8,
            office_close_hour: 20,
            min_minutes: 30,
            step_minutes: 30,
            ..Default::default()
        };
        let req = |s: &str, e: &str| BookingRequest::new(Ulid::new(), room.id, "2026-03-04", s, e);

        assert!(check(&store, &req("08:00", "20:00"), &rules).await.is_ok());
        assert_eq!(code(check(&store, &req("07:30", "09:00"), &rules).await), RejectionCode::ValidationError);
        assert_eq!(code(check(&store, &req("19:00", "20:30"), &rules).await), RejectionCode::ValidationError);
        assert_eq!(code(check(&store, &req("09:00", "09:15"), &rules).await), RejectionCode::ValidationError);
        assert_eq!(code(check(&store, &req("09:10", "10:10"), &rules).await), RejectionCode::ValidationError);
    }

    #[tokio::test]
    async fn lead_time_is_enforced() {
        let store = Store::in_memory();
        let room = space(SpaceType::Desk, dec!(5.00));
        seed(&store, &[&room], &[]).await;
        let rules = BookingRules {
            min_hours_before: 2.0,
            ..Default::default()
        };
        // now() is 2026-03-02 08:00
        let too_soon = BookingRequest::new(Ulid::new(), room.id, "2026-03-02", "09:30", "10:00");
        assert_eq!(code(check(&store, &too_soon, &rules).await), RejectionCode::MinHoursBeforeExceeded);
        let exactly = BookingRequest::new(Ulid::new(), room.id, "2026-03-02", "10:00", "11:00");
        assert!(check(&store, &exactly, &rules).await.is_ok());

        let past = BookingRequest::new(Ulid::new(), room.id, "2026-03-01", "10:00", "11:00");
        assert_eq!(
            code(check(&store, &past, &BookingRules::default()).await),
            RejectionCode::MinHoursBeforeExceeded
        );
    }

    #[tokio::test]
    async fn space_must_exist_and_be_active() {
        let store = Store::in_memory();
        let mut closed = space(SpaceType::Desk, dec!(5.00));
        closed.active = false;
        seed(&store, &[&closed], &[]).await;
        let rules = BookingRules::default();

        let err = check(&store, &BookingRequest::new(Ulid::new(), closed.id, "2026-03-04", "09:00", "10:00"), &rules)
            .await
            .unwrap_err();
        assert_eq!(err.code, RejectionCode::ValidationError);
        assert_eq!(err.message, "space is not active");

        let err = check(&store, &BookingRequest::new(Ulid::new(), Ulid::new(), "2026-03-04", "09:00", "10:00"), &rules)
            .await
            .unwrap_err();
        assert_eq!(err.message, "space not found");
    }

    #[tokio::test]
    async fn day_hours_compose_partial_hours() {
        let store = Store::in_memory();
        let room = space(SpaceType::MeetingRoom, dec!(20.00));
        let other_room = space(SpaceType::MeetingRoom, dec!(20.00));
        let user = Ulid::new();
        // 90 + 90 minutes already held = 3h
        let a = reservation(user, &room, utc(2026, 3, 4, 9, 0), utc(2026, 3, 4, 10, 30), ACTIVE);
        let b = reservation(user, &other_room, utc(2026, 3, 4, 13, 0), utc(2026, 3, 4, 14, 30), ACTIVE);
        seed(&store, &[&room, &other_room], &[&a, &b]).await;
        let rules = rules_with(SpaceType::MeetingRoom, day_limit(4.0));

        let fits = BookingRequest::new(user, room.id, "2026-03-04", "15:00", "16:00");
        assert!(check(&store, &fits, &rules).await.is_ok());

        let over = BookingRequest::new(user, room.id, "2026-03-04", "15:00", "16:01");
        let err = check(&store, &over, &rules).await.unwrap_err();
        assert_eq!(err.code, RejectionCode::DayHoursLimitExceeded);
        assert_eq!(err.context["usedHours"], 3.0);
    }

    #[tokio::test]
    async fn full_day_rejects_one_more_minute() {
        let store = Store::in_memory();
        let room = space(SpaceType::MeetingRoom, dec!(20.00));
        let user = Ulid::new();
        let held = reservation(user, &room, utc(2026, 3, 4, 9, 0), utc(2026, 3, 4, 13, 0), ACTIVE);
        seed(&store, &[&room], &[&held]).await;
        let rules = rules_with(SpaceType::MeetingRoom, day_limit(4.0));

        let one_minute = BookingRequest::new(user, room.id, "2026-03-04", "15:00", "15:01");
        assert_eq!(code(check(&store, &one_minute, &rules).await), RejectionCode::DayHoursLimitExceeded);

        // Other types, other users and other days are unaffected.
        let next_day = BookingRequest::new(user, room.id, "2026-03-05", "15:00", "15:01");
        assert!(check(&store, &next_day, &rules).await.is_ok());
        let someone_else = BookingRequest::new(Ulid::new(), room.id, "2026-03-04", "15:00", "15:01");
        assert!(check(&store, &someone_else, &rules).await.is_ok());
    }

    #[tokio::test]
    async fn quotas_ignore_non_active_and_excluded_reservations() {
        let store = Store::in_memory();
        let room = space(SpaceType::MeetingRoom, dec!(20.00));
        let user = Ulid::new();
        let done = reservation(
            user,
            &room,
            utc(2026, 3, 4, 8, 0),
            utc(2026, 3, 4, 12, 0),
            ReservationStatus::Completed,
        );
        let held = reservation(user, &room, utc(2026, 3, 4, 13, 0), utc(2026, 3, 4, 17, 0), ACTIVE);
        seed(&store, &[&room], &[&done, &held]).await;
        let rules = rules_with(SpaceType::MeetingRoom, day_limit(4.0));

        // Editing `held` to a different 4h slot must not count `held` against itself.
        let mut edit = BookingRequest::new(user, room.id, "2026-03-04", "14:00", "18:00");
        edit.reservation_id_to_exclude = Some(held.id);
        assert!(check(&store, &edit, &rules).await.is_ok());
    }

    #[tokio::test]
    async fn week_window_is_iso_monday_to_monday() {
        let validator = ReservationValidator::default();
        let sunday = NaiveDate::from_ymd_opt(2026, 3, 8).unwrap();
        let week = validator.week_window(sunday).unwrap();
        assert_eq!(week.start, utc(2026, 3, 2, 0, 0));
        assert_eq!(week.end, utc(2026, 3, 9, 0, 0));

        // Year boundary: 2027-01-01 is a Friday in ISO week 2026-W53.
        let new_year = NaiveDate::from_ymd_opt(2027, 1, 1).unwrap();
        let week = validator.week_window(new_year).unwrap();
        assert_eq!(week.start, utc(2026, 12, 28, 0, 0));
        assert_eq!(week.end, utc(2027, 1, 4, 0, 0));
    }

    #[tokio::test]
    async fn week_hours_count_the_whole_iso_week_only() {
        let store = Store::in_memory();
        let desk = space(SpaceType::Desk, dec!(5.00));
        let user = Ulid::new();
        let monday = reservation(user, &desk, utc(2026, 3, 2, 9, 0), utc(2026, 3, 2, 17, 0), ACTIVE);
        let tuesday = reservation(user, &desk, utc(2026, 3, 3, 9, 0), utc(2026, 3, 3, 17, 0), ACTIVE);
        let prev_sunday = reservation(user, &desk, utc(2026, 3, 1, 9, 0), utc(2026, 3, 1, 17, 0), ACTIVE);
        seed(&store, &[&desk], &[&monday, &tuesday, &prev_sunday]).await;
        let rules = rules_with(
            SpaceType::Desk,
            TypeRules {
                max_hours_per_week_per_user: Some(20.0),
                ..Default::default()
            },
        );

        let sunday_ok = BookingRequest::new(user, desk.id, "2026-03-08", "09:00", "13:00");
        assert!(check(&store, &sunday_ok, &rules).await.is_ok());
        let sunday_over = BookingRequest::new(user, desk.id, "2026-03-08", "09:00", "13:30");
        assert_eq!(code(check(&store, &sunday_over, &rules).await), RejectionCode::WeekHoursLimitExceeded);
        let next_monday = BookingRequest::new(user, desk.id, "2026-03-09", "09:00", "17:00");
        assert!(check(&store, &next_monday, &rules).await.is_ok());
    }

    #[tokio::test]
    async fn distinct_spaces_per_day() {
        let store = Store::in_memory();
        let (a, b, c) = (
            space(SpaceType::Desk, dec!(5.00)),
            space(SpaceType::Desk, dec!(5.00)),
            space(SpaceType::Desk, dec!(5.00)),
        );
        let user = Ulid::new();
        let on_a = reservation(user, &a, utc(2026, 3, 4, 9, 0), utc(2026, 3, 4, 10, 0), ACTIVE);
        let on_b = reservation(user, &b, utc(2026, 3, 4, 11, 0), utc(2026, 3, 4, 12, 0), ACTIVE);
        seed(&store, &[&a, &b, &c], &[&on_a, &on_b]).await;
        let rules = rules_with(
            SpaceType::Desk,
            TypeRules {
                max_spaces_per_day_per_user: Some(2),
                ..Default::default()
            },
        );

        let again_a = BookingRequest::new(user, a.id, "2026-03-04", "14:00", "15:00");
        assert!(check(&store, &again_a, &rules).await.is_ok());
        let third = BookingRequest::new(user, c.id, "2026-03-04", "14:00", "15:00");
        assert_eq!(code(check(&store, &third, &rules).await), RejectionCode::DaySpacesLimitExceeded);
    }

    #[tokio::test]
    async fn concurrent_spaces_limit() {
        let store = Store::in_memory();
        let (a, b) = (space(SpaceType::Desk, dec!(5.00)), space(SpaceType::Desk, dec!(5.00)));
        let user = Ulid::new();
        let on_a = reservation(user, &a, utc(2026, 3, 4, 9, 0), utc(2026, 3, 4, 12, 0), ACTIVE);
        seed(&store, &[&a, &b], &[&on_a]).await;
        let rules = rules_with(
            SpaceType::Desk,
            TypeRules {
                max_overlapping_spaces_per_user: Some(1),
                ..Default::default()
            },
        );

        let same_time = BookingRequest::new(user, b.id, "2026-03-04", "11:00", "13:00");
        assert_eq!(
            code(check(&store, &same_time, &rules).await),
            RejectionCode::OverlappingSpacesLimitExceeded
        );
        let later = BookingRequest::new(user, b.id, "2026-03-04", "12:00", "13:00");
        assert!(check(&store, &later, &rules).await.is_ok());
    }

    #[tokio::test]
    async fn same_space_overlap_is_rejected_for_anyone() {
        let store = Store::in_memory();
        let room = space(SpaceType::MeetingRoom, dec!(20.00));
        let taken = reservation(Ulid::new(), &room, utc(2026, 3, 4, 9, 0), utc(2026, 3, 4, 11, 0), ACTIVE);
        seed(&store, &[&room], &[&taken]).await;
        let rules = BookingRules::default();

        let err = check(&store, &BookingRequest::new(Ulid::new(), room.id, "2026-03-04", "10:00", "12:00"), &rules)
            .await
            .unwrap_err();
        assert_eq!(err.code, RejectionCode::SpaceOverlap);
        assert_eq!(err.context["conflictingReservationId"], taken.id.to_string());

        let adjacent = BookingRequest::new(Ulid::new(), room.id, "2026-03-04", "11:00", "12:00");
        assert!(check(&store, &adjacent, &rules).await.is_ok());
    }

    #[tokio::test]
    async fn first_failing_rule_wins() {
        let store = Store::in_memory();
        let room = space(SpaceType::MeetingRoom, dec!(20.00));
        let user = Ulid::new();
        let taken = reservation(user, &room, utc(2026, 3, 4, 9, 0), utc(2026, 3, 4, 13, 0), ACTIVE);
        seed(&store, &[&room], &[&taken]).await;
        let mut rules = rules_with(SpaceType::MeetingRoom, day_limit(4.0));

        // Breaks both the day quota and same-space overlap: quota comes first.
        let both = BookingRequest::new(user, room.id, "2026-03-04", "12:00", "14:00");
        assert_eq!(code(check(&store, &both, &rules).await), RejectionCode::DayHoursLimitExceeded);

        // Lead time is checked before quotas.
        rules.min_hours_before = 72.0;
        assert_eq!(code(check(&store, &both, &rules).await), RejectionCode::MinHoursBeforeExceeded);
    }
}
