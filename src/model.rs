use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Span {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    pub fn minutes(&self) -> i64 {
        self.duration().num_minutes()
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: DateTime<Utc>) -> bool {
        self.start <= t && t < self.end
    }
}

/// Which rule-set a space is governed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SpaceType {
    Desk,
    MeetingRoom,
    PrivateOffice,
    EventSpace,
}

impl SpaceType {
    pub const ALL: [SpaceType; 4] = [
        SpaceType::Desk,
        SpaceType::MeetingRoom,
        SpaceType::PrivateOffice,
        SpaceType::EventSpace,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SpaceType::Desk => "DESK",
            SpaceType::MeetingRoom => "MEETING_ROOM",
            SpaceType::PrivateOffice => "PRIVATE_OFFICE",
            SpaceType::EventSpace => "EVENT_SPACE",
        }
    }
}

impl fmt::Display for SpaceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SpaceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SpaceType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown space type: {s}"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Space {
    pub id: Ulid,
    pub name: Option<String>,
    pub space_type: SpaceType,
    pub active: bool,
    pub hourly_rate: Decimal,
    pub capacity: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReservationStatus {
    Active,
    Completed,
    Cancelled,
    Invoiced,
    Penalized,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Active => "ACTIVE",
            ReservationStatus::Completed => "COMPLETED",
            ReservationStatus::Cancelled => "CANCELLED",
            ReservationStatus::Invoiced => "INVOICED",
            ReservationStatus::Penalized => "PENALIZED",
        }
    }

    /// Statuses a liquidation run may bill.
    pub fn is_billable(&self) -> bool {
        matches!(self, ReservationStatus::Completed | ReservationStatus::Penalized)
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub user_id: Ulid,
    pub space_id: Ulid,
    /// Local calendar day of `start`.
    pub date: NaiveDate,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub status: ReservationStatus,
    pub hourly_rate_snapshot: Decimal,
    pub duration_minutes: i64,
    pub total_amount: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Reservation {
    pub fn span(&self) -> Span {
        Span::new(self.start, self.end)
    }

    pub fn is_active(&self) -> bool {
        self.status == ReservationStatus::Active
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueType {
    Int,
    Number,
    Bool,
    Json,
    String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SettingStatus {
    Active,
    Inactive,
}

/// A raw business-rule row. Values are stored as text and typed on read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingValue {
    pub key: String,
    pub value: String,
    pub value_type: ValueType,
    pub status: SettingStatus,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LiquidationStatus {
    Draft,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Liquidation {
    pub id: Ulid,
    pub user_id: Ulid,
    pub status: LiquidationStatus,
    pub total_amount: Decimal,
    pub from_date: DateTime<Utc>,
    pub to_date: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquidationItem {
    pub id: Ulid,
    pub liquidation_id: Ulid,
    pub reservation_id: Ulid,
    pub amount: Decimal,
}

/// Every committed change, as written to the WAL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    SpaceUpserted(Space),
    SettingWritten(SettingValue),
    ReservationCreated(Reservation),
    ReservationUpdated(Reservation),
    ReservationStatusChanged {
        id: Ulid,
        status: ReservationStatus,
        at: DateTime<Utc>,
    },
    LiquidationCreated(Liquidation),
    LiquidationItemCreated(LiquidationItem),
}

/// ACTIVE reservations of one space, sorted by start.
#[derive(Debug, Clone, Default)]
pub struct SpaceSchedule {
    entries: Vec<(Span, Ulid)>,
}

impl SpaceSchedule {
    /// Insert maintaining sort order by span.start.
    pub fn insert(&mut self, span: Span, id: Ulid) {
        let pos = self
            .entries
            .binary_search_by_key(&span.start, |(s, _)| s.start)
            .unwrap_or_else(|e| e);
        self.entries.insert(pos, (span, id));
    }

    pub fn remove(&mut self, id: Ulid) -> Option<Span> {
        let pos = self.entries.iter().position(|(_, i)| *i == id)?;
        Some(self.entries.remove(pos).0)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries whose span intersects `query`.
    /// Everything at index >= right_bound starts at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &(Span, Ulid)> {
        let right_bound = self.entries.partition_point(|(s, _)| s.start < query.end);
        self.entries[..right_bound]
            .iter()
            .filter(move |(s, _)| s.end > query.start)
    }
}
