//! Builders shared by the unit tests.

use std::path::PathBuf;

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use ulid::Ulid;

use crate::model::*;
use crate::pricing;
use crate::store::{Store, StoreError};

pub(crate) fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
}

pub(crate) fn space(space_type: SpaceType, hourly_rate: Decimal) -> Space {
    Space {
        id: Ulid::new(),
        name: None,
        space_type,
        active: true,
        hourly_rate,
        capacity: 1,
    }
}

pub(crate) fn reservation(
    user_id: Ulid,
    space: &Space,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    status: ReservationStatus,
) -> Reservation {
    let snapshot = pricing::build_snapshot(pricing::RateSource::Space(space), start, end, None).unwrap();
    Reservation {
        id: Ulid::new(),
        user_id,
        space_id: space.id,
        date: start.date_naive(),
        start,
        end,
        status,
        hourly_rate_snapshot: snapshot.hourly_rate,
        duration_minutes: snapshot.duration_minutes,
        total_amount: snapshot.total_amount,
        created_at: start,
        updated_at: start,
    }
}

pub(crate) async fn seed(store: &Store, spaces: &[&Space], reservations: &[&Reservation]) {
    store
        .transaction(|tx| {
            for s in spaces {
                tx.upsert_space((*s).clone())?;
            }
            for r in reservations {
                tx.insert_reservation((*r).clone())?;
            }
            Ok::<_, StoreError>(())
        })
        .await
        .unwrap();
}

pub(crate) fn test_wal_path(dir: &str, name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(dir);
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}
