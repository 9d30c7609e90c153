use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;
use ulid::Ulid;

use crate::clock::Clock;
use crate::limits::MAX_COMPLETION_IDS;
use crate::model::ReservationStatus;
use crate::observability::RESERVATIONS_COMPLETED_TOTAL;
use crate::store::{ReservationFilter, Store};

use super::error::{EngineError, Rejection};

/// Which reservations an administrator wants completed by hand.
#[derive(Debug, Clone, Default)]
pub struct CompletionSelection {
    pub ids: Vec<Ulid>,
    pub user_id: Option<Ulid>,
    pub space_id: Option<Ulid>,
    /// Defaults to now. A cutoff in the future is clamped to now.
    pub cutoff: Option<DateTime<Utc>>,
}

/// Moves finished ACTIVE reservations to COMPLETED.
///
/// Only ACTIVE rows whose end is at or before the cutoff are touched, so
/// running it again with the same cutoff changes nothing.
pub struct CompletionSweeper {
    store: Arc<Store>,
    clock: Arc<dyn Clock>,
}

impl CompletionSweeper {
    pub fn new(store: Arc<Store>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub async fn complete_expired(&self, now: DateTime<Utc>) -> Result<usize, EngineError> {
        let ids = self.complete(ReservationFilter::new(), now, "schedule").await?;
        Ok(ids.len())
    }

    /// On-demand sweep as of the injected clock's now.
    pub async fn run_now(&self) -> Result<usize, EngineError> {
        let ids = self.complete(ReservationFilter::new(), self.clock.now(), "manual").await?;
        Ok(ids.len())
    }

    pub async fn complete_selected(&self, selection: CompletionSelection) -> Result<Vec<Ulid>, EngineError> {
        if selection.ids.is_empty() && selection.user_id.is_none() && selection.space_id.is_none() {
            return Err(Rejection::invalid("select reservations by id, user or space").into());
        }
        if selection.ids.len() > MAX_COMPLETION_IDS {
            return Err(Rejection::invalid(format!("at most {MAX_COMPLETION_IDS} ids per request")).into());
        }

        let now = self.clock.now();
        let cutoff = selection.cutoff.map_or(now, |c| c.min(now));
        let mut filter = ReservationFilter::new();
        if !selection.ids.is_empty() {
            filter = filter.ids(selection.ids);
        }
        if let Some(user_id) = selection.user_id {
            filter = filter.user(user_id);
        }
        if let Some(space_id) = selection.space_id {
            filter = filter.space(space_id);
        }
        self.complete(filter, cutoff, "selected").await
    }

    async fn complete(
        &self,
        filter: ReservationFilter,
        cutoff: DateTime<Utc>,
        trigger: &'static str,
    ) -> Result<Vec<Ulid>, EngineError> {
        let filter = filter.statuses(&[ReservationStatus::Active]).ends_by(cutoff);
        let at = self.clock.now();
        let ids = self
            .store
            .transaction(|tx| tx.update_status_where(&filter, ReservationStatus::Completed, at))
            .await?;
        metrics::counter!(RESERVATIONS_COMPLETED_TOTAL, "trigger" => trigger).increment(ids.len() as u64);
        info!(trigger, %cutoff, completed = ids.len(), "completion sweep finished");
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::fixtures::*;
    use crate::model::*;
    use rust_decimal_macros::dec;
    use tokio_test::assert_ok;

    const ACTIVE: ReservationStatus = ReservationStatus::Active;

    fn setup() -> (Arc<Store>, Arc<ManualClock>, CompletionSweeper) {
        let store = Arc::new(Store::in_memory());
        let clock = Arc::new(ManualClock::new(utc(2026, 3, 4, 12, 0)));
        let sweeper = CompletionSweeper::new(store.clone(), clock.clone());
        (store, clock, sweeper)
    }

    async fn status(store: &Store, id: Ulid) -> ReservationStatus {
        store.read().await.reservation(&id).unwrap().status
    }

    #[tokio::test]
    async fn completes_only_ended_active_reservations() {
        let (store, _clock, sweeper) = setup();
        let room = space(SpaceType::MeetingRoom, dec!(20.00));
        let user = Ulid::new();
        let ended = reservation(user, &room, utc(2026, 3, 4, 9, 0), utc(2026, 3, 4, 11, 0), ACTIVE);
        let ends_now = reservation(user, &room, utc(2026, 3, 4, 11, 0), utc(2026, 3, 4, 12, 0), ACTIVE);
        let running = reservation(user, &room, utc(2026, 3, 4, 12, 0), utc(2026, 3, 4, 13, 0), ACTIVE);
        let cancelled = reservation(
            user,
            &room,
            utc(2026, 3, 4, 7, 0),
            utc(2026, 3, 4, 8, 0),
            ReservationStatus::Cancelled,
        );
        seed(&store, &[&room], &[&ended, &ends_now, &running, &cancelled]).await;

        let n = assert_ok!(sweeper.complete_expired(utc(2026, 3, 4, 12, 0)).await);
        assert_eq!(n, 2);
        assert_eq!(status(&store, ended.id).await, ReservationStatus::Completed);
        assert_eq!(status(&store, ends_now.id).await, ReservationStatus::Completed);
        assert_eq!(status(&store, running.id).await, ACTIVE);
        assert_eq!(status(&store, cancelled.id).await, ReservationStatus::Cancelled);
    }

    #[tokio::test]
    async fn rerun_with_same_now_is_a_noop() {
        let (store, _clock, sweeper) = setup();
        let room = space(SpaceType::Desk, dec!(5.00));
        let r = reservation(Ulid::new(), &room, utc(2026, 3, 4, 9, 0), utc(2026, 3, 4, 10, 0), ACTIVE);
        seed(&store, &[&room], &[&r]).await;

        let now = utc(2026, 3, 4, 12, 0);
        assert_eq!(sweeper.complete_expired(now).await.unwrap(), 1);
        assert_eq!(sweeper.complete_expired(now).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn run_now_uses_the_clock() {
        let (store, clock, sweeper) = setup();
        let room = space(SpaceType::Desk, dec!(5.00));
        let r = reservation(Ulid::new(), &room, utc(2026, 3, 4, 13, 0), utc(2026, 3, 4, 14, 0), ACTIVE);
        seed(&store, &[&room], &[&r]).await;

        assert_eq!(sweeper.run_now().await.unwrap(), 0);
        clock.set(utc(2026, 3, 4, 14, 0));
        assert_eq!(sweeper.run_now().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn selected_completion_filters_and_clamps_cutoff() {
        let (store, _clock, sweeper) = setup();
        let room = space(SpaceType::Desk, dec!(5.00));
        let (alice, bob) = (Ulid::new(), Ulid::new());
        let a1 = reservation(alice, &room, utc(2026, 3, 4, 8, 0), utc(2026, 3, 4, 9, 0), ACTIVE);
        let b1 = reservation(bob, &room, utc(2026, 3, 4, 9, 0), utc(2026, 3, 4, 10, 0), ACTIVE);
        let a_future = reservation(alice, &room, utc(2026, 3, 4, 15, 0), utc(2026, 3, 4, 16, 0), ACTIVE);
        seed(&store, &[&room], &[&a1, &b1, &a_future]).await;

        // A future cutoff never completes reservations that have not ended.
        let done = sweeper
            .complete_selected(CompletionSelection {
                user_id: Some(alice),
                cutoff: Some(utc(2026, 3, 5, 0, 0)),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(done, vec![a1.id]);
        assert_eq!(status(&store, b1.id).await, ACTIVE);
        assert_eq!(status(&store, a_future.id).await, ACTIVE);

        let done = sweeper
            .complete_selected(CompletionSelection {
                ids: vec![b1.id, a_future.id],
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(done, vec![b1.id]);
    }

    #[tokio::test]
    async fn empty_selection_is_rejected() {
        let (_store, _clock, sweeper) = setup();
        let err = sweeper.complete_selected(CompletionSelection::default()).await.unwrap_err();
        assert!(err.rejection().is_some());
    }
}
