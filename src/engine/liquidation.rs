use std::collections::BTreeMap;
use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Serialize;
use tracing::info;
use ulid::Ulid;

use crate::clock::Clock;
use crate::model::*;
use crate::observability::{LIQUIDATIONS_CREATED_TOTAL, LIQUIDATION_ITEMS_CREATED_TOTAL};
use crate::pricing::PricingError;
use crate::store::{ReservationFilter, Store};

use super::error::EngineError;

const BILLABLE: [ReservationStatus; 2] = [ReservationStatus::Completed, ReservationStatus::Penalized];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationSummary {
    pub created_liquidations: usize,
    pub created_items: usize,
    pub updated_reservations: usize,
    pub liquidation_ids: Vec<Ulid>,
}

/// Turns finished, unbilled reservations into per-user liquidations.
///
/// A run is one transaction: every liquidation, item and INVOICED transition
/// of the run commits together or not at all. A reservation is eligible while
/// it is COMPLETED or PENALIZED and has no liquidation item.
pub struct LiquidationGenerator {
    store: Arc<Store>,
    clock: Arc<dyn Clock>,
}

impl LiquidationGenerator {
    pub fn new(store: Arc<Store>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub async fn generate(&self, user_id: Option<Ulid>) -> Result<GenerationSummary, EngineError> {
        let now = self.clock.now();
        let summary = self
            .store
            .transaction(|tx| {
                let mut filter = ReservationFilter::new().statuses(&BILLABLE).unbilled();
                if let Some(user_id) = user_id {
                    filter = filter.user(user_id);
                }

                let mut by_user: BTreeMap<Ulid, Vec<Reservation>> = BTreeMap::new();
                for r in tx.reservations(&filter) {
                    by_user.entry(r.user_id).or_default().push(r.clone());
                }

                let mut summary = GenerationSummary::default();
                for (user_id, mut reservations) in by_user {
                    reservations.sort_by_key(|r| (r.end, r.id));
                    let (Some(first), Some(last)) = (reservations.first(), reservations.last()) else {
                        continue;
                    };
                    let total_amount = reservations
                        .iter()
                        .try_fold(Decimal::ZERO, |acc, r| acc.checked_add(r.total_amount))
                        .ok_or(PricingError::AmountOverflow)?;
                    let liquidation = Liquidation {
                        id: Ulid::new(),
                        user_id,
                        status: LiquidationStatus::Draft,
                        total_amount,
                        from_date: first.end,
                        to_date: last.end,
                        created_at: now,
                    };
                    let liquidation_id = liquidation.id;
                    tx.insert_liquidation(liquidation)?;

                    for r in &reservations {
                        tx.insert_liquidation_item(LiquidationItem {
                            id: Ulid::new(),
                            liquidation_id,
                            reservation_id: r.id,
                            amount: r.total_amount,
                        })?;
                    }

                    let invoiced = tx.update_status_where(
                        &ReservationFilter::new()
                            .ids(reservations.iter().map(|r| r.id).collect())
                            .statuses(&BILLABLE),
                        ReservationStatus::Invoiced,
                        now,
                    )?;

                    summary.created_liquidations += 1;
                    summary.created_items += reservations.len();
                    summary.updated_reservations += invoiced.len();
                    summary.liquidation_ids.push(liquidation_id);
                }
                Ok::<_, EngineError>(summary)
            })
            .await?;

        metrics::counter!(LIQUIDATIONS_CREATED_TOTAL).increment(summary.created_liquidations as u64);
        metrics::counter!(LIQUIDATION_ITEMS_CREATED_TOTAL).increment(summary.created_items as u64);
        info!(
            user_id = ?user_id,
            liquidations = summary.created_liquidations,
            items = summary.created_items,
            invoiced = summary.updated_reservations,
            "liquidation run finished"
        );
        Ok(summary)
    }
}
