pub mod booking;
mod error;
pub mod liquidation;
pub mod rules;
pub mod sweeper;
pub mod validator;

pub use booking::BookingService;
pub use error::{EngineError, Rejection, RejectionCode};
pub use liquidation::{GenerationSummary, LiquidationGenerator};
pub use rules::{BookingRules, TypeRules};
pub use sweeper::{CompletionSelection, CompletionSweeper};
pub use validator::{BookingRequest, ReservationValidator, ValidatedWindow};

use std::sync::Arc;

use chrono::FixedOffset;

use crate::clock::Clock;
use crate::notify::NotificationPort;
use crate::settings::SettingsProvider;
use crate::store::Store;

/// Every service of the engine wired to one store, clock and settings cache.
pub struct Engine {
    pub store: Arc<Store>,
    pub settings: Arc<SettingsProvider>,
    pub booking: BookingService,
    pub sweeper: Arc<CompletionSweeper>,
    pub liquidation: LiquidationGenerator,
    offset: FixedOffset,
}

impl Engine {
    pub fn new(
        store: Arc<Store>,
        clock: Arc<dyn Clock>,
        notify: Arc<dyn NotificationPort>,
        offset: FixedOffset,
        settings_ttl: std::time::Duration,
    ) -> Self {
        let settings = Arc::new(SettingsProvider::new(store.clone(), clock.clone(), settings_ttl));
        Self {
            booking: BookingService::new(
                store.clone(),
                settings.clone(),
                ReservationValidator::new(offset),
                clock.clone(),
                notify,
            ),
            sweeper: Arc::new(CompletionSweeper::new(store.clone(), clock.clone())),
            liquidation: LiquidationGenerator::new(store.clone(), clock),
            settings,
            store,
            offset,
        }
    }

    /// Offset of the office's local day.
    pub fn offset(&self) -> FixedOffset {
        self.offset
    }
}
