use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use ulid::Ulid;

use crate::model::*;

/// Filtered reservation query. Unset fields do not constrain.
#[derive(Debug, Clone, Default)]
pub struct ReservationFilter {
    pub ids: Option<Vec<Ulid>>,
    pub user_id: Option<Ulid>,
    pub space_id: Option<Ulid>,
    pub space_type: Option<SpaceType>,
    pub statuses: Option<Vec<ReservationStatus>>,
    /// Keep reservations whose span intersects this window.
    pub window: Option<Span>,
    pub ends_at_or_before: Option<DateTime<Utc>>,
    pub exclude: Option<Ulid>,
    /// Keep only reservations without a liquidation item.
    pub unbilled_only: bool,
}

impl ReservationFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ids(mut self, ids: Vec<Ulid>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn user(mut self, user_id: Ulid) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn space(mut self, space_id: Ulid) -> Self {
        self.space_id = Some(space_id);
        self
    }

    pub fn space_type(mut self, space_type: SpaceType) -> Self {
        self.space_type = Some(space_type);
        self
    }

    pub fn statuses(mut self, statuses: &[ReservationStatus]) -> Self {
        self.statuses = Some(statuses.to_vec());
        self
    }

    pub fn window(mut self, window: Span) -> Self {
        self.window = Some(window);
        self
    }

    pub fn ends_by(mut self, cutoff: DateTime<Utc>) -> Self {
        self.ends_at_or_before = Some(cutoff);
        self
    }

    pub fn excluding(mut self, id: Option<Ulid>) -> Self {
        self.exclude = id;
        self
    }

    pub fn unbilled(mut self) -> Self {
        self.unbilled_only = true;
        self
    }
}

/// Prior row state, recorded before each mutation inside a transaction.
#[derive(Debug)]
pub(super) enum Undo {
    Space(Ulid, Option<Space>),
    Setting(String, Option<SettingValue>),
    Reservation(Ulid, Option<Reservation>),
    Liquidation(Ulid),
    Item(Ulid),
}

#[derive(Debug, Default)]
pub struct Tables {
    spaces: HashMap<Ulid, Space>,
    reservations: BTreeMap<Ulid, Reservation>,
    /// ACTIVE reservations per space, for the no-overlap constraint.
    schedules: HashMap<Ulid, SpaceSchedule>,
    settings: HashMap<String, SettingValue>,
    liquidations: BTreeMap<Ulid, Liquidation>,
    items: BTreeMap<Ulid, LiquidationItem>,
    item_by_reservation: HashMap<Ulid, Ulid>,
}

impl Tables {
    // ── Reads ────────────────────────────────────────────────

    pub fn space(&self, id: &Ulid) -> Option<&Space> {
        self.spaces.get(id)
    }

    pub fn spaces(&self) -> impl Iterator<Item = &Space> {
        self.spaces.values()
    }

    pub fn reservation(&self, id: &Ulid) -> Option<&Reservation> {
        self.reservations.get(id)
    }

    /// Matching reservations ordered by start time, then id.
    pub fn reservations(&self, filter: &ReservationFilter) -> Vec<&Reservation> {
        let mut out: Vec<&Reservation> = match &filter.ids {
            Some(ids) => ids.iter().filter_map(|id| self.reservations.get(id)).collect(),
            None => self.reservations.values().collect(),
        };
        out.retain(|r| self.matches(filter, r));
        out.sort_by_key(|r| (r.start, r.id));
        out.dedup_by_key(|r| r.id);
        out
    }

    fn matches(&self, filter: &ReservationFilter, r: &Reservation) -> bool {
        if filter.exclude == Some(r.id) {
            return false;
        }
        if filter.user_id.is_some_and(|u| u != r.user_id) {
            return false;
        }
        if filter.space_id.is_some_and(|s| s != r.space_id) {
            return false;
        }
        if let Some(statuses) = &filter.statuses
            && !statuses.contains(&r.status)
        {
            return false;
        }
        if let Some(window) = &filter.window
            && !window.overlaps(&r.span())
        {
            return false;
        }
        if filter.ends_at_or_before.is_some_and(|cutoff| r.end > cutoff) {
            return false;
        }
        if filter.unbilled_only && self.is_billed(&r.id) {
            return false;
        }
        if let Some(space_type) = filter.space_type {
            match self.spaces.get(&r.space_id) {
                Some(space) if space.space_type == space_type => {}
                _ => return false,
            }
        }
        true
    }

    /// ACTIVE reservations in `space_id` intersecting `span`, other than `exclude`.
    pub fn active_overlapping(&self, space_id: &Ulid, span: &Span, exclude: Option<Ulid>) -> Vec<&Reservation> {
        let Some(schedule) = self.schedules.get(space_id) else {
            return Vec::new();
        };
        schedule
            .overlapping(span)
            .filter(|(_, id)| Some(*id) != exclude)
            .filter_map(|(_, id)| self.reservations.get(id))
            .collect()
    }

    pub fn setting(&self, key: &str) -> Option<&SettingValue> {
        self.settings.get(key)
    }

    pub fn liquidation(&self, id: &Ulid) -> Option<&Liquidation> {
        self.liquidations.get(id)
    }

    pub fn liquidations_for_user(&self, user_id: &Ulid) -> Vec<&Liquidation> {
        self.liquidations.values().filter(|l| l.user_id == *user_id).collect()
    }

    pub fn items_for(&self, liquidation_id: &Ulid) -> Vec<&LiquidationItem> {
        self.items
            .values()
            .filter(|i| i.liquidation_id == *liquidation_id)
            .collect()
    }

    pub fn item_for_reservation(&self, reservation_id: &Ulid) -> Option<&LiquidationItem> {
        self.item_by_reservation
            .get(reservation_id)
            .and_then(|id| self.items.get(id))
    }

    pub fn is_billed(&self, reservation_id: &Ulid) -> bool {
        self.item_by_reservation.contains_key(reservation_id)
    }

    pub fn liquidation_count(&self) -> usize {
        self.liquidations.len()
    }

    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    // ── Event application ────────────────────────────────────

    /// Apply an event without constraint checks (checks happen in `Txn`).
    /// Returns the undo record restoring the previous row.
    pub(super) fn apply(&mut self, event: &Event) -> Undo {
        match event {
            Event::SpaceUpserted(space) => {
                let prev = self.spaces.insert(space.id, space.clone());
                Undo::Space(space.id, prev)
            }
            Event::SettingWritten(setting) => {
                let prev = self.settings.insert(setting.key.clone(), setting.clone());
                Undo::Setting(setting.key.clone(), prev)
            }
            Event::ReservationCreated(r) | Event::ReservationUpdated(r) => {
                let prev = self.take_reservation(&r.id);
                self.put_reservation(r.clone());
                Undo::Reservation(r.id, prev)
            }
            Event::ReservationStatusChanged { id, status, at } => {
                let prev = self.take_reservation(id);
                if let Some(prev) = &prev {
                    let mut next = prev.clone();
                    next.status = *status;
                    next.updated_at = *at;
                    self.put_reservation(next);
                }
                Undo::Reservation(*id, prev)
            }
            Event::LiquidationCreated(l) => {
                self.liquidations.insert(l.id, l.clone());
                Undo::Liquidation(l.id)
            }
            Event::LiquidationItemCreated(item) => {
                self.item_by_reservation.insert(item.reservation_id, item.id);
                self.items.insert(item.id, item.clone());
                Undo::Item(item.id)
            }
        }
    }

    /// Restore prior row states, newest first.
    pub(super) fn rollback(&mut self, undo: Vec<Undo>) {
        for entry in undo.into_iter().rev() {
            match entry {
                Undo::Space(id, prev) => match prev {
                    Some(space) => {
                        self.spaces.insert(id, space);
                    }
                    None => {
                        self.spaces.remove(&id);
                    }
                },
                Undo::Setting(key, prev) => match prev {
                    Some(setting) => {
                        self.settings.insert(key, setting);
                    }
                    None => {
                        self.settings.remove(&key);
                    }
                },
                Undo::Reservation(id, prev) => {
                    self.take_reservation(&id);
                    if let Some(r) = prev {
                        self.put_reservation(r);
                    }
                }
                Undo::Liquidation(id) => {
                    self.liquidations.remove(&id);
                }
                Undo::Item(id) => {
                    if let Some(item) = self.items.remove(&id) {
                        self.item_by_reservation.remove(&item.reservation_id);
                    }
                }
            }
        }
    }

    fn put_reservation(&mut self, r: Reservation) {
        if r.is_active() {
            self.schedules.entry(r.space_id).or_default().insert(r.span(), r.id);
        }
        self.reservations.insert(r.id, r);
    }

    fn take_reservation(&mut self, id: &Ulid) -> Option<Reservation> {
        let r = self.reservations.remove(id)?;
        if let Some(schedule) = self.schedules.get_mut(&r.space_id) {
            schedule.remove(r.id);
        }
        Some(r)
    }

    /// Events that recreate the current state from nothing.
    pub(super) fn snapshot(&self) -> Vec<Event> {
        let mut events = Vec::with_capacity(
            self.spaces.len()
                + self.settings.len()
                + self.reservations.len()
                + self.liquidations.len()
                + self.items.len(),
        );
        events.extend(self.spaces.values().cloned().map(Event::SpaceUpserted));
        events.extend(self.settings.values().cloned().map(Event::SettingWritten));
        events.extend(self.reservations.values().cloned().map(Event::ReservationCreated));
        events.extend(self.liquidations.values().cloned().map(Event::LiquidationCreated));
        events.extend(self.items.values().cloned().map(Event::LiquidationItemCreated));
        events
    }
}
