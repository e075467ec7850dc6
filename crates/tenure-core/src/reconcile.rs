//! Temporal reconciliation: one snapshot in, the minimal set of interval
//! close/open mutations out.
//!
//! For every entity in the snapshot and every tracked attribute the observed
//! value is compared against the [`StateCache`]. Equal values short-circuit
//! without touching the store. A difference closes the open record on the
//! observation date and, when a value is present, opens its successor on the
//! same date, so intervals are half-open `[start_date, end_date)`.
//!
//! All mutations for one date run inside a single store unit of work. If any
//! of them, or the commit, fails the unit is rolled back and the cache
//! journal is unwound before the error is returned.

use std::time::Instant;

use chrono::NaiveDate;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cache::StateCache;
use crate::error::{SyncError, error_chain};
use crate::model::AttributeType;
use crate::snapshot::Snapshot;
use crate::snapshot::fields::TrackingPlan;
use crate::store::HistoryStore;

/// Mutation shape for one changed key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transition {
    /// No open record yet; insert only.
    Open,
    /// Close the open record and insert its successor.
    Replace,
    /// Value disappeared; close only.
    Close,
}

impl Transition {
    /// `None` when the observation matches the cached slot. A stored null and
    /// an observed missing value compare equal.
    fn between(cached: Option<&Option<String>>, observed: Option<&str>) -> Option<Self> {
        match (cached, observed) {
            (None, None) => None,
            (None, Some(_)) => Some(Self::Open),
            (Some(current), observed) if current.as_deref() == observed => None,
            (Some(_), Some(_)) => Some(Self::Replace),
            (Some(_), None) => Some(Self::Close),
        }
    }

    const fn closes(self) -> bool {
        matches!(self, Self::Replace | Self::Close)
    }
}

/// Outcome of one committed date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DateReport {
    pub date: NaiveDate,
    /// Entities present in the snapshot.
    pub entities: usize,
    /// Attribute keys whose value changed.
    pub changed: usize,
    pub opened: usize,
    pub closed: usize,
}

impl DateReport {
    const fn empty(date: NaiveDate, entities: usize) -> Self {
        Self {
            date,
            entities,
            changed: 0,
            opened: 0,
            closed: 0,
        }
    }
}

/// A change [`Reconciler::diff`] would apply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Change {
    pub entity_id: String,
    pub attribute: AttributeType,
    /// Cached slot before the change, `None` when unset.
    pub previous: Option<Option<String>>,
    pub observed: Option<String>,
}

impl Change {
    /// Whether applying this change closes an open record.
    #[must_use]
    pub const fn closes(&self) -> bool {
        self.previous.is_some()
    }

    /// Whether applying this change opens a new record.
    #[must_use]
    pub const fn opens(&self) -> bool {
        self.observed.is_some()
    }
}

/// Engine state for one run: a borrowed store, the owned cache, and the
/// validated tracking plan.
pub struct Reconciler<'s> {
    store: &'s mut dyn HistoryStore,
    cache: StateCache,
    plan: TrackingPlan,
}

impl<'s> Reconciler<'s> {
    /// Load the cache from `store` and build an engine for one run.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::StoreUnavailable`] if the open records cannot be
    /// read.
    pub fn new(store: &'s mut dyn HistoryStore, plan: TrackingPlan) -> Result<Self, SyncError> {
        let cache = StateCache::load(&*store)?;
        Ok(Self::with_cache(store, cache, plan))
    }

    /// Build an engine around an already loaded cache.
    pub fn with_cache(
        store: &'s mut dyn HistoryStore,
        cache: StateCache,
        plan: TrackingPlan,
    ) -> Self {
        Self { store, cache, plan }
    }

    #[must_use]
    pub const fn cache(&self) -> &StateCache {
        &self.cache
    }

    #[must_use]
    pub const fn plan(&self) -> &TrackingPlan {
        &self.plan
    }

    #[must_use]
    pub fn store(&self) -> &dyn HistoryStore {
        &*self.store
    }

    /// Compare the cache against a fresh load of the store's open records.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::StoreUnavailable`] if the store cannot be read.
    pub fn cache_matches_store(&self) -> Result<bool, SyncError> {
        Ok(self.cache.matches(&self.store.load_open_records()?))
    }

    /// Changes `snapshot` would produce against the current cache, without
    /// touching the store or the cache.
    #[must_use]
    pub fn diff(&self, snapshot: &Snapshot) -> Vec<Change> {
        let mut changes = Vec::new();
        for observation in snapshot {
            for &attribute in self.plan.attributes() {
                let cached = self.cache.get(&observation.entity_id, attribute);
                let observed = observation.value(attribute);
                if Transition::between(cached, observed).is_some() {
                    changes.push(Change {
                        entity_id: observation.entity_id.clone(),
                        attribute,
                        previous: cached.cloned(),
                        observed: observed.map(str::to_string),
                    });
                }
            }
        }
        changes
    }

    /// Apply one date's snapshot as a single unit of work.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::ConsistencyFault`] when a close finds no open
    /// record and [`SyncError::StoreUnavailable`] when a mutation or the
    /// commit fails. In both cases nothing from this date is kept in the
    /// store or the cache.
    pub fn reconcile(
        &mut self,
        date: NaiveDate,
        snapshot: &Snapshot,
    ) -> Result<DateReport, SyncError> {
        let started = Instant::now();

        self.store.begin()?;
        self.cache.begin_unit();

        match self.apply_and_commit(date, snapshot) {
            Ok(report) => {
                self.cache.commit_unit();
                let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
                info!(
                    %date,
                    entities = report.entities,
                    changed = report.changed,
                    opened = report.opened,
                    closed = report.closed,
                    elapsed_ms,
                    "date committed"
                );
                Ok(report)
            }
            Err(err) => {
                self.abort_unit(date, &err);
                Err(err)
            }
        }
    }

    fn apply_and_commit(
        &mut self,
        date: NaiveDate,
        snapshot: &Snapshot,
    ) -> Result<DateReport, SyncError> {
        let report = self.apply(date, snapshot)?;
        self.store.record_committed_date(date)?;
        self.store.commit()?;
        Ok(report)
    }

    fn apply(&mut self, date: NaiveDate, snapshot: &Snapshot) -> Result<DateReport, SyncError> {
        let mut report = DateReport::empty(date, snapshot.len());

        for observation in snapshot {
            let entity_id = observation.entity_id.as_str();
            for &attribute in self.plan.attributes() {
                let observed = observation.value(attribute);
                let cached = self.cache.get(entity_id, attribute);
                let Some(transition) = Transition::between(cached, observed) else {
                    continue;
                };
                let previous = cached.cloned();

                if transition.closes() {
                    self.store.close_open_record(entity_id, attribute, date)?;
                    report.closed += 1;
                }
                match observed {
                    Some(value) => {
                        self.store
                            .insert_record(entity_id, attribute, date, Some(value))?;
                        self.cache
                            .set(entity_id, attribute, Some(value.to_string()));
                        report.opened += 1;
                    }
                    None => self.cache.clear(entity_id, attribute),
                }
                report.changed += 1;

                debug!(
                    %date,
                    entity_id,
                    %attribute,
                    old = ?previous,
                    new = ?observed,
                    "attribute changed"
                );
            }
        }

        Ok(report)
    }

    fn abort_unit(&mut self, date: NaiveDate, cause: &SyncError) {
        if let Err(rollback_err) = self.store.rollback() {
            warn!(%date, error = %error_chain(&rollback_err), "rollback failed");
        }
        let undone = self.cache.revert_unit();
        warn!(%date, undone, error = %error_chain(cause), "date rolled back");
    }
}
