//! In-process store backed by DashMap. Used for single-node deployments
//! and tests; every write holds the shard lock of the guest's history so
//! compare-and-append and confirmation are atomic.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use revisit_core::rewards::{
    AppendOutcome, GuestHistory, GuestStats, VenueRecord, VenueStats, VisitRecord, VisitStatus,
};
use revisit_core::{RevisitError, RevisitResult, RewardStore};
use tracing::debug;

type HistoryKey = (String, String);

/// Lock-free local store for venues, visit history, and aggregates.
#[derive(Default)]
pub struct LocalStore {
    venues: DashMap<String, VenueRecord>,
    /// Keyed by (guest_id, venue_id); records oldest first.
    histories: DashMap<HistoryKey, Vec<VisitRecord>>,
    visit_index: DashMap<String, HistoryKey>,
    venue_stats: DashMap<String, VenueStats>,
    guest_stats: DashMap<String, GuestStats>,
}

impl LocalStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn visit_count(&self) -> usize {
        self.visit_index.len()
    }
}

fn history_key(guest_id: &str, venue_id: &str) -> HistoryKey {
    (guest_id.to_string(), venue_id.to_string())
}

#[async_trait]
impl RewardStore for LocalStore {
    async fn venue(&self, venue_id: &str) -> RevisitResult<VenueRecord> {
        self.venues
            .get(venue_id)
            .map(|v| v.clone())
            .ok_or_else(|| RevisitError::VenueNotFound(venue_id.to_string()))
    }

    async fn put_venue(&self, venue: VenueRecord) -> RevisitResult<()> {
        debug!(venue_id = %venue.venue_id, "Venue stored");
        self.venues.insert(venue.venue_id.clone(), venue);
        Ok(())
    }

    async fn history(&self, guest_id: &str, venue_id: &str) -> RevisitResult<GuestHistory> {
        let records = self
            .histories
            .get(&history_key(guest_id, venue_id))
            .map(|r| r.clone())
            .ok_or_else(|| {
                RevisitError::NotFound(format!("guest {guest_id} has no visits at {venue_id}"))
            })?;
        Ok(GuestHistory {
            version: records.len() as u64,
            records,
        })
    }

    async fn append_visit(
        &self,
        expected_version: u64,
        record: VisitRecord,
    ) -> RevisitResult<AppendOutcome> {
        let key = history_key(&record.guest_id, &record.venue_id);
        let visit_id = record.visit_id.clone();

        match self.histories.entry(key.clone()) {
            Entry::Occupied(mut entry) => {
                if entry.get().len() as u64 != expected_version {
                    return Ok(AppendOutcome::Conflict);
                }
                entry.get_mut().push(record);
                self.visit_index.insert(visit_id, key);
            }
            Entry::Vacant(entry) => {
                if expected_version != 0 {
                    return Ok(AppendOutcome::Conflict);
                }
                entry.insert(vec![record]);
                self.visit_index.insert(visit_id, key);
            }
        }
        Ok(AppendOutcome::Appended)
    }

    async fn visit(&self, visit_id: &str) -> RevisitResult<VisitRecord> {
        let key = self
            .visit_index
            .get(visit_id)
            .map(|k| k.clone())
            .ok_or_else(|| RevisitError::NotFound(format!("visit {visit_id}")))?;
        self.histories
            .get(&key)
            .and_then(|records| records.iter().find(|r| r.visit_id == visit_id).cloned())
            .ok_or_else(|| RevisitError::NotFound(format!("visit {visit_id}")))
    }

    async fn confirm_visit(
        &self,
        visit_id: &str,
        confirmed_at: DateTime<Utc>,
    ) -> RevisitResult<VisitRecord> {
        let key = self
            .visit_index
            .get(visit_id)
            .map(|k| k.clone())
            .ok_or_else(|| RevisitError::NotFound(format!("visit {visit_id}")))?;

        let mut records = self
            .histories
            .get_mut(&key)
            .ok_or_else(|| RevisitError::NotFound(format!("visit {visit_id}")))?;
        let record = records
            .iter_mut()
            .find(|r| r.visit_id == visit_id)
            .ok_or_else(|| RevisitError::NotFound(format!("visit {visit_id}")))?;

        if record.status != VisitStatus::Pending {
            return Err(RevisitError::InvalidTransition(format!(
                "visit {visit_id} is already {:?}",
                record.status
            )));
        }

        record.status = VisitStatus::Confirmed;
        record.confirmed_at = Some(confirmed_at);

        self.venue_stats
            .entry(record.venue_id.clone())
            .or_insert_with(|| VenueStats {
                venue_id: record.venue_id.clone(),
                ..Default::default()
            })
            .record(record.applied_discount);
        self.guest_stats
            .entry(record.guest_id.clone())
            .or_insert_with(|| GuestStats {
                guest_id: record.guest_id.clone(),
                ..Default::default()
            })
            .record(confirmed_at);

        Ok(record.clone())
    }

    async fn venue_stats(&self, venue_id: &str) -> RevisitResult<VenueStats> {
        Ok(self
            .venue_stats
            .get(venue_id)
            .map(|s| s.clone())
            .unwrap_or_else(|| VenueStats {
                venue_id: venue_id.to_string(),
                ..Default::default()
            }))
    }

    async fn guest_stats(&self, guest_id: &str) -> RevisitResult<GuestStats> {
        Ok(self
            .guest_stats
            .get(guest_id)
            .map(|s| s.clone())
            .unwrap_or_else(|| GuestStats {
                guest_id: guest_id.to_string(),
                ..Default::default()
            }))
    }
}
