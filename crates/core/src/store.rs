//! Storage seam shared by the redemption path and the storage backends.

use crate::error::RevisitResult;
use crate::rewards::{
    AppendOutcome, GuestHistory, GuestStats, VenueRecord, VenueStats, VisitRecord,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Venue documents, append-only visit history, and confirmation aggregates.
///
/// Writers must be atomic: a failed call leaves no partial record behind.
#[async_trait]
pub trait RewardStore: Send + Sync {
    /// Fetch a venue. Fails with `VenueNotFound` when unknown.
    async fn venue(&self, venue_id: &str) -> RevisitResult<VenueRecord>;

    /// Insert or replace a venue document. Existing visits are untouched.
    async fn put_venue(&self, venue: VenueRecord) -> RevisitResult<()>;

    /// All visits of a guest at a venue, oldest first, with the current
    /// history version. Fails with `NotFound` if the guest has none.
    async fn history(&self, guest_id: &str, venue_id: &str) -> RevisitResult<GuestHistory>;

    /// Append `record` only if the history version still equals
    /// `expected_version`.
    async fn append_visit(
        &self,
        expected_version: u64,
        record: VisitRecord,
    ) -> RevisitResult<AppendOutcome>;

    async fn visit(&self, visit_id: &str) -> RevisitResult<VisitRecord>;

    /// Move a visit from `pending` to `confirmed` and bump venue and guest
    /// aggregates in the same atomic step. Fails with `InvalidTransition`
    /// if the visit is not pending.
    async fn confirm_visit(
        &self,
        visit_id: &str,
        confirmed_at: DateTime<Utc>,
    ) -> RevisitResult<VisitRecord>;

    async fn venue_stats(&self, venue_id: &str) -> RevisitResult<VenueStats>;

    async fn guest_stats(&self, guest_id: &str) -> RevisitResult<GuestStats>;
}
