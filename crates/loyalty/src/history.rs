//! Resolves the qualifying visit that anchors a guest's decay.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use revisit_core::{RevisitResult, RewardStore};
use std::sync::Arc;

#[async_trait]
pub trait VisitHistoryProvider: Send + Sync {
    /// Most recent pending or confirmed visit strictly before `before`.
    ///
    /// Fails with `NotFound` when the guest has no history at the venue.
    async fn resolve(
        &self,
        guest_id: &str,
        venue_id: &str,
        before: DateTime<Utc>,
    ) -> RevisitResult<Option<DateTime<Utc>>>;
}

/// History provider reading straight from a [`RewardStore`].
pub struct StoreHistoryProvider {
    store: Arc<dyn RewardStore>,
}

impl StoreHistoryProvider {
    pub fn new(store: Arc<dyn RewardStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl VisitHistoryProvider for StoreHistoryProvider {
    async fn resolve(
        &self,
        guest_id: &str,
        venue_id: &str,
        before: DateTime<Utc>,
    ) -> RevisitResult<Option<DateTime<Utc>>> {
        let history = self.store.history(guest_id, venue_id).await?;
        Ok(history.latest_before(before))
    }
}
