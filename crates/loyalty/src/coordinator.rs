//! Redemption orchestration: venue access check, history lookup, engine
//! evaluation, and the compare-and-append that persists the snapshot.

use crate::clock::ClockSource;
use crate::engine::{RewardDecayEngine, RewardInputs};
use crate::history::{StoreHistoryProvider, VisitHistoryProvider};
use chrono::{DateTime, Utc};
use revisit_core::config::RewardsConfig;
use revisit_core::rewards::{
    AppendOutcome, GuestHistory, RedeemRequest, RedemptionReceipt, RewardState,
    TierConfig, VenueRecord, VisitRecord, VisitStatus,
};
use revisit_core::{RevisitError, RevisitResult, RewardStore};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Runs one redemption end to end.
pub struct RedemptionCoordinator {
    store: Arc<dyn RewardStore>,
    history: Arc<dyn VisitHistoryProvider>,
    clock: Arc<dyn ClockSource>,
    config: RewardsConfig,
}

impl RedemptionCoordinator {
    pub fn new(
        store: Arc<dyn RewardStore>,
        clock: Arc<dyn ClockSource>,
        config: RewardsConfig,
    ) -> Self {
        info!(
            max_attempts = config.max_redeem_attempts,
            "Redemption coordinator initialized"
        );
        Self {
            history: Arc::new(StoreHistoryProvider::new(store.clone())),
            store,
            clock,
            config,
        }
    }

    /// Replace the default store-backed history provider.
    pub fn with_history_provider(mut self, history: Arc<dyn VisitHistoryProvider>) -> Self {
        self.history = history;
        self
    }

    pub fn clock(&self) -> &Arc<dyn ClockSource> {
        &self.clock
    }

    /// Redeem at the current clock time.
    pub async fn redeem(&self, request: &RedeemRequest) -> RevisitResult<RedemptionReceipt> {
        self.redeem_at(request, self.clock.now()).await
    }

    /// Redeem as of `now`: persists exactly one pending [`VisitRecord`]
    /// carrying the engine's discount, or nothing at all.
    pub async fn redeem_at(
        &self,
        request: &RedeemRequest,
        now: DateTime<Utc>,
    ) -> RevisitResult<RedemptionReceipt> {
        let guest_id = authenticated_guest(request)?;
        let venue = self.accessible_venue(&request.venue_id, now).await?;
        let tiers = self.tier_config(&venue);

        let attempts = self.config.max_redeem_attempts.max(1);
        for attempt in 1..=attempts {
            match self
                .try_redeem(guest_id, &venue, &tiers, request.idempotency_key.as_deref(), now)
                .await
            {
                Ok(receipt) => return Ok(receipt),
                Err(e) if e.is_transient() && attempt < attempts => {
                    warn!(
                        guest_id = guest_id,
                        venue_id = %venue.venue_id,
                        attempt = attempt,
                        error = %e,
                        "Redemption attempt failed, retrying"
                    );
                }
                Err(e) => {
                    if matches!(e, RevisitError::TransientConflict(_)) {
                        metrics::counter!("rewards.redemptions.conflict").increment(1);
                    }
                    return Err(e);
                }
            }
        }

        Err(RevisitError::TransientConflict(format!(
            "redemption for guest {guest_id} at venue {} not attempted",
            venue.venue_id
        )))
    }

    /// What a redemption would grant right now, without writing anything.
    pub async fn preview(&self, guest_id: &str, venue_id: &str) -> RevisitResult<RewardState> {
        let now = self.clock.now();
        let venue = self.accessible_venue(venue_id, now).await?;
        let tiers = self.tier_config(&venue);
        let history = self.guest_history(guest_id, venue_id).await?;
        let inputs = self.inputs(guest_id, venue_id, &history, &tiers, now).await?;
        Ok(RewardDecayEngine::assess(&inputs, &tiers))
    }

    async fn try_redeem(
        &self,
        guest_id: &str,
        venue: &VenueRecord,
        tiers: &TierConfig,
        idempotency_key: Option<&str>,
        now: DateTime<Utc>,
    ) -> RevisitResult<RedemptionReceipt> {
        // Read the version first: any write after this point fails the append.
        let history = self.guest_history(guest_id, &venue.venue_id).await?;

        if let Some(existing) = idempotency_key.and_then(|key| history.find_by_key(key)) {
            metrics::counter!("rewards.redemptions.replayed").increment(1);
            debug!(
                guest_id = guest_id,
                visit_id = %existing.visit_id,
                "Idempotency key seen before, returning original snapshot"
            );
            return Ok(RedemptionReceipt {
                visit_id: existing.visit_id.clone(),
                guest_id: existing.guest_id.clone(),
                venue_id: existing.venue_id.clone(),
                discount_percent: existing.applied_discount,
                status_label: existing.applied_status.label().to_string(),
                replayed: true,
                state: None,
            });
        }

        let inputs = self
            .inputs(guest_id, &venue.venue_id, &history, tiers, now)
            .await?;
        let state = RewardDecayEngine::assess(&inputs, tiers);

        if state.is_locked {
            let retry_after_secs =
                RewardDecayEngine::cooldown_remaining(inputs.last_claim_at, now, tiers)
                    .unwrap_or(1);
            metrics::counter!("rewards.redemptions.too_soon").increment(1);
            info!(
                guest_id = guest_id,
                venue_id = %venue.venue_id,
                retry_after_secs = retry_after_secs,
                "Redemption blocked by cooldown"
            );
            return Err(RevisitError::TooSoon { retry_after_secs });
        }

        let record = VisitRecord {
            visit_id: Uuid::new_v4().to_string(),
            guest_id: guest_id.to_string(),
            venue_id: venue.venue_id.clone(),
            occurred_at: now,
            created_at: now,
            status: VisitStatus::Pending,
            applied_discount: state.discount_percent,
            applied_status: state.status,
            idempotency_key: idempotency_key.map(str::to_string),
            confirmed_at: None,
        };

        match self.store.append_visit(history.version, record.clone()).await? {
            AppendOutcome::Appended => {
                metrics::counter!("rewards.redemptions").increment(1);
                info!(
                    guest_id = guest_id,
                    venue_id = %venue.venue_id,
                    visit_id = %record.visit_id,
                    discount = state.discount_percent,
                    status = %state.status,
                    "Redemption persisted"
                );
                Ok(RedemptionReceipt {
                    visit_id: record.visit_id,
                    guest_id: record.guest_id,
                    venue_id: record.venue_id,
                    discount_percent: state.discount_percent,
                    status_label: state.status.label().to_string(),
                    replayed: false,
                    state: Some(state),
                })
            }
            AppendOutcome::Conflict => Err(RevisitError::TransientConflict(format!(
                "visit history of guest {guest_id} at venue {} changed at version {}",
                venue.venue_id, history.version
            ))),
        }
    }

    async fn accessible_venue(
        &self,
        venue_id: &str,
        now: DateTime<Utc>,
    ) -> RevisitResult<VenueRecord> {
        let venue = self.store.venue(venue_id).await?;
        if let Some(reason) = venue.access_denial(now) {
            warn!(venue_id = venue_id, reason = %reason, "Redemption refused");
            return Err(RevisitError::AccessDenied(reason));
        }
        Ok(venue)
    }

    fn tier_config(&self, venue: &VenueRecord) -> TierConfig {
        RewardDecayEngine::resolve_config(venue.effective_tiers(&self.config.default_tiers))
    }

    async fn guest_history(&self, guest_id: &str, venue_id: &str) -> RevisitResult<GuestHistory> {
        match self.store.history(guest_id, venue_id).await {
            Err(RevisitError::NotFound(_)) => Ok(GuestHistory::default()),
            other => other,
        }
    }

    async fn inputs(
        &self,
        guest_id: &str,
        venue_id: &str,
        history: &GuestHistory,
        tiers: &TierConfig,
        now: DateTime<Utc>,
    ) -> RevisitResult<RewardInputs> {
        let cutoff = RewardDecayEngine::day_start(now, tiers);
        let prior_visit = match self.history.resolve(guest_id, venue_id, cutoff).await {
            Ok(prior) => prior,
            Err(RevisitError::NotFound(_)) => None,
            Err(e) => return Err(e),
        };
        Ok(RewardInputs {
            prior_visit,
            last_claim_at: history.latest_created_at(),
            now,
        })
    }
}

fn authenticated_guest(request: &RedeemRequest) -> RevisitResult<&str> {
    match request.guest_id.as_deref().map(str::trim) {
        Some(id) if !id.is_empty() => Ok(id),
        _ => Err(RevisitError::Unauthenticated),
    }
}
