//! End-to-end redemption and confirmation against the in-process store.

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use revisit_core::config::RewardsConfig;
use revisit_core::rewards::{
    AppendOutcome, GuestHistory, GuestStats, RawTierConfig, RedeemRequest, RewardStatus,
    TierConfig, VenueRecord, VenueStats, VisitRecord, VisitStatus,
};
use revisit_core::{RevisitError, RevisitResult, RewardStore};
use revisit_loyalty::{
    ClockSource, ConfirmationHandler, FixedClock, RedemptionCoordinator, VisitHistoryProvider,
};
use revisit_store::LocalStore;
use serde_json::json;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

const VENUE: &str = "venue-1";
const GUEST: &str = "guest-1";

fn at(d: u32, h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, d, h, m, 0).unwrap()
}

fn request(key: Option<&str>) -> RedeemRequest {
    RedeemRequest {
        guest_id: Some(GUEST.to_string()),
        venue_id: VENUE.to_string(),
        idempotency_key: key.map(str::to_string),
    }
}

struct Harness {
    store: Arc<LocalStore>,
    clock: Arc<FixedClock>,
    coordinator: RedemptionCoordinator,
    confirmations: ConfirmationHandler,
}

async fn harness_with(store: Arc<dyn RewardStore>, local: Arc<LocalStore>, now: DateTime<Utc>) -> Harness {
    local
        .put_venue(VenueRecord::new(VENUE, "Corner Cafe"))
        .await
        .unwrap();
    let clock = Arc::new(FixedClock::new(now));
    let coordinator =
        RedemptionCoordinator::new(store.clone(), clock.clone(), RewardsConfig::default());
    let confirmations = ConfirmationHandler::new(store, clock.clone(), 2);
    Harness {
        store: local,
        clock,
        coordinator,
        confirmations,
    }
}

async fn harness(now: DateTime<Utc>) -> Harness {
    let local = Arc::new(LocalStore::new());
    harness_with(local.clone(), local, now).await
}

#[tokio::test]
async fn test_visit_cycle_follows_calendar_days() {
    let h = harness(at(1, 10, 0)).await;

    let first = h.coordinator.redeem(&request(None)).await.unwrap();
    assert_eq!(first.discount_percent, 5);
    assert_eq!(first.status_label, "initial");
    assert!(!first.replayed);

    h.clock.set(at(2, 10, 0));
    let second = h.coordinator.redeem(&request(None)).await.unwrap();
    assert_eq!(second.discount_percent, 20);
    assert_eq!(second.status_label, "vip");

    h.clock.set(at(4, 0, 1));
    let third = h.coordinator.redeem(&request(None)).await.unwrap();
    assert_eq!(third.discount_percent, 15);
    assert_eq!(third.status_label, "decay1");

    h.clock.set(at(8, 12, 0));
    let fourth = h.coordinator.redeem(&request(None)).await.unwrap();
    assert_eq!(fourth.discount_percent, 10);
    assert_eq!(fourth.status_label, "decay2");

    h.clock.set(at(20, 12, 0));
    let fifth = h.coordinator.redeem(&request(None)).await.unwrap();
    assert_eq!(fifth.discount_percent, 5);
    assert_eq!(fifth.status_label, "reset");

    let history = h.store.history(GUEST, VENUE).await.unwrap();
    let discounts: Vec<u8> = history.records.iter().map(|r| r.applied_discount).collect();
    assert_eq!(discounts, vec![5, 20, 15, 10, 5]);
    assert!(history
        .records
        .iter()
        .all(|r| r.status == VisitStatus::Pending));
}

#[tokio::test]
async fn test_second_visit_same_day_keeps_tier() {
    let h = harness(at(1, 10, 0)).await;
    h.coordinator.redeem(&request(None)).await.unwrap();

    h.clock.set(at(2, 8, 0));
    let morning = h.coordinator.redeem(&request(None)).await.unwrap();
    h.clock.set(at(2, 21, 0));
    let evening = h.coordinator.redeem(&request(None)).await.unwrap();

    assert_eq!(morning.discount_percent, 20);
    assert_eq!(evening.discount_percent, 20);
    assert_eq!(evening.status_label, "vip");
}

#[tokio::test]
async fn test_cooldown_blocks_without_writing() {
    let h = harness(at(2, 10, 0)).await;
    h.coordinator.redeem(&request(None)).await.unwrap();

    h.clock.advance(Duration::hours(3));
    let err = h.coordinator.redeem(&request(None)).await.unwrap_err();
    match err {
        RevisitError::TooSoon { retry_after_secs } => assert_eq!(retry_after_secs, 9 * 3600),
        other => panic!("expected TooSoon, got {other:?}"),
    }
    assert_eq!(h.store.history(GUEST, VENUE).await.unwrap().version, 1);

    // Preview still shows the discount, just locked.
    let state = h.coordinator.preview(GUEST, VENUE).await.unwrap();
    assert_eq!(state.status, RewardStatus::CooldownLocked);
    assert!(state.is_locked);
    assert_eq!(state.discount_percent, 5);
}

#[tokio::test]
async fn test_rejections_run_before_engine() {
    let h = harness(at(2, 10, 0)).await;

    let missing = RedeemRequest {
        venue_id: "nowhere".to_string(),
        ..request(None)
    };
    assert!(matches!(
        h.coordinator.redeem(&missing).await,
        Err(RevisitError::VenueNotFound(_))
    ));

    let anonymous = RedeemRequest {
        guest_id: None,
        ..request(None)
    };
    assert!(matches!(
        h.coordinator.redeem(&anonymous).await,
        Err(RevisitError::Unauthenticated)
    ));

    let mut expired = VenueRecord::new(VENUE, "Corner Cafe");
    expired.subscription_expires_at = Some(at(1, 0, 0));
    h.store.put_venue(expired).await.unwrap();
    assert!(matches!(
        h.coordinator.redeem(&request(None)).await,
        Err(RevisitError::AccessDenied(_))
    ));

    let mut inactive = VenueRecord::new(VENUE, "Corner Cafe");
    inactive.active = false;
    h.store.put_venue(inactive).await.unwrap();
    assert!(matches!(
        h.coordinator.redeem(&request(None)).await,
        Err(RevisitError::AccessDenied(_))
    ));

    assert_eq!(h.store.visit_count(), 0);
}

#[tokio::test]
async fn test_idempotency_key_replays_snapshot() {
    let h = harness(at(1, 10, 0)).await;
    h.coordinator.redeem(&request(None)).await.unwrap();

    h.clock.set(at(2, 10, 0));
    let original = h.coordinator.redeem(&request(Some("scan-42"))).await.unwrap();
    h.clock.advance(Duration::minutes(1));
    let replay = h.coordinator.redeem(&request(Some("scan-42"))).await.unwrap();

    assert!(replay.replayed);
    assert!(replay.state.is_none());
    assert_eq!(replay.visit_id, original.visit_id);
    assert_eq!(replay.discount_percent, 20);
    assert_eq!(replay.status_label, "vip");
    assert_eq!(h.store.visit_count(), 2);
}

#[tokio::test]
async fn test_config_edit_does_not_touch_snapshot() {
    let h = harness(at(1, 10, 0)).await;
    h.coordinator.redeem(&request(None)).await.unwrap();
    h.clock.set(at(2, 10, 0));
    let receipt = h.coordinator.redeem(&request(None)).await.unwrap();
    assert_eq!(receipt.discount_percent, 20);

    let mut venue = VenueRecord::new(VENUE, "Corner Cafe");
    venue.tiers = serde_json::from_value(json!({ "percVip": 40 })).unwrap();
    h.store.put_venue(venue).await.unwrap();

    let stored = h.store.visit(&receipt.visit_id).await.unwrap();
    assert_eq!(stored.applied_discount, 20);

    // New evaluations see the new config.
    let state = h.coordinator.preview(GUEST, VENUE).await;
    assert_eq!(state.unwrap().discount_percent, 40);

    let confirmed = h.confirmations.confirm(&receipt.visit_id).await.unwrap();
    assert_eq!(confirmed.applied_discount, 20);
    let stats = h.store.venue_stats(VENUE).await.unwrap();
    assert_eq!(stats.discount_distribution.get(&20), Some(&1));
    assert_eq!(stats.discount_distribution.get(&40), None);
}

#[tokio::test]
async fn test_confirmation_happens_once() {
    let h = harness(at(1, 10, 0)).await;
    let receipt = h.coordinator.redeem(&request(None)).await.unwrap();

    h.clock.set(at(1, 10, 5));
    let confirmed = h.confirmations.confirm(&receipt.visit_id).await.unwrap();
    assert_eq!(confirmed.status, VisitStatus::Confirmed);
    assert_eq!(confirmed.confirmed_at, Some(at(1, 10, 5)));

    assert!(matches!(
        h.confirmations.confirm(&receipt.visit_id).await,
        Err(RevisitError::InvalidTransition(_))
    ));

    let guest = h.store.guest_stats(GUEST).await.unwrap();
    assert_eq!(guest.total_visits, 1);
    assert_eq!(guest.last_seen, Some(at(1, 10, 5)));
    assert_eq!(h.store.venue_stats(VENUE).await.unwrap().total_checkins, 1);
}

#[tokio::test]
async fn test_default_tiers_apply_to_unconfigured_venue() {
    let local = Arc::new(LocalStore::new());
    local
        .put_venue(VenueRecord::new(VENUE, "Corner Cafe"))
        .await
        .unwrap();
    let clock = Arc::new(FixedClock::new(at(1, 10, 0)));
    let config = RewardsConfig {
        default_tiers: RawTierConfig::from(TierConfig {
            perc_base: 3,
            ..TierConfig::default()
        }),
        ..RewardsConfig::default()
    };
    let coordinator = RedemptionCoordinator::new(local, clock, config);
    let receipt = coordinator.redeem(&request(None)).await.unwrap();
    assert_eq!(receipt.discount_percent, 3);
}

// ─── Concurrency ────────────────────────────────────────────────────────────

/// Yields after every history read so concurrent redemptions interleave
/// between reading the version and appending.
struct YieldingStore {
    inner: Arc<LocalStore>,
}

#[async_trait]
impl RewardStore for YieldingStore {
    async fn venue(&self, venue_id: &str) -> RevisitResult<VenueRecord> {
        self.inner.venue(venue_id).await
    }
    async fn put_venue(&self, venue: VenueRecord) -> RevisitResult<()> {
        self.inner.put_venue(venue).await
    }
    async fn history(&self, guest_id: &str, venue_id: &str) -> RevisitResult<GuestHistory> {
        let history = self.inner.history(guest_id, venue_id).await;
        tokio::task::yield_now().await;
        history
    }
    async fn append_visit(&self, v: u64, record: VisitRecord) -> RevisitResult<AppendOutcome> {
        self.inner.append_visit(v, record).await
    }
    async fn visit(&self, visit_id: &str) -> RevisitResult<VisitRecord> {
        self.inner.visit(visit_id).await
    }
    async fn confirm_visit(&self, id: &str, at: DateTime<Utc>) -> RevisitResult<VisitRecord> {
        self.inner.confirm_visit(id, at).await
    }
    async fn venue_stats(&self, venue_id: &str) -> RevisitResult<VenueStats> {
        self.inner.venue_stats(venue_id).await
    }
    async fn guest_stats(&self, guest_id: &str) -> RevisitResult<GuestStats> {
        self.inner.guest_stats(guest_id).await
    }
}

#[tokio::test]
async fn test_concurrent_same_scan_persists_once() {
    let local = Arc::new(LocalStore::new());
    let store = Arc::new(YieldingStore {
        inner: local.clone(),
    });
    let h = harness_with(store, local, at(2, 10, 0)).await;

    let req = request(Some("scan-7"));
    let (a, b) = tokio::join!(h.coordinator.redeem(&req), h.coordinator.redeem(&req));

    assert_eq!(h.store.visit_count(), 1);
    let stored = &h.store.history(GUEST, VENUE).await.unwrap().records[0];
    for outcome in [a, b] {
        match outcome {
            Ok(receipt) => {
                assert_eq!(receipt.visit_id, stored.visit_id);
                assert_eq!(receipt.discount_percent, stored.applied_discount);
            }
            Err(e) => assert!(matches!(e, RevisitError::TransientConflict(_))),
        }
    }
}

#[tokio::test]
async fn test_concurrent_without_key_persists_once() {
    let local = Arc::new(LocalStore::new());
    let store = Arc::new(YieldingStore {
        inner: local.clone(),
    });
    let h = harness_with(store, local, at(2, 10, 0)).await;

    let req = request(None);
    let (a, b) = tokio::join!(h.coordinator.redeem(&req), h.coordinator.redeem(&req));

    assert_eq!(h.store.visit_count(), 1);
    let successes = [&a, &b].iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, 1);
    for outcome in [a, b] {
        if let Err(e) = outcome {
            assert!(matches!(
                e,
                RevisitError::TooSoon { .. } | RevisitError::TransientConflict(_)
            ));
        }
    }
}

#[tokio::test]
async fn test_zero_cooldown_venue_still_persists_once() {
    let local = Arc::new(LocalStore::new());
    let store = Arc::new(YieldingStore {
        inner: local.clone(),
    });
    let h = harness_with(store, local, at(2, 10, 0)).await;
    let mut venue = VenueRecord::new(VENUE, "Corner Cafe");
    venue.tiers = serde_json::from_value(json!({ "safetyCooldownHours": 0 })).unwrap();
    h.store.put_venue(venue).await.unwrap();

    let req = request(None);
    let (a, b) = tokio::join!(h.coordinator.redeem(&req), h.coordinator.redeem(&req));
    assert_eq!([&a, &b].iter().filter(|r| r.is_ok()).count(), 1);
    assert_eq!(h.store.visit_count(), 1);

    let again = h.coordinator.redeem(&req).await;
    assert!(matches!(
        again,
        Err(RevisitError::TooSoon { retry_after_secs }) if retry_after_secs == 12 * 3600
    ));
    assert_eq!(h.store.visit_count(), 1);
}

// ─── Retries ────────────────────────────────────────────────────────────────

/// Reports a conflict for the first `conflicts` appends.
struct ConflictingStore {
    inner: Arc<LocalStore>,
    conflicts: AtomicU32,
}

#[async_trait]
impl RewardStore for ConflictingStore {
    async fn venue(&self, venue_id: &str) -> RevisitResult<VenueRecord> {
        self.inner.venue(venue_id).await
    }
    async fn put_venue(&self, venue: VenueRecord) -> RevisitResult<()> {
        self.inner.put_venue(venue).await
    }
    async fn history(&self, guest_id: &str, venue_id: &str) -> RevisitResult<GuestHistory> {
        self.inner.history(guest_id, venue_id).await
    }
    async fn append_visit(&self, v: u64, record: VisitRecord) -> RevisitResult<AppendOutcome> {
        let remaining = self.conflicts.load(Ordering::SeqCst);
        if remaining > 0 {
            self.conflicts.store(remaining - 1, Ordering::SeqCst);
            return Ok(AppendOutcome::Conflict);
        }
        self.inner.append_visit(v, record).await
    }
    async fn visit(&self, visit_id: &str) -> RevisitResult<VisitRecord> {
        self.inner.visit(visit_id).await
    }
    async fn confirm_visit(&self, id: &str, at: DateTime<Utc>) -> RevisitResult<VisitRecord> {
        self.inner.confirm_visit(id, at).await
    }
    async fn venue_stats(&self, venue_id: &str) -> RevisitResult<VenueStats> {
        self.inner.venue_stats(venue_id).await
    }
    async fn guest_stats(&self, guest_id: &str) -> RevisitResult<GuestStats> {
        self.inner.guest_stats(guest_id).await
    }
}

#[tokio::test]
async fn test_conflict_is_retried_once() {
    let local = Arc::new(LocalStore::new());
    let store = Arc::new(ConflictingStore {
        inner: local.clone(),
        conflicts: AtomicU32::new(1),
    });
    let h = harness_with(store, local, at(2, 10, 0)).await;

    let receipt = h.coordinator.redeem(&request(None)).await.unwrap();
    assert_eq!(receipt.discount_percent, 5);
    assert_eq!(h.store.visit_count(), 1);
}

#[tokio::test]
async fn test_persistent_conflict_surfaces_without_partial_write() {
    let local = Arc::new(LocalStore::new());
    let store = Arc::new(ConflictingStore {
        inner: local.clone(),
        conflicts: AtomicU32::new(5),
    });
    let h = harness_with(store, local, at(2, 10, 0)).await;

    assert!(matches!(
        h.coordinator.redeem(&request(None)).await,
        Err(RevisitError::TransientConflict(_))
    ));
    assert_eq!(h.store.visit_count(), 0);
}

// ─── History provider ───────────────────────────────────────────────────────

struct UnknownGuestProvider;

#[async_trait]
impl VisitHistoryProvider for UnknownGuestProvider {
    async fn resolve(
        &self,
        guest_id: &str,
        _venue_id: &str,
        _before: DateTime<Utc>,
    ) -> RevisitResult<Option<DateTime<Utc>>> {
        Err(RevisitError::NotFound(format!("guest {guest_id}")))
    }
}

struct BrokenProvider;

#[async_trait]
impl VisitHistoryProvider for BrokenProvider {
    async fn resolve(
        &self,
        _guest_id: &str,
        _venue_id: &str,
        _before: DateTime<Utc>,
    ) -> RevisitResult<Option<DateTime<Utc>>> {
        Err(RevisitError::Internal(anyhow::anyhow!("index unavailable")))
    }
}

#[tokio::test]
async fn test_history_not_found_means_no_prior_visit() {
    let h = harness(at(1, 10, 0)).await;
    h.coordinator.redeem(&request(None)).await.unwrap();

    let coordinator = RedemptionCoordinator::new(
        h.store.clone(),
        h.clock.clone(),
        RewardsConfig::default(),
    )
    .with_history_provider(Arc::new(UnknownGuestProvider));
    h.clock.set(at(2, 10, 0));
    let receipt = coordinator.redeem(&request(None)).await.unwrap();
    assert_eq!(receipt.status_label, "initial");
}

#[tokio::test]
async fn test_history_failure_propagates() {
    let h = harness(at(1, 10, 0)).await;
    let coordinator = RedemptionCoordinator::new(
        h.store.clone(),
        h.clock.clone(),
        RewardsConfig::default(),
    )
    .with_history_provider(Arc::new(BrokenProvider));
    assert!(matches!(
        coordinator.redeem(&request(None)).await,
        Err(RevisitError::Internal(_))
    ));
    assert_eq!(h.store.visit_count(), 0);
    assert_eq!(h.clock.now(), at(1, 10, 0));
}
