//! Reward decay engine: turns (prior visit, now, venue tiers) into the
//! discount a guest is entitled to and when that discount will change.
//!
//! Every function here is pure and total. The authoritative redemption
//! path and the client-side preview both call [`RewardDecayEngine::assess`],
//! so the number shown before a claim is the number persisted at claim time.

use chrono::{DateTime, Days, Duration, FixedOffset, NaiveDate, NaiveTime, Utc};
use revisit_core::rewards::{DecayModel, RawTierConfig, RewardState, RewardStatus, TierConfig};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Bumped whenever tier selection or boundary timing changes.
pub const ENGINE_VERSION: &str = "calendar-day/2";

const SECONDS_PER_HOUR: i64 = 3600;

/// Everything the engine needs to know about a guest at one venue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RewardInputs {
    /// Qualifying visit that anchors decay: the latest visit before today.
    pub prior_visit: Option<DateTime<Utc>>,
    /// Creation time of the guest's newest visit record, for the cooldown guard.
    pub last_claim_at: Option<DateTime<Utc>>,
    pub now: DateTime<Utc>,
}

impl RewardInputs {
    /// Derive inputs from the guest's visit timestamps at a venue.
    pub fn from_visits<I>(visits: I, now: DateTime<Utc>, config: &TierConfig) -> Self
    where
        I: IntoIterator<Item = DateTime<Utc>>,
    {
        let cutoff = RewardDecayEngine::day_start(now, config);
        let mut prior_visit = None;
        let mut last_claim_at: Option<DateTime<Utc>> = None;
        for visit in visits {
            if visit < cutoff && prior_visit.map_or(true, |p| visit > p) {
                prior_visit = Some(visit);
            }
            if last_claim_at.map_or(true, |l| visit > l) {
                last_claim_at = Some(visit);
            }
        }
        Self {
            prior_visit,
            last_claim_at,
            now,
        }
    }
}

/// Stateless temporal reward state machine.
pub struct RewardDecayEngine;

impl RewardDecayEngine {
    /// Turn a venue's raw tier document into a usable configuration,
    /// defaulting anything missing or malformed.
    pub fn resolve_config(raw: &RawTierConfig) -> TierConfig {
        let report = raw.sanitize_report();
        if !report.is_clean() {
            metrics::counter!("rewards.config.sanitized").increment(1);
            warn!(
                replaced = ?report.replaced,
                "Tier configuration had invalid fields, defaults applied"
            );
        }
        report.config
    }

    /// Display state from a raw venue document. Never fails.
    pub fn compute(
        prior_visit: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
        config: &RawTierConfig,
    ) -> RewardState {
        Self::evaluate(prior_visit, now, &Self::resolve_config(config))
    }

    /// Display state from a resolved configuration.
    pub fn evaluate(
        prior_visit: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
        config: &TierConfig,
    ) -> RewardState {
        let config = config.normalized();
        let offset = config.local_offset();
        let next_boundary = seconds_between(now, next_midnight(now, offset));

        let Some(prior) = prior_visit else {
            return RewardState {
                discount_percent: config.perc_base,
                status: RewardStatus::Initial,
                seconds_until_decay: 0,
                seconds_until_next_tier_boundary: next_boundary,
                is_locked: false,
            };
        };

        let prior = if now < prior {
            debug!(
                prior = %prior,
                now = %now,
                "Prior visit is in the future, clamping elapsed time to zero"
            );
            now
        } else {
            prior
        };

        let (status, discount_percent, seconds_until_decay) = match config.decay_model {
            DecayModel::CalendarDay => calendar_tier(prior, now, &config, offset),
            DecayModel::ElapsedHours => elapsed_tier(prior, now, &config),
        };

        debug!(
            status = %status,
            discount = discount_percent,
            model = ?config.decay_model,
            "Reward evaluated"
        );

        RewardState {
            discount_percent,
            status,
            seconds_until_decay,
            seconds_until_next_tier_boundary: next_boundary,
            is_locked: false,
        }
    }

    /// Seconds left in the cooldown that follows the guest's last claim, if
    /// it is still running. A claim "in the future" counts as just made.
    pub fn cooldown_remaining(
        last_claim_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
        config: &TierConfig,
    ) -> Option<u64> {
        let last = last_claim_at?;
        let elapsed = (now - last).max(Duration::zero());
        let cooldown = config.normalized().safety_cooldown();
        if elapsed < cooldown {
            Some((cooldown - elapsed).num_seconds().max(1) as u64)
        } else {
            None
        }
    }

    /// Lock `state` if the cooldown guard is active. The displayed discount
    /// and timing are left as they are.
    pub fn apply_cooldown(
        state: RewardState,
        last_claim_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
        config: &TierConfig,
    ) -> RewardState {
        match Self::cooldown_remaining(last_claim_at, now, config) {
            Some(_) => RewardState {
                status: RewardStatus::CooldownLocked,
                is_locked: true,
                ..state
            },
            None => state,
        }
    }

    /// Full evaluation used by both redemption and preview.
    pub fn assess(inputs: &RewardInputs, config: &TierConfig) -> RewardState {
        let state = Self::evaluate(inputs.prior_visit, inputs.now, config);
        Self::apply_cooldown(state, inputs.last_claim_at, inputs.now, config)
    }

    /// Start of the venue-local day containing `now`.
    pub fn day_start(now: DateTime<Utc>, config: &TierConfig) -> DateTime<Utc> {
        let offset = config.normalized().local_offset();
        local_midnight(local_date(now, offset), offset)
    }
}

/// Tier by venue-local calendar days between the prior visit and now.
///
/// Each upgraded tier holds until the midnight that ends it: `vip` through
/// day 1, `decay1` through day 2, `decay2` through day 6.
fn calendar_tier(
    prior: DateTime<Utc>,
    now: DateTime<Utc>,
    config: &TierConfig,
    offset: FixedOffset,
) -> (RewardStatus, u8, u64) {
    let prior_date = local_date(prior, offset);
    let diff_days = (local_date(now, offset) - prior_date).num_days();

    let (status, discount, ends_after_day) = match diff_days {
        d if d <= 0 => (RewardStatus::Active, config.perc_base, None),
        1 => (RewardStatus::Vip, config.perc_vip, Some(2)),
        2 => (RewardStatus::Decay1, config.perc_decay1, Some(3)),
        3..=6 => (RewardStatus::Decay2, config.perc_decay2, Some(7)),
        _ => (RewardStatus::Reset, config.perc_base, None),
    };

    let seconds_until_decay = ends_after_day
        .map(|days| seconds_between(now, local_midnight(add_days(prior_date, days), offset)))
        .unwrap_or(0);

    (status, discount, seconds_until_decay)
}

/// Tier by raw elapsed hours against the configured thresholds.
fn elapsed_tier(prior: DateTime<Utc>, now: DateTime<Utc>, config: &TierConfig) -> (RewardStatus, u8, u64) {
    let elapsed = (now - prior).num_seconds().max(0);
    let threshold = |hours: u32| i64::from(hours) * SECONDS_PER_HOUR;
    let remaining = |limit: i64| (limit - elapsed).max(0) as u64;

    if elapsed < threshold(config.safety_cooldown_hours) {
        (RewardStatus::Active, config.perc_base, 0)
    } else if elapsed <= threshold(config.vip_window_hours) {
        (
            RewardStatus::Vip,
            config.perc_vip,
            remaining(threshold(config.vip_window_hours)),
        )
    } else if elapsed <= threshold(config.tier1_decay_hours) {
        (
            RewardStatus::Decay1,
            config.perc_decay1,
            remaining(threshold(config.tier1_decay_hours)),
        )
    } else if elapsed <= threshold(config.tier2_decay_hours) {
        (
            RewardStatus::Decay2,
            config.perc_decay2,
            remaining(threshold(config.tier2_decay_hours)),
        )
    } else {
        (RewardStatus::Reset, config.perc_base, 0)
    }
}

fn local_date(t: DateTime<Utc>, offset: FixedOffset) -> NaiveDate {
    t.with_timezone(&offset).date_naive()
}

// Fixed offsets have no DST gaps, so local midnight always maps to one instant.
fn local_midnight(date: NaiveDate, offset: FixedOffset) -> DateTime<Utc> {
    let local = date.and_time(NaiveTime::MIN);
    (local - Duration::seconds(i64::from(offset.local_minus_utc()))).and_utc()
}

fn next_midnight(now: DateTime<Utc>, offset: FixedOffset) -> DateTime<Utc> {
    local_midnight(add_days(local_date(now, offset), 1), offset)
}

fn add_days(date: NaiveDate, days: u64) -> NaiveDate {
    date.checked_add_days(Days::new(days)).unwrap_or(NaiveDate::MAX)
}

fn seconds_between(from: DateTime<Utc>, to: DateTime<Utc>) -> u64 {
    (to - from).num_seconds().max(0) as u64
}
