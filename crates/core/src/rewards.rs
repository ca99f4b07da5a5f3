//! Reward domain types — venue tier configuration, append-only visit history,
//! and the derived reward state.
//!
//! A guest's discount is never stored as "current tier". It is re-derived on
//! every query from the last qualifying visit, the current time, and the
//! venue's [`TierConfig`]. Only the discount granted at redemption time is
//! persisted, as an immutable snapshot on the [`VisitRecord`].

use chrono::{DateTime, Duration, FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

// ─── Tier Configuration ─────────────────────────────────────────────────────

pub const DEFAULT_SAFETY_COOLDOWN_HOURS: u32 = 12;
pub const DEFAULT_VIP_WINDOW_HOURS: u32 = 48;
pub const DEFAULT_TIER1_DECAY_HOURS: u32 = 72;
pub const DEFAULT_TIER2_DECAY_HOURS: u32 = 168;
pub const DEFAULT_PERC_BASE: u8 = 5;
pub const DEFAULT_PERC_VIP: u8 = 20;
pub const DEFAULT_PERC_DECAY1: u8 = 15;
pub const DEFAULT_PERC_DECAY2: u8 = 10;

/// Widest real-world UTC offset (UTC+14 / UTC-12 rounded up).
pub const MAX_UTC_OFFSET_MINUTES: i32 = 14 * 60;

/// How elapsed time is mapped onto tiers.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum DecayModel {
    /// Tiers follow venue-local calendar days since the qualifying visit.
    #[default]
    CalendarDay,
    /// Tiers follow raw elapsed hours against the configured thresholds.
    ElapsedHours,
}

/// Validated, immutable per-venue tier configuration.
///
/// Always satisfies `perc_vip >= perc_decay1 >= perc_decay2 >= perc_base`
/// and `vip_window_hours <= tier1_decay_hours <= tier2_decay_hours` once it
/// has passed through [`TierConfig::normalized`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TierConfig {
    pub safety_cooldown_hours: u32,
    pub vip_window_hours: u32,
    pub tier1_decay_hours: u32,
    pub tier2_decay_hours: u32,
    pub perc_base: u8,
    pub perc_vip: u8,
    pub perc_decay1: u8,
    pub perc_decay2: u8,
    /// Offset of the venue's local calendar from UTC.
    pub utc_offset_minutes: i32,
    pub decay_model: DecayModel,
}

impl Default for TierConfig {
    fn default() -> Self {
        Self {
            safety_cooldown_hours: DEFAULT_SAFETY_COOLDOWN_HOURS,
            vip_window_hours: DEFAULT_VIP_WINDOW_HOURS,
            tier1_decay_hours: DEFAULT_TIER1_DECAY_HOURS,
            tier2_decay_hours: DEFAULT_TIER2_DECAY_HOURS,
            perc_base: DEFAULT_PERC_BASE,
            perc_vip: DEFAULT_PERC_VIP,
            perc_decay1: DEFAULT_PERC_DECAY1,
            perc_decay2: DEFAULT_PERC_DECAY2,
            utc_offset_minutes: 0,
            decay_model: DecayModel::CalendarDay,
        }
    }
}

impl TierConfig {
    /// Repair ordering so the tier invariants hold. Percentages are clamped
    /// downward from `perc_vip`, thresholds upward from `vip_window_hours`.
    /// The cooldown is never zero.
    pub fn normalized(mut self) -> Self {
        if self.safety_cooldown_hours == 0 {
            self.safety_cooldown_hours = DEFAULT_SAFETY_COOLDOWN_HOURS;
        }
        self.perc_vip = self.perc_vip.min(100);
        self.perc_decay1 = self.perc_decay1.min(self.perc_vip);
        self.perc_decay2 = self.perc_decay2.min(self.perc_decay1);
        self.perc_base = self.perc_base.min(self.perc_decay2);
        self.tier1_decay_hours = self.tier1_decay_hours.max(self.vip_window_hours);
        self.tier2_decay_hours = self.tier2_decay_hours.max(self.tier1_decay_hours);
        self.utc_offset_minutes = self
            .utc_offset_minutes
            .clamp(-MAX_UTC_OFFSET_MINUTES, MAX_UTC_OFFSET_MINUTES);
        self
    }

    pub fn is_normalized(&self) -> bool {
        *self == self.normalized()
    }

    /// The venue-local calendar used for day alignment.
    pub fn local_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes * 60).unwrap_or_else(|| Utc.fix())
    }

    pub fn safety_cooldown(&self) -> Duration {
        Duration::hours(i64::from(self.safety_cooldown_hours))
    }
}

/// Venue tier configuration exactly as found in the venue document.
///
/// Every field is optional and loosely typed: numbers and numeric strings
/// are accepted, anything else counts as invalid and falls back to the
/// hard-coded default during [`RawTierConfig::sanitize`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RawTierConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub safety_cooldown_hours: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vip_window_hours: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier1_decay_hours: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier2_decay_hours: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub perc_base: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub perc_vip: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub perc_decay1: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub perc_decay2: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub utc_offset_minutes: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decay_model: Option<Value>,
}

/// Outcome of sanitizing a [`RawTierConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SanitizedTiers {
    pub config: TierConfig,
    /// Fields replaced by their default, plus `"ordering"` if the tier
    /// invariants had to be repaired.
    pub replaced: Vec<&'static str>,
}

impl SanitizedTiers {
    pub fn is_clean(&self) -> bool {
        self.replaced.is_empty()
    }
}

impl RawTierConfig {
    /// Produce a valid [`TierConfig`]. Never fails.
    pub fn sanitize(&self) -> TierConfig {
        self.sanitize_report().config
    }

    /// Like [`RawTierConfig::sanitize`], also listing what was defaulted.
    pub fn sanitize_report(&self) -> SanitizedTiers {
        let defaults = TierConfig::default();
        let mut replaced = Vec::new();

        let mut pick = |name: &'static str, parsed: Option<u32>, fallback: u32| -> u32 {
            parsed.unwrap_or_else(|| {
                replaced.push(name);
                fallback
            })
        };

        let safety_cooldown_hours = pick(
            "safetyCooldownHours",
            cooldown_field(self.safety_cooldown_hours.as_ref()),
            defaults.safety_cooldown_hours,
        );
        let vip_window_hours = pick(
            "vipWindowHours",
            hours_field(self.vip_window_hours.as_ref()),
            defaults.vip_window_hours,
        );
        let tier1_decay_hours = pick(
            "tier1DecayHours",
            hours_field(self.tier1_decay_hours.as_ref()),
            defaults.tier1_decay_hours,
        );
        let tier2_decay_hours = pick(
            "tier2DecayHours",
            hours_field(self.tier2_decay_hours.as_ref()),
            defaults.tier2_decay_hours,
        );
        let perc_base = pick(
            "percBase",
            percent_field(self.perc_base.as_ref()),
            u32::from(defaults.perc_base),
        );
        let perc_vip = pick(
            "percVip",
            percent_field(self.perc_vip.as_ref()),
            u32::from(defaults.perc_vip),
        );
        let perc_decay1 = pick(
            "percDecay1",
            percent_field(self.perc_decay1.as_ref()),
            u32::from(defaults.perc_decay1),
        );
        let perc_decay2 = pick(
            "percDecay2",
            percent_field(self.perc_decay2.as_ref()),
            u32::from(defaults.perc_decay2),
        );

        // Optional extensions: absence is normal and not reported.
        let utc_offset_minutes = match &self.utc_offset_minutes {
            None => 0,
            Some(v) => offset_field(v).unwrap_or_else(|| {
                replaced.push("utcOffsetMinutes");
                0
            }),
        };
        let decay_model = match &self.decay_model {
            None => DecayModel::CalendarDay,
            Some(v) => serde_json::from_value::<DecayModel>(v.clone()).unwrap_or_else(|_| {
                replaced.push("decayModel");
                DecayModel::CalendarDay
            }),
        };

        let config = TierConfig {
            safety_cooldown_hours,
            vip_window_hours,
            tier1_decay_hours,
            tier2_decay_hours,
            perc_base: clamp_percent(perc_base),
            perc_vip: clamp_percent(perc_vip),
            perc_decay1: clamp_percent(perc_decay1),
            perc_decay2: clamp_percent(perc_decay2),
            utc_offset_minutes,
            decay_model,
        };

        let normalized = config.normalized();
        if normalized != config {
            replaced.push("ordering");
        }

        SanitizedTiers {
            config: normalized,
            replaced,
        }
    }
}

impl From<TierConfig> for RawTierConfig {
    fn from(config: TierConfig) -> Self {
        Self {
            safety_cooldown_hours: Some(config.safety_cooldown_hours.into()),
            vip_window_hours: Some(config.vip_window_hours.into()),
            tier1_decay_hours: Some(config.tier1_decay_hours.into()),
            tier2_decay_hours: Some(config.tier2_decay_hours.into()),
            perc_base: Some(config.perc_base.into()),
            perc_vip: Some(config.perc_vip.into()),
            perc_decay1: Some(config.perc_decay1.into()),
            perc_decay2: Some(config.perc_decay2.into()),
            utc_offset_minutes: Some(config.utc_offset_minutes.into()),
            decay_model: serde_json::to_value(config.decay_model).ok(),
        }
    }
}

fn numeric(value: Option<&Value>) -> Option<f64> {
    let parsed = match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|v| v.is_finite())
}

fn hours_field(value: Option<&Value>) -> Option<u32> {
    numeric(value)
        .filter(|v| *v >= 0.0 && *v <= f64::from(u32::MAX))
        .map(|v| v.round() as u32)
}

// A zero cooldown would let one scan persist twice, so it counts as unset.
fn cooldown_field(value: Option<&Value>) -> Option<u32> {
    hours_field(value).filter(|hours| *hours > 0)
}

fn percent_field(value: Option<&Value>) -> Option<u32> {
    numeric(value)
        .filter(|v| (0.0..=100.0).contains(v))
        .map(|v| v.round() as u32)
}

fn offset_field(value: &Value) -> Option<i32> {
    numeric(Some(value))
        .filter(|v| v.abs() <= f64::from(MAX_UTC_OFFSET_MINUTES))
        .map(|v| v.round() as i32)
}

fn clamp_percent(value: u32) -> u8 {
    value.min(100) as u8
}

// ─── Reward State ───────────────────────────────────────────────────────────

/// Tier a guest currently sits in.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum RewardStatus {
    /// No prior visit at this venue.
    Initial,
    /// Prior visit falls on the same day (or too recent to upgrade).
    Active,
    Vip,
    Decay1,
    Decay2,
    /// Prior visit is too old; back to the base discount.
    Reset,
    /// Write path only: a new redemption is blocked by the cooldown guard.
    CooldownLocked,
}

impl RewardStatus {
    pub fn label(&self) -> &'static str {
        match self {
            RewardStatus::Initial => "initial",
            RewardStatus::Active => "active",
            RewardStatus::Vip => "vip",
            RewardStatus::Decay1 => "decay1",
            RewardStatus::Decay2 => "decay2",
            RewardStatus::Reset => "reset",
            RewardStatus::CooldownLocked => "cooldown-locked",
        }
    }
}

impl std::fmt::Display for RewardStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Derived, ephemeral view of a guest's reward. Never persisted.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RewardState {
    pub discount_percent: u8,
    pub status: RewardStatus,
    /// Seconds until the displayed discount next decreases; 0 if it cannot.
    pub seconds_until_decay: u64,
    /// Seconds until the next venue-local midnight.
    pub seconds_until_next_tier_boundary: u64,
    pub is_locked: bool,
}

// ─── Venues ─────────────────────────────────────────────────────────────────

/// Venue document as held by the store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VenueRecord {
    pub venue_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub subscription_expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tiers: RawTierConfig,
}

fn default_true() -> bool {
    true
}

impl VenueRecord {
    pub fn new(venue_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            venue_id: venue_id.into(),
            name: name.into(),
            active: true,
            subscription_expires_at: None,
            tiers: RawTierConfig::default(),
        }
    }

    /// Tier document that governs this venue: its own, or `defaults` when
    /// the venue carries none. Every consumer resolves tiers through here.
    pub fn effective_tiers<'a>(&'a self, defaults: &'a RawTierConfig) -> &'a RawTierConfig {
        if self.tiers == RawTierConfig::default() {
            defaults
        } else {
            &self.tiers
        }
    }

    /// Reason the venue may not grant rewards at `now`, if any.
    pub fn access_denial(&self, now: DateTime<Utc>) -> Option<String> {
        if !self.active {
            return Some(format!("venue {} is inactive", self.venue_id));
        }
        match self.subscription_expires_at {
            Some(expires) if expires <= now => Some(format!(
                "subscription for venue {} expired at {}",
                self.venue_id,
                expires.to_rfc3339()
            )),
            _ => None,
        }
    }
}

// ─── Visit History ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum VisitStatus {
    Pending,
    Confirmed,
}

/// One redemption at a venue. Append-only; only `status` and
/// `confirmed_at` change, exactly once, on confirmation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VisitRecord {
    pub visit_id: String,
    pub guest_id: String,
    pub venue_id: String,
    pub occurred_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub status: VisitStatus,
    /// Discount granted at creation. Immutable.
    pub applied_discount: u8,
    /// Tier that produced `applied_discount`.
    pub applied_status: RewardStatus,
    #[serde(default)]
    pub idempotency_key: Option<String>,
    #[serde(default)]
    pub confirmed_at: Option<DateTime<Utc>>,
}

/// A guest's visits at one venue plus the version used for compare-and-append.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GuestHistory {
    pub records: Vec<VisitRecord>,
    pub version: u64,
}

impl GuestHistory {
    /// Creation time of the newest record, for the cooldown guard.
    pub fn latest_created_at(&self) -> Option<DateTime<Utc>> {
        self.records.iter().map(|r| r.created_at).max()
    }

    /// Most recent visit strictly before `cutoff`.
    pub fn latest_before(&self, cutoff: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.records
            .iter()
            .map(|r| r.occurred_at)
            .filter(|t| *t < cutoff)
            .max()
    }

    pub fn find_by_key(&self, key: &str) -> Option<&VisitRecord> {
        self.records
            .iter()
            .find(|r| r.idempotency_key.as_deref() == Some(key))
    }
}

/// Result of a compare-and-append against the visit history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Appended,
    /// The history changed since it was read; nothing was written.
    Conflict,
}

// ─── Aggregates ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VenueStats {
    pub venue_id: String,
    pub total_checkins: u64,
    /// Confirmed visits keyed by applied discount percentage.
    pub discount_distribution: BTreeMap<u8, u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GuestStats {
    pub guest_id: String,
    pub total_visits: u64,
    pub last_seen: Option<DateTime<Utc>>,
}

impl VenueStats {
    pub fn record(&mut self, applied_discount: u8) {
        self.total_checkins += 1;
        *self.discount_distribution.entry(applied_discount).or_insert(0) += 1;
    }
}

impl GuestStats {
    pub fn record(&mut self, seen_at: DateTime<Utc>) {
        self.total_visits += 1;
        self.last_seen = Some(seen_at);
    }
}

// ─── Redemption API ─────────────────────────────────────────────────────────

/// Request to redeem a reward at a venue.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedeemRequest {
    /// Authenticated guest; `None` when the caller has no session.
    #[serde(default)]
    pub guest_id: Option<String>,
    pub venue_id: String,
    /// One key per scan event; repeats return the original snapshot.
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

/// Result of a successful redemption.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RedemptionReceipt {
    pub visit_id: String,
    pub guest_id: String,
    pub venue_id: String,
    pub discount_percent: u8,
    pub status_label: String,
    /// True when an earlier redemption with the same idempotency key was returned.
    pub replayed: bool,
    /// Full engine output; absent on replays since states are never stored.
    pub state: Option<RewardState>,
}
