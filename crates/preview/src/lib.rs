#![warn(clippy::unwrap_used)]

//! Optimistic reward preview for guest-facing clients.
//!
//! Shows the discount a guest would get before they claim it. This crate
//! holds no tier logic of its own: it links the same engine the redemption
//! path uses and feeds it inputs derived the same way, so preview and
//! authority cannot disagree.
//!
//! Deployment: built into the guest app (or a WASM bundle) and called with
//! the guest's own visit timestamps and the venue's effective tier document,
//! see [`PreviewRequest::for_venue`].

use chrono::{DateTime, Utc};
use revisit_core::rewards::{RawTierConfig, RewardState, VenueRecord};
use revisit_loyalty::engine::{RewardDecayEngine, RewardInputs, ENGINE_VERSION};
use serde::{Deserialize, Serialize};

/// What the client knows about the guest at one venue.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewRequest {
    /// Every visit the guest has made at the venue, in any order.
    #[serde(default)]
    pub visits: Vec<DateTime<Utc>>,
    pub now: DateTime<Utc>,
    /// Effective venue tier document; missing fields use defaults.
    #[serde(default)]
    pub config: RawTierConfig,
}

impl PreviewRequest {
    /// Build a request from the venue document, resolving the tier fallback
    /// the same way the redemption path does.
    pub fn for_venue(
        venue: &VenueRecord,
        default_tiers: &RawTierConfig,
        visits: Vec<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            visits,
            now,
            config: venue.effective_tiers(default_tiers).clone(),
        }
    }
}

/// Preview shown to the guest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PreviewResponse {
    pub state: RewardState,
    pub status_label: String,
    /// False while the cooldown guard would reject a claim.
    pub can_redeem: bool,
    pub retry_after_secs: Option<u64>,
    /// Countdown to the next midnight, e.g. `"5h 07m"`.
    pub resets_in: String,
    pub engine_version: String,
}

/// Compute the preview for one venue.
pub fn preview(request: &PreviewRequest) -> PreviewResponse {
    let config = RewardDecayEngine::resolve_config(&request.config);
    let inputs = RewardInputs::from_visits(request.visits.iter().copied(), request.now, &config);
    let state = RewardDecayEngine::assess(&inputs, &config);
    let retry_after_secs =
        RewardDecayEngine::cooldown_remaining(inputs.last_claim_at, request.now, &config);

    PreviewResponse {
        state,
        status_label: state.status.label().to_string(),
        can_redeem: !state.is_locked,
        retry_after_secs,
        resets_in: format_countdown(state.seconds_until_next_tier_boundary),
        engine_version: ENGINE_VERSION.to_string(),
    }
}

/// JSON entry point for JS/WASM hosts.
pub fn preview_json(request_json: &str) -> Result<String, String> {
    let request: PreviewRequest =
        serde_json::from_str(request_json).map_err(|e| format!("Invalid preview request: {e}"))?;
    serde_json::to_string(&preview(&request)).map_err(|e| format!("Serialization failed: {e}"))
}

/// `"{h}h {mm}m"`, or `"{m}m"` under an hour.
pub fn format_countdown(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    if hours == 0 {
        format!("{minutes}m")
    } else {
        format!("{hours}h {minutes:02}m")
    }
}
