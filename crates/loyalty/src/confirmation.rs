//! Staff confirmation of a pending visit (`pending -> confirmed`).
//!
//! Confirmation only flips the status and bumps aggregates using the
//! discount snapshotted at redemption time. The engine is not consulted.

use crate::clock::ClockSource;
use revisit_core::rewards::VisitRecord;
use revisit_core::{RevisitResult, RewardStore};
use std::sync::Arc;
use tracing::{info, warn};

pub struct ConfirmationHandler {
    store: Arc<dyn RewardStore>,
    clock: Arc<dyn ClockSource>,
    max_attempts: u32,
}

impl ConfirmationHandler {
    pub fn new(store: Arc<dyn RewardStore>, clock: Arc<dyn ClockSource>, max_attempts: u32) -> Self {
        Self {
            store,
            clock,
            max_attempts: max_attempts.max(1),
        }
    }

    pub async fn confirm(&self, visit_id: &str) -> RevisitResult<VisitRecord> {
        let mut attempt = 1;
        loop {
            match self.store.confirm_visit(visit_id, self.clock.now()).await {
                Ok(record) => {
                    metrics::counter!(
                        "rewards.confirmations",
                        "discount" => record.applied_discount.to_string()
                    )
                    .increment(1);
                    info!(
                        visit_id = visit_id,
                        guest_id = %record.guest_id,
                        venue_id = %record.venue_id,
                        discount = record.applied_discount,
                        "Visit confirmed"
                    );
                    return Ok(record);
                }
                Err(e) if e.is_transient() && attempt < self.max_attempts => {
                    warn!(visit_id = visit_id, attempt = attempt, error = %e, "Confirmation failed, retrying");
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
