//! Redis-backed store. Visit history lives in one list per guest and venue;
//! compare-and-append and confirmation run as Lua scripts so each write is
//! a single atomic step on the server.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use revisit_core::config::RedisConfig;
use revisit_core::rewards::{
    AppendOutcome, GuestHistory, GuestStats, VenueRecord, VenueStats, VisitRecord, VisitStatus,
};
use revisit_core::{RevisitError, RevisitResult, RewardStore};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};

const APPEND_SCRIPT: &str = r"
if redis.call('LLEN', KEYS[1]) ~= tonumber(ARGV[1]) then
    return 0
end
redis.call('RPUSH', KEYS[1], ARGV[2])
redis.call('SET', KEYS[2], ARGV[3])
return 1
";

const CONFIRM_SCRIPT: &str = r"
if redis.call('LINDEX', KEYS[1], ARGV[1]) ~= ARGV[2] then
    return 0
end
redis.call('LSET', KEYS[1], ARGV[1], ARGV[3])
redis.call('HINCRBY', KEYS[2], 'total_checkins', 1)
redis.call('HINCRBY', KEYS[2], 'd:' .. ARGV[4], 1)
redis.call('HINCRBY', KEYS[3], 'total_visits', 1)
redis.call('HSET', KEYS[3], 'last_seen', ARGV[5])
return 1
";

/// Redis store for multi-node deployments.
pub struct RedisStore {
    conn: ConnectionManager,
    prefix: String,
    append: Script,
    confirm: Script,
}

fn storage(e: redis::RedisError) -> RevisitError {
    metrics::counter!("store.redis.errors").increment(1);
    RevisitError::Storage(e.to_string())
}

impl RedisStore {
    /// Connect to the first configured Redis node.
    pub async fn new(config: &RedisConfig) -> anyhow::Result<Self> {
        let url = config
            .urls
            .first()
            .cloned()
            .unwrap_or_else(|| "redis://localhost:6379".to_string());

        info!(url = %url, "Connecting to Redis");

        let client = redis::Client::open(url.as_str())?;
        let mut conn = tokio::time::timeout(
            Duration::from_millis(config.connect_timeout_ms),
            ConnectionManager::new(client),
        )
        .await??;

        // Verify connectivity
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        info!(response = %pong, "Redis connection established");

        Ok(Self {
            conn,
            prefix: config.key_prefix.clone(),
            append: Script::new(APPEND_SCRIPT),
            confirm: Script::new(CONFIRM_SCRIPT),
        })
    }

    fn venue_key(&self, venue_id: &str) -> String {
        format!("{}:venue:{venue_id}", self.prefix)
    }

    fn history_key(&self, guest_id: &str, venue_id: &str) -> String {
        format!("{}:visits:{venue_id}:{guest_id}", self.prefix)
    }

    fn visit_key(&self, visit_id: &str) -> String {
        format!("{}:visit:{visit_id}", self.prefix)
    }

    fn venue_stats_key(&self, venue_id: &str) -> String {
        format!("{}:venue_stats:{venue_id}", self.prefix)
    }

    fn guest_stats_key(&self, guest_id: &str) -> String {
        format!("{}:guest_stats:{guest_id}", self.prefix)
    }

    /// Locate a visit: its history list key, position, and raw JSON.
    async fn locate(&self, visit_id: &str) -> RevisitResult<(String, i64, String)> {
        let mut conn = self.conn.clone();
        let pointer: Option<String> = conn.get(self.visit_key(visit_id)).await.map_err(storage)?;
        let pointer = pointer.ok_or_else(|| RevisitError::NotFound(format!("visit {visit_id}")))?;
        let (index, list_key) = pointer
            .split_once('|')
            .and_then(|(i, k)| i.parse::<i64>().ok().map(|i| (i, k.to_string())))
            .ok_or_else(|| RevisitError::Storage(format!("corrupt visit pointer for {visit_id}")))?;

        let raw: Option<String> = conn.lindex(&list_key, index as isize).await.map_err(storage)?;
        let raw = raw.ok_or_else(|| RevisitError::NotFound(format!("visit {visit_id}")))?;
        Ok((list_key, index, raw))
    }
}

#[async_trait]
impl RewardStore for RedisStore {
    async fn venue(&self, venue_id: &str) -> RevisitResult<VenueRecord> {
        let mut conn = self.conn.clone();
        let data: Option<String> = conn.get(self.venue_key(venue_id)).await.map_err(storage)?;
        match data {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Err(RevisitError::VenueNotFound(venue_id.to_string())),
        }
    }

    async fn put_venue(&self, venue: VenueRecord) -> RevisitResult<()> {
        let json = serde_json::to_string(&venue)?;
        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(self.venue_key(&venue.venue_id), json)
            .await
            .map_err(storage)?;
        debug!(venue_id = %venue.venue_id, "Venue stored");
        Ok(())
    }

    async fn history(&self, guest_id: &str, venue_id: &str) -> RevisitResult<GuestHistory> {
        let mut conn = self.conn.clone();
        let raw: Vec<String> = conn
            .lrange(self.history_key(guest_id, venue_id), 0, -1)
            .await
            .map_err(storage)?;
        if raw.is_empty() {
            return Err(RevisitError::NotFound(format!(
                "guest {guest_id} has no visits at {venue_id}"
            )));
        }
        let records = raw
            .iter()
            .map(|json| serde_json::from_str::<VisitRecord>(json))
            .collect::<Result<Vec<_>, _>>()?;
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
        let list_key = self.history_key(&record.guest_id, &record.venue_id);
        let json = serde_json::to_string(&record)?;
        let pointer = format!("{expected_version}|{list_key}");

        let mut conn = self.conn.clone();
        let appended: i64 = self
            .append
            .key(&list_key)
            .key(self.visit_key(&record.visit_id))
            .arg(expected_version)
            .arg(json)
            .arg(pointer)
            .invoke_async(&mut conn)
            .await
            .map_err(storage)?;

        Ok(if appended == 1 {
            AppendOutcome::Appended
        } else {
            AppendOutcome::Conflict
        })
    }

    async fn visit(&self, visit_id: &str) -> RevisitResult<VisitRecord> {
        let (_, _, raw) = self.locate(visit_id).await?;
        Ok(serde_json::from_str(&raw)?)
    }

    async fn confirm_visit(
        &self,
        visit_id: &str,
        confirmed_at: DateTime<Utc>,
    ) -> RevisitResult<VisitRecord> {
        let (list_key, index, raw) = self.locate(visit_id).await?;
        let mut record: VisitRecord = serde_json::from_str(&raw)?;
        if record.status != VisitStatus::Pending {
            return Err(RevisitError::InvalidTransition(format!(
                "visit {visit_id} is already {:?}",
                record.status
            )));
        }
        record.status = VisitStatus::Confirmed;
        record.confirmed_at = Some(confirmed_at);
        let updated = serde_json::to_string(&record)?;

        let mut conn = self.conn.clone();
        let applied: i64 = self
            .confirm
            .key(&list_key)
            .key(self.venue_stats_key(&record.venue_id))
            .key(self.guest_stats_key(&record.guest_id))
            .arg(index)
            .arg(raw)
            .arg(updated)
            .arg(record.applied_discount)
            .arg(confirmed_at.to_rfc3339())
            .invoke_async(&mut conn)
            .await
            .map_err(storage)?;

        if applied == 1 {
            Ok(record)
        } else {
            Err(RevisitError::TransientConflict(format!(
                "visit {visit_id} changed during confirmation"
            )))
        }
    }

    async fn venue_stats(&self, venue_id: &str) -> RevisitResult<VenueStats> {
        let mut conn = self.conn.clone();
        let fields: HashMap<String, String> = conn
            .hgetall(self.venue_stats_key(venue_id))
            .await
            .map_err(storage)?;

        let mut stats = VenueStats {
            venue_id: venue_id.to_string(),
            ..Default::default()
        };
        for (field, value) in fields {
            let Ok(count) = value.parse::<u64>() else {
                continue;
            };
            if field == "total_checkins" {
                stats.total_checkins = count;
            } else if let Some(Ok(discount)) = field.strip_prefix("d:").map(str::parse::<u8>) {
                stats.discount_distribution.insert(discount, count);
            }
        }
        Ok(stats)
    }

    async fn guest_stats(&self, guest_id: &str) -> RevisitResult<GuestStats> {
        let mut conn = self.conn.clone();
        let fields: HashMap<String, String> = conn
            .hgetall(self.guest_stats_key(guest_id))
            .await
            .map_err(storage)?;

        Ok(GuestStats {
            guest_id: guest_id.to_string(),
            total_visits: fields
                .get("total_visits")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
            last_seen: fields
                .get("last_seen")
                .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
                .map(|t| t.with_timezone(&Utc)),
        })
    }
}
