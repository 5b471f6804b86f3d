//! Key-value session store, Redis-backed.
//!
//! Keyspace: `session:<uuid>` (hash of metadata),
//! `session:<uuid>:messages` (list of JSON-encoded messages, newest-pushed-
//! first), `codebase:<uuid>:sessions` (set of session ids). All session
//! keys carry a TTL equal to the retention period, refreshed on every write.

use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use uuid::Uuid;

use crate::error::AppError;
use crate::model::{Message, Session};

pub struct SessionStore {
    conn: ConnectionManager,
    ttl_seconds: u64,
    timeout_seconds: i64,
}

fn ext_err(e: redis::RedisError) -> AppError {
    AppError::ExternalService { service: "redis", message: e.to_string() }
}

impl SessionStore {
    pub async fn connect(
        redis_url: &str,
        ttl_seconds: u64,
        timeout_seconds: u64,
    ) -> Result<Self, AppError> {
        let client = redis::Client::open(redis_url).map_err(ext_err)?;
        let conn = ConnectionManager::new(client).await.map_err(ext_err)?;
        Ok(SessionStore { conn, ttl_seconds, timeout_seconds: timeout_seconds as i64 })
    }

    fn session_key(id: Uuid) -> String {
        format!("session:{id}")
    }
    fn messages_key(id: Uuid) -> String {
        format!("session:{id}:messages")
    }
    fn codebase_index_key(codebase_id: Uuid) -> String {
        format!("codebase:{codebase_id}:sessions")
    }

    pub async fn create_session(&self, codebase_id: Uuid) -> Result<Session, AppError> {
        let session = Session::new(codebase_id);
        let mut conn = self.conn.clone();

        let session_key = Self::session_key(session.id);
        let codebase_key = Self::codebase_index_key(codebase_id);

        let () = redis::pipe()
            .hset(&session_key, "codebase_id", codebase_id.to_string())
            .ignore()
            .hset(&session_key, "created_at", session.created_at.to_rfc3339())
            .ignore()
            .hset(&session_key, "last_active", session.last_active.to_rfc3339())
            .ignore()
            .hset(&session_key, "message_count", 0)
            .ignore()
            .expire(&session_key, self.ttl_seconds as i64)
            .ignore()
            .sadd(&codebase_key, session.id.to_string())
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(ext_err)?;

        Ok(session)
    }

    pub async fn get_session(&self, id: Uuid) -> Result<Option<Session>, AppError> {
        let mut conn = self.conn.clone();
        let session_key = Self::session_key(id);
        let fields: Vec<(String, String)> = conn.hgetall(&session_key).await.map_err(ext_err)?;
        if fields.is_empty() {
            return Ok(None);
        }
        let mut codebase_id = None;
        let mut created_at = Utc::now();
        let mut last_active = Utc::now();
        let mut message_count = 0u32;
        for (k, v) in fields {
            match k.as_str() {
                "codebase_id" => codebase_id = Uuid::parse_str(&v).ok(),
                "created_at" => created_at = v.parse::<DateTime<Utc>>().unwrap_or(created_at),
                "last_active" => last_active = v.parse::<DateTime<Utc>>().unwrap_or(last_active),
                "message_count" => message_count = v.parse().unwrap_or(0),
                _ => {}
            }
        }
        let Some(codebase_id) = codebase_id else { return Ok(None) };

        let messages_key = Self::messages_key(id);
        let raw_messages: Vec<String> = conn.lrange(&messages_key, 0, -1).await.map_err(ext_err)?;
        let mut messages: Vec<Message> = raw_messages
            .iter()
            .filter_map(|m| serde_json::from_str(m).ok())
            .collect();
        messages.reverse(); // stored newest-pushed-first; callers want chronological order

        Ok(Some(Session { id, codebase_id, created_at, last_active, message_count, messages }))
    }

    /// Append a message, refreshing TTL on every write.
    pub async fn append_message(&self, session_id: Uuid, message: &Message) -> Result<(), AppError> {
        let mut conn = self.conn.clone();
        let session_key = Self::session_key(session_id);
        let messages_key = Self::messages_key(session_id);
        let encoded = serde_json::to_string(message)
            .map_err(|e| AppError::Internal(anyhow::anyhow!(e)))?;

        let () = redis::pipe()
            .lpush(&messages_key, encoded)
            .ignore()
            .expire(&messages_key, self.ttl_seconds as i64)
            .ignore()
            .hincr(&session_key, "message_count", 1)
            .ignore()
            .hset(&session_key, "last_active", Utc::now().to_rfc3339())
            .ignore()
            .expire(&session_key, self.ttl_seconds as i64)
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(ext_err)?;
        Ok(())
    }

    /// Last `limit` messages (newest-first storage means the head holds the
    /// most recent turns), used by the analyze node to load session history.
    pub async fn recent_messages(&self, session_id: Uuid, limit: usize) -> Result<Vec<Message>, AppError> {
        let mut conn = self.conn.clone();
        let messages_key = Self::messages_key(session_id);
        let raw: Vec<String> = conn
            .lrange(&messages_key, 0, (limit.max(1) - 1) as isize)
            .await
            .map_err(ext_err)?;
        let mut messages: Vec<Message> =
            raw.iter().filter_map(|m| serde_json::from_str(m).ok()).collect();
        messages.reverse();
        Ok(messages)
    }

    pub async fn delete_session(&self, id: Uuid, codebase_id: Uuid) -> Result<(), AppError> {
        let mut conn = self.conn.clone();
        let () = redis::pipe()
            .del(Self::session_key(id))
            .ignore()
            .del(Self::messages_key(id))
            .ignore()
            .srem(Self::codebase_index_key(codebase_id), id.to_string())
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(ext_err)?;
        Ok(())
    }

    /// Cascading delete target: deleting a codebase deletes every session
    /// in its index.
    pub async fn delete_all_for_codebase(&self, codebase_id: Uuid) -> Result<u64, AppError> {
        let mut conn = self.conn.clone();
        let codebase_key = Self::codebase_index_key(codebase_id);
        let session_ids: Vec<String> = conn.smembers(&codebase_key).await.map_err(ext_err)?;
        let mut removed = 0u64;
        for raw in &session_ids {
            if let Ok(id) = Uuid::parse_str(raw) {
                self.delete_session(id, codebase_id).await?;
                removed += 1;
            }
        }
        let () = conn.del(&codebase_key).await.map_err(ext_err)?;
        Ok(removed)
    }

    pub async fn list_sessions(&self, codebase_id: Uuid) -> Result<Vec<Uuid>, AppError> {
        let mut conn = self.conn.clone();
        let raw: Vec<String> = conn.smembers(Self::codebase_index_key(codebase_id)).await.map_err(ext_err)?;
        Ok(raw.iter().filter_map(|s| Uuid::parse_str(s).ok()).collect())
    }

    /// Cron companion activity: sweep `codebase:<id>:sessions` entries whose
    /// session body has already TTL-expired in Redis, or whose last activity
    /// is older than `session_timeout_seconds`. Returns the count removed,
    /// matching `cleanup_expired_sessions_activity`'s contract.
    pub async fn sweep_stale_index_entries(&self, codebase_id: Uuid) -> Result<u64, AppError> {
        let mut conn = self.conn.clone();
        let codebase_key = Self::codebase_index_key(codebase_id);
        let session_ids: Vec<String> = conn.smembers(&codebase_key).await.map_err(ext_err)?;
        let mut removed = 0u64;
        for raw in &session_ids {
            let Ok(id) = Uuid::parse_str(raw) else {
                let () = conn.srem(&codebase_key, raw).await.map_err(ext_err)?;
                removed += 1;
                continue;
            };
            let last_active: Option<String> =
                conn.hget(Self::session_key(id), "last_active").await.map_err(ext_err)?;
            let stale = match last_active {
                None => true,
                Some(raw_active) => match raw_active.parse::<DateTime<Utc>>() {
                    Ok(last_active) => {
                        (Utc::now() - last_active).num_seconds() > self.timeout_seconds
                    }
                    Err(_) => false,
                },
            };
            if stale {
                self.delete_session(id, codebase_id).await?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

// ---------------------------------------------------------------------------
// Per-IP rate limiter: token bucket state, keyed `limit:*`
// ---------------------------------------------------------------------------

pub struct RateLimiter {
    conn: ConnectionManager,
    per_hour: u32,
}

impl RateLimiter {
    pub fn new(conn: ConnectionManager, per_hour: u32) -> Self {
        RateLimiter { conn, per_hour }
    }

    /// Returns `true` if the request is allowed, incrementing the bucket.
    /// A simple fixed-window counter keyed by hour bucket and client IP.
    pub async fn check(&self, client_ip: &str, now_epoch_secs: u64) -> Result<bool, AppError> {
        let mut conn = self.conn.clone();
        let window = now_epoch_secs / 3600;
        let key = format!("limit:{client_ip}:{window}");
        let count: u32 = conn.incr(&key, 1).await.map_err(ext_err)?;
        if count == 1 {
            let () = conn.expire(&key, 3600).await.map_err(ext_err)?;
        }
        Ok(count <= self.per_hour)
    }
}

#[cfg(test)]
mod tests {
    // SessionStore requires a live Redis connection; covered by the
    // top-level integration tests instead of unit tests here.
}
