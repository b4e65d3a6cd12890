//! Redis-backed admission store.
//!
//! Shares admission sets across service instances. Each campaign maps to one
//! hash, `{key_prefix}{campaign_id}`, whose fields are user ids and whose
//! values are `{position}:{token}`: the position assigned on first arrival and
//! the token of the call that added the user.
//!
//! ## Atomicity
//!
//! The whole decision runs as one Lua script, which Redis executes without
//! interleaving other commands:
//! - look up the user's entry; it is new to the caller if the tokens match
//! - if absent, assign `HLEN + 1` and store it with the caller's token
//! - set the expiry if the key has none
//!
//! Positions therefore stay unique per campaign, and exactly one caller
//! observes `position == capacity`.
//!
//! ## Example
//!
//! ```rust,ignore
//! use campaign_admission::{AdmissionService, RedisAdmissionStore, RedisStoreConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = RedisAdmissionStore::connect_with_config(
//!         "redis://127.0.0.1/",
//!         RedisStoreConfig::default(),
//!     )
//!     .await
//!     .expect("Failed to connect to Redis");
//!
//!     let builder = AdmissionService::builder().with_store(Arc::new(store));
//! }
//! ```

use crate::application::error::StoreError;
use crate::application::ports::AdmissionStore;
use crate::domain::{
    campaign::{CampaignId, UserId},
    decision::{AdmissionEntry, ApplyToken, TryApplyResult},
};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, RedisError, Script};
use std::fmt;
use std::time::Duration;

const TRY_ADMIT_SCRIPT: &str = r#"
local entry = redis.call('HGET', KEYS[1], ARGV[1])
local is_new = 0
local position
if entry then
  local sep = string.find(entry, ':', 1, true)
  position = tonumber(string.sub(entry, 1, sep - 1))
  if string.sub(entry, sep + 1) == ARGV[3] then
    is_new = 1
  end
else
  position = redis.call('HLEN', KEYS[1]) + 1
  redis.call('HSET', KEYS[1], ARGV[1], position .. ':' .. ARGV[3])
  is_new = 1
end
if redis.call('PTTL', KEYS[1]) < 0 then
  redis.call('PEXPIRE', KEYS[1], ARGV[2])
end
return {is_new, position}
"#;

/// Configuration for the Redis admission store.
#[derive(Debug, Clone)]
pub struct RedisStoreConfig {
    /// Key prefix for admission sets (default: "apply:users:")
    pub key_prefix: String,
}

impl Default for RedisStoreConfig {
    fn default() -> Self {
        Self {
            key_prefix: "apply:users:".to_string(),
        }
    }
}

/// Admission store backed by one Redis hash per campaign.
#[derive(Clone)]
pub struct RedisAdmissionStore {
    connection: ConnectionManager,
    script: Script,
    config: RedisStoreConfig,
}

impl fmt::Debug for RedisAdmissionStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisAdmissionStore")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RedisAdmissionStore {
    /// Connect to Redis with default configuration.
    ///
    /// # Errors
    /// Returns error if connection fails.
    pub async fn connect(url: &str) -> Result<Self, RedisError> {
        Self::connect_with_config(url, RedisStoreConfig::default()).await
    }

    /// Connect to Redis with custom configuration.
    ///
    /// # Errors
    /// Returns error if connection fails.
    pub async fn connect_with_config(
        url: &str,
        config: RedisStoreConfig,
    ) -> Result<Self, RedisError> {
        let client = Client::open(url)?;
        let connection = ConnectionManager::new(client).await?;

        Ok(Self {
            connection,
            script: Script::new(TRY_ADMIT_SCRIPT),
            config,
        })
    }

    /// Redis key holding a campaign's admission set.
    pub fn key(&self, campaign_id: CampaignId) -> String {
        format!("{}{}", self.config.key_prefix, campaign_id)
    }

    /// Delete a campaign's admission set.
    ///
    /// # Errors
    /// Returns `StoreError` if Redis cannot be reached.
    pub async fn clear(&self, campaign_id: CampaignId) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        conn.del::<_, ()>(self.key(campaign_id))
            .await
            .map_err(store_error)
    }
}

/// Parse a stored `{position}:{token}` value.
fn parse_entry(raw: &str) -> Result<AdmissionEntry, StoreError> {
    let invalid = || StoreError::Protocol(format!("invalid admission entry {raw:?}"));
    let (position, token) = raw.split_once(':').ok_or_else(invalid)?;
    let position: u64 = position.parse().map_err(|_| invalid())?;
    let token: u64 = token.parse().map_err(|_| invalid())?;
    if position == 0 {
        return Err(invalid());
    }
    Ok(AdmissionEntry {
        position,
        token: ApplyToken(token),
    })
}

fn store_error(e: RedisError) -> StoreError {
    if e.is_io_error() || e.is_timeout() || e.is_connection_dropped() || e.is_connection_refusal()
    {
        StoreError::Unavailable(e.to_string())
    } else {
        StoreError::Protocol(e.to_string())
    }
}

#[async_trait]
impl AdmissionStore for RedisAdmissionStore {
    async fn try_admit(
        &self,
        campaign_id: CampaignId,
        user_id: UserId,
        token: ApplyToken,
        capacity: u64,
        ttl: Duration,
    ) -> Result<TryApplyResult, StoreError> {
        let mut conn = self.connection.clone();
        // PEXPIRE needs at least one millisecond
        let ttl_ms = ttl.as_millis().max(1) as u64;

        let (is_new, position): (i64, i64) = self
            .script
            .key(self.key(campaign_id))
            .arg(user_id.0)
            .arg(ttl_ms)
            .arg(token.0)
            .invoke_async(&mut conn)
            .await
            .map_err(store_error)?;

        let position = u64::try_from(position)
            .ok()
            .filter(|p| *p > 0)
            .ok_or_else(|| StoreError::Protocol(format!("invalid position {position}")))?;

        Ok(TryApplyResult::at_position(is_new == 1, position, capacity))
    }

    async fn lookup(
        &self,
        campaign_id: CampaignId,
        user_id: UserId,
    ) -> Result<Option<AdmissionEntry>, StoreError> {
        let mut conn = self.connection.clone();
        let raw: Option<String> = conn
            .hget(self.key(campaign_id), user_id.0)
            .await
            .map_err(store_error)?;
        raw.as_deref().map(parse_entry).transpose()
    }

    async fn cardinality(&self, campaign_id: CampaignId) -> Result<u64, StoreError> {
        let mut conn = self.connection.clone();
        conn.hlen(self.key(campaign_id)).await.map_err(store_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_prefix() {
        assert_eq!(RedisStoreConfig::default().key_prefix, "apply:users:");
    }

    #[test]
    fn test_parse_entry() {
        assert_eq!(
            parse_entry("3:42").unwrap(),
            AdmissionEntry {
                position: 3,
                token: ApplyToken(42)
            }
        );
        assert!(matches!(parse_entry("3"), Err(StoreError::Protocol(_))));
        assert!(matches!(parse_entry("0:1"), Err(StoreError::Protocol(_))));
        assert!(matches!(parse_entry("x:1"), Err(StoreError::Protocol(_))));
    }

    #[test]
    fn test_parse_error_is_protocol() {
        let e = RedisError::from((redis::ErrorKind::TypeError, "bad reply"));
        assert!(matches!(store_error(e), StoreError::Protocol(_)));
    }

    #[test]
    fn test_io_error_is_unavailable() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        assert!(matches!(
            store_error(RedisError::from(io)),
            StoreError::Unavailable(_)
        ));
    }
}
