// SPDX-FileCopyrightText: 2023 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Fixed-window counters over the shared KV store (§5 "Shared-resource
//! policy", §6.3 `ratelimit:{scope}:{key}`). Used by the session
//! authenticator (3/phone/hour, 10/source-address/hour, §4.A) and by the
//! connection manager's per-connection inbound rate limit (§4.C).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use displaydoc::Display;
use redis::AsyncCommands;
use relay_common::rate_limiter::RateLimitKey;
use thiserror::Error;

#[derive(Debug, Error, Display)]
pub enum RateLimiterError {
    /// underlying store failure: {0}
    Backend(String),
}

#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Increments the counter for `key` and reports whether the caller is
    /// still within `limit` for the current `window`. The first call in a
    /// window sets the expiry; the counter resets once it lapses.
    async fn check(
        &self,
        key: &RateLimitKey,
        scope: &str,
        limit: u32,
        window: Duration,
    ) -> Result<bool, RateLimiterError>;
}

pub struct RedisRateLimiter {
    commands: redis::aio::ConnectionManager,
}

impl RedisRateLimiter {
    pub fn new(commands: redis::aio::ConnectionManager) -> Self {
        Self { commands }
    }
}

#[async_trait]
impl RateLimiter for RedisRateLimiter {
    async fn check(
        &self,
        key: &RateLimitKey,
        scope: &str,
        limit: u32,
        window: Duration,
    ) -> Result<bool, RateLimiterError> {
        let redis_key = key.to_kv_key(scope);
        let mut conn = self.commands.clone();
        let count: u64 = conn
            .incr(&redis_key, 1)
            .await
            .map_err(|e| RateLimiterError::Backend(e.to_string()))?;
        if count == 1 {
            let _: () = conn
                .expire(&redis_key, window.as_secs() as i64)
                .await
                .map_err(|e| RateLimiterError::Backend(e.to_string()))?;
        }
        Ok(count <= limit as u64)
    }
}

/// Single-process stand-in for tests and single-replica deployments.
#[derive(Default)]
pub struct InMemoryRateLimiter {
    counters: DashMap<String, (u64, std::time::Instant)>,
}

impl InMemoryRateLimiter {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RateLimiter for InMemoryRateLimiter {
    async fn check(
        &self,
        key: &RateLimitKey,
        scope: &str,
        limit: u32,
        window: Duration,
    ) -> Result<bool, RateLimiterError> {
        let redis_key = key.to_kv_key(scope);
        let now = std::time::Instant::now();
        let mut entry = self
            .counters
            .entry(redis_key)
            .or_insert((0, now + window));
        if entry.1 <= now {
            *entry = (0, now + window);
        }
        entry.0 += 1;
        Ok(entry.0 <= limit as u64)
    }
}

pub type SharedRateLimiter = Arc<dyn RateLimiter>;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn allows_up_to_the_limit_then_rejects() {
        let limiter = InMemoryRateLimiter::new();
        let key = RateLimitKey::new("verification", &[b"+15551000001"]);
        for _ in 0..3 {
            assert!(limiter.check(&key, "verification", 3, Duration::from_secs(3600)).await.unwrap());
        }
        assert!(!limiter.check(&key, "verification", 3, Duration::from_secs(3600)).await.unwrap());
    }

    #[tokio::test]
    async fn different_keys_have_independent_counters() {
        let limiter = InMemoryRateLimiter::new();
        let a = RateLimitKey::new("verification", &[b"+15551000001"]);
        let b = RateLimitKey::new("verification", &[b"+15551000002"]);
        assert!(limiter.check(&a, "verification", 1, Duration::from_secs(3600)).await.unwrap());
        assert!(limiter.check(&b, "verification", 1, Duration::from_secs(3600)).await.unwrap());
    }
}
