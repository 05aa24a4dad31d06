use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Safety margin before `expires_at` at which a token counts as expired,
/// so a request never leaves with a token that dies in flight.
pub const EXPIRY_BUFFER_MS: i64 = 60_000;

/// Access-token lifetime assumed when a refresh response carries no
/// `expiresIn`. The backend issues 15 minute access tokens.
pub const DEFAULT_ACCESS_TOKEN_LIFETIME_SECS: u64 = 900;

/// Access/refresh token pair as persisted under `authTokens`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    /// Epoch milliseconds
    pub expires_at: i64,
}

impl TokenPair {
    /// Build a pair whose expiry is computed from the server-provided
    /// lifetime at the moment of storage.
    pub fn issued_at(
        now_ms: i64,
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        expires_in_secs: u64,
    ) -> Self {
        let lifetime_ms = i64::try_from(expires_in_secs)
            .unwrap_or(i64::MAX)
            .saturating_mul(1000);
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            expires_at: now_ms.saturating_add(lifetime_ms),
        }
    }

    pub fn is_expired_at(&self, now_ms: i64) -> bool {
        now_ms >= self.expires_at.saturating_sub(EXPIRY_BUFFER_MS)
    }

    /// Milliseconds until the hard expiry (negative once past it)
    pub fn millis_until_expiry(&self, now_ms: i64) -> i64 {
        self.expires_at.saturating_sub(now_ms)
    }
}

/// Source of the current time in epoch milliseconds.
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> i64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: AtomicI64,
}

impl ManualClock {
    pub fn new(now_ms: i64) -> Self {
        Self {
            now_ms: AtomicI64::new(now_ms),
        }
    }

    /// Start at the current wall-clock time
    pub fn starting_now() -> Self {
        Self::new(Utc::now().timestamp_millis())
    }

    pub fn set(&self, now_ms: i64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        let by_ms = i64::try_from(by.as_millis()).unwrap_or(i64::MAX);
        self.now_ms.fetch_add(by_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}
