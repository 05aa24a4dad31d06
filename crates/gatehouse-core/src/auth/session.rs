//! Session manager: the single owner of the stored token pair and profile.
//!
//! Every authenticated call gets its headers from here. Refreshes are
//! single-flight: the pending refresh future itself is the lock, published
//! under a mutex before anything awaits, and removed as soon as it settles.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::channel::oneshot;
use futures::future::{BoxFuture, FutureExt, Shared};
use reqwest::header::{self, HeaderMap, HeaderValue};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, info, warn};

use super::tokens::{DEFAULT_ACCESS_TOKEN_LIFETIME_SECS, EXPIRY_BUFFER_MS};
use super::{Clock, ProfilePatch, Role, SystemClock, TokenPair, UserProfile};
use crate::api::{ApiError, AuthClient};
use crate::storage::SecureStorage;

/// Storage key for the token pair
pub const TOKENS_KEY: &str = "authTokens";

/// Storage key for the cached user profile
pub const USER_DATA_KEY: &str = "userData";

type RefreshFuture = Shared<BoxFuture<'static, Result<String, ApiError>>>;
type RefreshSlot = Arc<Mutex<Option<RefreshFuture>>>;

/// Empties the in-flight slot when the refresh task ends, including when it
/// panics or is dropped by a shutting-down runtime.
struct InFlightGuard {
    slot: RefreshSlot,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

/// Owns the credential lifecycle.
///
/// Cheap to clone; clones share storage, clock and the in-flight refresh.
/// Refreshing spawns onto the current tokio runtime.
#[derive(Clone)]
pub struct SessionManager {
    storage: Arc<dyn SecureStorage>,
    clock: Arc<dyn Clock>,
    auth: AuthClient,
    in_flight: RefreshSlot,
}

impl SessionManager {
    pub fn new(storage: Arc<dyn SecureStorage>, auth: AuthClient) -> Self {
        Self::with_clock(storage, auth, Arc::new(SystemClock))
    }

    pub fn with_clock(
        storage: Arc<dyn SecureStorage>,
        auth: AuthClient,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            storage,
            clock,
            auth,
            in_flight: Arc::new(Mutex::new(None)),
        }
    }

    pub fn auth_client(&self) -> &AuthClient {
        &self.auth
    }

    pub fn now_millis(&self) -> i64 {
        self.clock.now_millis()
    }

    // ===== Token storage =====

    /// Persist a new token pair, expiring `expires_in_secs` from now.
    ///
    /// Overwrites any previous pair. Storage failures are logged, not
    /// returned; the session then reads back as logged out.
    pub fn store_tokens(
        &self,
        access_token: &str,
        refresh_token: &str,
        expires_in_secs: u64,
    ) -> Result<TokenPair, ApiError> {
        if access_token.trim().is_empty() || refresh_token.trim().is_empty() {
            return Err(ApiError::InvalidResponse("token must not be empty".into()));
        }
        if expires_in_secs == 0 {
            return Err(ApiError::InvalidResponse(
                "token lifetime must be positive".into(),
            ));
        }

        let pair = TokenPair::issued_at(
            self.clock.now_millis(),
            access_token,
            refresh_token,
            expires_in_secs,
        );
        self.write_value(TOKENS_KEY, &pair);
        Ok(pair)
    }

    /// The stored token pair, or `None` if absent, unreadable or malformed.
    pub fn stored_tokens(&self) -> Option<TokenPair> {
        self.read_value(TOKENS_KEY)
    }

    /// True when there is no session or the access token is within the
    /// expiry buffer.
    pub fn is_expired(&self) -> bool {
        match self.stored_tokens() {
            Some(tokens) => tokens.is_expired_at(self.clock.now_millis()),
            None => true,
        }
    }

    /// A usable access token, refreshing first if the stored one expired.
    ///
    /// `Ok(None)` means there is no session, or the server rejected the
    /// refresh token (the session has been cleared). Transient refresh
    /// failures are returned as errors and leave the session in place.
    pub async fn valid_access_token(&self) -> Result<Option<String>, ApiError> {
        let Some(tokens) = self.stored_tokens() else {
            return Ok(None);
        };

        if !tokens.is_expired_at(self.clock.now_millis()) {
            return Ok(Some(tokens.access_token));
        }

        debug!("Access token expired, refreshing");
        match self.refresh_access_token().await {
            Ok(token) => Ok(Some(token)),
            Err(ApiError::SessionExpired) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Route-guard convenience: is there a usable token right now?
    pub async fn is_authenticated(&self) -> bool {
        matches!(self.valid_access_token().await, Ok(Some(_)))
    }

    /// Mint a new access token from the stored refresh token.
    ///
    /// Concurrent callers share one network call and get the same result.
    /// On rejection the session is cleared and `SessionExpired` returned.
    pub async fn refresh_access_token(&self) -> Result<String, ApiError> {
        let pending = {
            let slot = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            match slot.as_ref().cloned() {
                Some(pending) => {
                    debug!("Joining in-flight token refresh");
                    pending
                }
                None => self.start_refresh(slot),
            }
        };
        pending.await
    }

    /// Publish a pending refresh into the locked slot and start the task
    /// behind it. The slot lock is released before spawning: a runtime that
    /// refuses the task drops it (and its guard) on the spot.
    fn start_refresh(&self, mut slot: MutexGuard<'_, Option<RefreshFuture>>) -> RefreshFuture {
        let (tx, rx) = oneshot::channel();
        let pending = async move {
            rx.await.unwrap_or_else(|_| {
                Err(ApiError::Internal("token refresh task was dropped".into()))
            })
        }
        .boxed()
        .shared();
        *slot = Some(pending.clone());
        drop(slot);

        let guard = InFlightGuard {
            slot: Arc::clone(&self.in_flight),
        };
        let session = self.clone();
        tokio::spawn(async move {
            let result = session.perform_refresh().await;
            // Clear the slot before anyone can observe the result
            drop(guard);
            let _ = tx.send(result);
        });
        pending
    }

    async fn perform_refresh(&self) -> Result<String, ApiError> {
        let Some(tokens) = self.stored_tokens() else {
            info!("No stored session to refresh");
            self.clear_session();
            return Err(ApiError::SessionExpired);
        };

        let grant = match self.auth.refresh(&tokens.refresh_token).await {
            Ok(grant) => grant,
            Err(ApiError::SessionExpired) => {
                warn!("Refresh token rejected, clearing session");
                self.clear_session();
                return Err(ApiError::SessionExpired);
            }
            Err(e) => {
                warn!(error = %e, "Token refresh failed, keeping session");
                return Err(e);
            }
        };

        let expires_in = refreshed_lifetime(grant.expires_in)?;

        // The session may have been replaced or cleared while the call was out
        match self.stored_tokens() {
            None => {
                info!("Session cleared during refresh, discarding new token");
                return Err(ApiError::SessionExpired);
            }
            Some(current) if current.refresh_token != tokens.refresh_token => {
                info!("Session replaced during refresh, keeping newer tokens");
                return Ok(current.access_token);
            }
            Some(_) => {}
        }

        let rotated = grant
            .refresh_token
            .as_deref()
            .is_some_and(|t| !t.trim().is_empty());
        let refresh_token = if rotated {
            grant.refresh_token.unwrap_or_default()
        } else {
            tokens.refresh_token
        };

        let pair = self.store_tokens(&grant.access_token, &refresh_token, expires_in)?;
        info!(expires_in, rotated, "Access token refreshed");
        Ok(pair.access_token)
    }

    /// `Authorization` and `Content-Type` headers for an API call.
    ///
    /// Fails with `SessionExpired` when no usable token can be produced.
    pub async fn authenticated_headers(&self) -> Result<HeaderMap, ApiError> {
        match self.valid_access_token().await? {
            Some(token) => bearer_headers(&token),
            None => Err(ApiError::SessionExpired),
        }
    }

    /// Delete tokens and profile. Idempotent; never fails.
    pub fn clear_session(&self) {
        for key in [TOKENS_KEY, USER_DATA_KEY] {
            if let Err(e) = self.storage.delete(key) {
                warn!(key, error = %e, "Failed to delete session value");
            }
        }
        debug!("Session cleared");
    }

    // ===== Login flows =====

    /// Log in, store the tokens and the profile, and return the profile.
    ///
    /// The building assignment is fetched right after login; if that call
    /// fails the profile is stored without it.
    pub async fn login(&self, email: &str, password: &str) -> Result<UserProfile, ApiError> {
        let grant = self.auth.login(email, password).await?;
        self.store_tokens(&grant.access_token, &grant.refresh_token, grant.expires_in)?;

        let mut profile = grant.profile;
        match self.auth.user_building(&grant.access_token).await {
            Ok(assignment) => profile.apply(ProfilePatch {
                building_id: assignment.building_id,
                block_id: assignment.block_id,
                apartment_id: assignment.apartment_id,
                ..ProfilePatch::default()
            }),
            Err(e) => warn!(error = %e, "Could not fetch building assignment after login"),
        }

        self.store_user_profile(&profile);
        info!(role = ?profile.role, step = ?profile.onboarding_step(), "Logged in");
        Ok(profile)
    }

    /// Reload the profile from the server, replacing the cached one.
    pub async fn fetch_user_profile(&self) -> Result<UserProfile, ApiError> {
        let token = self
            .valid_access_token()
            .await?
            .ok_or(ApiError::SessionExpired)?;
        let profile = self.auth.user_profile(&token).await?;
        self.store_user_profile(&profile);
        Ok(profile)
    }

    pub fn logout(&self) {
        self.clear_session();
        info!("Logged out");
    }

    // ===== Profile cache =====

    pub fn store_user_profile(&self, profile: &UserProfile) {
        self.write_value(USER_DATA_KEY, profile);
    }

    pub fn user_profile(&self) -> Option<UserProfile> {
        self.read_value(USER_DATA_KEY)
    }

    /// Merge `patch` over the cached profile and store the result.
    pub fn patch_user_profile(&self, patch: ProfilePatch) -> UserProfile {
        let mut profile = self.user_profile().unwrap_or_default();
        profile.apply(patch);
        self.store_user_profile(&profile);
        profile
    }

    pub fn building_id(&self) -> Option<String> {
        self.user_profile().and_then(|p| p.building_id)
    }

    pub fn set_building_id(&self, building_id: &str) -> UserProfile {
        self.patch_user_profile(ProfilePatch::building(building_id))
    }

    pub fn user_role(&self) -> Option<Role> {
        self.user_profile().and_then(|p| p.role)
    }

    // ===== Storage helpers =====

    fn read_value<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = match self.storage.get(key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!(key, error = %e, "Failed to read session value");
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key, error = %e, "Ignoring malformed session value");
                None
            }
        }
    }

    fn write_value<T: Serialize>(&self, key: &str, value: &T) {
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(key, error = %e, "Failed to serialize session value");
                return;
            }
        };
        if let Err(e) = self.storage.set(key, &raw) {
            warn!(key, error = %e, "Failed to write session value");
        }
    }
}

/// Lifetime to store for a refreshed access token.
///
/// A missing `expiresIn` falls back to the backend's access-token lifetime.
/// A lifetime that does not outlast the expiry buffer would be stored already
/// expired and trigger another refresh on the next call, so it is refused.
fn refreshed_lifetime(expires_in: Option<u64>) -> Result<u64, ApiError> {
    let Some(secs) = expires_in else {
        debug!(
            default_secs = DEFAULT_ACCESS_TOKEN_LIFETIME_SECS,
            "Refresh response has no expiresIn, using default lifetime"
        );
        return Ok(DEFAULT_ACCESS_TOKEN_LIFETIME_SECS);
    };
    if i64::try_from(secs).is_ok_and(|s| s.saturating_mul(1000) <= EXPIRY_BUFFER_MS) {
        warn!(expires_in = secs, "Refresh response lifetime is inside the expiry buffer");
        return Err(ApiError::InvalidResponse(format!(
            "refresh token lifetime of {}s does not outlast the expiry buffer",
            secs
        )));
    }
    Ok(secs)
}

/// Bearer + JSON content-type headers for `token`
pub(crate) fn bearer_headers(token: &str) -> Result<HeaderMap, ApiError> {
    let mut headers = HeaderMap::new();
    let bearer = HeaderValue::from_str(&format!("Bearer {}", token))
        .map_err(|_| ApiError::InvalidResponse("access token is not a valid header value".into()))?;
    headers.insert(header::AUTHORIZATION, bearer);
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    Ok(headers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{ManualClock, EXPIRY_BUFFER_MS};
    use crate::storage::{MemoryStorage, StorageError};
    use std::time::Duration;

    /// Nothing listens here; tests in this module never reach the network.
    const UNREACHABLE: &str = "http://127.0.0.1:9";

    struct FailingStorage;

    impl SecureStorage for FailingStorage {
        fn get(&self, _key: &str) -> Result<Option<String>, StorageError> {
            Err(StorageError::Decrypt)
        }

        fn set(&self, _key: &str, _value: &str) -> Result<(), StorageError> {
            Err(StorageError::Decrypt)
        }

        fn delete(&self, _key: &str) -> Result<(), StorageError> {
            Err(StorageError::Decrypt)
        }
    }

    fn manager_with(storage: Arc<dyn SecureStorage>) -> (SessionManager, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let auth = AuthClient::new(UNREACHABLE, Duration::from_secs(1)).unwrap();
        let session = SessionManager::with_clock(storage, auth, clock.clone());
        (session, clock)
    }

    fn manager() -> (SessionManager, Arc<ManualClock>, Arc<MemoryStorage>) {
        let storage = Arc::new(MemoryStorage::new());
        let (session, clock) = manager_with(storage.clone());
        (session, clock, storage)
    }

    #[test]
    fn test_store_and_read_tokens() {
        let (session, clock, _) = manager();
        session.store_tokens("A1", "R1", 3600).unwrap();

        let tokens = session.stored_tokens().unwrap();
        assert_eq!(tokens.access_token, "A1");
        assert_eq!(tokens.refresh_token, "R1");
        assert_eq!(tokens.expires_at, clock.now_millis() + 3_600_000);
    }

    #[test]
    fn test_store_tokens_overwrites() {
        let (session, _, _) = manager();
        session.store_tokens("A1", "R1", 3600).unwrap();
        session.store_tokens("A2", "R2", 60).unwrap();
        assert_eq!(session.stored_tokens().unwrap().access_token, "A2");
    }

    #[test]
    fn test_store_tokens_rejects_empty() {
        let (session, _, storage) = manager();
        assert!(session.store_tokens("", "R1", 3600).is_err());
        assert!(session.store_tokens("A1", "  ", 3600).is_err());
        assert!(session.store_tokens("A1", "R1", 0).is_err());
        assert!(storage.is_empty());
    }

    #[test]
    fn test_malformed_tokens_read_as_absent() {
        let (session, _, storage) = manager();
        storage.set(TOKENS_KEY, "{not json").unwrap();
        assert!(session.stored_tokens().is_none());
        assert!(session.is_expired());

        storage.set(TOKENS_KEY, r#"{"accessToken":"A1"}"#).unwrap();
        assert!(session.stored_tokens().is_none());
    }

    #[test]
    fn test_is_expired_respects_buffer() {
        let (session, clock, _) = manager();
        assert!(session.is_expired());

        let tokens = session.store_tokens("A1", "R1", 3600).unwrap();
        assert!(!session.is_expired());

        clock.set(tokens.expires_at - EXPIRY_BUFFER_MS - 1);
        assert!(!session.is_expired());
        clock.set(tokens.expires_at - EXPIRY_BUFFER_MS);
        assert!(session.is_expired());
    }

    #[tokio::test]
    async fn test_valid_token_without_network() {
        let (session, _, _) = manager();
        session.store_tokens("A1", "R1", 3600).unwrap();
        assert_eq!(session.valid_access_token().await.unwrap().as_deref(), Some("A1"));

        let headers = session.authenticated_headers().await.unwrap();
        assert_eq!(headers[header::AUTHORIZATION], "Bearer A1");
        assert_eq!(headers[header::CONTENT_TYPE], "application/json");
    }

    #[tokio::test]
    async fn test_no_session() {
        let (session, _, _) = manager();
        assert_eq!(session.valid_access_token().await.unwrap(), None);
        assert!(!session.is_authenticated().await);
        assert_eq!(
            session.authenticated_headers().await.unwrap_err(),
            ApiError::SessionExpired
        );
        assert_eq!(
            session.refresh_access_token().await.unwrap_err(),
            ApiError::SessionExpired
        );
    }

    #[tokio::test]
    async fn test_refresh_slot_cleared_after_settling() {
        let (session, _, _) = manager();
        assert!(session.refresh_access_token().await.is_err());
        assert!(session.in_flight.lock().unwrap().is_none());
    }

    #[test]
    fn test_refresh_refused_by_stopped_runtime_frees_slot() {
        let (session, _, _) = manager();
        session.store_tokens("A1", "R1", 3600).unwrap();

        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        let handle = runtime.handle().clone();
        drop(runtime);

        // The task is cancelled before its first poll
        let _enter = handle.enter();
        let result = futures::executor::block_on(session.refresh_access_token());
        assert!(matches!(result, Err(ApiError::Internal(_))));
        assert!(session.in_flight.lock().unwrap().is_none());
        assert_eq!(session.stored_tokens().unwrap().access_token, "A1");
    }

    #[test]
    fn test_refreshed_lifetime() {
        assert_eq!(
            refreshed_lifetime(None).unwrap(),
            DEFAULT_ACCESS_TOKEN_LIFETIME_SECS
        );
        assert_eq!(refreshed_lifetime(Some(900)).unwrap(), 900);
        assert_eq!(refreshed_lifetime(Some(61)).unwrap(), 61);
        assert!(matches!(
            refreshed_lifetime(Some(60)),
            Err(ApiError::InvalidResponse(_))
        ));
        assert!(matches!(
            refreshed_lifetime(Some(0)),
            Err(ApiError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_clear_session_is_idempotent() {
        let (session, _, storage) = manager();
        session.store_tokens("A1", "R1", 3600).unwrap();
        session.store_user_profile(&UserProfile {
            id: "u1".into(),
            ..UserProfile::default()
        });

        session.clear_session();
        session.clear_session();
        assert!(session.stored_tokens().is_none());
        assert!(session.user_profile().is_none());
        assert!(storage.is_empty());
    }

    #[test]
    fn test_patch_user_profile() {
        let (session, _, _) = manager();
        session.store_user_profile(&UserProfile {
            id: "u1".into(),
            email: "amina@example.com".into(),
            full_name: Some("Amina".into()),
            role: Some(Role::Resident),
            ..UserProfile::default()
        });

        session.set_building_id("b7");
        let profile = session.patch_user_profile(ProfilePatch::block("k3"));

        assert_eq!(profile.full_name.as_deref(), Some("Amina"));
        assert_eq!(session.building_id().as_deref(), Some("b7"));
        assert_eq!(session.user_profile().unwrap().block_id.as_deref(), Some("k3"));
        assert_eq!(session.user_role(), Some(Role::Resident));
    }

    #[test]
    fn test_patch_without_cached_profile() {
        let (session, _, _) = manager();
        let profile = session.patch_user_profile(ProfilePatch::building("b1"));
        assert_eq!(profile.id, "");
        assert_eq!(profile.building_id.as_deref(), Some("b1"));
    }

    #[tokio::test]
    async fn test_storage_failures_read_as_logged_out() {
        let (session, _) = manager_with(Arc::new(FailingStorage));
        session.store_tokens("A1", "R1", 3600).unwrap();
        assert!(session.stored_tokens().is_none());
        assert!(session.is_expired());
        assert_eq!(session.valid_access_token().await.unwrap(), None);
        session.clear_session();
    }

    #[test]
    fn test_bearer_headers_rejects_invalid_token() {
        assert!(bearer_headers("bad\ntoken").is_err());
    }
}
