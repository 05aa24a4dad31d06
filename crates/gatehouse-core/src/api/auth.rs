//! Unauthenticated and token-bearing calls the session layer makes itself:
//! login, token refresh, OTP, and the user profile endpoints.

use std::time::Duration;

use reqwest::{header, Client, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize};
use tracing::{debug, warn};

use super::ApiError;
use crate::auth::UserProfile;

const LOGIN_PATH: &str = "/api/login";
const REFRESH_PATH: &str = "/api/auth/refresh";
const USER_BUILDING_PATH: &str = "/api/user/userBuilding";
const USER_PROFILE_PATH: &str = "/api/user/profile";
const SEND_OTP_PATH: &str = "/api/sendOtp";
const VERIFY_OTP_PATH: &str = "/api/verifyOtp";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_in: Option<u64>,
    status: Option<String>,
    #[serde(flatten)]
    profile: UserProfile,
}

/// Token grant from the refresh endpoint. `refresh_token` is only present
/// when the server rotates it; `expires_in` may be omitted by backends that
/// only sign a fixed-lifetime token.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshGrant {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
}

/// Validated result of a successful login.
#[derive(Debug, Clone)]
pub struct LoginGrant {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: u64,
    /// Account status as reported by the server (e.g. "active")
    pub status: Option<String>,
    pub profile: UserProfile,
}

/// Building assignment returned by `/api/user/userBuilding`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildingAssignment {
    pub building_id: Option<String>,
    pub block_id: Option<String>,
    #[serde(rename = "appartementId", alias = "apartmentId")]
    pub apartment_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProfileResponse {
    #[serde(default)]
    success: bool,
    user: Option<UserProfile>,
}

#[derive(Debug, Deserialize)]
struct OtpResponse {
    #[serde(default)]
    success: bool,
}

/// Client for the authentication endpoints.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct AuthClient {
    client: Client,
    base_url: String,
}

impl AuthClient {
    /// Create a client with its own connection pool and request timeout
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::Internal(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self::with_client(client, base_url))
    }

    /// Share an existing connection pool
    pub fn with_client(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn http(&self) -> &Client {
        &self.client
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Absolute URL for an endpoint path such as `/api/login`
    pub fn url(&self, endpoint: &str) -> String {
        if endpoint.starts_with('/') {
            format!("{}{}", self.base_url, endpoint)
        } else {
            format!("{}/{}", self.base_url, endpoint)
        }
    }

    /// Log in with email and password.
    ///
    /// Rejects responses without usable tokens or with a non-positive
    /// lifetime, so nothing half-formed reaches storage.
    pub async fn login(&self, email: &str, password: &str) -> Result<LoginGrant, ApiError> {
        let response = self
            .client
            .post(self.url(LOGIN_PATH))
            .json(&serde_json::json!({ "email": email, "password": password }))
            .send()
            .await?;

        let login: LoginResponse = read_json(response).await?;

        let access_token = non_empty(login.access_token)
            .ok_or_else(|| ApiError::InvalidResponse("login response has no access token".into()))?;
        let refresh_token = non_empty(login.refresh_token)
            .ok_or_else(|| ApiError::InvalidResponse("login response has no refresh token".into()))?;
        let expires_in = login
            .expires_in
            .filter(|&secs| secs > 0)
            .ok_or_else(|| ApiError::InvalidResponse("login response has no valid expiresIn".into()))?;

        let mut profile = login.profile;
        if profile.email.is_empty() {
            profile.email = email.to_string();
        }

        debug!(email, role = ?profile.role, "Login succeeded");
        Ok(LoginGrant {
            access_token,
            refresh_token,
            expires_in,
            status: login.status,
            profile,
        })
    }

    /// Exchange a refresh token for a new access token.
    ///
    /// A 4xx is the server rejecting the refresh token and maps to
    /// `SessionExpired`. Timeouts, rate limits, 5xx and transport failures
    /// stay transient.
    pub async fn refresh(&self, refresh_token: &str) -> Result<RefreshGrant, ApiError> {
        let response = self
            .client
            .post(self.url(REFRESH_PATH))
            .json(&serde_json::json!({ "refreshToken": refresh_token }))
            .send()
            .await?;

        let status = response.status();
        if is_rejection(status) {
            warn!(status = status.as_u16(), "Refresh token rejected");
            return Err(ApiError::SessionExpired);
        }

        let grant: RefreshGrant = read_json(response).await?;
        if grant.access_token.trim().is_empty() {
            return Err(ApiError::InvalidResponse(
                "refresh response has an empty access token".into(),
            ));
        }
        Ok(grant)
    }

    /// Fetch the building/block/apartment assignment for a freshly issued token
    pub async fn user_building(&self, access_token: &str) -> Result<BuildingAssignment, ApiError> {
        let response = self
            .client
            .get(self.url(USER_BUILDING_PATH))
            .bearer_auth(access_token)
            .header(header::CONTENT_TYPE, "application/json")
            .send()
            .await?;
        read_json(response).await
    }

    /// Fetch the full profile; expects `{success: true, user: {...}}`
    pub async fn user_profile(&self, access_token: &str) -> Result<UserProfile, ApiError> {
        let response = self
            .client
            .get(self.url(USER_PROFILE_PATH))
            .bearer_auth(access_token)
            .header(header::CONTENT_TYPE, "application/json")
            .send()
            .await?;

        let body: ProfileResponse = read_json(response).await?;
        match body {
            ProfileResponse {
                success: true,
                user: Some(user),
            } => Ok(user),
            _ => Err(ApiError::InvalidResponse(
                "profile response missing success/user".into(),
            )),
        }
    }

    /// Ask the server to email a one-time code
    pub async fn send_otp(&self, email: &str) -> Result<(), ApiError> {
        let response = self
            .client
            .post(self.url(SEND_OTP_PATH))
            .json(&serde_json::json!({ "email": email }))
            .send()
            .await?;
        check_response(response).await?;
        Ok(())
    }

    /// Check a one-time code. `Ok(false)` means the code was wrong.
    pub async fn verify_otp(&self, email: &str, otp: &str) -> Result<bool, ApiError> {
        let response = self
            .client
            .post(self.url(VERIFY_OTP_PATH))
            .json(&serde_json::json!({ "email": email, "otp": otp }))
            .send()
            .await?;

        let status = response.status();
        if status.is_client_error() {
            debug!(status = status.as_u16(), "OTP rejected");
            return Ok(false);
        }
        let body: OtpResponse = read_json(response).await?;
        Ok(body.success)
    }
}

fn is_rejection(status: StatusCode) -> bool {
    status.is_client_error()
        && status != StatusCode::REQUEST_TIMEOUT
        && status != StatusCode::TOO_MANY_REQUESTS
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Check if response is successful, returning an error with body if not.
pub(crate) async fn check_response(response: Response) -> Result<Response, ApiError> {
    if response.status().is_success() {
        Ok(response)
    } else {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(ApiError::from_status(status, &body))
    }
}

async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
    let response = check_response(response).await?;
    let text = response.text().await?;
    serde_json::from_str(&text).map_err(|e| ApiError::InvalidResponse(e.to_string()))
}
