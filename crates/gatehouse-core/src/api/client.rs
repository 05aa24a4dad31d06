//! Authenticated request wrapper.
//!
//! Every call takes its headers from the `SessionManager`. A 401 triggers one
//! token refresh and exactly one retry; a second 401 is returned as-is.

use reqwest::{header, Method, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, warn};

use super::ApiError;
use crate::auth::session::bearer_headers;
use crate::auth::{Role, SessionManager};

/// A successful response. `data` is `None` when the body is not JSON.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse<T> {
    pub data: Option<T>,
    pub status: u16,
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UnreadCount {
    count: u64,
}

/// API client for authenticated backend calls.
/// Clone is cheap - shares the session and the connection pool.
#[derive(Clone)]
pub struct ApiClient {
    session: SessionManager,
}

impl ApiClient {
    pub fn new(session: SessionManager) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    pub async fn get<T: DeserializeOwned>(&self, endpoint: &str) -> Result<ApiResponse<T>, ApiError> {
        self.request(Method::GET, endpoint, None::<&()>).await
    }

    pub async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        endpoint: &str,
        body: &B,
    ) -> Result<ApiResponse<T>, ApiError> {
        self.request(Method::POST, endpoint, Some(body)).await
    }

    pub async fn put<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        endpoint: &str,
        body: &B,
    ) -> Result<ApiResponse<T>, ApiError> {
        self.request(Method::PUT, endpoint, Some(body)).await
    }

    pub async fn delete<T: DeserializeOwned>(&self, endpoint: &str) -> Result<ApiResponse<T>, ApiError> {
        self.request(Method::DELETE, endpoint, None::<&()>).await
    }

    /// Send an authenticated request, refreshing and retrying once on 401.
    pub async fn request<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<&B>,
    ) -> Result<ApiResponse<T>, ApiError> {
        let url = self.session.auth_client().url(endpoint);
        let headers = self.session.authenticated_headers().await?;

        let response = self.send(method.clone(), &url, headers, body).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return handle_response(response).await;
        }

        debug!(method = %method, url = %url, "Unauthorized, refreshing token and retrying once");
        let token = self.session.refresh_access_token().await?;
        let retry = self.send(method.clone(), &url, bearer_headers(&token)?, body).await?;
        if retry.status() == StatusCode::UNAUTHORIZED {
            warn!(method = %method, url = %url, "Still unauthorized after token refresh");
        }
        handle_response(retry).await
    }

    async fn send<B: Serialize + ?Sized>(
        &self,
        method: Method,
        url: &str,
        headers: header::HeaderMap,
        body: Option<&B>,
    ) -> Result<Response, ApiError> {
        let mut request = self
            .session
            .auth_client()
            .http()
            .request(method, url)
            .headers(headers);
        if let Some(body) = body {
            request = request.json(body);
        }
        Ok(request.send().await?)
    }

    // ===== Endpoint helpers =====

    /// Update the user's display name and role
    pub async fn update_profile(
        &self,
        full_name: &str,
        role: Role,
    ) -> Result<ApiResponse<serde_json::Value>, ApiError> {
        let body = serde_json::json!({ "fullName": full_name, "role": role });
        self.post("/api/update-profile", &body).await
    }

    /// Notifications for a user, newest first as returned by the server
    pub async fn notifications(&self, user_id: &str) -> Result<Vec<serde_json::Value>, ApiError> {
        let response = self
            .get::<Vec<serde_json::Value>>(&format!("/api/notifications/{}", user_id))
            .await?;
        Ok(response.data.unwrap_or_default())
    }

    pub async fn unread_notifications_count(&self, user_id: &str) -> Result<u64, ApiError> {
        let response = self
            .get::<UnreadCount>(&format!("/api/notifications/unread-count/{}", user_id))
            .await?;
        Ok(response.data.map(|c| c.count).unwrap_or(0))
    }
}

async fn handle_response<T: DeserializeOwned>(response: Response) -> Result<ApiResponse<T>, ApiError> {
    let status = response.status();
    let is_json = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.contains("application/json"));
    let text = response.text().await?;

    if !status.is_success() {
        return Err(ApiError::from_status(status, &text));
    }

    if !is_json || text.trim().is_empty() {
        return Ok(ApiResponse {
            data: None,
            status: status.as_u16(),
            message: None,
        });
    }

    let value: serde_json::Value =
        serde_json::from_str(&text).map_err(|e| ApiError::InvalidResponse(e.to_string()))?;
    let message = value
        .get("message")
        .and_then(|m| m.as_str())
        .map(str::to_string);
    let data = serde_json::from_value(value).map_err(|e| ApiError::InvalidResponse(e.to_string()))?;

    Ok(ApiResponse {
        data: Some(data),
        status: status.as_u16(),
        message,
    })
}
