//! REST API client module for the residence backend.
//!
//! This module provides:
//! - `AuthClient`: login, token refresh, OTP and profile endpoints
//! - `ApiClient`: authenticated requests with one refresh-and-retry on 401
//!
//! The backend uses JWT bearer tokens; access tokens are short-lived and
//! minted again from a longer-lived refresh token.

pub mod auth;
pub mod client;
pub mod error;

pub use auth::{AuthClient, BuildingAssignment, LoginGrant, RefreshGrant};
pub use client::{ApiClient, ApiResponse};
pub use error::ApiError;
