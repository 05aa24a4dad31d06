//! Gatehouse core - session tokens, secure storage and the authenticated
//! API client for the residence-security mobile backend.
//!
//! Build a [`SessionManager`] once (usually through [`Config::build_session`])
//! and hand clones of it, or an [`ApiClient`] wrapping it, to everything that
//! talks to the backend.

pub mod api;
pub mod auth;
pub mod config;
pub mod storage;

pub use api::{ApiClient, ApiError, ApiResponse, AuthClient};
pub use auth::{
    Clock, ManualClock, OnboardingStep, ProfilePatch, Role, SessionManager, SystemClock,
    TokenPair, UserProfile, DEFAULT_ACCESS_TOKEN_LIFETIME_SECS,
};
pub use config::{Config, StorageBackend};
pub use storage::{EncryptedFileStorage, KeyringStorage, MemoryStorage, SecureStorage, StorageError};
