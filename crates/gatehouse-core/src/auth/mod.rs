//! Authentication module for managing user sessions and credentials.
//!
//! This module provides:
//! - `SessionManager`: token storage, expiry detection, single-flight refresh
//! - `TokenPair` / `UserProfile`: the persisted session state
//! - `Clock`: injectable time source used for expiry math
//!
//! Access tokens count as expired one minute before their real expiry.

pub mod profile;
pub mod session;
pub mod tokens;

pub use profile::{OnboardingStep, ProfilePatch, Role, UserProfile};
pub use session::{SessionManager, TOKENS_KEY, USER_DATA_KEY};
pub use tokens::{
    Clock, ManualClock, SystemClock, TokenPair, DEFAULT_ACCESS_TOKEN_LIFETIME_SECS, EXPIRY_BUFFER_MS,
};
