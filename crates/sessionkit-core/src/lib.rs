//! Core library for sessionkit.
//!
//! Keeps track of who is signed in to the backend: a persisted session token,
//! reconciled against `/auth/me` with bounded retries, published as
//! observable state. Also carries the small clients the frontend needs around
//! it (subscription checkout, analytics events, verification-link routing).

pub mod api;
pub mod auth;
pub mod config;
pub mod models;
pub mod retry;
pub mod routes;
pub mod services;

pub use api::{ApiClient, ApiError, AuthEndpoint};
pub use auth::{CredentialStore, SessionError, SessionState, SessionStore};
pub use config::{Config, StorageBackend};
pub use models::User;
pub use retry::{RetryOutcome, RetryPolicy, Retryable};
