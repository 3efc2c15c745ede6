//! REST API client module for the backend service.
//!
//! This module provides the `ApiClient` for the endpoints the frontend
//! consumes, and the `AuthEndpoint` seam the session store talks through.
//!
//! All authenticated calls use the session token as a bearer credential.

pub mod client;
pub mod error;

pub use client::{ApiClient, AuthEndpoint, CheckoutSession, ENVIRONMENT_HEADER};
pub use error::{ApiError, FailureKind};
