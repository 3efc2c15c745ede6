//! API client for the backend service.
//!
//! `ApiClient` wraps a shared `reqwest::Client` and knows the three
//! endpoints the frontend consumes: `/auth/me`, `/subscription/create-checkout`
//! and `/track/<event>`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::models::{MeResponse, User};

use super::ApiError;

// ============================================================================
// Constants
// ============================================================================

/// HTTP request timeout in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Header carrying the deployment environment on tracking requests.
pub const ENVIRONMENT_HEADER: &str = "X-Environment";

/// Response from `POST /subscription/create-checkout`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CheckoutSession {
    pub checkout_url: String,
}

/// Something that can resolve a session token to a user.
#[async_trait]
pub trait AuthEndpoint: Send + Sync {
    async fn current_user(&self, token: &str) -> Result<User, ApiError>;
}

/// API client for the backend.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
}

impl ApiClient {
    /// Create a new API client for `base_url` (e.g. `http://localhost:8000`)
    pub fn new(base_url: impl Into<String>) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self::with_client(client, base_url))
    }

    /// Build on an existing client, sharing its connection pool.
    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    /// `GET /auth/me` with the token as bearer credential.
    ///
    /// A 200 whose body lacks a well-formed `user` is `ApiError::InvalidResponse`.
    pub async fn fetch_current_user(&self, token: &str) -> Result<User, ApiError> {
        let url = self.url("auth/me");

        let response = self.client.get(&url).bearer_auth(token).send().await?;
        debug!(url = %url, status = %response.status(), "Auth check response");

        let response = Self::check_response(response).await?;
        let body = response.text().await?;

        let parsed: MeResponse = serde_json::from_str(&body)
            .map_err(|e| ApiError::InvalidResponse(format!("Failed to parse user response: {}", e)))?;

        parsed
            .user
            .ok_or_else(|| ApiError::InvalidResponse("Response has no user field".to_string()))
    }

    /// `POST /subscription/create-checkout`. An empty token is still sent.
    pub async fn create_checkout(&self, token: &str) -> Result<CheckoutSession, ApiError> {
        let url = self.url("subscription/create-checkout");

        let response = self
            .client
            .post(&url)
            .bearer_auth(token)
            .header(header::CONTENT_TYPE, "application/json")
            .send()
            .await?;

        let response = Self::check_response(response).await?;
        response
            .json()
            .await
            .map_err(|e| ApiError::InvalidResponse(format!("Failed to parse checkout response: {}", e)))
    }

    /// `POST /track/<event_slug>` with `properties` as the JSON body.
    pub async fn send_event(
        &self,
        event_slug: &str,
        environment: &str,
        properties: &Value,
    ) -> Result<(), ApiError> {
        let url = self.url(&format!("track/{}", event_slug));

        let response = self
            .client
            .post(&url)
            .header(ENVIRONMENT_HEADER, environment)
            .json(properties)
            .send()
            .await?;

        Self::check_response(response).await?;
        Ok(())
    }
}

#[async_trait]
impl AuthEndpoint for ApiClient {
    async fn current_user(&self, token: &str) -> Result<User, ApiError> {
        self.fetch_current_user(token).await
    }
}
