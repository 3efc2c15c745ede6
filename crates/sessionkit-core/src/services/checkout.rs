//! Subscription checkout: ask the backend for a checkout session, then send
//! the user to the hosted checkout page.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::api::{ApiClient, ApiError};
use crate::auth::{CredentialStore, SESSION_TOKEN_KEY};

/// Shown to the user when no checkout session could be created.
pub const CHECKOUT_FAILED_MESSAGE: &str =
    "Failed to create checkout session. Please try again later.";

/// Where the user is looking: a browser window, a terminal.
pub trait Navigator: Send + Sync {
    /// Leave the current page for `url`.
    fn redirect(&self, url: &str);

    /// Blocking, user-visible message.
    fn alert(&self, message: &str);
}

pub struct Checkout {
    api: ApiClient,
    credentials: Arc<dyn CredentialStore>,
}

impl Checkout {
    pub fn new(api: ApiClient, credentials: Arc<dyn CredentialStore>) -> Self {
        Self { api, credentials }
    }

    /// Create a checkout session and redirect to it. No retry.
    ///
    /// On failure the error is logged and the user alerted before it is returned.
    pub async fn redirect(&self, navigator: &dyn Navigator) -> Result<String, ApiError> {
        let token = match self.credentials.get(SESSION_TOKEN_KEY).await {
            Ok(token) => token.unwrap_or_default(),
            Err(e) => {
                warn!(error = %e, "Could not read session token for checkout");
                String::new()
            }
        };

        match self.api.create_checkout(&token).await {
            Ok(session) => {
                info!("Redirecting to checkout");
                navigator.redirect(&session.checkout_url);
                Ok(session.checkout_url)
            }
            Err(e) => {
                error!(error = %e, "Error creating checkout session");
                navigator.alert(CHECKOUT_FAILED_MESSAGE);
                Err(e)
            }
        }
    }
}
