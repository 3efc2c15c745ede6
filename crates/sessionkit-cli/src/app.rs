//! Application wiring for the command line front end.
//!
//! `App` owns the configured session store and the collaborators that share
//! its API client and credential store.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info};

use sessionkit_core::auth::{open_store, CredentialStore, SessionState, SessionStore, Subscription};
use sessionkit_core::services::{Checkout, Navigator, Tracker};
use sessionkit_core::{ApiClient, Config};

/// Prints where a browser would have navigated.
pub struct TerminalNavigator;

impl Navigator for TerminalNavigator {
    fn redirect(&self, url: &str) {
        println!("Open this URL to complete checkout:");
        println!("  {}", url);
    }

    fn alert(&self, message: &str) {
        eprintln!("{}", message);
    }
}

pub struct App {
    pub config: Config,
    pub session: SessionStore,
    pub checkout: Checkout,
    pub tracker: Tracker,
    _state_log: Subscription,
}

impl App {
    pub async fn new(config: Config) -> Result<Self> {
        let api = ApiClient::new(config.api_base_url.as_str())
            .context("Failed to create API client")?;
        let credentials = open_store(config.storage, config.session_file()).await;
        info!(
            api = %api.base_url(),
            storage = credentials.name(),
            "Session services ready"
        );

        let session = SessionStore::new(&config, credentials.clone(), Arc::new(api.clone()));
        let state_log = session.subscribe(|state| debug!(?state, "Session state changed"));

        Ok(Self {
            checkout: Checkout::new(api.clone(), credentials),
            tracker: Tracker::new(api, config.environment.clone()),
            session,
            config,
            _state_log: state_log,
        })
    }
}

/// One or two lines describing `state` for the terminal.
pub fn describe_state(state: &SessionState) -> String {
    match state {
        SessionState::Authenticated(user) => {
            let role = if user.is_admin { ", admin" } else { "" };
            format!(
                "Signed in as {} (id {}{})\nLast login: {}",
                user.email,
                user.id,
                role,
                user.last_login_display()
            )
        }
        SessionState::Unauthenticated => "Not signed in.".to_string(),
        SessionState::Unresolved => "Session not resolved (non-interactive context).".to_string(),
    }
}
