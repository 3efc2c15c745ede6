//! Analytics pings. Fire-and-forget: failures are logged, never returned.

use serde_json::{Map, Value};
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::api::ApiClient;

/// URL slug for an event name: lowercased, each whitespace run becomes `-`.
pub fn format_event_name(event_name: &str) -> String {
    let mut slug = String::with_capacity(event_name.len());
    let mut in_whitespace = false;
    for c in event_name.chars() {
        if c.is_whitespace() {
            if !in_whitespace {
                slug.push('-');
            }
            in_whitespace = true;
        } else {
            slug.extend(c.to_lowercase());
            in_whitespace = false;
        }
    }
    slug
}

#[derive(Clone)]
pub struct Tracker {
    api: ApiClient,
    environment: String,
}

impl Tracker {
    pub fn new(api: ApiClient, environment: impl Into<String>) -> Self {
        Self {
            api,
            environment: environment.into(),
        }
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// Send `event_name` with `properties` (`None` sends `{}`).
    pub async fn track(&self, event_name: &str, properties: Option<Map<String, Value>>) {
        let slug = format_event_name(event_name);
        let body = Value::Object(properties.unwrap_or_default());

        match self.api.send_event(&slug, &self.environment, &body).await {
            Ok(()) => debug!(event = %slug, "Tracked event"),
            Err(e) => error!(event = %slug, error = %e, "Error tracking event"),
        }
    }

    /// Like `track`, but runs on the runtime without being awaited.
    pub fn track_detached(
        &self,
        event_name: &str,
        properties: Option<Map<String, Value>>,
    ) -> JoinHandle<()> {
        let tracker = self.clone();
        let event_name = event_name.to_string();
        tokio::spawn(async move { tracker.track(&event_name, properties).await })
    }
}
