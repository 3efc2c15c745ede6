//! The session store: who is signed in, as observable state.
//!
//! `SessionStore` reconciles the persisted session token with `/auth/me` and
//! publishes the result to subscribers. Reconciliation runs once per store
//! (`initialize`) and again on every `set_session_token`.
//!
//! Each reconciliation is stamped with a generation. Token assignment and
//! logout advance the generation, so a slow retry sequence that finishes after
//! a newer one neither publishes nor touches the persisted token.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::api::AuthEndpoint;
use crate::config::Config;
use crate::models::User;
use crate::retry::{RetryOutcome, RetryPolicy};

use super::credentials::{CredentialStore, StorageError, SESSION_TOKEN_KEY, USER_DATA_KEY};

/// What the store currently knows about the user.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No reconciliation has finished yet.
    #[default]
    Unresolved,
    Authenticated(User),
    Unauthenticated,
}

impl SessionState {
    pub fn user(&self) -> Option<&User> {
        match self {
            SessionState::Authenticated(user) => Some(user),
            _ => None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, SessionState::Authenticated(_))
    }
}

/// Lifecycle of the one-shot bootstrap guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitPhase {
    NotStarted,
    InProgress,
    Done,
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Session token must not be empty")]
    EmptyToken,

    #[error(transparent)]
    Storage(#[from] StorageError),
}

type Callback = Arc<dyn Fn(&SessionState) + Send + Sync>;

struct Shared {
    state: SessionState,
    phase: InitPhase,
    subscribers: Vec<(u64, Callback)>,
    next_subscriber_id: u64,
}

struct Inner {
    store: Arc<dyn CredentialStore>,
    endpoint: Arc<dyn AuthEndpoint>,
    policy: RetryPolicy,
    interactive: bool,
    generation: AtomicU64,
    shared: Mutex<Shared>,
}

impl Inner {
    fn shared(&self) -> MutexGuard<'_, Shared> {
        // Callbacks run outside the lock
        self.shared.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn unsubscribe(&self, id: u64) {
        self.shared().subscribers.retain(|(sid, _)| *sid != id);
    }
}

/// Handle returned by `SessionStore::subscribe`. Dropping it unsubscribes.
#[must_use = "dropping the subscription unsubscribes immediately"]
pub struct Subscription {
    id: u64,
    inner: Weak<Inner>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        // Drop does the work
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.unsubscribe(self.id);
        }
    }
}

/// Observable session state backed by a credential store and an auth endpoint.
/// Clone is cheap and clones share state.
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<Inner>,
}

impl SessionStore {
    pub fn new(
        config: &Config,
        store: Arc<dyn CredentialStore>,
        endpoint: Arc<dyn AuthEndpoint>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                endpoint,
                policy: config.retry_policy(),
                interactive: config.interactive,
                generation: AtomicU64::new(0),
                shared: Mutex::new(Shared {
                    state: SessionState::Unresolved,
                    phase: InitPhase::NotStarted,
                    subscribers: Vec::new(),
                    next_subscriber_id: 0,
                }),
            }),
        }
    }

    pub fn state(&self) -> SessionState {
        self.inner.shared().state.clone()
    }

    pub fn phase(&self) -> InitPhase {
        self.inner.shared().phase
    }

    /// Register `callback` for every state change. It is called once right
    /// away with the current state.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&SessionState) + Send + Sync + 'static,
    {
        let callback: Callback = Arc::new(callback);
        let (id, current) = {
            let mut shared = self.inner.shared();
            let id = shared.next_subscriber_id;
            shared.next_subscriber_id += 1;
            shared.subscribers.push((id, callback.clone()));
            (id, shared.state.clone())
        };
        callback(&current);

        Subscription {
            id,
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Resolve the persisted token into a user, once.
    ///
    /// Skipped outside interactive contexts and when a previous call is running
    /// or has finished. Never fails: every failure ends as `Unauthenticated`.
    pub async fn initialize(&self) {
        if !self.inner.interactive {
            debug!("Non-interactive context, skipping session bootstrap");
            return;
        }

        let generation = {
            let mut shared = self.inner.shared();
            if shared.phase != InitPhase::NotStarted {
                debug!(phase = ?shared.phase, "Session store already initialized, skipping");
                return;
            }
            shared.phase = InitPhase::InProgress;
            self.inner.generation.load(Ordering::SeqCst)
        };

        self.reconcile(generation).await;
    }

    /// Persist `token` and reconcile it. Returns the state once that finishes.
    pub async fn set_session_token(&self, token: &str) -> Result<SessionState, SessionError> {
        if token.is_empty() {
            return Err(SessionError::EmptyToken);
        }

        info!("Setting session token and re-initializing");
        // Only a stored token supersedes the reconciliation in flight
        self.inner.store.set(SESSION_TOKEN_KEY, token).await?;
        {
            let mut shared = self.inner.shared();
            self.inner.generation.fetch_add(1, Ordering::SeqCst);
            shared.phase = InitPhase::NotStarted;
        }

        self.initialize().await;
        Ok(self.state())
    }

    /// Forget the session locally. No network call.
    pub async fn logout(&self) {
        info!("Logging out, removing session token");
        let generation = {
            let _shared = self.inner.shared();
            self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1
        };

        for key in [SESSION_TOKEN_KEY, USER_DATA_KEY] {
            if let Err(e) = self.inner.store.remove(key).await {
                warn!(key, error = %e, "Failed to clear persisted session data");
            }
        }

        let subscribers = {
            let mut shared = self.inner.shared();
            if !self.is_current(generation) {
                debug!("Session changed while logging out, not publishing");
                return;
            }
            if shared.phase == InitPhase::InProgress {
                shared.phase = InitPhase::Done;
            }
            Self::publish_locked(&mut shared, SessionState::Unauthenticated)
        };
        notify(&subscribers, &SessionState::Unauthenticated);
    }

    /// Log a snapshot of the store at debug level.
    pub fn debug(&self) {
        let shared = self.inner.shared();
        debug!(
            state = ?shared.state,
            phase = ?shared.phase,
            subscribers = shared.subscribers.len(),
            generation = self.inner.generation.load(Ordering::SeqCst),
            backend = self.inner.store.name(),
            "Session store snapshot"
        );
    }

    fn is_current(&self, generation: u64) -> bool {
        self.inner.generation.load(Ordering::SeqCst) == generation
    }

    async fn reconcile(&self, generation: u64) {
        let token = match self.inner.store.get(SESSION_TOKEN_KEY).await {
            Ok(token) => token.filter(|t| !t.is_empty()),
            Err(e) => {
                warn!(error = %e, "Failed to read session token");
                None
            }
        };

        let Some(token) = token else {
            info!("No session token, user is signed out");
            self.finish(generation, SessionState::Unauthenticated);
            return;
        };

        let endpoint = self.inner.endpoint.clone();
        let outcome = self
            .inner
            .policy
            .run(|attempt| {
                let endpoint = endpoint.clone();
                let token = token.clone();
                async move {
                    debug!(attempt, "Checking session with auth endpoint");
                    endpoint.current_user(&token).await
                }
            })
            .await;

        let next = match outcome {
            RetryOutcome::Success(user) => {
                info!(user_id = user.id, "Session authenticated");
                SessionState::Authenticated(user)
            }
            RetryOutcome::Aborted { attempt, error } => {
                warn!(attempt, error = %error, "Session token rejected");
                if error.is_auth_rejection() {
                    self.discard_token(generation, &token).await;
                }
                SessionState::Unauthenticated
            }
            RetryOutcome::Exhausted {
                attempts,
                last_error,
            } => {
                warn!(
                    attempts,
                    error = %last_error,
                    kind = ?last_error.kind(),
                    "Could not verify session, keeping token"
                );
                SessionState::Unauthenticated
            }
        };

        self.finish(generation, next);
    }

    /// Remove a rejected token, unless a newer token has replaced it.
    async fn discard_token(&self, generation: u64, token: &str) {
        if !self.is_current(generation) {
            debug!("Token was replaced during reconciliation, not removing");
            return;
        }
        match self.inner.store.get(SESSION_TOKEN_KEY).await {
            Ok(Some(stored)) if stored == token => {
                if let Err(e) = self.inner.store.remove(SESSION_TOKEN_KEY).await {
                    warn!(error = %e, "Failed to remove rejected session token");
                }
            }
            Ok(_) => debug!("Persisted token changed, not removing"),
            Err(e) => warn!(error = %e, "Failed to read session token before removal"),
        }
    }

    /// Publish the result of reconciliation `generation` unless it was superseded.
    /// The generation check and the state write share one lock acquisition.
    fn finish(&self, generation: u64, state: SessionState) {
        let subscribers = {
            let mut shared = self.inner.shared();
            if !self.is_current(generation) {
                debug!(generation, "Discarding result of superseded reconciliation");
                return;
            }
            shared.phase = InitPhase::Done;
            Self::publish_locked(&mut shared, state.clone())
        };
        notify(&subscribers, &state);
    }

    fn publish_locked(shared: &mut Shared, state: SessionState) -> Vec<Callback> {
        shared.state = state;
        shared.subscribers.iter().map(|(_, cb)| cb.clone()).collect()
    }
}

fn notify(subscribers: &[Callback], state: &SessionState) {
    for callback in subscribers {
        callback(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ApiError;
    use crate::auth::credentials::MemoryStore;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use std::collections::HashMap;
    use std::time::Duration;
    use tokio::time::Instant;

    const BACKOFF: Duration = Duration::from_millis(5000);

    type Responder = Box<dyn Fn(&str, usize) -> Result<User, ApiError> + Send + Sync>;

    /// Answers from `responder(token, nth call for that token)` and records calls.
    struct ScriptedEndpoint {
        responder: Responder,
        calls: Mutex<Vec<(String, Instant)>>,
    }

    impl ScriptedEndpoint {
        fn new<F>(responder: F) -> Arc<Self>
        where
            F: Fn(&str, usize) -> Result<User, ApiError> + Send + Sync + 'static,
        {
            Arc::new(Self {
                responder: Box::new(responder),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }

        fn call_times(&self) -> Vec<Instant> {
            self.calls.lock().unwrap().iter().map(|(_, t)| *t).collect()
        }
    }

    #[async_trait]
    impl AuthEndpoint for ScriptedEndpoint {
        async fn current_user(&self, token: &str) -> Result<User, ApiError> {
            let nth = {
                let mut calls = self.calls.lock().unwrap();
                let nth = calls.iter().filter(|(t, _)| t == token).count();
                calls.push((token.to_string(), Instant::now()));
                nth
            };
            (self.responder)(token, nth)
        }
    }

    fn user(id: i64) -> User {
        User {
            id,
            email: format!("user{}@example.com", id),
            is_admin: false,
            last_login: None,
            created_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    fn test_config() -> Config {
        Config {
            backoff_ms: BACKOFF.as_millis() as u64,
            ..Config::default()
        }
    }

    async fn store_with_token(token: Option<&str>) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        if let Some(token) = token {
            store.set(SESSION_TOKEN_KEY, token).await.unwrap();
        }
        store
    }

    async fn persisted_token(store: &MemoryStore) -> Option<String> {
        store.get(SESSION_TOKEN_KEY).await.unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_token_is_unauthenticated_without_calls() {
        let creds = store_with_token(None).await;
        let endpoint = ScriptedEndpoint::new(|_, _| Ok(user(1)));
        let session = SessionStore::new(&test_config(), creds, endpoint.clone());

        session.initialize().await;

        assert_eq!(session.state(), SessionState::Unauthenticated);
        assert_eq!(session.phase(), InitPhase::Done);
        assert_eq!(endpoint.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_rejection_removes_token_without_retry() {
        for status in [401u16, 403] {
            let creds = store_with_token(Some("stale")).await;
            let endpoint = ScriptedEndpoint::new(move |_, _| {
                Err(ApiError::from_status(
                    reqwest::StatusCode::from_u16(status).unwrap(),
                    "",
                ))
            });
            let session = SessionStore::new(&test_config(), creds.clone(), endpoint.clone());

            session.initialize().await;

            assert_eq!(session.state(), SessionState::Unauthenticated);
            assert_eq!(persisted_token(&creds).await, None);
            assert_eq!(endpoint.call_count(), 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_errors_exhaust_and_keep_token() {
        let creds = store_with_token(Some("tok")).await;
        let endpoint =
            ScriptedEndpoint::new(|_, _| Err(ApiError::ServerError("boom".to_string())));
        let session = SessionStore::new(&test_config(), creds.clone(), endpoint.clone());

        session.initialize().await;

        assert_eq!(session.state(), SessionState::Unauthenticated);
        assert_eq!(persisted_token(&creds).await.as_deref(), Some("tok"));
        assert_eq!(endpoint.call_count(), 4);
        for pair in endpoint.call_times().windows(2) {
            assert!(pair[1] - pair[0] >= BACKOFF);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_responses_retry_and_keep_token() {
        let creds = store_with_token(Some("tok")).await;
        let endpoint = ScriptedEndpoint::new(|_, _| {
            Err(ApiError::InvalidResponse("Response has no user field".to_string()))
        });
        let session = SessionStore::new(&test_config(), creds.clone(), endpoint.clone());

        session.initialize().await;

        assert_eq!(session.state(), SessionState::Unauthenticated);
        assert_eq!(persisted_token(&creds).await.as_deref(), Some("tok"));
        assert_eq!(endpoint.call_count(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_after_failures() {
        let creds = store_with_token(Some("tok")).await;
        let endpoint = ScriptedEndpoint::new(|_, nth| {
            if nth < 2 {
                Err(ApiError::ServerError("warming up".to_string()))
            } else {
                Ok(user(9))
            }
        });
        let session = SessionStore::new(&test_config(), creds, endpoint.clone());

        session.initialize().await;

        assert_eq!(session.state(), SessionState::Authenticated(user(9)));
        assert_eq!(endpoint.call_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_initialize_is_idempotent() {
        let creds = store_with_token(Some("tok")).await;
        let endpoint = ScriptedEndpoint::new(|_, _| Ok(user(1)));
        let session = SessionStore::new(&test_config(), creds, endpoint.clone());

        session.initialize().await;
        session.initialize().await;

        assert!(session.state().is_authenticated());
        assert_eq!(endpoint.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_interactive_context_stays_unresolved() {
        let creds = store_with_token(Some("tok")).await;
        let endpoint = ScriptedEndpoint::new(|_, _| Ok(user(1)));
        let config = Config {
            interactive: false,
            ..test_config()
        };
        let session = SessionStore::new(&config, creds, endpoint.clone());

        session.initialize().await;

        assert_eq!(session.state(), SessionState::Unresolved);
        assert_eq!(session.phase(), InitPhase::NotStarted);
        assert_eq!(endpoint.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_logout_clears_everything_without_calls() {
        let creds = store_with_token(Some("tok")).await;
        creds.set(USER_DATA_KEY, "{}").await.unwrap();
        let endpoint = ScriptedEndpoint::new(|_, _| Ok(user(1)));
        let session = SessionStore::new(&test_config(), creds.clone(), endpoint.clone());

        session.initialize().await;
        assert!(session.state().is_authenticated());

        session.logout().await;

        assert_eq!(session.state(), SessionState::Unauthenticated);
        assert_eq!(persisted_token(&creds).await, None);
        assert_eq!(creds.get(USER_DATA_KEY).await.unwrap(), None);
        assert_eq!(endpoint.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_logout_from_fresh_store() {
        let creds = store_with_token(None).await;
        let endpoint = ScriptedEndpoint::new(|_, _| Ok(user(1)));
        let session = SessionStore::new(&test_config(), creds.clone(), endpoint.clone());

        session.logout().await;

        assert_eq!(session.state(), SessionState::Unauthenticated);
        assert_eq!(endpoint.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_session_token_matches_initialize() {
        let responder = |token: &str, _: usize| match token {
            "good" => Ok(user(5)),
            _ => Err(ApiError::Unauthorized),
        };

        for token in ["good", "bad"] {
            let pre = store_with_token(Some(token)).await;
            let via_init = SessionStore::new(&test_config(), pre.clone(), ScriptedEndpoint::new(responder));
            via_init.initialize().await;

            let fresh = store_with_token(None).await;
            let via_set = SessionStore::new(&test_config(), fresh.clone(), ScriptedEndpoint::new(responder));
            let returned = via_set.set_session_token(token).await.unwrap();

            assert_eq!(returned, via_init.state());
            assert_eq!(via_set.state(), via_init.state());
            assert_eq!(persisted_token(&fresh).await, persisted_token(&pre).await);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_session_token_rejects_empty() {
        let creds = store_with_token(None).await;
        let endpoint = ScriptedEndpoint::new(|_, _| Ok(user(1)));
        let session = SessionStore::new(&test_config(), creds.clone(), endpoint.clone());

        let err = session.set_session_token("").await.unwrap_err();

        assert!(matches!(err, SessionError::EmptyToken));
        assert_eq!(persisted_token(&creds).await, None);
        assert_eq!(session.state(), SessionState::Unresolved);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_token_then_logout_with_memory_storage() {
        let config = Config {
            storage: crate::config::StorageBackend::Memory,
            ..test_config()
        };
        let creds = crate::auth::open_store(config.storage, None).await;
        let endpoint = ScriptedEndpoint::new(|_, _| Ok(user(1)));
        let session = SessionStore::new(&config, creds.clone(), endpoint);

        session.set_session_token("tok").await.unwrap();
        assert_eq!(creds.get(SESSION_TOKEN_KEY).await.unwrap().as_deref(), Some("tok"));

        session.logout().await;
        assert_eq!(creds.get(SESSION_TOKEN_KEY).await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribe_sees_current_and_transitions() {
        let creds = store_with_token(Some("tok")).await;
        let endpoint = ScriptedEndpoint::new(|_, _| Ok(user(3)));
        let session = SessionStore::new(&test_config(), creds, endpoint);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let subscription = session.subscribe(move |state| sink.lock().unwrap().push(state.clone()));

        let other = Arc::new(Mutex::new(0));
        let counter = other.clone();
        let _second = session.subscribe(move |_| *counter.lock().unwrap() += 1);

        session.initialize().await;
        session.logout().await;
        subscription.unsubscribe();
        session.set_session_token("tok").await.unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                SessionState::Unresolved,
                SessionState::Authenticated(user(3)),
                SessionState::Unauthenticated,
            ]
        );
        assert_eq!(*other.lock().unwrap(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_newer_token_wins_over_in_flight_retries() {
        let creds = store_with_token(Some("t1")).await;
        let endpoint = ScriptedEndpoint::new(|token, _| match token {
            "t2" => Ok(user(2)),
            _ => Err(ApiError::ServerError("down".to_string())),
        });
        let session = SessionStore::new(&test_config(), creds.clone(), endpoint.clone());

        let published = Arc::new(Mutex::new(Vec::new()));
        let sink = published.clone();
        let _sub = session.subscribe(move |state| sink.lock().unwrap().push(state.clone()));

        let background = session.clone();
        let first = tokio::spawn(async move { background.initialize().await });
        tokio::task::yield_now().await;
        assert_eq!(session.phase(), InitPhase::InProgress);

        let state = session.set_session_token("t2").await.unwrap();
        assert_eq!(state, SessionState::Authenticated(user(2)));

        first.await.unwrap();

        assert_eq!(session.state(), SessionState::Authenticated(user(2)));
        assert_eq!(persisted_token(&creds).await.as_deref(), Some("t2"));
        assert_eq!(
            *published.lock().unwrap(),
            vec![SessionState::Unresolved, SessionState::Authenticated(user(2))]
        );

        let calls: HashMap<String, usize> =
            endpoint
                .calls
                .lock()
                .unwrap()
                .iter()
                .fold(HashMap::new(), |mut acc, (t, _)| {
                    *acc.entry(t.clone()).or_default() += 1;
                    acc
                });
        assert_eq!(calls.get("t1"), Some(&4));
        assert_eq!(calls.get("t2"), Some(&1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_rejection_does_not_remove_new_token() {
        let creds = store_with_token(Some("t1")).await;
        let endpoint = ScriptedEndpoint::new(|token, nth| match (token, nth) {
            ("t1", 0) => Err(ApiError::ServerError("down".to_string())),
            ("t1", _) => Err(ApiError::Unauthorized),
            _ => Ok(user(2)),
        });
        let session = SessionStore::new(&test_config(), creds.clone(), endpoint);

        let background = session.clone();
        let first = tokio::spawn(async move { background.initialize().await });
        tokio::task::yield_now().await;

        session.set_session_token("t2").await.unwrap();
        first.await.unwrap();

        assert_eq!(persisted_token(&creds).await.as_deref(), Some("t2"));
        assert_eq!(session.state(), SessionState::Authenticated(user(2)));
    }

    /// Reads back a fixed token and refuses every write.
    struct ReadOnlyStore {
        token: String,
    }

    #[async_trait]
    impl CredentialStore for ReadOnlyStore {
        async fn get(&self, _key: &str) -> Result<Option<String>, StorageError> {
            Ok(Some(self.token.clone()))
        }

        async fn set(&self, _key: &str, _value: &str) -> Result<(), StorageError> {
            Err(StorageError::Unavailable("read-only".to_string()))
        }

        async fn remove(&self, _key: &str) -> Result<(), StorageError> {
            Ok(())
        }

        fn name(&self) -> &'static str {
            "read-only"
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_token_write_keeps_in_flight_bootstrap() {
        let creds = Arc::new(ReadOnlyStore {
            token: "t1".to_string(),
        });
        let endpoint =
            ScriptedEndpoint::new(|_, _| Err(ApiError::ServerError("down".to_string())));
        let session = SessionStore::new(&test_config(), creds, endpoint.clone());

        let background = session.clone();
        let first = tokio::spawn(async move { background.initialize().await });
        tokio::task::yield_now().await;

        let err = session.set_session_token("t2").await.unwrap_err();
        assert!(matches!(err, SessionError::Storage(StorageError::Unavailable(_))));

        first.await.unwrap();
        session.initialize().await;

        assert_eq!(session.state(), SessionState::Unauthenticated);
        assert_eq!(session.phase(), InitPhase::Done);
        assert_eq!(endpoint.call_count(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_token_write_before_bootstrap_leaves_store_untouched() {
        let creds = Arc::new(ReadOnlyStore {
            token: "t1".to_string(),
        });
        let endpoint = ScriptedEndpoint::new(|_, _| Ok(user(1)));
        let session = SessionStore::new(&test_config(), creds, endpoint.clone());

        assert!(session.set_session_token("t2").await.is_err());
        assert_eq!(session.phase(), InitPhase::NotStarted);

        session.initialize().await;
        assert_eq!(session.state(), SessionState::Authenticated(user(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_superseded_result_is_not_published() {
        let creds = store_with_token(None).await;
        let endpoint = ScriptedEndpoint::new(|_, _| Ok(user(1)));
        let session = SessionStore::new(&test_config(), creds, endpoint);

        let stale = session.inner.generation.load(Ordering::SeqCst);
        session.logout().await;

        let published = Arc::new(Mutex::new(Vec::new()));
        let sink = published.clone();
        let _sub = session.subscribe(move |state| sink.lock().unwrap().push(state.clone()));

        session.finish(stale, SessionState::Authenticated(user(1)));

        assert_eq!(session.state(), SessionState::Unauthenticated);
        assert_eq!(*published.lock().unwrap(), vec![SessionState::Unauthenticated]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_logout_during_retries_wins() {
        let creds = store_with_token(Some("tok")).await;
        let endpoint = ScriptedEndpoint::new(|_, nth| {
            if nth == 0 {
                Err(ApiError::ServerError("down".to_string()))
            } else {
                Ok(user(1))
            }
        });
        let session = SessionStore::new(&test_config(), creds.clone(), endpoint);

        let background = session.clone();
        let first = tokio::spawn(async move { background.initialize().await });
        tokio::task::yield_now().await;

        session.logout().await;
        first.await.unwrap();

        assert_eq!(session.state(), SessionState::Unauthenticated);
        assert_eq!(session.phase(), InitPhase::Done);
        assert_eq!(persisted_token(&creds).await, None);
    }
}
