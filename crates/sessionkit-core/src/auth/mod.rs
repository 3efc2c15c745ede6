//! Authentication module for managing the user session and its credential.
//!
//! This module provides:
//! - `SessionStore`: observable session state reconciled against `/auth/me`
//! - `CredentialStore`: persistence for the session token (file, keyring or memory)
//!
//! Tokens survive restarts with the file and keyring backends and only
//! leave storage on logout or when the server rejects them.

pub mod credentials;
pub mod session;

pub use credentials::{
    open_store, CredentialStore, FallbackStore, FileStore, KeyringStore, MemoryStore,
    StorageError, SESSION_TOKEN_KEY, USER_DATA_KEY,
};
pub use session::{InitPhase, SessionError, SessionState, SessionStore, Subscription};
