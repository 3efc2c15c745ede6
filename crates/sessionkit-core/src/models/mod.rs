//! Data models for the session API.
//!
//! - `User`: the account record returned by `/auth/me`
//! - `MeResponse`: the envelope around it

pub mod user;

pub use user::{parse_timestamp, MeResponse, User};
