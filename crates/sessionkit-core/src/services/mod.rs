//! Thin collaborators around the API client.
//!
//! - `Checkout`: create a checkout session and hand the URL to a `Navigator`
//! - `Tracker`: fire-and-forget analytics events

pub mod checkout;
pub mod tracking;

pub use checkout::{Checkout, Navigator, CHECKOUT_FAILED_MESSAGE};
pub use tracking::{format_event_name, Tracker};
