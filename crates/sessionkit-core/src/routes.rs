//! Route parameter extraction for the magic-link verification page.
//!
//! Patterns use `[name]` segments for parameters, e.g. `/auth/verify/[token]`.

use std::collections::HashMap;

use serde::Serialize;

/// The verification page, reached from the emailed sign-in link.
pub const VERIFY_ROUTE: &str = "/auth/verify/[token]";

/// The verification page is never prerendered.
pub const VERIFY_PRERENDER: bool = false;

pub type RouteParams = HashMap<String, String>;

/// Data handed to the verification page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerifyPageData {
    pub token: String,
}

/// Pass the `token` parameter through untouched.
pub fn load_verify(params: &RouteParams) -> Option<VerifyPageData> {
    params.get("token").map(|token| VerifyPageData {
        token: token.clone(),
    })
}

/// Match `path` against `pattern`, returning the `[name]` captures.
///
/// Query string and fragment are ignored. Captured values are not decoded.
pub fn match_route(pattern: &str, path: &str) -> Option<RouteParams> {
    let path = path.split(['?', '#']).next().unwrap_or_default();

    let pattern_segments: Vec<&str> = segments(pattern).collect();
    let path_segments: Vec<&str> = segments(path).collect();
    if pattern_segments.len() != path_segments.len() {
        return None;
    }

    let mut params = RouteParams::new();
    for (expected, actual) in pattern_segments.iter().zip(&path_segments) {
        match expected.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
            Some(name) => {
                params.insert(name.to_string(), actual.to_string());
            }
            None if expected == actual => {}
            None => return None,
        }
    }
    Some(params)
}

fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}
