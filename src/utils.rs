//!
//! Utility types and functions for common patterns in the runtime.
//!
//! This module provides:
//! - [`Sensitive`] - A wrapper type for sensitive data that hides values in debug output
//! - [`replace_handlebars_with_env`] - Template substitution for environment variables
//! - [`request_id_for`] - Generates or preserves request IDs for correlation
//!

use {
    http::HeaderMap,
    regex::{Captures, Regex},
    serde::Deserialize,
    std::{env, sync::LazyLock},
    uuid::{ContextV7, Timestamp, Uuid},
    zeroize::{Zeroize, ZeroizeOnDrop},
};

/// Regular expression pattern for matching handlebars-style environment variable references.
/// Matches patterns like `{{ VAR_NAME }}` with optional whitespace around the variable name.
/// Variable names must be uppercase letters, digits, or underscores (standard env var naming).
static HANDLEBAR_REGEXP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*([A-Z0-9_]+)\s*\}\}").unwrap());

/// Header carrying the request correlation ID.
pub const X_REQUEST_ID: &str = "x-request-id";

/// A wrapper type for sensitive data that obscures the value in debug output
/// and securely zeros memory when dropped.
///
/// This type is useful for wrapping webhook secrets, basic auth passwords and
/// other values that should not be accidentally exposed in logs, error
/// messages, or debug output.
///
/// The inner value remains accessible through the public field `0`, but when
/// formatted using `Debug`, it displays as `Sensitive(****)` instead of the
/// actual value.
///
/// # Examples
///
/// ```
/// use svckit::Sensitive;
///
/// let secret = Sensitive::from("webhook-signing-key");
/// println!("{:?}", secret);  // Prints: Sensitive(****)
///
/// // Access the actual value when needed
/// let value: &str = &secret.0;
/// ```
///
/// Uses `ZeroizeOnDrop` from the `zeroize` crate to automatically zero memory
/// when dropped.
#[derive(Clone, Deserialize, Default, Zeroize, ZeroizeOnDrop)]
pub struct Sensitive<T: Default + Zeroize>(pub T);

impl Sensitive<String> {
    /// Creates a new `Sensitive<String>` from a string slice.
    pub fn from(s: &str) -> Self {
        Self(s.to_string())
    }

    /// Returns `true` when the wrapped string is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<T: Default + Zeroize + PartialEq> PartialEq for Sensitive<T> {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl<T: Default + Zeroize> std::fmt::Debug for Sensitive<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Sensitive(****)")
    }
}

/// Replaces handlebars-style environment variable references in a string.
///
/// Every `{{ VAR_NAME }}` occurrence is substituted with the value of the
/// corresponding environment variable. Missing variables substitute to the
/// empty string. This prevents sensitive information from being stored
/// directly in TOML configuration files.
pub fn replace_handlebars_with_env(text: &str) -> String {
    HANDLEBAR_REGEXP
        .replace_all(text, |caps: &Captures| {
            env::var(&caps[1]).unwrap_or_default()
        })
        .to_string()
}

/// Returns the request ID for an incoming request.
///
/// Preserves an existing `x-request-id` header when present; otherwise
/// generates a new UUIDv7. UUIDv7 IDs are time-ordered, which keeps log
/// correlation sortable across services.
pub fn request_id_for(headers: &HeaderMap) -> String {
    headers
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_owned)
        .unwrap_or_else(new_request_id)
}

/// Generates a fresh UUIDv7 request ID.
pub fn new_request_id() -> String {
    let ts = Timestamp::now(ContextV7::new());
    Uuid::new_v7(ts).to_string()
}

/// Returns the current wall-clock time as nanoseconds since the Unix epoch.
///
/// Used for document `cr_time`/`ch_time` stamps and action timestamps.
pub fn unix_nanos() -> i64 {
    chrono::Utc::now()
        .timestamp_nanos_opt()
        .unwrap_or_else(|| chrono::Utc::now().timestamp_micros().saturating_mul(1_000))
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    #[test]
    fn test_replace_handlebars_with_env_no_variables() {
        let input = "This is a plain string with no variables";
        let output = replace_handlebars_with_env(input);
        assert_eq!(output, input);
    }

    #[test]
    fn test_replace_handlebars_with_env_with_variables() {
        unsafe {
            env::set_var("SVCKIT_TEST_VAR", "test_value");
        }
        let input = "Value: {{ SVCKIT_TEST_VAR }}";
        let output = replace_handlebars_with_env(input);
        assert_eq!(output, "Value: test_value");
        unsafe {
            env::remove_var("SVCKIT_TEST_VAR");
        }
    }

    #[test]
    fn test_replace_handlebars_with_env_missing_variable() {
        unsafe {
            env::remove_var("SVCKIT_NONEXISTENT_VAR");
        }
        let input = "Value: {{ SVCKIT_NONEXISTENT_VAR }}";
        let output = replace_handlebars_with_env(input);
        assert_eq!(output, "Value: ");
    }

    #[test]
    fn test_replace_handlebars_with_env_whitespace() {
        unsafe {
            env::set_var("SVCKIT_SPACED_VAR", "value");
        }
        let input = "{{SVCKIT_SPACED_VAR}} {{ SVCKIT_SPACED_VAR }} {{  SVCKIT_SPACED_VAR  }}";
        let output = replace_handlebars_with_env(input);
        assert_eq!(output, "value value value");
        unsafe {
            env::remove_var("SVCKIT_SPACED_VAR");
        }
    }

    #[test]
    fn test_sensitive_debug_hides_value() {
        let secret = Sensitive::from("super-secret");
        assert_eq!(format!("{:?}", secret), "Sensitive(****)");
    }

    #[test]
    fn test_sensitive_value_accessible() {
        let secret = Sensitive::from("super-secret");
        assert_eq!(&secret.0, "super-secret");
        assert!(!secret.is_empty());
        assert!(Sensitive::from("").is_empty());
    }

    #[test]
    fn test_request_id_preserved_from_header() {
        let mut headers = HeaderMap::new();
        headers.insert(X_REQUEST_ID, HeaderValue::from_static("abc-123"));
        assert_eq!(request_id_for(&headers), "abc-123");
    }

    #[test]
    fn test_request_id_generated_when_absent() {
        let headers = HeaderMap::new();
        let id = request_id_for(&headers);
        assert!(Uuid::parse_str(&id).is_ok());
    }

    #[test]
    fn test_request_id_generated_when_empty() {
        let mut headers = HeaderMap::new();
        headers.insert(X_REQUEST_ID, HeaderValue::from_static(""));
        let id = request_id_for(&headers);
        assert!(!id.is_empty());
        assert!(Uuid::parse_str(&id).is_ok());
    }

    #[test]
    fn test_unix_nanos_monotonic_enough() {
        let a = unix_nanos();
        let b = unix_nanos();
        assert!(b >= a);
        // Sanity: the stamp is in nanoseconds, not seconds
        assert!(a > 1_600_000_000_000_000_000);
    }
}
