//! # Endpoint Policy Module
//!
//! Allow/deny decisions over resolved service endpoint URIs. A target must
//! fully match the allow pattern and must not match the deny pattern before
//! any remote call is dispatched. Patterns come from global configuration
//! and can be overridden per request.

use crate::types::AgoraError;
use regex::Regex;

/// Default allow pattern: any http(s) endpoint.
pub const DEFAULT_ALLOW: &str = "https?://.*";
/// Default deny pattern: matches nothing.
pub const DEFAULT_DENY: &str = "^$";

// =============================================================================
// ENDPOINT POLICY
// =============================================================================

/// A compiled allow/deny pattern pair over endpoint URIs.
#[derive(Debug, Clone)]
pub struct EndpointPolicy {
    allow: Regex,
    deny: Regex,
}

impl Default for EndpointPolicy {
    fn default() -> Self {
        // Built-in patterns are known-valid.
        Self {
            allow: anchor(DEFAULT_ALLOW).expect("default allow pattern compiles"),
            deny: anchor(DEFAULT_DENY).expect("default deny pattern compiles"),
        }
    }
}

/// Compile a pattern anchored for full-string matching.
fn anchor(pattern: &str) -> Result<Regex, regex::Error> {
    Regex::new(&format!("^(?:{pattern})$"))
}

impl EndpointPolicy {
    /// Compile a policy from allow and deny pattern strings.
    ///
    /// Both patterns match against the full endpoint URI.
    pub fn compile(allow: &str, deny: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            allow: anchor(allow)?,
            deny: anchor(deny)?,
        })
    }

    /// Check a resolved endpoint against the policy.
    pub fn check(&self, url: &str) -> Result<(), AgoraError> {
        if !self.allow.is_match(url) {
            return Err(AgoraError::PolicyDenied(format!(
                "{url} does not match the allow pattern"
            )));
        }
        if self.deny.is_match(url) {
            return Err(AgoraError::PolicyDenied(format!(
                "{url} matches the deny pattern"
            )));
        }
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_allows_https() {
        let policy = EndpointPolicy::default();
        assert!(policy.check("https://partner.example.com/api").is_ok());
        assert!(policy.check("http://partner.example.com/api").is_ok());
    }

    #[test]
    fn default_policy_rejects_other_schemes() {
        let policy = EndpointPolicy::default();
        assert!(policy.check("file:///etc/passwd").is_err());
        assert!(policy.check("local:prognosis").is_err());
    }

    #[test]
    fn deny_pattern_wins_over_allow() {
        let policy = EndpointPolicy::compile("https?://.*", ".*internal.*").expect("compiles");
        let err = policy.check("https://internal.example.com").expect_err("denied");
        assert!(matches!(err, AgoraError::PolicyDenied(_)));
        assert!(policy.check("https://partner.example.com").is_ok());
    }

    #[test]
    fn allow_pattern_is_full_match() {
        let policy = EndpointPolicy::compile("https://good.example.com", "^$").expect("compiles");
        // A URI merely containing the allowed prefix plus more host must not pass.
        assert!(policy.check("https://good.example.com.evil.net").is_err());
        assert!(policy.check("https://good.example.com").is_ok());
    }
}
