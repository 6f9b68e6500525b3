//! Maps exchange error payloads onto the credential-revocation category.
//!
//! The venue does not use a dedicated status for expired sessions; it
//! answers with ordinary business-error envelopes whose code or message
//! reveals that supplemental authentication is required. Both lists are
//! plain configuration so operators can extend them without a rebuild.

/// Decides whether an error payload means the user's credentials are dead.
#[derive(Clone, Debug)]
pub struct AuthFailureClassifier {
    codes: Vec<String>,
    patterns: Vec<String>,
}

impl Default for AuthFailureClassifier {
    fn default() -> Self {
        Self {
            codes: vec!["100002001".into(), "100001005".into()],
            patterns: [
                "authentication failed",
                "unauthorized",
                "invalid credentials",
                "token expired",
                "session expired",
                "please re-login",
                "补充认证",
                "您必须完成此认证才能进入下一步",
            ]
            .into_iter()
            .map(str::to_string)
            .collect(),
        }
    }
}

impl AuthFailureClassifier {
    pub fn new(
        codes: impl IntoIterator<Item = String>,
        patterns: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            codes: codes.into_iter().collect(),
            patterns: patterns
                .into_iter()
                .map(|pattern| pattern.to_lowercase())
                .collect(),
        }
    }

    /// True when either the code is on the session-invalidation list or the
    /// message contains one of the configured substrings
    /// (case-insensitive).
    #[must_use]
    pub fn is_auth_failure(&self, code: Option<&str>, message: Option<&str>) -> bool {
        if let Some(code) = code {
            if self.codes.iter().any(|known| known == code) {
                return true;
            }
        }
        if let Some(message) = message {
            let message = message.to_lowercase();
            return self.patterns.iter().any(|pattern| message.contains(pattern));
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_on_code() {
        let classifier = AuthFailureClassifier::default();
        assert!(classifier.is_auth_failure(Some("100002001"), None));
        assert!(!classifier.is_auth_failure(Some("000000"), None));
    }

    #[test]
    fn matches_message_substrings_case_insensitively() {
        let classifier = AuthFailureClassifier::default();
        assert!(classifier.is_auth_failure(None, Some("Session Expired: log in again")));
        assert!(classifier.is_auth_failure(None, Some("account UNAUTHORIZED")));
        assert!(classifier.is_auth_failure(None, Some("补充认证失败")));
        assert!(classifier.is_auth_failure(None, Some("您必须完成此认证才能进入下一步")));
        assert!(!classifier.is_auth_failure(None, Some("insufficient balance")));
    }

    #[test]
    fn custom_lists_replace_defaults() {
        let classifier =
            AuthFailureClassifier::new(vec!["42".into()], vec!["mfa required".into()]);
        assert!(classifier.is_auth_failure(Some("42"), None));
        assert!(classifier.is_auth_failure(None, Some("MFA Required for this account")));
        assert!(!classifier.is_auth_failure(Some("100002001"), Some("session expired")));
    }
}
