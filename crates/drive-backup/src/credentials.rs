use std::collections::BTreeMap;
use std::fmt;

use crate::config::DriveConfig;

#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    user: String,
    access_token: String,
}

impl Credential {
    pub fn new(user: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            access_token: access_token.into(),
        }
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn access_token(&self) -> &str {
        &self.access_token
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("user", &self.user)
            .field("access_token", &"<redacted>")
            .finish()
    }
}

/// Supplies an authorization handle for a local user. `None` means the user has to go through
/// the permission flow before any remote action is possible; tokens are never refreshed here.
pub trait CredentialProvider: Send {
    fn credential(&self, user: &str) -> Option<Credential>;
}

#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    tokens: BTreeMap<String, String>,
}

impl StaticCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(mut self, user: impl Into<String>, token: impl Into<String>) -> Self {
        self.tokens.insert(user.into(), token.into());
        self
    }

    // Token comes from `drive.token`, falling back to the env var named by `drive.token_env`.
    pub fn from_config(user: &str, cfg: &DriveConfig) -> Self {
        let token = non_empty(cfg.token.as_deref()).or_else(|| {
            cfg.token_env
                .as_deref()
                .and_then(|k| std::env::var(k).ok())
                .and_then(|v| non_empty(Some(v.as_str())))
        });
        match token {
            Some(t) => Self::new().with_token(user, t),
            None => Self::new(),
        }
    }
}

impl CredentialProvider for StaticCredentials {
    fn credential(&self, user: &str) -> Option<Credential> {
        self.tokens
            .get(user)
            .map(|token| Credential::new(user, token.clone()))
    }
}

fn non_empty(v: Option<&str>) -> Option<String> {
    v.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credentials_are_scoped_per_user() {
        let creds = StaticCredentials::new().with_token("alice", "tok-a");
        assert_eq!(
            creds.credential("alice").map(|c| c.access_token().to_string()),
            Some("tok-a".into())
        );
        assert!(creds.credential("bob").is_none());
    }

    #[test]
    fn literal_token_wins_and_blank_is_ignored() {
        let cfg = DriveConfig {
            token: Some("  literal  ".into()),
            token_env: None,
            ..DriveConfig::default()
        };
        let c = StaticCredentials::from_config("alice", &cfg)
            .credential("alice")
            .expect("credential");
        assert_eq!(c.access_token(), "literal");

        let blank = DriveConfig {
            token: Some("   ".into()),
            token_env: None,
            ..DriveConfig::default()
        };
        assert!(StaticCredentials::from_config("alice", &blank).credential("alice").is_none());
    }

    #[test]
    fn debug_output_hides_the_token() {
        let c = Credential::new("alice", "secret-token");
        assert!(!format!("{c:?}").contains("secret-token"));
    }
}
