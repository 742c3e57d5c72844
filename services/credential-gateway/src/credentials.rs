//! Secret-bearing request values.
//!
//! Both types wipe their contents when dropped and never print their secrets
//! through `Debug`.

use std::fmt;

use serde::Deserialize;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Username/password pair submitted by a caller.
#[derive(Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct Credentials {
    username: String,
    password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// The plaintext password. Must never reach a log call.
    pub fn password(&self) -> &str {
        &self.password
    }

    /// Both fields carry something other than whitespace.
    pub fn is_complete(&self) -> bool {
        !self.username.trim().is_empty() && !self.password.is_empty()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Bearer token issued by the identity provider for one validation call.
#[derive(Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(transparent)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The raw bearer value, for building an `Authorization` header.
    pub fn secret(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AccessToken").field(&"[REDACTED]").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_output_hides_secrets() {
        let credentials = Credentials::new("alice", "hunter2");
        let token = AccessToken::new("eyJ0eXAi.secret");

        let rendered = format!("{credentials:?} {token:?}");
        assert!(rendered.contains("alice"));
        assert!(!rendered.contains("hunter2"));
        assert!(!rendered.contains("eyJ0eXAi"));
    }

    #[test]
    fn zeroize_clears_token_material() {
        let mut token = AccessToken::new("eyJ0eXAi.secret");
        token.zeroize();
        assert!(token.is_empty());

        let mut credentials = Credentials::new("alice", "hunter2");
        credentials.zeroize();
        assert!(credentials.password().is_empty());
        assert!(credentials.username().is_empty());
    }

    #[test]
    fn incomplete_credentials_are_detected() {
        assert!(Credentials::new("alice", "pw").is_complete());
        assert!(!Credentials::new("  ", "pw").is_complete());
        assert!(!Credentials::new("alice", "").is_complete());
    }

    #[test]
    fn credentials_deserialize_from_request_body() {
        let credentials: Credentials =
            serde_json::from_str(r#"{"username":"alice","password":"pw"}"#).expect("valid body");
        assert_eq!(credentials.username(), "alice");
        assert_eq!(credentials.password(), "pw");
    }
}
