//! Orchestration of the credential validation pipeline.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use futures::FutureExt;

use crate::config::GatewayConfig;
use crate::credentials::Credentials;
use crate::error::ResourceError;
use crate::identity::{IdentityClient, IdentityProvider, TokenOutcome};
use crate::resource::{ResourceValidator, TokenValidator};

/// Terminal result of one validation call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationOutcome {
    Authenticated,
    /// No token could be obtained, whatever the reason.
    Unauthenticated,
    /// A token was issued but the resource refused it.
    Forbidden,
    InternalError,
}

impl ValidationOutcome {
    pub fn status_code(self) -> StatusCode {
        match self {
            ValidationOutcome::Authenticated => StatusCode::OK,
            ValidationOutcome::Unauthenticated => StatusCode::UNAUTHORIZED,
            ValidationOutcome::Forbidden => StatusCode::FORBIDDEN,
            ValidationOutcome::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ValidationOutcome::Authenticated => "authenticated",
            ValidationOutcome::Unauthenticated => "unauthenticated",
            ValidationOutcome::Forbidden => "forbidden",
            ValidationOutcome::InternalError => "internal_error",
        }
    }
}

/// Status code only; the reason for a failure is never disclosed.
impl IntoResponse for ValidationOutcome {
    fn into_response(self) -> Response {
        self.status_code().into_response()
    }
}

/// Runs token acquisition followed by resource validation.
///
/// Holds no per-request state, so one instance serves all concurrent
/// requests. Each step is attempted exactly once per call.
#[derive(Clone)]
pub struct CredentialValidationService {
    identity: Arc<dyn IdentityProvider>,
    validator: Arc<dyn TokenValidator>,
}

impl CredentialValidationService {
    pub fn new(identity: Arc<dyn IdentityProvider>, validator: Arc<dyn TokenValidator>) -> Self {
        Self {
            identity,
            validator,
        }
    }

    pub fn from_config(config: &GatewayConfig) -> Result<Self, reqwest::Error> {
        Ok(Self::new(
            Arc::new(IdentityClient::new(config)?),
            Arc::new(ResourceValidator::new(config)?),
        ))
    }

    /// Validate a credential pair, producing exactly one outcome.
    pub async fn validate(&self, credentials: &Credentials) -> ValidationOutcome {
        let username = credentials.username();
        let outcome = match AssertUnwindSafe(self.run(credentials)).catch_unwind().await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(error)) => {
                tracing::error!(
                    event = "validation_error",
                    username,
                    error = %error,
                    "an unexpected error occurred"
                );
                ValidationOutcome::InternalError
            }
            Err(_) => {
                tracing::error!(
                    event = "validation_panic",
                    username,
                    "credential validation aborted unexpectedly"
                );
                ValidationOutcome::InternalError
            }
        };

        tracing::info!(
            event = "validation_complete",
            username,
            outcome = outcome.as_str()
        );
        outcome
    }

    async fn run(&self, credentials: &Credentials) -> Result<ValidationOutcome, ResourceError> {
        let username = credentials.username();
        if !credentials.is_complete() {
            tracing::warn!(
                event = "token_acquisition_skipped",
                username,
                "empty username or password"
            );
            return Ok(ValidationOutcome::Unauthenticated);
        }

        tracing::debug!(event = "token_acquisition_start", username);
        // The token wipes itself on drop, so it is cleared on every path out
        // of this function, including `?` and unwinding.
        let token = match self.identity.acquire_token(credentials).await {
            TokenOutcome::Token(token) => token,
            TokenOutcome::NoToken => {
                tracing::info!(event = "token_acquisition_result", username, acquired = false);
                return Ok(ValidationOutcome::Unauthenticated);
            }
        };
        tracing::info!(
            event = "token_acquisition_result",
            username,
            acquired = true,
            "access token for {username} acquired"
        );

        let accepted = self.validator.validate(&token, username).await?;
        drop(token);

        tracing::info!(event = "token_validation_result", username, accepted);
        Ok(if accepted {
            ValidationOutcome::Authenticated
        } else {
            ValidationOutcome::Forbidden
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::credentials::AccessToken;

    struct FakeIdentity {
        issue: bool,
        calls: AtomicUsize,
    }

    impl FakeIdentity {
        fn issuing(issue: bool) -> Arc<Self> {
            Arc::new(Self {
                issue,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl IdentityProvider for FakeIdentity {
        async fn acquire_token(&self, _credentials: &Credentials) -> TokenOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.issue {
                TokenOutcome::Token(AccessToken::new("fake-token"))
            } else {
                TokenOutcome::NoToken
            }
        }
    }

    enum Verdict {
        Accept,
        Reject,
        Timeout,
        Panic,
    }

    struct FakeValidator {
        verdict: Verdict,
        calls: AtomicUsize,
    }

    impl FakeValidator {
        fn with(verdict: Verdict) -> Arc<Self> {
            Arc::new(Self {
                verdict,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl TokenValidator for FakeValidator {
        async fn validate(
            &self,
            token: &AccessToken,
            _username: &str,
        ) -> Result<bool, ResourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            assert_eq!(token.secret(), "fake-token");
            match self.verdict {
                Verdict::Accept => Ok(true),
                Verdict::Reject => Ok(false),
                Verdict::Timeout => Err(ResourceError::Timeout),
                Verdict::Panic => panic!("validator exploded"),
            }
        }
    }

    async fn run_with(issue: bool, verdict: Verdict) -> (ValidationOutcome, usize, usize) {
        let identity = FakeIdentity::issuing(issue);
        let validator = FakeValidator::with(verdict);
        let service = CredentialValidationService::new(identity.clone(), validator.clone());
        let outcome = service
            .validate(&Credentials::new("alice", "correct-horse"))
            .await;
        (
            outcome,
            identity.calls.load(Ordering::SeqCst),
            validator.calls.load(Ordering::SeqCst),
        )
    }

    #[tokio::test]
    async fn accepted_token_authenticates() {
        assert_eq!(
            run_with(true, Verdict::Accept).await,
            (ValidationOutcome::Authenticated, 1, 1)
        );
    }

    #[tokio::test]
    async fn missing_token_is_unauthenticated_without_validation() {
        assert_eq!(
            run_with(false, Verdict::Accept).await,
            (ValidationOutcome::Unauthenticated, 1, 0)
        );
    }

    #[tokio::test]
    async fn rejected_token_is_forbidden() {
        assert_eq!(
            run_with(true, Verdict::Reject).await,
            (ValidationOutcome::Forbidden, 1, 1)
        );
    }

    #[tokio::test]
    async fn validator_failure_is_internal_error() {
        assert_eq!(
            run_with(true, Verdict::Timeout).await,
            (ValidationOutcome::InternalError, 1, 1)
        );
    }

    #[tokio::test]
    async fn validator_panic_is_internal_error() {
        assert_eq!(
            run_with(true, Verdict::Panic).await,
            (ValidationOutcome::InternalError, 1, 1)
        );
    }

    #[tokio::test]
    async fn incomplete_credentials_skip_the_provider() {
        let identity = FakeIdentity::issuing(true);
        let validator = FakeValidator::with(Verdict::Accept);
        let service = CredentialValidationService::new(identity.clone(), validator.clone());

        let outcome = service.validate(&Credentials::new("alice", "")).await;

        assert_eq!(outcome, ValidationOutcome::Unauthenticated);
        assert_eq!(identity.calls.load(Ordering::SeqCst), 0);
        assert_eq!(validator.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn outcomes_map_to_status_codes() {
        assert_eq!(ValidationOutcome::Authenticated.status_code(), StatusCode::OK);
        assert_eq!(
            ValidationOutcome::Unauthenticated.status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(ValidationOutcome::Forbidden.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(
            ValidationOutcome::InternalError.status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
