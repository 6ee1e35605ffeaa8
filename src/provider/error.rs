use reqwest::StatusCode;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while interacting with the messaging provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider HTTP error: {0}")]
    Http(reqwest::Error),
    #[error("provider returned status {status}: {body}")]
    Service { status: StatusCode, body: String },
    #[error("failed to decode provider response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("provider request timed out after {0:?}")]
    Timeout(Duration),
}

/// How the dispatch loop must treat a provider failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Worth retrying after a backoff: 5xx, connect failures, rate
    /// limits. The request is known not to have gone through.
    Transient,
    /// The request can never succeed as written (invalid recipient,
    /// rejected payload).
    Permanent,
    /// Credentials were revoked; the account needs reconnecting.
    AuthRevoked,
    /// The provider has put the account in a penalty box.
    AccountRestricted,
    /// The send may or may not have happened. Only the reconciler may
    /// decide what to do next; blind retries risk a duplicate send.
    Ambiguous,
}

impl ProviderError {
    pub fn class(&self) -> ErrorClass {
        match self {
            ProviderError::Timeout(_) => ErrorClass::Ambiguous,
            // A 2xx body we could not read: the send likely happened
            // but its disposition is unknown.
            ProviderError::Decode(_) => ErrorClass::Ambiguous,
            ProviderError::Http(err) if err.is_timeout() => ErrorClass::Ambiguous,
            ProviderError::Http(_) => ErrorClass::Transient,
            ProviderError::Service { status, .. } => match *status {
                StatusCode::UNAUTHORIZED => ErrorClass::AuthRevoked,
                StatusCode::FORBIDDEN => ErrorClass::AccountRestricted,
                StatusCode::TOO_MANY_REQUESTS => ErrorClass::Transient,
                status if status.is_server_error() => ErrorClass::Transient,
                _ => ErrorClass::Permanent,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(status: StatusCode) -> ProviderError {
        ProviderError::Service {
            status,
            body: String::new(),
        }
    }

    #[test]
    fn timeouts_are_ambiguous() {
        let err = ProviderError::Timeout(Duration::from_secs(30));
        assert_eq!(err.class(), ErrorClass::Ambiguous);
    }

    #[test]
    fn server_errors_and_rate_limits_are_transient() {
        assert_eq!(
            service(StatusCode::INTERNAL_SERVER_ERROR).class(),
            ErrorClass::Transient
        );
        assert_eq!(
            service(StatusCode::SERVICE_UNAVAILABLE).class(),
            ErrorClass::Transient
        );
        assert_eq!(
            service(StatusCode::TOO_MANY_REQUESTS).class(),
            ErrorClass::Transient
        );
    }

    #[test]
    fn client_errors_are_permanent_except_auth() {
        assert_eq!(service(StatusCode::BAD_REQUEST).class(), ErrorClass::Permanent);
        assert_eq!(
            service(StatusCode::UNPROCESSABLE_ENTITY).class(),
            ErrorClass::Permanent
        );
        assert_eq!(
            service(StatusCode::UNAUTHORIZED).class(),
            ErrorClass::AuthRevoked
        );
        assert_eq!(
            service(StatusCode::FORBIDDEN).class(),
            ErrorClass::AccountRestricted
        );
    }
}
