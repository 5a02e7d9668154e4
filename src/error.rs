use crate::domain::ParseError;
use crate::provider::MixedProviders;
use crate::time::HumanDuration;
use http::StatusCode;

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Why a request could not be answered with a certificate.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Invalid domain: {0}")]
    InvalidDomain(String),
    #[error(transparent)]
    MixedProviders(#[from] MixedProviders),
    #[error("Failed to generate cert: status = {0}")]
    IssuanceFailed(i32),
    #[error("Timed out generating cert after {0}")]
    IssuanceTimedOut(HumanDuration),
    #[error("Timed out listing certs after {0}")]
    ListingTimedOut(HumanDuration),
    #[error("Internal error")]
    Internal(#[source] anyhow::Error),
}

impl ServiceError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::InvalidDomain(_)
            | ServiceError::MixedProviders(_)
            | ServiceError::IssuanceFailed(_) => StatusCode::UNAUTHORIZED,
            ServiceError::IssuanceTimedOut(_) | ServiceError::ListingTimedOut(_) => {
                StatusCode::GATEWAY_TIMEOUT
            }
            ServiceError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<ParseError> for ServiceError {
    fn from(err: ParseError) -> Self {
        ServiceError::InvalidDomain(err.input().to_string())
    }
}

impl From<anyhow::Error> for ServiceError {
    fn from(err: anyhow::Error) -> Self {
        ServiceError::Internal(err)
    }
}
