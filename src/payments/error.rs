use thiserror::Error;

pub type PaymentResult<T> = Result<T, PaymentError>;

#[derive(Debug, Clone, Error)]
pub enum PaymentError {
    #[error("Validation error: {message}")]
    ValidationError {
        message: String,
        field: Option<String>,
    },

    /// Credentials missing or still set to placeholders
    #[error("Gateway not configured: {message}")]
    NotConfigured { message: String },

    #[error("Network error: {message}")]
    NetworkError { message: String },

    #[error("Rate limit exceeded: {message}")]
    RateLimitError {
        message: String,
        retry_after_seconds: Option<u64>,
    },

    /// The operation has no meaning in sandbox mode
    #[error("Unavailable in test mode: {operation}")]
    TestModeUnsupported { operation: String },

    /// Non-success answer from the gateway's API
    #[error("{provider} rejected the request: {message}")]
    ProviderError {
        provider: String,
        message: String,
        provider_code: Option<String>,
        retryable: bool,
    },
}

impl PaymentError {
    /// Gateway could not be reached or used at all; no local state may change.
    pub fn is_gateway_unavailable(&self) -> bool {
        match self {
            PaymentError::NotConfigured { .. }
            | PaymentError::NetworkError { .. }
            | PaymentError::RateLimitError { .. } => true,
            PaymentError::ProviderError { retryable, .. } => *retryable,
            PaymentError::ValidationError { .. } | PaymentError::TestModeUnsupported { .. } => {
                false
            }
        }
    }
}

impl From<PaymentError> for crate::error::AppError {
    fn from(err: PaymentError) -> Self {
        use crate::error::{AppError, AppErrorKind, ExternalError, ValidationError};

        let kind = match &err {
            PaymentError::ValidationError { message, field } => {
                AppErrorKind::Validation(ValidationError::InvalidFormat {
                    field: field.clone().unwrap_or_else(|| "request".to_string()),
                    reason: message.clone(),
                })
            }
            PaymentError::RateLimitError {
                retry_after_seconds,
                ..
            } => AppErrorKind::External(ExternalError::RateLimit {
                service: "razorpay".to_string(),
                retry_after: *retry_after_seconds,
            }),
            _ => AppErrorKind::External(ExternalError::PaymentGateway {
                provider: "razorpay".to_string(),
                message: err.to_string(),
                is_retryable: err.is_gateway_unavailable(),
            }),
        };

        AppError::new(kind)
    }
}
