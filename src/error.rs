//! Application-wide error handling
//!
//! This module provides a unified error system with proper HTTP status mapping,
//! user-friendly messages, and structured error codes for client handling.
//! Layer-specific errors (ledger, payments, database) convert into [`AppError`]
//! at the service boundary.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Machine-readable error codes for programmatic handling
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCode {
    // Domain errors (4xx)
    #[serde(rename = "INSUFFICIENT_BALANCE")]
    InsufficientBalance,
    #[serde(rename = "INVALID_AMOUNT")]
    InvalidAmount,
    #[serde(rename = "PAYMENT_NOT_FOUND")]
    PaymentNotFound,
    #[serde(rename = "BOOKING_NOT_FOUND")]
    BookingNotFound,
    #[serde(rename = "WALLET_NOT_FOUND")]
    WalletNotFound,
    #[serde(rename = "TRANSACTION_NOT_FOUND")]
    TransactionNotFound,
    #[serde(rename = "DUPLICATE_PAYMENT")]
    DuplicatePayment,
    #[serde(rename = "DUPLICATE_REFERENCE")]
    DuplicateReference,
    #[serde(rename = "INVALID_STATE_TRANSITION")]
    InvalidStateTransition,
    #[serde(rename = "PAYMENT_VERIFICATION_FAILED")]
    PaymentVerificationFailed,

    // Infrastructure errors (5xx)
    #[serde(rename = "DATABASE_ERROR")]
    DatabaseError,

    // External errors (502, 503, 504)
    #[serde(rename = "PAYMENT_GATEWAY_ERROR")]
    PaymentGatewayError,
    #[serde(rename = "RATE_LIMIT_ERROR")]
    RateLimitError,

    // Generic
    #[serde(rename = "INTERNAL_ERROR")]
    InternalError,
    #[serde(rename = "VALIDATION_ERROR")]
    ValidationError,
}

/// Business rule violations
#[derive(Debug, Clone)]
pub enum DomainError {
    /// Wallet does not hold enough available funds
    InsufficientBalance { available: String, requested: String },
    /// Amount is invalid (negative, zero, or too precise)
    InvalidAmount { amount: String, reason: String },
    PaymentNotFound { reference: String },
    BookingNotFound { booking_id: String },
    WalletNotFound { user_id: String },
    TransactionNotFound { transaction_id: String },
    /// Booking already has a successful payment
    DuplicatePayment { booking_id: String },
    /// External reference already belongs to another wallet
    DuplicateReference { reference: String },
    /// Payment is in a state that does not allow the requested move
    InvalidStateTransition {
        payment_id: String,
        from: String,
        to: String,
    },
    /// Gateway signature did not match; expected values are never exposed
    PaymentVerificationFailed,
}

/// Storage-level failures
#[derive(Debug, Clone)]
pub enum InfrastructureError {
    Database { message: String, is_retryable: bool },
}

/// External service errors
#[derive(Debug, Clone)]
pub enum ExternalError {
    /// Payment gateway error
    PaymentGateway {
        provider: String,
        message: String,
        is_retryable: bool,
    },
    /// Gateway asked us to back off
    RateLimit {
        service: String,
        retry_after: Option<u64>,
    },
}

/// Input validation errors
#[derive(Debug, Clone)]
pub enum ValidationError {
    /// Required field missing
    MissingField { field: String },
    /// Field has an unparseable or unsupported value
    InvalidFormat { field: String, reason: String },
    /// Field value out of acceptable range
    OutOfRange {
        field: String,
        min: Option<String>,
        max: Option<String>,
    },
}

/// Unified application error type
#[derive(Debug, Clone)]
pub struct AppError {
    pub kind: AppErrorKind,
    pub request_id: Option<String>,
}

#[derive(Debug, Clone)]
pub enum AppErrorKind {
    Domain(DomainError),
    Infrastructure(InfrastructureError),
    External(ExternalError),
    Validation(ValidationError),
}

impl AppError {
    pub fn new(kind: AppErrorKind) -> Self {
        Self {
            kind,
            request_id: None,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Map error to HTTP status code
    pub fn status_code(&self) -> u16 {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::InsufficientBalance { .. } => 422,
                DomainError::InvalidAmount { .. } => 400,
                DomainError::PaymentNotFound { .. } => 404,
                DomainError::BookingNotFound { .. } => 404,
                DomainError::WalletNotFound { .. } => 404,
                DomainError::TransactionNotFound { .. } => 404,
                DomainError::DuplicatePayment { .. } => 409,
                DomainError::DuplicateReference { .. } => 409,
                DomainError::InvalidStateTransition { .. } => 409,
                DomainError::PaymentVerificationFailed => 400,
            },
            AppErrorKind::Infrastructure(_) => 500,
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentGateway { is_retryable, .. } => {
                    if *is_retryable {
                        503
                    } else {
                        502
                    }
                }
                ExternalError::RateLimit { .. } => 429,
            },
            AppErrorKind::Validation(_) => 400,
        }
    }

    /// Get error code for client handling
    pub fn error_code(&self) -> ErrorCode {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::InsufficientBalance { .. } => ErrorCode::InsufficientBalance,
                DomainError::InvalidAmount { .. } => ErrorCode::InvalidAmount,
                DomainError::PaymentNotFound { .. } => ErrorCode::PaymentNotFound,
                DomainError::BookingNotFound { .. } => ErrorCode::BookingNotFound,
                DomainError::WalletNotFound { .. } => ErrorCode::WalletNotFound,
                DomainError::TransactionNotFound { .. } => ErrorCode::TransactionNotFound,
                DomainError::DuplicatePayment { .. } => ErrorCode::DuplicatePayment,
                DomainError::DuplicateReference { .. } => ErrorCode::DuplicateReference,
                DomainError::InvalidStateTransition { .. } => ErrorCode::InvalidStateTransition,
                DomainError::PaymentVerificationFailed => ErrorCode::PaymentVerificationFailed,
            },
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { .. } => ErrorCode::DatabaseError,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentGateway { .. } => ErrorCode::PaymentGatewayError,
                ExternalError::RateLimit { .. } => ErrorCode::RateLimitError,
            },
            AppErrorKind::Validation(_) => ErrorCode::ValidationError,
        }
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::InsufficientBalance { available, .. } => {
                    format!("Insufficient balance. Available: {}", available)
                }
                DomainError::InvalidAmount { amount, reason } => {
                    format!("Invalid amount '{}': {}", amount, reason)
                }
                DomainError::PaymentNotFound { reference } => {
                    format!("Payment '{}' not found", reference)
                }
                DomainError::BookingNotFound { booking_id } => {
                    format!("Booking '{}' not found", booking_id)
                }
                DomainError::WalletNotFound { user_id } => {
                    format!("Wallet for user '{}' not found", user_id)
                }
                DomainError::TransactionNotFound { transaction_id } => {
                    format!("Transaction '{}' not found", transaction_id)
                }
                DomainError::DuplicatePayment { .. } => "Booking already paid".to_string(),
                DomainError::DuplicateReference { reference } => {
                    format!("Reference '{}' has already been used", reference)
                }
                DomainError::InvalidStateTransition { from, to, .. } => {
                    format!("Payment cannot move from {} to {}", from, to)
                }
                DomainError::PaymentVerificationFailed => "Payment verification failed".to_string(),
            },
            AppErrorKind::Infrastructure(_) => {
                "Service temporarily unavailable. Please try again later".to_string()
            }
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentGateway {
                    provider,
                    is_retryable,
                    ..
                } => {
                    if *is_retryable {
                        format!(
                            "Payment gateway ({}) is temporarily unavailable. Please try again",
                            provider
                        )
                    } else {
                        "Payment processing failed. Please contact support".to_string()
                    }
                }
                ExternalError::RateLimit {
                    service,
                    retry_after,
                } => {
                    if let Some(secs) = retry_after {
                        format!(
                            "Rate limit exceeded for {}. Please try again in {} seconds",
                            service, secs
                        )
                    } else {
                        format!("Rate limit exceeded for {}. Please try again later", service)
                    }
                }
            },
            AppErrorKind::Validation(err) => match err {
                ValidationError::MissingField { field } => {
                    format!("Required field '{}' is missing", field)
                }
                ValidationError::InvalidFormat { field, reason } => {
                    format!("Invalid value for '{}': {}", field, reason)
                }
                ValidationError::OutOfRange { field, min, max } => match (min, max) {
                    (Some(min), Some(max)) => {
                        format!("Field '{}' must be between {} and {}", field, min, max)
                    }
                    (Some(min), None) => format!("Field '{}' must be at least {}", field, min),
                    (None, Some(max)) => format!("Field '{}' must be at most {}", field, max),
                    (None, None) => format!("Field '{}' is out of acceptable range", field),
                },
            },
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match &self.kind {
            AppErrorKind::Domain(_) => false,
            AppErrorKind::Infrastructure(InfrastructureError::Database { is_retryable, .. }) => {
                *is_retryable
            }
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentGateway { is_retryable, .. } => *is_retryable,
                ExternalError::RateLimit { .. } => true,
            },
            AppErrorKind::Validation(_) => false,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.user_message())
    }
}

impl std::error::Error for AppError {}

impl From<ValidationError> for AppError {
    fn from(err: ValidationError) -> Self {
        AppError::new(AppErrorKind::Validation(err))
    }
}

// From<DatabaseError> lives in database/error.rs, the service error conversions
// next to each service.

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_balance_error() {
        let error = AppError::new(AppErrorKind::Domain(DomainError::InsufficientBalance {
            available: "50.00".to_string(),
            requested: "100.00".to_string(),
        }));

        assert_eq!(error.status_code(), 422);
        assert_eq!(error.error_code(), ErrorCode::InsufficientBalance);
        assert_eq!(error.user_message(), "Insufficient balance. Available: 50.00");
        assert!(!error.is_retryable());
    }

    #[test]
    fn test_duplicate_payment_message() {
        let error = AppError::new(AppErrorKind::Domain(DomainError::DuplicatePayment {
            booking_id: "b-1".to_string(),
        }));

        assert_eq!(error.status_code(), 409);
        assert_eq!(error.user_message(), "Booking already paid");
    }

    #[test]
    fn test_verification_failure_is_generic() {
        let error = AppError::new(AppErrorKind::Domain(DomainError::PaymentVerificationFailed));

        assert_eq!(error.status_code(), 400);
        assert_eq!(error.error_code(), ErrorCode::PaymentVerificationFailed);
        assert_eq!(error.user_message(), "Payment verification failed");
    }

    #[test]
    fn test_gateway_error_status_depends_on_retryability() {
        let transient = AppError::new(AppErrorKind::External(ExternalError::PaymentGateway {
            provider: "razorpay".to_string(),
            message: "connection refused".to_string(),
            is_retryable: true,
        }));
        let permanent = AppError::new(AppErrorKind::External(ExternalError::PaymentGateway {
            provider: "razorpay".to_string(),
            message: "bad request".to_string(),
            is_retryable: false,
        }));

        assert_eq!(transient.status_code(), 503);
        assert!(transient.is_retryable());
        assert_eq!(permanent.status_code(), 502);
        assert!(!permanent.is_retryable());
    }

    #[test]
    fn test_validation_error() {
        let error = AppError::new(AppErrorKind::Validation(ValidationError::OutOfRange {
            field: "amount".to_string(),
            min: Some("0.01".to_string()),
            max: Some("250.00".to_string()),
        }))
        .with_request_id("req_1");

        assert_eq!(error.status_code(), 400);
        assert_eq!(error.error_code(), ErrorCode::ValidationError);
        assert_eq!(error.request_id.as_deref(), Some("req_1"));
        assert_eq!(
            error.user_message(),
            "Field 'amount' must be between 0.01 and 250.00"
        );
    }

    #[test]
    fn test_error_code_serialization() {
        let json = serde_json::to_string(&ErrorCode::InvalidStateTransition).unwrap();
        assert_eq!(json, "\"INVALID_STATE_TRANSITION\"");
    }
}
