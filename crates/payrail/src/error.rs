use thiserror::Error;

/// Stable error classification exposed to callers and HTTP clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Unauthenticated,
    Unauthorized,
    Validation,
    PriceExpired,
    InvalidTransaction,
    InsufficientConfirmations,
    ProviderUnavailable,
    SignatureInvalid,
    UnsupportedChain,
    StateConflict,
    Internal,
}

impl ErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::Unauthenticated => "UNAUTHENTICATED",
            ErrorKind::Unauthorized => "UNAUTHORIZED",
            ErrorKind::Validation => "VALIDATION",
            ErrorKind::PriceExpired => "PRICE_EXPIRED",
            ErrorKind::InvalidTransaction => "INVALID_TRANSACTION",
            ErrorKind::InsufficientConfirmations => "INSUFFICIENT_CONFIRMATIONS",
            ErrorKind::ProviderUnavailable => "PROVIDER_UNAVAILABLE",
            ErrorKind::SignatureInvalid => "SIGNATURE_INVALID",
            ErrorKind::UnsupportedChain => "UNSUPPORTED_CHAIN",
            ErrorKind::StateConflict => "STATE_CONFLICT",
            ErrorKind::Internal => "INTERNAL",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// Errors returned by payrail operations.
#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("authentication required: {0}")]
    Unauthenticated(String),

    #[error("not authorized: {0}")]
    Unauthorized(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("price quote expired at {price_ttl}")]
    PriceExpired { price_ttl: i64 },

    #[error("invalid transaction: {0}")]
    InvalidTransaction(String),

    #[error("insufficient confirmations: {current}/{required}")]
    InsufficientConfirmations { current: u64, required: u64 },

    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("signature invalid: {0}")]
    SignatureInvalid(String),

    #[error("unsupported chain: {0}")]
    UnsupportedChain(u64),

    #[error("state conflict: {0}")]
    StateConflict(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl PaymentError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PaymentError::NotFound(_) => ErrorKind::NotFound,
            PaymentError::Unauthenticated(_) => ErrorKind::Unauthenticated,
            PaymentError::Unauthorized(_) => ErrorKind::Unauthorized,
            PaymentError::Validation(_) => ErrorKind::Validation,
            PaymentError::PriceExpired { .. } => ErrorKind::PriceExpired,
            PaymentError::InvalidTransaction(_) => ErrorKind::InvalidTransaction,
            PaymentError::InsufficientConfirmations { .. } => {
                ErrorKind::InsufficientConfirmations
            }
            PaymentError::ProviderUnavailable(_) => ErrorKind::ProviderUnavailable,
            PaymentError::SignatureInvalid(_) => ErrorKind::SignatureInvalid,
            PaymentError::UnsupportedChain(_) => ErrorKind::UnsupportedChain,
            PaymentError::StateConflict(_) => ErrorKind::StateConflict,
            PaymentError::Internal(_) | PaymentError::Database(_) => ErrorKind::Internal,
            // Payloads we fail to (de)serialize are caller input problems.
            PaymentError::Serde(_) => ErrorKind::Validation,
        }
    }

    /// Whether a webhook sender should be asked to retry delivery.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Internal
    }
}
