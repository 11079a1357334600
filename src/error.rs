// src/error.rs
use thiserror::Error;
use warp::http::StatusCode;
use warp::reject::Reject;

/// Every failure a user action can produce. The `Display` text is what the
/// front-end shows, so keep it short and readable.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Invalid ticker symbol.")]
    InvalidTicker(String),

    #[error("Amount must be a positive whole number of shares (got {0}).")]
    InvalidAmount(i64),

    #[error("Unknown time range: {0}")]
    InvalidRange(String),

    #[error("Unsupported currency: {0}")]
    InvalidCurrency(String),

    #[error("Insufficient funds.")]
    InsufficientFunds { needed: f64, available: f64 },

    #[error("Insufficient shares to sell.")]
    InsufficientShares {
        ticker: String,
        held: i64,
        requested: i64,
    },

    #[error("Username already exists.")]
    DuplicateUsername(String),

    #[error("Invalid username or password")]
    AuthFailure,

    #[error("Not logged in or session expired.")]
    Unauthorized,

    #[error("No such user: {0}")]
    UnknownUser(String),

    #[error("{0}")]
    MissingField(&'static str),

    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Account store unavailable.")]
    StoreUnavailable,

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("Token error: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),

    #[error("Password hashing failed: {0}")]
    PasswordHash(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::InvalidTicker(_) => StatusCode::NOT_FOUND,
            AppError::InvalidAmount(_)
            | AppError::InvalidRange(_)
            | AppError::InvalidCurrency(_)
            | AppError::MissingField(_) => StatusCode::BAD_REQUEST,
            AppError::InsufficientFunds { .. } | AppError::InsufficientShares { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            AppError::DuplicateUsername(_) => StatusCode::CONFLICT,
            AppError::AuthFailure | AppError::Unauthorized | AppError::Token(_) => {
                StatusCode::UNAUTHORIZED
            }
            AppError::UnknownUser(_) => StatusCode::NOT_FOUND,
            AppError::ProviderUnavailable(_) => StatusCode::BAD_GATEWAY,
            AppError::StoreUnavailable | AppError::Storage(_) | AppError::PasswordHash(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl Reject for AppError {}

pub type Result<T> = std::result::Result<T, AppError>;
