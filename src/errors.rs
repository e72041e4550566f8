//! Standardized error types following the `error-vsauth-<domain>-<number>` format.

use axum::response::{IntoResponse, Response};
use http::StatusCode;
use thiserror::Error;

use crate::oauth::rate_limit::RateLimitDecision;

/// Configuration errors that occur during application startup
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Error when a required environment variable is not set
    #[error("error-vsauth-config-1 {0} must be set")]
    EnvVarRequired(String),

    /// Error when PORT cannot be parsed
    #[error("error-vsauth-config-2 Parsing PORT into u16 failed: {0:?}")]
    PortParsingFailed(std::num::ParseIntError),

    /// Error when version information is not available
    #[error("error-vsauth-config-3 One of GIT_HASH or CARGO_PKG_VERSION must be set")]
    VersionNotSet,

    /// Error when duration string cannot be parsed
    #[error("error-vsauth-config-4 Failed to parse duration '{0}': {1}")]
    DurationParsingFailed(String, String),

    /// Error when boolean string cannot be parsed
    #[error(
        "error-vsauth-config-5 Failed to parse boolean '{0}': expected true/false/1/0/yes/no/on/off"
    )]
    BoolParsingFailed(String),

    /// Error when a point budget cannot be parsed
    #[error("error-vsauth-config-6 Failed to parse point budget '{0}': {1}")]
    PointsParsingFailed(String, std::num::ParseIntError),

    /// Error when an artifact secret is empty
    #[error("error-vsauth-config-7 {0} must not be empty")]
    EmptySecret(String),

    /// Error when the signing key file cannot be read
    #[error("error-vsauth-config-8 Unable to read signing key '{0}': {1}")]
    SigningKeyUnreadable(String, std::io::Error),

    /// Error when a duration that drives a timer is zero
    #[error("error-vsauth-config-9 {0} must be longer than zero")]
    DurationNotPositive(String),
}

/// Symmetric encryption errors
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Ciphertext is malformed, tampered with, or sealed with another key
    #[error("error-vsauth-crypto-1 Decryption failed")]
    DecryptionFailed,

    /// Sealing the plaintext failed
    #[error("error-vsauth-crypto-2 Encryption failed: {0}")]
    EncryptionFailed(String),
}

/// Database/storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    /// Error when database connection fails
    #[error("error-vsauth-storage-1 Database connection failed: {0}")]
    ConnectionFailed(String),

    /// Error when query execution fails
    #[error("error-vsauth-storage-2 Query execution failed: {0}")]
    QueryFailed(String),

    /// Error when a lock or data serialization fails
    #[error("error-vsauth-storage-3 Data serialization failed: {0}")]
    SerializationFailed(String),

    /// Error when database operation fails
    #[error("error-vsauth-storage-4 Database error: {0}")]
    DatabaseError(String),

    /// Error when data validation fails
    #[error("error-vsauth-storage-5 Invalid data: {0}")]
    InvalidData(String),

    /// Error when requested resource is not found
    #[error("error-vsauth-storage-6 Not found: {0}")]
    NotFound(String),
}

/// Outcome of a generic encrypted artifact lookup
#[derive(Debug, Error)]
pub enum ArtifactError {
    /// No live artifact matches the external id, or the id did not decrypt
    #[error("error-vsauth-artifact-1 Artifact not found")]
    NotFound,

    /// The artifact could not be sealed for storage
    #[error("error-vsauth-artifact-2 Artifact encryption failed: {0}")]
    Crypto(#[from] CryptoError),

    /// The backing store failed
    #[error("error-vsauth-artifact-3 Artifact storage failed: {0}")]
    Storage(#[from] StorageError),
}

/// Single generic rejection for authorization codes and refresh tokens
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GrantError {
    #[error("error-vsauth-grant-1 Grant rejected")]
    Rejected,
}

/// Ticket resolution outcomes that callers route to different pages
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TicketError {
    /// The ticket exists but its link lifetime has passed
    #[error("error-vsauth-ticket-1 Ticket expired")]
    Expired,

    /// The ticket never existed, was already used, or did not decrypt
    #[error("error-vsauth-ticket-2 Ticket not found")]
    NotFound,

    /// The action attached to the ticket could not be completed
    #[error("error-vsauth-ticket-3 Ticket action failed: {0}")]
    ActionFailed(String),

    /// The submitted password was used recently
    #[error(
        "error-vsauth-ticket-4 Password has previously been used. You may not reuse any of the last 3 passwords."
    )]
    PasswordReused,
}

/// Token endpoint errors
#[derive(Debug, Error)]
pub enum OAuthError {
    /// Malformed or missing request parameters
    #[error("error-vsauth-oauth-1 Invalid request: {0}")]
    InvalidRequest(String),

    /// Unsupported grant type
    #[error("error-vsauth-oauth-2 Unsupported grant type: {0}")]
    UnsupportedGrantType(String),

    /// Collapsed failure for every credential, artifact, or client check
    #[error("error-vsauth-oauth-3 Unauthorized: {0}")]
    Unauthorized(String),

    /// Unknown client or disallowed redirect at the authorize endpoint
    #[error("error-vsauth-oauth-4 Invalid client: {0}")]
    InvalidClient(String),

    /// Unsupported response type at the authorize endpoint
    #[error("error-vsauth-oauth-5 Unsupported response type: {0}")]
    UnsupportedResponseType(String),

    /// Server error
    #[error("error-vsauth-oauth-6 Server error: {0}")]
    ServerError(String),
}

/// A single invalid request field
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct FieldError {
    #[serde(rename = "fieldName")]
    pub field_name: String,
    #[serde(rename = "fieldError")]
    pub field_error: String,
}

impl FieldError {
    pub fn new(field_name: &str, field_error: &str) -> Self {
        Self {
            field_name: field_name.to_string(),
            field_error: field_error.to_string(),
        }
    }
}

/// Login endpoint errors
#[derive(Debug, Error)]
pub enum LoginError {
    /// Missing or malformed login fields
    #[error("error-vsauth-login-1 Validation failed")]
    Validation(Vec<FieldError>),

    /// State missing, stale, consumed, or bound to another client
    #[error("error-vsauth-login-2 Invalid state")]
    InvalidState,

    /// Unknown user or wrong password
    #[error("error-vsauth-login-3 Username or password is wrong")]
    InvalidCredentials,

    /// Login attempted from an IP listed in the user's blocked set
    #[error("error-vsauth-login-4 Account blocked for this address")]
    Blocked,

    /// Failed-login threshold breached; the IP has just been blocked
    #[error("error-vsauth-login-5 Account locked after repeated failures")]
    LockedOut(RateLimitDecision),

    /// Request budget exhausted
    #[error("error-vsauth-login-6 Too many requests")]
    RateLimited(RateLimitDecision),

    /// Store or crypto failure
    #[error("error-vsauth-login-7 Login failed: {0}")]
    Internal(String),
}

/// Userinfo endpoint errors
#[derive(Debug, Error)]
pub enum UserInfoError {
    /// Missing, malformed, expired, or foreign bearer token
    #[error("error-vsauth-userinfo-1 Invalid access token")]
    InvalidToken,

    /// Request budget exhausted
    #[error("error-vsauth-userinfo-2 Too many requests")]
    RateLimited(RateLimitDecision),

    /// Store failure
    #[error("error-vsauth-userinfo-3 Userinfo lookup failed: {0}")]
    Internal(String),
}

/// Password hashing errors
#[derive(Debug, Error)]
pub enum PasswordError {
    /// The password could not be hashed
    #[error("error-vsauth-password-1 Password hashing failed: {0}")]
    HashingFailed(String),
}

/// JWT signing errors
#[derive(Debug, Error)]
pub enum SigningError {
    /// Key material could not be parsed or generated
    #[error("error-vsauth-signing-1 Invalid signing key: {0}")]
    InvalidKey(String),

    /// Claims could not be signed
    #[error("error-vsauth-signing-2 Token signing failed: {0}")]
    SigningFailed(String),

    /// Presented token failed verification
    #[error("error-vsauth-signing-3 Token verification failed: {0}")]
    VerificationFailed(String),
}

/// Outbound email errors
#[derive(Debug, Error)]
pub enum NotificationError {
    /// Email payload could not be encoded
    #[error("error-vsauth-notification-1 Email encoding failed: {0}")]
    EncodingFailed(String),

    /// Transport rejected or failed to deliver the email
    #[error("error-vsauth-notification-2 Email delivery failed: {0}")]
    DeliveryFailed(String),
}

/// HTTP server errors
#[derive(Debug, Error)]
pub enum HttpError {
    /// Error when request processing fails
    #[error("error-vsauth-http-1 Request processing failed: {0}")]
    RequestProcessingFailed(String),
}

pub type Result<T> = std::result::Result<T, HttpError>;

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        tracing::error!(error = ?self, "internal server error");
        (StatusCode::INTERNAL_SERVER_ERROR).into_response()
    }
}
