//! Environment-based configuration types for the authorization server runtime.

use anyhow::Result;
use std::fmt;
use std::time::Duration;

use crate::errors::ConfigError;

/// HTTP server port configuration
#[derive(Clone)]
pub struct HttpPort(u16);

/// Secret used to derive an artifact encryption key; never printed
#[derive(Clone)]
pub struct ArtifactSecret(String);

/// Duration parsed with `duration-str` ("120s", "1h", "14d")
#[derive(Clone, Copy, Debug)]
pub struct ConfigDuration(chrono::Duration);

/// Point budget for a rate-limit bucket
#[derive(Clone, Copy, Debug)]
pub struct PointBudget(u32);

/// Boolean flag accepting true/false/1/0/yes/no/on/off
#[derive(Clone, Copy, Debug)]
pub struct BoolFlag(bool);

/// Per-artifact encryption secrets
#[derive(Clone, Debug)]
pub struct ArtifactSecrets {
    pub state: ArtifactSecret,
    pub authorization_code: ArtifactSecret,
    pub refresh_token: ArtifactSecret,
    pub ticket: ArtifactSecret,
}

/// Artifact lifetimes
#[derive(Clone, Debug)]
pub struct ArtifactLifetimes {
    pub state: ConfigDuration,
    pub state_stale_after: ConfigDuration,
    pub authorization_code: ConfigDuration,
    pub refresh_token: ConfigDuration,
    pub ticket_retention: ConfigDuration,
    pub verify_email: ConfigDuration,
    pub password_reset: ConfigDuration,
    pub unblock_account: ConfigDuration,
    /// Idle lifetime of a login session
    pub session: ConfigDuration,
}

/// Budget and window of one rate-limit bucket
#[derive(Clone, Debug)]
pub struct RateLimitSettings {
    pub points: PointBudget,
    pub reset: ConfigDuration,
}

/// All rate-limit buckets
#[derive(Clone, Debug)]
pub struct RateLimitConfig {
    pub login: RateLimitSettings,
    pub failed_login: RateLimitSettings,
    pub forgot_password: RateLimitSettings,
    pub user_info: RateLimitSettings,
}

/// Main application configuration
#[derive(Clone)]
pub struct Config {
    pub version: String,
    pub http_port: HttpPort,
    pub external_base: String,
    pub storage_backend: String,
    pub database_url: Option<String>,
    pub secrets: ArtifactSecrets,
    pub lifetimes: ArtifactLifetimes,
    pub rate_limits: RateLimitConfig,
    pub access_token_expiry: ConfigDuration,
    pub id_token_expiry: ConfigDuration,
    pub artifact_cleanup_interval: ConfigDuration,
    pub signing_key_path: Option<String>,
    pub signing_key_id: Option<String>,
    pub email_webhook_url: Option<String>,
    pub email_webhook_secret: Option<ArtifactSecret>,
    pub ticket_redirect_url: String,
    pub cookie_secure: BoolFlag,
}

impl Config {
    /// Create a new configuration from environment variables
    pub fn new() -> Result<Self> {
        let external_base = require_env("EXTERNAL_BASE")?
            .trim_end_matches('/')
            .to_string();
        let http_port: HttpPort = default_env("HTTP_PORT", "8080").try_into()?;
        let storage_backend = default_env("STORAGE_BACKEND", "memory");
        let database_url = optional_env("DATABASE_URL");

        let secrets = ArtifactSecrets {
            state: require_secret("STATE_ENCRYPTION_KEY")?,
            authorization_code: require_secret("AUTHORIZATION_CODE_ENCRYPTION_KEY")?,
            refresh_token: require_secret("REFRESH_TOKEN_ENCRYPTION_KEY")?,
            ticket: require_secret("TICKET_ID_ENCRYPTION_KEY")?,
        };

        let lifetimes = ArtifactLifetimes {
            state: default_env("STATE_EXPIRY", "3600s").try_into()?,
            state_stale_after: default_env("STATE_STALE_AFTER", "1d").try_into()?,
            authorization_code: default_env("AUTHORIZATION_CODE_EXPIRY", "120s").try_into()?,
            refresh_token: default_env("REFRESH_TOKEN_EXPIRY", "86400s").try_into()?,
            ticket_retention: default_env("TICKET_RETENTION", "7d").try_into()?,
            verify_email: default_env("VERIFY_EMAIL_LIFETIME", "1d").try_into()?,
            password_reset: default_env("PASSWORD_RESET_LIFETIME", "1h").try_into()?,
            unblock_account: default_env("UNBLOCK_ACCOUNT_LIFETIME", "1d").try_into()?,
            session: positive_duration("SESSION_EXPIRY", default_env("SESSION_EXPIRY", "14d"))?,
        };

        let rate_limits = RateLimitConfig {
            login: rate_limit_env("LOGIN_REQUEST_POINTS", "100", "LOGIN_RATE_LIMIT_RESET", "3600s")?,
            failed_login: rate_limit_env(
                "FAILED_LOGIN_REQUEST_POINTS",
                "10",
                "FAILED_LOGIN_RATE_LIMIT_RESET",
                "3600s",
            )?,
            forgot_password: rate_limit_env(
                "FORGOT_PASSWORD_POINTS",
                "10",
                "FORGOT_PASSWORD_RATE_LIMIT_RESET",
                "3600s",
            )?,
            user_info: rate_limit_env("USER_INFO_POINTS", "10", "USER_INFO_RATE_LIMIT_RESET", "60s")?,
        };

        let access_token_expiry = default_env("ACCESS_TOKEN_EXPIRY", "86400s").try_into()?;
        let id_token_expiry = default_env("ID_TOKEN_EXPIRY", "36000s").try_into()?;
        let artifact_cleanup_interval = positive_duration(
            "ARTIFACT_CLEANUP_INTERVAL",
            default_env("ARTIFACT_CLEANUP_INTERVAL", "60s"),
        )?;
        let signing_key_path = optional_env("SIGNING_KEY_PATH").filter(|v| !v.is_empty());
        let signing_key_id = optional_env("SIGNING_KEY_ID").filter(|v| !v.is_empty());
        let email_webhook_url = optional_env("EMAIL_WEBHOOK_URL").filter(|v| !v.is_empty());
        let email_webhook_secret = optional_env("EMAIL_WEBHOOK_SECRET")
            .filter(|v| !v.is_empty())
            .map(ArtifactSecret);
        let ticket_redirect_url = optional_env("TICKET_REDIRECT_URL")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| format!("{}/account", external_base));
        let cookie_secure: BoolFlag = default_env("COOKIE_SECURE", "true").try_into()?;

        Ok(Self {
            version: version()?,
            http_port,
            external_base,
            storage_backend,
            database_url,
            secrets,
            lifetimes,
            rate_limits,
            access_token_expiry,
            id_token_expiry,
            artifact_cleanup_interval,
            signing_key_path,
            signing_key_id,
            email_webhook_url,
            email_webhook_secret,
            ticket_redirect_url,
            cookie_secure,
        })
    }
}

/// Get application version from build environment
pub fn version() -> Result<String> {
    option_env!("GIT_HASH")
        .or(option_env!("CARGO_PKG_VERSION"))
        .map(|val| val.to_string())
        .ok_or(ConfigError::VersionNotSet.into())
}

fn require_env(name: &str) -> Result<String> {
    std::env::var(name).map_err(|_| ConfigError::EnvVarRequired(name.to_string()).into())
}

fn require_secret(name: &str) -> Result<ArtifactSecret> {
    let value = require_env(name)?;
    if value.trim().is_empty() {
        return Err(ConfigError::EmptySecret(name.to_string()).into());
    }
    Ok(ArtifactSecret(value))
}

pub(crate) fn optional_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn default_env(name: &str, default_value: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default_value.to_string())
}

/// Parse a duration that must be longer than zero
fn positive_duration(name: &str, value: String) -> Result<ConfigDuration> {
    let duration: ConfigDuration = value.try_into()?;
    if *duration.as_ref() <= chrono::Duration::zero() {
        return Err(ConfigError::DurationNotPositive(name.to_string()).into());
    }
    Ok(duration)
}

fn rate_limit_env(
    points_name: &str,
    points_default: &str,
    reset_name: &str,
    reset_default: &str,
) -> Result<RateLimitSettings> {
    Ok(RateLimitSettings {
        points: default_env(points_name, points_default).try_into()?,
        reset: default_env(reset_name, reset_default).try_into()?,
    })
}

impl TryFrom<String> for HttpPort {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.is_empty() {
            Ok(Self(8080))
        } else {
            value
                .parse::<u16>()
                .map(Self)
                .map_err(|err| ConfigError::PortParsingFailed(err).into())
        }
    }
}

impl AsRef<u16> for HttpPort {
    fn as_ref(&self) -> &u16 {
        &self.0
    }
}

impl From<&str> for ArtifactSecret {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl ArtifactSecret {
    /// Expose the raw secret to key derivation
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ArtifactSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ArtifactSecret([redacted])")
    }
}

impl TryFrom<String> for ConfigDuration {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let duration: Duration = duration_str::parse(&value)
            .map_err(|e| ConfigError::DurationParsingFailed(value, e.to_string()))?;
        Ok(Self(chrono::Duration::from_std(duration)?))
    }
}

impl From<chrono::Duration> for ConfigDuration {
    fn from(value: chrono::Duration) -> Self {
        Self(value)
    }
}

impl AsRef<chrono::Duration> for ConfigDuration {
    fn as_ref(&self) -> &chrono::Duration {
        &self.0
    }
}

impl TryFrom<String> for PointBudget {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value
            .trim()
            .parse::<u32>()
            .map(Self)
            .map_err(|err| ConfigError::PointsParsingFailed(value, err).into())
    }
}

impl From<u32> for PointBudget {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl AsRef<u32> for PointBudget {
    fn as_ref(&self) -> &u32 {
        &self.0
    }
}

impl TryFrom<String> for BoolFlag {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(Self(true)),
            "false" | "0" | "no" | "off" => Ok(Self(false)),
            _ => Err(ConfigError::BoolParsingFailed(value).into()),
        }
    }
}

impl From<bool> for BoolFlag {
    fn from(value: bool) -> Self {
        Self(value)
    }
}

impl AsRef<bool> for BoolFlag {
    fn as_ref(&self) -> &bool {
        &self.0
    }
}

impl RateLimitSettings {
    pub fn new(points: u32, reset: chrono::Duration) -> Self {
        Self {
            points: points.into(),
            reset: reset.into(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            login: RateLimitSettings::new(100, chrono::Duration::hours(1)),
            failed_login: RateLimitSettings::new(10, chrono::Duration::hours(1)),
            forgot_password: RateLimitSettings::new(10, chrono::Duration::hours(1)),
            user_info: RateLimitSettings::new(10, chrono::Duration::minutes(1)),
        }
    }
}

impl Default for ArtifactLifetimes {
    fn default() -> Self {
        Self {
            state: chrono::Duration::seconds(3600).into(),
            state_stale_after: chrono::Duration::days(1).into(),
            authorization_code: chrono::Duration::seconds(120).into(),
            refresh_token: chrono::Duration::seconds(86400).into(),
            ticket_retention: chrono::Duration::days(7).into(),
            verify_email: chrono::Duration::days(1).into(),
            password_reset: chrono::Duration::hours(1).into(),
            unblock_account: chrono::Duration::days(1).into(),
            session: chrono::Duration::days(14).into(),
        }
    }
}
