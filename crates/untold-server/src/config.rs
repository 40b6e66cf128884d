//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP (axum) API server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:5000`
    pub http_addr: SocketAddr,

    /// Explicit SQLite database path.  When unset the store picks the
    /// platform data directory.
    /// Env: `DATABASE_PATH`
    /// Default: unset.
    pub database_path: Option<PathBuf>,

    /// Filesystem path where proof uploads are stored.
    /// Env: `UPLOAD_DIR`
    /// Default: `./uploads`
    pub upload_dir: PathBuf,

    /// Maximum size of a single uploaded proof file (10 MiB).
    /// Env: `MAX_UPLOAD_SIZE`
    pub max_upload_size: usize,

    /// Admin API bearer token. Required to access /admin/* endpoints.
    /// Env: `ADMIN_TOKEN`
    /// Default: empty (admin API disabled).
    pub admin_token: Option<String>,

    /// HMAC secret for signing session tokens.
    /// Env: `JWT_SECRET`
    /// Default: a development-only value (a warning is logged).
    pub jwt_secret: String,

    /// How long an issued OTP stays valid, in minutes.
    /// Env: `OTP_TTL_MINUTES`
    /// Default: `10`
    pub otp_ttl_minutes: i64,

    /// Sustained request rate allowed per client IP (requests per second).
    /// Env: `RATE_LIMIT_PER_SEC`
    /// Default: `10.0`
    pub rate_limit_per_sec: f64,

    /// Burst capacity of the per-IP rate limiter.
    /// Env: `RATE_LIMIT_BURST`
    /// Default: `30.0`
    pub rate_limit_burst: f64,
}

/// Fallback signing secret for local development.
const DEV_JWT_SECRET: &str = "untold-dev-secret";

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], 5000).into(),
            database_path: None,
            upload_dir: PathBuf::from("./uploads"),
            max_upload_size: 10 * 1024 * 1024, // 10 MiB
            admin_token: None,
            jwt_secret: DEV_JWT_SECRET.to_string(),
            otp_ttl_minutes: 10,
            rate_limit_per_sec: 10.0,
            rate_limit_burst: 30.0,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default");
            }
        }

        if let Ok(path) = std::env::var("DATABASE_PATH") {
            if !path.is_empty() {
                config.database_path = Some(PathBuf::from(path));
            }
        }

        if let Ok(path) = std::env::var("UPLOAD_DIR") {
            if !path.is_empty() {
                config.upload_dir = PathBuf::from(path);
            }
        }

        if let Ok(val) = std::env::var("MAX_UPLOAD_SIZE") {
            if let Ok(n) = val.parse::<usize>() {
                config.max_upload_size = n;
            } else {
                tracing::warn!(value = %val, "Invalid MAX_UPLOAD_SIZE, using default");
            }
        }

        if let Ok(token) = std::env::var("ADMIN_TOKEN") {
            if !token.is_empty() {
                config.admin_token = Some(token);
            }
        }

        match std::env::var("JWT_SECRET") {
            Ok(secret) if !secret.is_empty() => config.jwt_secret = secret,
            _ => {
                tracing::warn!("JWT_SECRET not set, using development-only default");
            }
        }

        if let Ok(val) = std::env::var("OTP_TTL_MINUTES") {
            if let Ok(n) = val.parse::<i64>() {
                if n > 0 {
                    config.otp_ttl_minutes = n;
                }
            }
        }

        if let Ok(val) = std::env::var("RATE_LIMIT_PER_SEC") {
            if let Ok(n) = val.parse::<f64>() {
                config.rate_limit_per_sec = n;
            }
        }

        if let Ok(val) = std::env::var("RATE_LIMIT_BURST") {
            if let Ok(n) = val.parse::<f64>() {
                config.rate_limit_burst = n;
            }
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }
}
