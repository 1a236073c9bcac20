//! CLI argument parsing, validation, and startup helpers.

use std::num::NonZeroU32;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::ServerConfig;
use crate::db::Database;
use crate::rate_limit::RateLimits;
use crate::session::{ReusePolicy, SessionSettings};
use crate::token::{
    ACCESS_TOKEN_VALIDITY_SECS, KEY_LEN, REFRESH_TOKEN_VALIDITY_SECS, TokenCodec,
};
use crate::upload::{DEFAULT_MAX_FILES, UploadLimits};

/// Longest accepted token lifetime: 10 years
const MAX_TOKEN_TTL_SECS: i64 = 10 * 365 * 24 * 60 * 60;

/// Environment variable holding the token key. Cleared once read.
pub const TOKEN_KEY_ENV: &str = "TOKEN_SYMMETRIC_KEY";

#[derive(clap::ValueEnum, Clone, Debug, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
    Compact,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "mediavault", about = "Multi-user media storage server")]
pub struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "8099")]
    pub port: u16,

    /// Path to SQLite database file
    #[arg(short, long, env = "MEDIAVAULT_DATABASE", default_value = "mediavault.db")]
    pub database: String,

    /// Directory uploaded files are stored under, one subdirectory per user
    #[arg(short, long, env = "MEDIAVAULT_UPLOAD_DIR", default_value = "uploads")]
    pub upload_dir: PathBuf,

    /// Path to a file containing the 32-byte token key. Prefer the TOKEN_SYMMETRIC_KEY env var instead
    #[arg(long)]
    pub token_key_file: Option<PathBuf>,

    /// Access token lifetime in seconds
    #[arg(long, env = "MEDIAVAULT_ACCESS_TTL_SECS", default_value_t = ACCESS_TOKEN_VALIDITY_SECS,
        value_parser = clap::value_parser!(i64).range(1..=MAX_TOKEN_TTL_SECS))]
    pub access_token_ttl_secs: i64,

    /// Refresh token (and session) lifetime in seconds
    #[arg(long, env = "MEDIAVAULT_REFRESH_TTL_SECS", default_value_t = REFRESH_TOKEN_VALIDITY_SECS,
        value_parser = clap::value_parser!(i64).range(1..=MAX_TOKEN_TTL_SECS))]
    pub refresh_token_ttl_secs: i64,

    /// Maximum number of files in one upload
    #[arg(long, env = "MEDIAVAULT_MAX_UPLOAD_FILES", default_value_t = DEFAULT_MAX_FILES,
        value_parser = parse_positive_usize)]
    pub max_upload_files: usize,

    /// Maximum size of a single uploaded file in MiB
    #[arg(long, env = "MEDIAVAULT_MAX_FILE_MIB", default_value = "100",
        value_parser = clap::value_parser!(u64).range(1..))]
    pub max_file_mib: u64,

    /// Seconds between storage usage reports
    #[arg(long, env = "MEDIAVAULT_USAGE_INTERVAL_SECS", default_value = "30",
        value_parser = clap::value_parser!(u64).range(1..))]
    pub usage_interval_secs: u64,

    /// Whether login extends an active session or always opens a new one
    #[arg(long, env = "MEDIAVAULT_SESSION_REUSE", default_value = "reuse-active")]
    pub session_reuse: ReusePolicy,

    /// Login attempts allowed per minute per client IP
    #[arg(long, default_value = "30")]
    pub login_rate_per_minute: NonZeroU32,

    /// Signups allowed per minute per client IP
    #[arg(long, default_value = "5")]
    pub signup_rate_per_minute: NonZeroU32,

    /// Take the client IP from X-Forwarded-For (only behind a trusted proxy)
    #[arg(long)]
    pub trust_proxy: bool,

    /// Log output format
    #[arg(short, long, default_value = "pretty")]
    pub log_format: LogFormat,
}

fn parse_positive_usize(s: &str) -> Result<usize, String> {
    match s.parse::<usize>() {
        Ok(0) => Err("must be at least 1".to_string()),
        Ok(n) => Ok(n),
        Err(e) => Err(e.to_string()),
    }
}

impl Args {
    pub fn upload_limits(&self) -> UploadLimits {
        UploadLimits {
            max_files: self.max_upload_files,
            max_file_bytes: self.max_file_mib.saturating_mul(1 << 20),
        }
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            access_ttl: ttl(self.access_token_ttl_secs),
            refresh_ttl: ttl(self.refresh_token_ttl_secs),
            policy: self.session_reuse,
        }
    }

    pub fn usage_interval(&self) -> Duration {
        Duration::from_secs(self.usage_interval_secs)
    }
}

/// Clap bounds the value; anything unrepresentable saturates and the token
/// codec refuses it.
fn ttl(secs: i64) -> chrono::Duration {
    chrono::Duration::try_seconds(secs).unwrap_or(chrono::Duration::MAX)
}

/// Initialize logging based on the specified format.
/// `RUST_LOG` overrides the default `info` level.
pub fn init_logging(format: &LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Pretty => builder.init(),
        LogFormat::Json => builder.json().init(),
        LogFormat::Compact => builder.compact().init(),
    }
}

/// Load the token key from the environment or a file.
/// Returns None and logs an error if the key cannot be loaded or has the wrong length.
pub fn load_token_key(token_key_file: Option<&std::path::Path>) -> Option<TokenCodec> {
    let key = if let Ok(key) = std::env::var(TOKEN_KEY_ENV) {
        // Clear the environment variable to prevent leaking
        // SAFETY: We're single-threaded at this point during startup,
        // and no other code is reading this environment variable.
        unsafe { std::env::remove_var(TOKEN_KEY_ENV) };
        key
    } else if let Some(path) = token_key_file {
        match std::fs::read_to_string(path) {
            Ok(content) => content.trim().to_string(),
            Err(e) => {
                error!(path = %path.display(), error = %e, "Failed to read token key file");
                return None;
            }
        }
    } else {
        error!(
            "Token key is required. Set {} (recommended) or use --token-key-file",
            TOKEN_KEY_ENV
        );
        return None;
    };

    match TokenCodec::new(key.as_bytes()) {
        Ok(codec) => Some(codec),
        Err(e) => {
            error!(error = %e, expected = KEY_LEN, "Invalid token key");
            None
        }
    }
}

/// Build ServerConfig from validated arguments.
pub fn build_config(
    args: &Args,
    db: Database,
    tokens: TokenCodec,
    shutdown: CancellationToken,
) -> ServerConfig {
    ServerConfig {
        db,
        tokens: Arc::new(tokens),
        upload_dir: args.upload_dir.clone(),
        sessions: args.session_settings(),
        upload_limits: args.upload_limits(),
        rate_limits: RateLimits {
            login_per_minute: args.login_rate_per_minute,
            user_create_per_minute: args.signup_rate_per_minute,
        },
        trust_proxy: args.trust_proxy,
        shutdown,
    }
}

/// Open the database, logging errors if it fails.
pub async fn open_database(path: &str) -> Option<Database> {
    match Database::open(path).await {
        Ok(db) => {
            info!(path = %path, "Database opened");
            Some(db)
        }
        Err(e) => {
            error!(path = %path, error = %e, "Failed to open database");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::try_parse_from(["mediavault"]).unwrap();
        assert_eq!(args.port, 8099);
        assert_eq!(args.session_reuse, ReusePolicy::ReuseActive);

        let limits = args.upload_limits();
        assert_eq!(limits.max_files, 20);
        assert_eq!(limits.max_file_bytes, 100 << 20);

        let settings = args.session_settings();
        assert_eq!(settings.access_ttl, chrono::Duration::minutes(15));
        assert_eq!(settings.refresh_ttl, chrono::Duration::hours(24));
        assert_eq!(args.usage_interval(), Duration::from_secs(30));
    }

    #[test]
    fn test_reuse_policy_flag() {
        let args = Args::try_parse_from(["mediavault", "--session-reuse", "always-new"]).unwrap();
        assert_eq!(args.session_reuse, ReusePolicy::AlwaysNew);
    }

    #[test]
    fn test_rejects_zero_limits() {
        assert!(Args::try_parse_from(["mediavault", "--max-upload-files", "0"]).is_err());
        assert!(Args::try_parse_from(["mediavault", "--max-file-mib", "0"]).is_err());
        assert!(Args::try_parse_from(["mediavault", "--access-token-ttl-secs", "0"]).is_err());
    }

    #[test]
    fn test_rejects_unrepresentable_token_lifetimes() {
        assert!(
            Args::try_parse_from(["mediavault", "--refresh-token-ttl-secs", "100000000000000"])
                .is_err()
        );
        let ten_years = MAX_TOKEN_TTL_SECS.to_string();
        let args =
            Args::try_parse_from(["mediavault", "--refresh-token-ttl-secs", ten_years.as_str()])
                .unwrap();
        assert_eq!(
            args.session_settings().refresh_ttl,
            chrono::Duration::seconds(MAX_TOKEN_TTL_SECS)
        );
        assert_eq!(ttl(i64::MAX), chrono::Duration::MAX);
    }
}
