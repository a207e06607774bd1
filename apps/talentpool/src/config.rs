use anyhow::{Context, Result};

/// Where table, auth and storage calls go.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendTarget {
    /// Hosted Supabase project.
    Supabase { url: String, anon_key: String },
    /// In-process backend seeded with demo data.
    Offline,
}

/// Application configuration loaded from environment variables.
/// Startup fails if the Supabase variables are missing outside offline mode.
#[derive(Debug, Clone)]
pub struct Config {
    pub backend: BackendTarget,
    pub cv_bucket: String,
    pub http_timeout_secs: u64,
    pub port: u16,
    pub rust_log: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        let offline = std::env::var("TALENTPOOL_OFFLINE")
            .map(|v| parse_flag(&v))
            .unwrap_or(false);
        let backend = if offline {
            BackendTarget::Offline
        } else {
            BackendTarget::Supabase {
                url: require_env("SUPABASE_URL")?,
                anon_key: require_env("SUPABASE_ANON_KEY")?,
            }
        };

        Ok(Config {
            backend,
            cv_bucket: std::env::var("CV_BUCKET").unwrap_or_else(|_| "cvs".to_string()),
            http_timeout_secs: std::env::var("HTTP_TIMEOUT_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse::<u64>()
                .context("HTTP_TIMEOUT_SECS must be a whole number of seconds")?,
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse::<u16>()
                .context("PORT must be a valid port number")?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        })
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
