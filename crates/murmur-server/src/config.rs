use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, bail};

use murmur_gateway::GatewayConfig;

pub const DEFAULT_JWT_SECRET: &str = "dev-secret-change-me";

/// Process configuration, read from `MURMUR_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    pub service_name: String,

    /// Refuse `/ws` upgrades that carry no token.
    pub ws_require_auth: bool,

    pub gateway: GatewayConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unset keys take their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let mut gateway = GatewayConfig::default();
        gateway.outbound_queue = parse(&lookup, "MURMUR_WS_OUTBOUND_QUEUE", gateway.outbound_queue)?;
        if gateway.outbound_queue == 0 {
            bail!("MURMUR_WS_OUTBOUND_QUEUE must be at least 1");
        }
        gateway.error_frames = parse_bool(&lookup, "MURMUR_WS_ERROR_FRAMES", gateway.error_frames)?;
        let timeout_secs: u64 = parse(
            &lookup,
            "MURMUR_STORE_TIMEOUT_SECS",
            gateway.store_deadline.as_secs(),
        )?;
        if timeout_secs == 0 {
            bail!("MURMUR_STORE_TIMEOUT_SECS must be at least 1");
        }
        gateway.store_deadline = Duration::from_secs(timeout_secs);

        Ok(Self {
            host: get("MURMUR_HOST", "0.0.0.0"),
            port: parse(&lookup, "MURMUR_PORT", 8080)?,
            db_path: PathBuf::from(get("MURMUR_DB_PATH", "murmur.db")),
            jwt_secret: get("MURMUR_JWT_SECRET", DEFAULT_JWT_SECRET),
            service_name: get("MURMUR_SERVICE_NAME", "murmur"),
            ws_require_auth: parse_bool(&lookup, "MURMUR_WS_REQUIRE_AUTH", false)?,
            gateway,
        })
    }

    pub fn addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", self.host, self.port))
    }

    pub fn uses_default_secret(&self) -> bool {
        self.jwt_secret == DEFAULT_JWT_SECRET
    }
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("invalid value for {}: {:?}", key, raw)),
        None => Ok(default),
    }
}

fn parse_bool(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: bool) -> Result<bool> {
    let Some(raw) = lookup(key) else {
        return Ok(default);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => bail!("invalid value for {}: {:?}", key, raw),
    }
}
