use std::time::Duration;

use crate::{Error, Result};

/// Outbound egress strategy, selected once at startup.
#[derive(Debug, Clone, PartialEq)]
pub enum ProxyMode {
    /// Operator-provided account; each assignment bakes a fresh suffix into
    /// the username so the upstream hands out a distinct short-TTL identity.
    Rotating { host: String, port: u16, user: String, pass: String },
    /// Finite set of numbered upstream endpoints starting at `port_base`.
    Bucketed { host: String, port_base: u16, count: u16 },
}

/// Read-only service configuration, resolved from the environment at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_host: String,
    pub bind_port: u16,

    // Pool sizing and cadence
    pub pool_min_size: usize,
    pub released_idle_timeout: Duration,
    pub maintenance_tick: Duration,
    pub container_sweep_tick: Duration,

    // Session stores
    pub session_timeout: Duration,
    pub auth_timeout: Duration,
    pub session_sweep_tick: Duration,

    // Container driver
    pub container_image: String,
    pub container_network: String,
    pub container_label: String,
    pub devtools_port: u16,
    pub control_port: u16,
    pub docker_socket: String,
    pub create_timeout: Duration,
    pub ready_max_tries: u32,
    pub container_memory_mb: i64,
    pub container_cpus: f64,

    // Egress
    pub proxy: ProxyMode,

    // Crypto
    pub platform_key_available: bool,
    pub kds_endpoint: Option<String>,
    pub fallback_seed: Option<String>,

    // Target web application
    pub target_host: String,
    pub qr_login_url: String,
    pub profile_url: String,
    pub login_url_patterns: Vec<String>,
    pub download_url_patterns: Vec<String>,
    pub qr_placeholder_pattern: String,
    pub token_whitelist: Vec<String>,
}

fn var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn var_or(key: &str, default: &str) -> String {
    var(key).unwrap_or_else(|| default.to_string())
}

fn parse_var<T: std::str::FromStr>(key: &str, default: T) -> Result<T> {
    match var(key) {
        Some(raw) => raw
            .parse::<T>()
            .map_err(|_| Error::Internal(format!("invalid value for {key}: {raw}"))),
        None => Ok(default),
    }
}

fn secs_var(key: &str, default_secs: u64) -> Result<Duration> {
    Ok(Duration::from_secs(parse_var(key, default_secs)?))
}

fn list_var(key: &str, default: &[&str]) -> Vec<String> {
    match var(key) {
        Some(raw) => raw.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect(),
        None => default.iter().map(|s| s.to_string()).collect(),
    }
}

impl Config {
    /// Resolve configuration from the environment.
    ///
    /// Every knob has a default except the rotating-proxy credentials, which
    /// are required when `PROXY_MODE=rotating`.
    pub fn from_env() -> Result<Self> {
        let proxy = match var_or("PROXY_MODE", "bucketed").as_str() {
            "rotating" => ProxyMode::Rotating {
                host: var("PROXY_ROTATING_HOST")
                    .ok_or_else(|| Error::Internal("PROXY_ROTATING_HOST is required in rotating mode".into()))?,
                port: parse_var("PROXY_ROTATING_PORT", 1080u16)?,
                user: var("PROXY_ROTATING_USER")
                    .ok_or_else(|| Error::Internal("PROXY_ROTATING_USER is required in rotating mode".into()))?,
                pass: var("PROXY_ROTATING_PASS")
                    .ok_or_else(|| Error::Internal("PROXY_ROTATING_PASS is required in rotating mode".into()))?,
            },
            "bucketed" => ProxyMode::Bucketed {
                host: var_or("PROXY_BUCKET_HOST", "127.0.0.1"),
                port_base: parse_var("PROXY_BUCKET_PORT_BASE", 10800u16)?,
                count: parse_var("PROXY_BUCKET_COUNT", 8u16)?,
            },
            other => return Err(Error::Internal(format!("unknown PROXY_MODE: {other}"))),
        };

        let target_host = var_or("TARGET_HOST", "www.tiktok.com");

        Ok(Self {
            bind_host: var_or("HOST", "0.0.0.0"),
            bind_port: parse_var("PORT", 3000u16)?,

            pool_min_size: parse_var("POOL_MIN_SIZE", 6usize)?,
            released_idle_timeout: secs_var("RELEASED_IDLE_TIMEOUT_SECS", 600)?,
            maintenance_tick: secs_var("MAINTENANCE_TICK_SECS", 30)?,
            container_sweep_tick: secs_var("CONTAINER_SWEEP_TICK_SECS", 60)?,

            session_timeout: secs_var("SESSION_TIMEOUT_SECS", 3600)?,
            auth_timeout: secs_var("AUTH_TIMEOUT_SECS", 120)?,
            session_sweep_tick: secs_var("SESSION_SWEEP_TICK_SECS", 60)?,

            container_image: var_or("CONTAINER_IMAGE", "vantage-browser:latest"),
            container_network: var_or("CONTAINER_NETWORK", "vantage-net"),
            container_label: var_or("CONTAINER_LABEL", "vantage.pool"),
            devtools_port: parse_var("DEVTOOLS_PORT", 9222u16)?,
            control_port: parse_var("CONTROL_PORT", 9223u16)?,
            docker_socket: var_or("DOCKER_SOCKET", "/var/run/docker.sock"),
            create_timeout: secs_var("CONTAINER_CREATE_TIMEOUT_SECS", 60)?,
            ready_max_tries: parse_var("BROWSER_READY_MAX_TRIES", 10u32)?,
            container_memory_mb: parse_var("CONTAINER_MEMORY_MB", 2048i64)?,
            container_cpus: parse_var("CONTAINER_CPUS", 1.0f64)?,

            proxy,

            platform_key_available: var_or("PLATFORM_KEY_AVAILABLE", "false") == "true",
            kds_endpoint: var("PLATFORM_KDS_ENDPOINT"),
            fallback_seed: var("SESSION_KEY_SEED"),

            qr_login_url: var_or("QR_LOGIN_URL", &format!("https://{target_host}/login/qrcode")),
            profile_url: var_or("PROFILE_URL", &format!("https://{target_host}/foryou")),
            login_url_patterns: list_var("LOGIN_URL_PATTERNS", &["/login", "/qrcode", "/passport"]),
            download_url_patterns: list_var(
                "DOWNLOAD_URL_PATTERNS",
                &["/download", "app/download", "onelink"],
            ),
            qr_placeholder_pattern: var_or("QR_PLACEHOLDER_PATTERN", "qrcode-placeholder"),
            token_whitelist: list_var(
                "TOKEN_WHITELIST",
                &[
                    "sessionid",
                    "sessionid_ss",
                    "sid_tt",
                    "tt_webid",
                    "tt_webid_v2",
                    "ttwid",
                    "msToken",
                    "odin_tt",
                    "passport_csrf_token",
                ],
            ),
            target_host,
        })
    }

    /// Defaults with no environment lookups. Used by tests.
    pub fn for_tests() -> Self {
        Self {
            bind_host: "127.0.0.1".into(),
            bind_port: 0,
            pool_min_size: 2,
            released_idle_timeout: Duration::from_secs(600),
            maintenance_tick: Duration::from_secs(30),
            container_sweep_tick: Duration::from_secs(60),
            session_timeout: Duration::from_secs(3600),
            auth_timeout: Duration::from_secs(120),
            session_sweep_tick: Duration::from_secs(60),
            container_image: "vantage-browser:latest".into(),
            container_network: "vantage-net".into(),
            container_label: "vantage.pool".into(),
            devtools_port: 9222,
            control_port: 9223,
            docker_socket: "/var/run/docker.sock".into(),
            create_timeout: Duration::from_secs(60),
            ready_max_tries: 10,
            container_memory_mb: 2048,
            container_cpus: 1.0,
            proxy: ProxyMode::Bucketed { host: "127.0.0.1".into(), port_base: 10800, count: 8 },
            platform_key_available: false,
            kds_endpoint: None,
            fallback_seed: Some("test-seed".into()),
            target_host: "www.tiktok.com".into(),
            qr_login_url: "https://www.tiktok.com/login/qrcode".into(),
            profile_url: "https://www.tiktok.com/foryou".into(),
            login_url_patterns: vec!["/login".into(), "/qrcode".into(), "/passport".into()],
            download_url_patterns: vec!["/download".into(), "app/download".into(), "onelink".into()],
            qr_placeholder_pattern: "qrcode-placeholder".into(),
            token_whitelist: vec!["sessionid".into(), "tt_webid".into(), "msToken".into()],
        }
    }
}
