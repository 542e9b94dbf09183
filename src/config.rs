use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use crate::error::ConfigError;
use crate::proxy::SecretMap;

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_UPSTREAM_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_MAX_BODY_BYTES: usize = 2 * 1024 * 1024;
pub const DEFAULT_BINANCE_BASE_URL: &str = "https://api.binance.com";

#[derive(Clone)]
pub struct BinanceConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
}

impl fmt::Debug for BinanceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BinanceConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("api_secret", &self.api_secret.as_ref().map(|_| "***"))
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: IpAddr,
    pub port: u16,
    pub upstream_timeout: Duration,
    pub max_body_bytes: usize,
    pub secrets: SecretMap,
    pub binance: BinanceConfig,
}

impl Config {
    /// Reads the process environment. Call `dotenv().ok()` first to pick up `.env`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // 空字符串视为未设置
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let bind_addr = match get("PROXY_BIND_ADDR") {
            Some(v) => v.trim().parse().map_err(|_| ConfigError::Invalid {
                key: "PROXY_BIND_ADDR",
                value: v,
            })?,
            None => IpAddr::V4(Ipv4Addr::LOCALHOST),
        };

        let port = match get("PROXY_PORT") {
            Some(v) => v.trim().parse().map_err(|_| ConfigError::Invalid {
                key: "PROXY_PORT",
                value: v,
            })?,
            None => DEFAULT_PORT,
        };

        let timeout_secs: u64 = match get("PROXY_UPSTREAM_TIMEOUT_SECS") {
            Some(v) => match v.trim().parse() {
                Ok(secs) if secs > 0 => secs,
                _ => {
                    return Err(ConfigError::Invalid {
                        key: "PROXY_UPSTREAM_TIMEOUT_SECS",
                        value: v,
                    })
                }
            },
            None => DEFAULT_UPSTREAM_TIMEOUT_SECS,
        };

        let max_body_bytes: usize = match get("PROXY_MAX_BODY_BYTES") {
            Some(v) => match v.trim().parse() {
                Ok(bytes) if bytes > 0 => bytes,
                _ => {
                    return Err(ConfigError::Invalid {
                        key: "PROXY_MAX_BODY_BYTES",
                        value: v,
                    })
                }
            },
            None => DEFAULT_MAX_BODY_BYTES,
        };

        let secrets = get("PROXY_SECRET_MASKS")
            .map(|masks| SecretMap::from_masks(&masks, &get))
            .unwrap_or_default();

        let binance = BinanceConfig {
            base_url: get("BINANCE_BASE_URL").unwrap_or_else(|| DEFAULT_BINANCE_BASE_URL.to_string()),
            api_key: get("BINANCE_API_KEY"),
            api_secret: get("BINANCE_API_SECRET"),
        };

        Ok(Self {
            bind_addr,
            port,
            upstream_timeout: Duration::from_secs(timeout_secs),
            max_body_bytes,
            secrets,
            binance,
        })
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.port)
    }
}
