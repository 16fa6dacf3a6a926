use crate::error::Error;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

/// Service configuration, loaded once from the environment at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server bind address. `BIND_ADDR` wins over `PORT`.
    pub bind_addr: SocketAddr,

    /// Active upstream provider name (`LLM_PROVIDER`).
    pub provider: String,

    /// Daily request limit per metered identity (`LIMIT_FOR_USER`).
    pub daily_limit: u32,

    /// Bound on a single upstream call (`UPSTREAM_TIMEOUT_SECS`).
    pub upstream_timeout: Duration,

    /// Interval between expired-record sweeps (`CLEANUP_INTERVAL_SECS`).
    pub cleanup_interval: Duration,

    /// Default log level when `RUST_LOG` is unset (`LOG_LEVEL`).
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, Error> {
        let port: u16 = env_or("PORT", 3001)?;
        let bind_addr = match std::env::var("BIND_ADDR") {
            Ok(raw) => raw
                .parse()
                .map_err(|_| Error::Configuration(format!("invalid BIND_ADDR '{}'", raw)))?,
            Err(_) => SocketAddr::from(([0, 0, 0, 0], port)),
        };

        let daily_limit: u32 = env_or("LIMIT_FOR_USER", 10)?;
        if daily_limit == 0 {
            return Err(Error::Configuration(
                "LIMIT_FOR_USER must be greater than zero".to_string(),
            ));
        }

        Ok(Config {
            bind_addr,
            provider: std::env::var("LLM_PROVIDER").unwrap_or_else(|_| "modelscope".to_string()),
            daily_limit,
            upstream_timeout: Duration::from_secs(env_or("UPSTREAM_TIMEOUT_SECS", 60u64)?),
            cleanup_interval: Duration::from_secs(env_or("CLEANUP_INTERVAL_SECS", 3600u64)?),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }
}

fn env_or<T>(key: &str, default: T) -> Result<T, Error>
where
    T: FromStr,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| Error::Configuration(format!("invalid {} '{}'", key, raw))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_or_returns_default_when_unset() {
        let value: u32 = env_or("REFINER_TEST_UNSET_VAR", 42).unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn test_env_or_rejects_garbage() {
        std::env::set_var("REFINER_TEST_GARBAGE_VAR", "not-a-number");
        let result: Result<u32, Error> = env_or("REFINER_TEST_GARBAGE_VAR", 0);
        assert!(result.is_err());
        std::env::remove_var("REFINER_TEST_GARBAGE_VAR");
    }
}
