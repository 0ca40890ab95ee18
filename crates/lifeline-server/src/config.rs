use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Secrets shipped in sample `.env` files. Running with one is refused.
const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me-to-a-random-string",
    "dev-secret-change-me",
    "changeme",
    "secret",
];

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("LIFELINE_JWT_SECRET is unset or still a placeholder")]
    MissingSecret,

    #[error("{var} is not valid: '{value}'")]
    Invalid { var: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub jwt_secret: String,
    pub db_path: PathBuf,
    pub addr: SocketAddr,
    pub max_responders: u32,
    pub sweep_interval: Duration,
    /// Username promoted to super admin at startup.
    pub super_admin: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let jwt_secret = get("LIFELINE_JWT_SECRET")
            .filter(|s| !PLACEHOLDER_SECRETS.contains(&s.as_str()))
            .ok_or(ConfigError::MissingSecret)?;

        let host = get("LIFELINE_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port = get("LIFELINE_PORT").unwrap_or_else(|| "3000".into());
        let addr_raw = format!("{host}:{port}");
        let addr = addr_raw.parse().map_err(|_| ConfigError::Invalid {
            var: "LIFELINE_HOST/LIFELINE_PORT",
            value: addr_raw.clone(),
        })?;

        let max_responders = parse_or(&get, "LIFELINE_MAX_RESPONDERS", 3)?;
        if max_responders == 0 {
            return Err(ConfigError::Invalid {
                var: "LIFELINE_MAX_RESPONDERS",
                value: "0".into(),
            });
        }
        let sweep_secs: u64 = parse_or(&get, "LIFELINE_SWEEP_INTERVAL_SECS", 300)?;

        Ok(Self {
            jwt_secret,
            db_path: get("LIFELINE_DB_PATH").unwrap_or_else(|| "lifeline.db".into()).into(),
            addr,
            max_responders,
            sweep_interval: Duration::from_secs(sweep_secs.max(1)),
            super_admin: get("LIFELINE_SUPER_ADMIN").map(|s| s.trim().to_string()),
        })
    }
}

fn parse_or<T: std::str::FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match get(var) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { var, value }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let cfg = config(&[("LIFELINE_JWT_SECRET", "a-real-secret")]).unwrap();
        assert_eq!(cfg.addr, "0.0.0.0:3000".parse().unwrap());
        assert_eq!(cfg.db_path, PathBuf::from("lifeline.db"));
        assert_eq!(cfg.max_responders, 3);
        assert_eq!(cfg.sweep_interval, Duration::from_secs(300));
        assert!(cfg.super_admin.is_none());
    }

    #[test]
    fn placeholder_secret_is_refused() {
        assert_eq!(config(&[]).unwrap_err(), ConfigError::MissingSecret);
        assert_eq!(
            config(&[("LIFELINE_JWT_SECRET", "dev-secret-change-me")]).unwrap_err(),
            ConfigError::MissingSecret
        );
    }

    #[test]
    fn bad_numbers_name_the_variable() {
        let err = config(&[
            ("LIFELINE_JWT_SECRET", "a-real-secret"),
            ("LIFELINE_MAX_RESPONDERS", "lots"),
        ])
        .unwrap_err();
        assert_eq!(err.to_string(), "LIFELINE_MAX_RESPONDERS is not valid: 'lots'");

        assert!(config(&[("LIFELINE_JWT_SECRET", "a-real-secret"), ("LIFELINE_PORT", "http")]).is_err());
    }
}
