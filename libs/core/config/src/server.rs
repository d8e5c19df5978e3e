use crate::{env_first, env_or_default, ConfigError, FromEnv};
use std::net::Ipv4Addr;

/// HTTP listener configuration for the health and query surface
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn new(host: String, port: u16) -> Self {
        Self { host, port }
    }

    /// Get the server address as "host:port"
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl FromEnv for ServerConfig {
    /// - HOST: defaults to 0.0.0.0
    /// - SERVER_PORT, falling back to PORT: defaults to 8080
    fn from_env() -> Result<Self, ConfigError> {
        let host = env_or_default("HOST", &Ipv4Addr::UNSPECIFIED.to_string());
        let port = match env_first(&["SERVER_PORT", "PORT"]) {
            Some(raw) => raw.parse().map_err(|e| ConfigError::ParseError {
                key: "SERVER_PORT".to_string(),
                details: format!("{}", e),
            })?,
            None => 8080,
        };

        Ok(Self { host, port })
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: Ipv4Addr::UNSPECIFIED.to_string(),
            port: 8080,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_config_from_env_with_defaults() {
        temp_env::with_vars_unset(["HOST", "SERVER_PORT", "PORT"], || {
            let config = ServerConfig::from_env().unwrap();
            assert_eq!(config.host, "0.0.0.0");
            assert_eq!(config.port, 8080);
            assert_eq!(config.address(), "0.0.0.0:8080");
        });
    }

    #[test]
    fn test_server_port_takes_precedence_over_port() {
        temp_env::with_vars(
            [
                ("HOST", Some("127.0.0.1")),
                ("SERVER_PORT", Some("3000")),
                ("PORT", Some("9000")),
            ],
            || {
                let config = ServerConfig::from_env().unwrap();
                assert_eq!(config.address(), "127.0.0.1:3000");
            },
        );
    }

    #[test]
    fn test_port_fallback() {
        temp_env::with_vars(
            [("SERVER_PORT", None::<&str>), ("PORT", Some("9000"))],
            || {
                assert_eq!(ServerConfig::from_env().unwrap().port, 9000);
            },
        );
    }

    #[test]
    fn test_server_config_from_env_invalid_port() {
        temp_env::with_vars(
            [("SERVER_PORT", Some("99999")), ("PORT", None::<&str>)],
            || {
                let err = ServerConfig::from_env().unwrap_err();
                assert!(err.to_string().contains("SERVER_PORT"));
            },
        );
    }
}
