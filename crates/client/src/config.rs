//! Client configuration.

use anyhow::{Context, Result};
use url::Url;

use crate::ws::ReconnectConfig;

const DEFAULT_GRAPHQL_ENDPOINT: &str = "http://localhost:3000/graphql";
const DEFAULT_SOCKET_URL: &str = "ws://localhost:3000/ws";

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// GraphQL endpoint for all request/response calls.
    pub graphql_endpoint: String,
    /// WebSocket endpoint for the realtime connection.
    pub socket_url: String,
    pub reconnect: ReconnectConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            graphql_endpoint: DEFAULT_GRAPHQL_ENDPOINT.to_string(),
            socket_url: DEFAULT_SOCKET_URL.to_string(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Read endpoints from `PINGLINE_GRAPHQL_ENDPOINT` and
    /// `PINGLINE_SOCKET_URL`, falling back to localhost defaults.
    pub fn from_env() -> Result<Self> {
        let graphql_endpoint = std::env::var("PINGLINE_GRAPHQL_ENDPOINT")
            .unwrap_or_else(|_| DEFAULT_GRAPHQL_ENDPOINT.to_string());
        let socket_url = std::env::var("PINGLINE_SOCKET_URL")
            .unwrap_or_else(|_| DEFAULT_SOCKET_URL.to_string());

        let config = Self {
            graphql_endpoint,
            socket_url,
            reconnect: ReconnectConfig::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let graphql = Url::parse(&self.graphql_endpoint)
            .with_context(|| format!("invalid GraphQL endpoint: {}", self.graphql_endpoint))?;
        if !matches!(graphql.scheme(), "http" | "https") {
            anyhow::bail!("GraphQL endpoint must be http(s): {}", self.graphql_endpoint);
        }
        let socket = Url::parse(&self.socket_url)
            .with_context(|| format!("invalid socket URL: {}", self.socket_url))?;
        if !matches!(socket.scheme(), "ws" | "wss") {
            anyhow::bail!("socket URL must be ws(s): {}", self.socket_url);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        ClientConfig::default().validate().unwrap();
    }

    #[test]
    fn wrong_schemes_are_rejected() {
        let mut config = ClientConfig {
            graphql_endpoint: "ws://localhost:3000/graphql".to_string(),
            ..ClientConfig::default()
        };
        assert!(config.validate().is_err());

        config = ClientConfig {
            socket_url: "http://localhost:3000/ws".to_string(),
            ..ClientConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
