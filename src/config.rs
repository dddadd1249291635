//! TOML configuration for the `tundra-naming` and `tundra-storage`
//! binaries. Command-line flags overlay the file; anything still unset
//! falls back to the well-known defaults.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use serde::Deserialize;
use thiserror::Error;

use crate::naming::{REGISTRATION_PORT, SERVICE_PORT};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {reason}")]
    Io { path: String, reason: String },
    #[error("failed to parse {path}: {reason}")]
    Parse { path: String, reason: String },
}

async fn read(path: &std::path::Path) -> Result<String, ConfigError> {
    tokio::fs::read_to_string(path).await.map_err(|err| ConfigError::Io {
        path: path.display().to_string(),
        reason: err.to_string(),
    })
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct NamingConfig {
    /// Address both interfaces bind on; all interfaces by default.
    pub bind: Option<IpAddr>,
    pub service_port: Option<u16>,
    pub registration_port: Option<u16>,
}

impl NamingConfig {
    pub async fn load(path: &std::path::Path) -> Result<Self, ConfigError> {
        toml::from_str(&read(path).await?).map_err(|err| ConfigError::Parse {
            path: path.display().to_string(),
            reason: err.to_string(),
        })
    }

    /// Applies command-line values over the file's.
    pub fn overlay(
        mut self,
        bind: Option<IpAddr>,
        service_port: Option<u16>,
        registration_port: Option<u16>,
    ) -> Self {
        self.bind = bind.or(self.bind);
        self.service_port = service_port.or(self.service_port);
        self.registration_port = registration_port.or(self.registration_port);
        self
    }

    pub fn service_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr(), self.service_port.unwrap_or(SERVICE_PORT))
    }

    pub fn registration_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr(), self.registration_port.unwrap_or(REGISTRATION_PORT))
    }

    fn bind_addr(&self) -> IpAddr {
        self.bind.unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct StorageConfig {
    /// Local directory served by this storage server.
    pub root: Option<PathBuf>,
    /// Hostname under which this server is reachable by clients and the
    /// naming server.
    pub hostname: Option<String>,
    /// Address both interfaces bind on; all interfaces by default.
    pub bind: Option<IpAddr>,
    /// Zero or absent asks for a system-chosen port.
    pub client_port: Option<u16>,
    pub command_port: Option<u16>,
    pub naming_host: Option<String>,
    pub naming_port: Option<u16>,
}

impl StorageConfig {
    pub async fn load(path: &std::path::Path) -> Result<Self, ConfigError> {
        toml::from_str(&read(path).await?).map_err(|err| ConfigError::Parse {
            path: path.display().to_string(),
            reason: err.to_string(),
        })
    }

    #[allow(clippy::too_many_arguments)]
    pub fn overlay(
        mut self,
        root: Option<PathBuf>,
        hostname: Option<String>,
        bind: Option<IpAddr>,
        client_port: Option<u16>,
        command_port: Option<u16>,
        naming_host: Option<String>,
        naming_port: Option<u16>,
    ) -> Self {
        self.root = root.or(self.root);
        self.hostname = hostname.or(self.hostname);
        self.bind = bind.or(self.bind);
        self.client_port = client_port.or(self.client_port);
        self.command_port = command_port.or(self.command_port);
        self.naming_host = naming_host.or(self.naming_host);
        self.naming_port = naming_port.or(self.naming_port);
        self
    }

    pub fn hostname(&self) -> String {
        self.hostname.clone().unwrap_or_else(|| "127.0.0.1".to_owned())
    }

    pub fn client_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr(), self.client_port.unwrap_or(0))
    }

    pub fn command_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr(), self.command_port.unwrap_or(0))
    }

    /// Hostname and registration port of the naming server.
    pub fn naming(&self) -> (String, u16) {
        (
            self.naming_host.clone().unwrap_or_else(|| "127.0.0.1".to_owned()),
            self.naming_port.unwrap_or(REGISTRATION_PORT),
        )
    }

    fn bind_addr(&self) -> IpAddr {
        self.bind.unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn naming_defaults_use_well_known_ports() {
        let config: NamingConfig = toml::from_str("").unwrap();
        assert_eq!(config.service_addr().port(), SERVICE_PORT);
        assert_eq!(config.registration_addr().port(), REGISTRATION_PORT);
    }

    #[test]
    fn naming_file_values_parse() {
        let config: NamingConfig = toml::from_str(
            "bind = \"127.0.0.1\"\nservice_port = 7000\nregistration_port = 7001\n",
        )
        .unwrap();
        assert_eq!(config.service_addr().to_string(), "127.0.0.1:7000");
        assert_eq!(config.registration_addr().to_string(), "127.0.0.1:7001");
    }

    #[test]
    fn cli_overlay_wins_over_the_file() {
        let config: NamingConfig = toml::from_str("service_port = 7000").unwrap();
        let config = config.overlay(None, Some(8000), None);
        assert_eq!(config.service_addr().port(), 8000);
        assert_eq!(config.registration_addr().port(), REGISTRATION_PORT);
    }

    #[test]
    fn storage_config_parses() {
        let config: StorageConfig = toml::from_str(
            "root = \"/srv/files\"\nhostname = \"files.example\"\nnaming_host = \"names.example\"\n",
        )
        .unwrap();
        assert_eq!(config.root.as_deref(), Some(std::path::Path::new("/srv/files")));
        assert_eq!(config.hostname(), "files.example");
        assert_eq!(config.naming(), ("names.example".to_owned(), REGISTRATION_PORT));
        assert_eq!(config.client_addr().port(), 0);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(toml::from_str::<NamingConfig>("prot = 1").is_err());
    }
}
