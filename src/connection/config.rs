//! Connection configuration module
//!
//! This module handles the host table (defaults plus per-host settings, with
//! glob patterns), loading it from TOML, YAML or JSON, `HOSTLINK_*`
//! environment overrides, and resolving a host name into a [`WinRmConfig`].

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

use super::winrm::auth::KerberosConfig;
use super::winrm::{
    WinRmAuth, WinRmConfig, WinRmProtocol, DEFAULT_CODEPAGE, DEFAULT_CONTEXT, DEFAULT_LOCALE,
    DEFAULT_MAX_ENVELOPE_SIZE, DEFAULT_OPERATION_TIMEOUT, DEFAULT_TIMEOUT,
};
use super::{ConnectionError, ConnectionResult};

/// Main connection configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Default settings for all connections
    #[serde(default)]
    pub defaults: HostConfig,

    /// Host-specific configurations, keyed by name or glob pattern
    #[serde(default)]
    pub hosts: HashMap<String, HostConfig>,
}

impl ConnectionConfig {
    /// Create a new connection config
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a file.
    ///
    /// The format follows the extension (`toml`, `yaml`/`yml`, `json`);
    /// anything else is tried as TOML, then YAML.
    pub fn from_file(path: impl AsRef<Path>) -> ConnectionResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            ConnectionError::InvalidConfig(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        let parsed: Result<Self, String> = match extension {
            "yml" | "yaml" => serde_yaml::from_str(&content).map_err(|e| e.to_string()),
            "json" => serde_json::from_str(&content).map_err(|e| e.to_string()),
            "toml" => toml::from_str(&content).map_err(|e| e.to_string()),
            _ => toml::from_str(&content)
                .or_else(|_| serde_yaml::from_str(&content))
                .map_err(|e| e.to_string()),
        };

        parsed.map_err(|e| {
            ConnectionError::InvalidConfig(format!(
                "Failed to parse config file {}: {}",
                path.display(),
                e
            ))
        })
    }

    /// Parse configuration from TOML string
    pub fn from_toml(content: &str) -> ConnectionResult<Self> {
        toml::from_str(content)
            .map_err(|e| ConnectionError::InvalidConfig(format!("Failed to parse config: {}", e)))
    }

    /// Per-user configuration file, `<config dir>/hostlink/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("hostlink").join("config.toml"))
    }

    /// Load from `path` (or the per-user file if it exists), then apply
    /// environment overrides
    pub fn load(path: Option<&Path>) -> ConnectionResult<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_path().filter(|p| p.is_file()) {
                Some(path) => Self::from_file(path)?,
                None => Self::default(),
            },
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply `HOSTLINK_*` environment variables to the defaults
    pub fn apply_env_overrides(&mut self) {
        // HOSTLINK_USER
        if let Ok(user) = std::env::var("HOSTLINK_USER") {
            self.defaults.username = Some(user);
        }

        // HOSTLINK_PASSWORD
        if let Ok(password) = std::env::var("HOSTLINK_PASSWORD") {
            self.defaults.password = Some(password);
        }

        // HOSTLINK_PORT
        if let Ok(port) = std::env::var("HOSTLINK_PORT") {
            match port.parse() {
                Ok(port) => self.defaults.port = Some(port),
                Err(_) => warn!(value = %port, "Ignoring invalid HOSTLINK_PORT"),
            }
        }

        // HOSTLINK_PROTOCOL
        if let Ok(protocol) = std::env::var("HOSTLINK_PROTOCOL") {
            match protocol.parse() {
                Ok(protocol) => self.defaults.protocol = Some(protocol),
                Err(_) => warn!(value = %protocol, "Ignoring invalid HOSTLINK_PROTOCOL"),
            }
        }

        // HOSTLINK_AUTH
        if let Ok(auth) = std::env::var("HOSTLINK_AUTH") {
            match auth.parse() {
                Ok(auth) => self.defaults.auth = Some(auth),
                Err(_) => warn!(value = %auth, "Ignoring invalid HOSTLINK_AUTH"),
            }
        }

        // HOSTLINK_OPERATION_TIMEOUT
        if let Ok(timeout) = std::env::var("HOSTLINK_OPERATION_TIMEOUT") {
            self.defaults.operation_timeout = Some(timeout);
        }

        // HOSTLINK_LOCALE
        if let Ok(locale) = std::env::var("HOSTLINK_LOCALE") {
            self.defaults.locale = Some(locale);
        }
    }

    /// Get configuration for a specific host
    pub fn get_host(&self, host: &str) -> Option<&HostConfig> {
        // First try exact match
        if let Some(config) = self.hosts.get(host) {
            return Some(config);
        }

        // Then try pattern matching
        self.hosts
            .iter()
            .filter(|(pattern, _)| pattern.contains('*') || pattern.contains('?'))
            .find(|(pattern, _)| matches_pattern(pattern, host))
            .map(|(_, config)| config)
    }

    /// Get configuration for a host, with defaults merged
    pub fn get_host_merged(&self, host: &str) -> HostConfig {
        self.get_host(host)
            .cloned()
            .unwrap_or_default()
            .merged_over(&self.defaults)
    }

    /// Add a host configuration
    pub fn add_host(&mut self, name: impl Into<String>, config: HostConfig) {
        self.hosts.insert(name.into(), config);
    }

    /// Resolve `host` into a complete WinRM configuration
    pub fn resolve(&self, host: &str) -> ConnectionResult<WinRmConfig> {
        let merged = self.get_host_merged(host);
        let protocol = merged.protocol.unwrap_or_default();

        let auth = match merged.auth.unwrap_or_default() {
            AuthMethod::Basic => WinRmAuth::basic(
                required(merged.username.clone(), "username")?,
                merged.password.clone().unwrap_or_default(),
            ),
            AuthMethod::Kerberos => {
                let section = merged.kerberos.clone().unwrap_or_default();
                WinRmAuth::kerberos(
                    required(merged.username.clone(), "username")?,
                    merged.password.clone().unwrap_or_default(),
                    section.into_kerberos_config(),
                )
            }
            AuthMethod::Token => WinRmAuth::token(required(merged.token.clone(), "token")?),
        };

        Ok(WinRmConfig {
            host: merged.hostname.unwrap_or_else(|| host.to_string()),
            port: merged.port.unwrap_or_else(|| protocol.default_port()),
            protocol,
            context: merged.context.unwrap_or_else(|| DEFAULT_CONTEXT.to_string()),
            auth,
            timeout: merged.timeout.unwrap_or(DEFAULT_TIMEOUT),
            ca_cert: merged
                .ca_cert
                .map(|path| expand_path(&path).display().to_string()),
            max_envelope_size: merged.envelope_size.unwrap_or(DEFAULT_MAX_ENVELOPE_SIZE),
            operation_timeout: merged
                .operation_timeout
                .unwrap_or_else(|| DEFAULT_OPERATION_TIMEOUT.to_string()),
            locale: merged.locale.unwrap_or_else(|| DEFAULT_LOCALE.to_string()),
            codepage: merged.codepage.unwrap_or(DEFAULT_CODEPAGE),
            receive_deadline: merged.receive_deadline,
            pipe_capacity: merged
                .pipe_capacity
                .unwrap_or(super::process::DEFAULT_PIPE_CAPACITY),
        })
    }
}

fn required(value: Option<String>, key: &str) -> ConnectionResult<String> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ConnectionError::ConfigurationMissing {
            key: key.to_string(),
        })
}

/// Authentication scheme selected in configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMethod {
    /// Basic authentication
    #[default]
    Basic,
    /// Kerberos via SPNEGO
    Kerberos,
    /// Pre-issued token
    Token,
}

impl FromStr for AuthMethod {
    type Err = ConnectionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "basic" => Ok(AuthMethod::Basic),
            "kerberos" | "negotiate" => Ok(AuthMethod::Kerberos),
            "token" => Ok(AuthMethod::Token),
            other => Err(ConnectionError::InvalidConfig(format!(
                "Unknown authentication method '{}'. Supported: basic, kerberos, token",
                other
            ))),
        }
    }
}

/// Kerberos settings of a host
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KerberosSection {
    /// Path of krb5.conf
    pub krb5_config: Option<String>,
    /// Path of the login configuration
    pub login_config: Option<String>,
    /// Use `HTTP/<host>` as service principal
    #[serde(default)]
    pub use_http_spn: bool,
    /// Append the port to the service principal
    #[serde(default)]
    pub add_port_to_spn: bool,
}

impl KerberosSection {
    fn into_kerberos_config(self) -> KerberosConfig {
        // Blank stays blank so the generator reports it as missing.
        let path = |value: Option<String>| {
            value.map(|v| {
                if v.trim().is_empty() {
                    PathBuf::new()
                } else {
                    expand_path(&v)
                }
            })
        };
        KerberosConfig {
            krb5_config: path(self.krb5_config),
            login_config: path(self.login_config),
            use_http_spn: self.use_http_spn,
            add_port_to_spn: self.add_port_to_spn,
        }
    }
}

/// Host-specific configuration
///
/// Every field is optional; unset fields fall back to the `defaults` section
/// and then to the built-in defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostConfig {
    /// Actual hostname or IP address
    pub hostname: Option<String>,

    /// Port to connect to
    pub port: Option<u16>,

    /// Transport protocol (http, https, https-lazy)
    pub protocol: Option<WinRmProtocol>,

    /// Authentication method (basic, kerberos, token)
    pub auth: Option<AuthMethod>,

    /// Endpoint context path
    pub context: Option<String>,

    /// Username for authentication
    pub username: Option<String>,

    /// Password for authentication
    #[serde(skip_serializing)]
    pub password: Option<String>,

    /// Access token for token authentication
    #[serde(skip_serializing)]
    pub token: Option<String>,

    /// WS-Man operation timeout, e.g. "PT60.000S"
    pub operation_timeout: Option<String>,

    /// Maximum envelope size in bytes
    pub envelope_size: Option<u32>,

    /// Locale
    pub locale: Option<String>,

    /// Console code page
    pub codepage: Option<u32>,

    /// HTTP connect timeout in seconds
    pub timeout: Option<u64>,

    /// Custom CA certificate for HTTPS
    pub ca_cert: Option<String>,

    /// Overall limit on polling a command's output, e.g. "10m"
    #[serde(default, with = "humantime_serde")]
    pub receive_deadline: Option<Duration>,

    /// Output pipe buffer size in bytes
    pub pipe_capacity: Option<usize>,

    /// Kerberos settings
    pub kerberos: Option<KerberosSection>,
}

impl HostConfig {
    /// Create a new host config
    pub fn new() -> Self {
        Self::default()
    }

    /// Set hostname
    pub fn hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    /// Set port
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Set protocol
    pub fn protocol(mut self, protocol: WinRmProtocol) -> Self {
        self.protocol = Some(protocol);
        self
    }

    /// Set username and password
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Set connect timeout
    pub fn timeout(mut self, timeout: u64) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Fill unset fields from `defaults`
    pub fn merged_over(self, defaults: &HostConfig) -> HostConfig {
        HostConfig {
            hostname: self.hostname.or_else(|| defaults.hostname.clone()),
            port: self.port.or(defaults.port),
            protocol: self.protocol.or(defaults.protocol),
            auth: self.auth.or(defaults.auth),
            context: self.context.or_else(|| defaults.context.clone()),
            username: self.username.or_else(|| defaults.username.clone()),
            password: self.password.or_else(|| defaults.password.clone()),
            token: self.token.or_else(|| defaults.token.clone()),
            operation_timeout: self
                .operation_timeout
                .or_else(|| defaults.operation_timeout.clone()),
            envelope_size: self.envelope_size.or(defaults.envelope_size),
            locale: self.locale.or_else(|| defaults.locale.clone()),
            codepage: self.codepage.or(defaults.codepage),
            timeout: self.timeout.or(defaults.timeout),
            ca_cert: self.ca_cert.or_else(|| defaults.ca_cert.clone()),
            receive_deadline: self.receive_deadline.or(defaults.receive_deadline),
            pipe_capacity: self.pipe_capacity.or(defaults.pipe_capacity),
            kerberos: self.kerberos.or_else(|| defaults.kerberos.clone()),
        }
    }
}

/// Check if a host matches a glob pattern
fn matches_pattern(pattern: &str, host: &str) -> bool {
    // Convert glob pattern to regex
    let regex_pattern = regex::escape(pattern)
        .replace(r"\*", ".*")
        .replace(r"\?", ".");

    Regex::new(&format!("^{}$", regex_pattern))
        .map(|re| re.is_match(host))
        .unwrap_or(false)
}

/// Helper to expand paths with ~ and environment variables
pub fn expand_path(path: &str) -> PathBuf {
    let expanded = shellexpand::full(path).unwrap_or_else(|_| path.into());
    PathBuf::from(expanded.as_ref())
}
