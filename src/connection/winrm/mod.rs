//! Windows Remote Management (WinRM) connection module
//!
//! This module runs commands on Windows hosts through the WinRM remote shell
//! (WS-Management over HTTP or HTTPS).
//!
//! # Overview
//!
//! Each command gets its own remote shell. A worker task opens the shell,
//! starts the command, polls its output into the stdout/stderr pipes of a
//! [`RemoteProcess`], then terminates the command and deletes the shell:
//!
//! - [`envelope`]: SOAP request construction
//! - [`transport`]: HTTP delivery of requests ([`Connector`](transport::Connector))
//! - [`auth`]: `Authorization` header generation
//! - [`response`]: response parsing and value extraction
//! - [`shell`]: the shell session state machine
//!
//! # Example
//!
//! ```rust,ignore
//! use hostlink::connection::Connection;
//! use hostlink::connection::winrm::{WinRmAuth, WinRmConnectionBuilder, WinRmProtocol};
//!
//! let conn = WinRmConnectionBuilder::new("windows-host.example.com")
//!     .protocol(WinRmProtocol::Https)
//!     .auth(WinRmAuth::basic("Administrator", "password"))
//!     .build()?;
//!
//! let result = conn.execute("ipconfig /all", None).await?;
//! println!("Output: {}", result.stdout);
//! ```
//!
//! # Security Considerations
//!
//! - Basic authentication sends the password with every request; use HTTPS
//! - `HttpsLazy` skips certificate validation and is meant for lab hosts

pub mod auth;
pub mod envelope;
pub mod response;
pub mod shell;
pub mod transport;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use self::auth::{
    BasicTokenGenerator, GssMechanism, KerberosConfig, KerberosTokenGenerator,
    StaticTokenGenerator, TokenGenerator,
};
use self::envelope::{EnvelopeBuilder, EnvelopeParameters, WSMID_NS};
use self::shell::WinRmShell;
use self::transport::{Connector, HttpConnector};
use super::{
    CommandResult, Connection, ConnectionError, ConnectionResult, CredentialFingerprint,
    ExecuteOptions, RemoteProcess,
};

// ============================================================================
// Constants
// ============================================================================

/// Default WinRM HTTP port
pub const DEFAULT_WINRM_PORT: u16 = 5985;

/// Default WinRM HTTPS port
pub const DEFAULT_WINRM_SSL_PORT: u16 = 5986;

/// Default HTTP connect timeout in seconds
pub const DEFAULT_TIMEOUT: u64 = 30;

/// Default endpoint context path
pub const DEFAULT_CONTEXT: &str = "/wsman";

/// Default `MaxEnvelopeSize` in bytes
pub const DEFAULT_MAX_ENVELOPE_SIZE: u32 = 153600;

/// Default `OperationTimeout`
pub const DEFAULT_OPERATION_TIMEOUT: &str = "PT60.000S";

/// Default locale
pub const DEFAULT_LOCALE: &str = "en-US";

/// Default console code page (UTF-8)
pub const DEFAULT_CODEPAGE: u32 = 65001;

// ============================================================================
// Protocol and Authentication
// ============================================================================

/// How requests reach the endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WinRmProtocol {
    /// Plain HTTP
    #[default]
    Http,
    /// HTTPS with certificate validation
    Https,
    /// HTTPS accepting any certificate
    HttpsLazy,
}

impl WinRmProtocol {
    /// URL scheme
    pub fn scheme(self) -> &'static str {
        match self {
            WinRmProtocol::Http => "http",
            WinRmProtocol::Https | WinRmProtocol::HttpsLazy => "https",
        }
    }

    /// Port used when none is configured
    pub fn default_port(self) -> u16 {
        match self {
            WinRmProtocol::Http => DEFAULT_WINRM_PORT,
            WinRmProtocol::Https | WinRmProtocol::HttpsLazy => DEFAULT_WINRM_SSL_PORT,
        }
    }
}

impl FromStr for WinRmProtocol {
    type Err = ConnectionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "http" => Ok(WinRmProtocol::Http),
            "https" => Ok(WinRmProtocol::Https),
            "https-lazy" | "https_lazy" => Ok(WinRmProtocol::HttpsLazy),
            other => Err(ConnectionError::InvalidConfig(format!(
                "Unknown WinRM protocol '{}'. Supported: http, https, https-lazy",
                other
            ))),
        }
    }
}

impl fmt::Display for WinRmProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WinRmProtocol::Http => "http",
            WinRmProtocol::Https => "https",
            WinRmProtocol::HttpsLazy => "https-lazy",
        };
        f.write_str(name)
    }
}

/// WinRM authentication method
#[derive(Clone)]
pub enum WinRmAuth {
    /// Basic authentication
    Basic { username: String, password: String },
    /// Kerberos via SPNEGO
    Kerberos {
        username: String,
        password: String,
        kerberos: KerberosConfig,
    },
    /// Pre-issued token sent as the complete `Authorization` value
    Token { token: String },
}

impl WinRmAuth {
    /// Create Basic authentication
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        WinRmAuth::Basic {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Create Kerberos authentication
    pub fn kerberos(
        username: impl Into<String>,
        password: impl Into<String>,
        kerberos: KerberosConfig,
    ) -> Self {
        WinRmAuth::Kerberos {
            username: username.into(),
            password: password.into(),
            kerberos,
        }
    }

    /// Create token authentication
    pub fn token(token: impl Into<String>) -> Self {
        WinRmAuth::Token {
            token: token.into(),
        }
    }

    /// Get the authentication scheme name
    pub fn scheme(&self) -> &'static str {
        match self {
            WinRmAuth::Basic { .. } => "Basic",
            WinRmAuth::Kerberos { .. } => "Negotiate",
            WinRmAuth::Token { .. } => "Token",
        }
    }

    /// Get the username
    pub fn username(&self) -> &str {
        match self {
            WinRmAuth::Basic { username, .. } => username,
            WinRmAuth::Kerberos { username, .. } => username,
            WinRmAuth::Token { .. } => "",
        }
    }

    fn secret(&self) -> &str {
        match self {
            WinRmAuth::Basic { password, .. } => password,
            WinRmAuth::Kerberos { password, .. } => password,
            WinRmAuth::Token { token } => token,
        }
    }
}

impl Default for WinRmAuth {
    fn default() -> Self {
        WinRmAuth::basic("", "")
    }
}

impl fmt::Debug for WinRmAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WinRmAuth::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .field("password", &"***")
                .finish(),
            WinRmAuth::Kerberos {
                username, kerberos, ..
            } => f
                .debug_struct("Kerberos")
                .field("username", username)
                .field("password", &"***")
                .field("kerberos", kerberos)
                .finish(),
            WinRmAuth::Token { .. } => f.debug_struct("Token").field("token", &"***").finish(),
        }
    }
}

/// Supplies a fresh GSS mechanism for each Kerberos shell session
pub type GssProvider = Arc<dyn Fn() -> Box<dyn GssMechanism> + Send + Sync>;

// ============================================================================
// WinRM Configuration
// ============================================================================

/// WinRM connection configuration
#[derive(Debug, Clone)]
pub struct WinRmConfig {
    /// Target hostname or IP address
    pub host: String,
    /// WinRM port (default: 5985 for HTTP, 5986 for HTTPS)
    pub port: u16,
    /// Transport protocol
    pub protocol: WinRmProtocol,
    /// Endpoint context path
    pub context: String,
    /// Authentication method
    pub auth: WinRmAuth,
    /// HTTP connect timeout in seconds
    pub timeout: u64,
    /// Custom CA certificate path (HTTPS only)
    pub ca_cert: Option<String>,
    /// Maximum envelope size
    pub max_envelope_size: u32,
    /// Operation timeout as an ISO-8601 duration, e.g. "PT60.000S"
    pub operation_timeout: String,
    /// Locale for `Locale`/`DataLocale`
    pub locale: String,
    /// Code page for console output
    pub codepage: u32,
    /// Overall limit on polling a command's output (None polls until Done)
    pub receive_deadline: Option<Duration>,
    /// Buffer size of each output pipe
    pub pipe_capacity: usize,
}

impl Default for WinRmConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: DEFAULT_WINRM_PORT,
            protocol: WinRmProtocol::Http,
            context: DEFAULT_CONTEXT.to_string(),
            auth: WinRmAuth::default(),
            timeout: DEFAULT_TIMEOUT,
            ca_cert: None,
            max_envelope_size: DEFAULT_MAX_ENVELOPE_SIZE,
            operation_timeout: DEFAULT_OPERATION_TIMEOUT.to_string(),
            locale: DEFAULT_LOCALE.to_string(),
            codepage: DEFAULT_CODEPAGE,
            receive_deadline: None,
            pipe_capacity: super::process::DEFAULT_PIPE_CAPACITY,
        }
    }
}

impl WinRmConfig {
    /// Create a new WinRM config for a host
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Default::default()
        }
    }

    /// Get the WinRM endpoint URL
    pub fn endpoint_url(&self) -> String {
        let context = if self.context.starts_with('/') {
            self.context.clone()
        } else {
            format!("/{}", self.context)
        };
        format!(
            "{}://{}:{}{}",
            self.protocol.scheme(),
            self.host,
            self.port,
            context
        )
    }

    /// Cache key for this endpoint and credential set
    pub fn fingerprint(&self) -> CredentialFingerprint {
        CredentialFingerprint::from_parts([
            self.endpoint_url().as_str(),
            self.auth.scheme(),
            self.auth.username(),
            self.auth.secret(),
        ])
    }

    /// Header values for request envelopes
    pub fn envelope_parameters(&self) -> EnvelopeParameters {
        EnvelopeParameters {
            endpoint: self.endpoint_url(),
            max_envelope_size: self.max_envelope_size,
            locale: self.locale.clone(),
            operation_timeout: self.operation_timeout.clone(),
            codepage: self.codepage,
        }
    }

    /// Check required values are present and the endpoint is a valid URL
    pub fn validate(&self) -> ConnectionResult<()> {
        if self.host.trim().is_empty() {
            return Err(ConnectionError::ConfigurationMissing {
                key: "host".to_string(),
            });
        }
        let endpoint = self.endpoint_url();
        url::Url::parse(&endpoint).map_err(|e| {
            ConnectionError::InvalidConfig(format!("Invalid endpoint '{}': {}", endpoint, e))
        })?;
        Ok(())
    }
}

// ============================================================================
// WinRM Connection
// ============================================================================

/// Result of a WS-Man Identify request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IdentifyResponse {
    /// WS-Man protocol version URI
    pub protocol_version: String,
    /// Product vendor, e.g. "Microsoft Corporation"
    pub product_vendor: String,
    /// Product version string
    pub product_version: String,
}

/// WinRM connection for executing commands on Windows hosts
pub struct WinRmConnection {
    /// Configuration
    config: WinRmConfig,
    /// HTTP client shared by all shells
    client: Client,
    /// Kerberos GSS provider, if one was supplied
    gss: Option<GssProvider>,
}

impl WinRmConnection {
    /// Create a connection without contacting the host
    pub fn new(config: WinRmConfig) -> ConnectionResult<Self> {
        config.validate()?;
        let client = transport::build_client(&config)?;
        Ok(Self {
            config,
            client,
            gss: None,
        })
    }

    /// Create a connection and check the endpoint answers
    pub async fn connect(config: WinRmConfig) -> ConnectionResult<Self> {
        let conn = Self::new(config)?;
        let identity = conn.identify().await?;
        debug!(
            host = %conn.config.host,
            vendor = %identity.product_vendor,
            version = %identity.product_version,
            "WinRM connection test successful"
        );
        Ok(conn)
    }

    /// Use `provider` for Kerberos authentication
    pub fn with_gss_provider(mut self, provider: GssProvider) -> Self {
        self.gss = Some(provider);
        self
    }

    /// Connection configuration
    pub fn config(&self) -> &WinRmConfig {
        &self.config
    }

    /// Fresh token generator for one shell session
    fn token_generator(&self) -> ConnectionResult<Box<dyn TokenGenerator>> {
        match &self.config.auth {
            WinRmAuth::Basic { username, password } => {
                Ok(Box::new(BasicTokenGenerator::new(username, password)))
            }
            WinRmAuth::Token { token } => Ok(Box::new(StaticTokenGenerator::new(token.clone()))),
            WinRmAuth::Kerberos {
                username,
                password,
                kerberos,
            } => {
                kerberos.validate()?;
                let provider = self.gss.as_ref().ok_or_else(|| {
                    ConnectionError::UnsupportedOperation(
                        "Kerberos authentication requires a GSS provider".to_string(),
                    )
                })?;
                Ok(Box::new(KerberosTokenGenerator::new(
                    username.clone(),
                    password.clone(),
                    &self.config.host,
                    self.config.port,
                    kerberos.clone(),
                    provider(),
                )))
            }
        }
    }

    fn connector(&self) -> ConnectionResult<Arc<dyn Connector>> {
        Ok(Arc::new(HttpConnector::new(
            self.client.clone(),
            self.config.endpoint_url(),
            self.token_generator()?,
        )))
    }

    /// Send a WS-Man Identify request
    pub async fn identify(&self) -> ConnectionResult<IdentifyResponse> {
        let builder = EnvelopeBuilder::new(self.config.envelope_parameters());
        let response = self.connector()?.send_message(&builder.identify()).await?;

        let field = |name: &str| {
            response
                .find_all(WSMID_NS, name)
                .next()
                .map(|e| e.text().trim().to_string())
                .unwrap_or_default()
        };

        Ok(IdentifyResponse {
            protocol_version: field("ProtocolVersion"),
            product_vendor: field("ProductVendor"),
            product_version: field("ProductVersion"),
        })
    }

    /// Start `command_line` in a new shell on a worker task
    fn spawn_command(
        &self,
        command_line: String,
        receive_deadline: Option<Duration>,
    ) -> ConnectionResult<RemoteProcess> {
        let builder = EnvelopeBuilder::new(self.config.envelope_parameters());
        let mut shell =
            WinRmShell::new(self.connector()?, builder).with_receive_deadline(receive_deadline);

        debug!(host = %self.config.host, command = %command_line, "Starting WinRM command");

        Ok(RemoteProcess::spawn(
            self.config.pipe_capacity,
            move |mut stdout, mut stderr| async move {
                let result = shell.execute(&command_line, &mut stdout, &mut stderr).await;
                (result, stdout, stderr)
            },
        ))
    }

    /// Execute a PowerShell script
    pub async fn execute_powershell(&self, script: &str) -> ConnectionResult<CommandResult> {
        self.execute(&powershell_command(script), None).await
    }
}

/// Prefix `cd /d` and `set` for the working directory and environment
fn build_command_line(command: &str, options: &ExecuteOptions) -> String {
    let mut line = String::new();

    if let Some(cwd) = &options.cwd {
        line.push_str(&format!("cd /d \"{}\" && ", cwd));
    }

    let mut env: Vec<_> = options.env.iter().collect();
    env.sort();
    for (key, value) in env {
        line.push_str(&format!("set {}={}&& ", key, value));
    }

    line.push_str(command);
    line
}

/// `powershell.exe -EncodedCommand` line running `script`
pub fn powershell_command(script: &str) -> String {
    let script_unicode: Vec<u8> = script
        .encode_utf16()
        .flat_map(|c| c.to_le_bytes())
        .collect();
    format!(
        "powershell.exe -NoProfile -NonInteractive -EncodedCommand {}",
        BASE64_STANDARD.encode(script_unicode)
    )
}

impl fmt::Debug for WinRmConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WinRmConnection")
            .field("host", &self.config.host)
            .field("port", &self.config.port)
            .field("protocol", &self.config.protocol)
            .field("auth", &self.config.auth)
            .finish()
    }
}

#[async_trait]
impl Connection for WinRmConnection {
    fn identifier(&self) -> &str {
        &self.config.host
    }

    async fn is_alive(&self) -> bool {
        self.identify().await.is_ok()
    }

    async fn execute(
        &self,
        command: &str,
        options: Option<ExecuteOptions>,
    ) -> ConnectionResult<CommandResult> {
        let process = self.start_process(command, options).await?;
        let result = process.wait_with_output().await?;

        debug!(
            host = %self.config.host,
            exit_code = result.exit_code,
            stdout_len = result.stdout.len(),
            stderr_len = result.stderr.len(),
            "WinRM command completed"
        );
        Ok(result)
    }

    async fn start_process(
        &self,
        command: &str,
        options: Option<ExecuteOptions>,
    ) -> ConnectionResult<RemoteProcess> {
        let options = options.unwrap_or_default();
        let deadline = options
            .timeout
            .map(Duration::from_secs)
            .or(self.config.receive_deadline);
        self.spawn_command(build_command_line(command, &options), deadline)
    }

    async fn close(&self) -> ConnectionResult<()> {
        // Shells are deleted after each command; nothing stays open.
        debug!(host = %self.config.host, "Closing WinRM connection");
        Ok(())
    }
}

// ============================================================================
// WinRM Connection Builder
// ============================================================================

/// Builder for creating WinRM connections
pub struct WinRmConnectionBuilder {
    config: WinRmConfig,
    gss: Option<GssProvider>,
}

impl WinRmConnectionBuilder {
    /// Create a new WinRM connection builder
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            config: WinRmConfig::new(host),
            gss: None,
        }
    }

    /// Start from an existing configuration
    pub fn from_config(config: WinRmConfig) -> Self {
        Self { config, gss: None }
    }

    /// Set the port
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Set the protocol, moving the port to the protocol default if it was
    /// still the previous default
    pub fn protocol(mut self, protocol: WinRmProtocol) -> Self {
        if self.config.port == self.config.protocol.default_port() {
            self.config.port = protocol.default_port();
        }
        self.config.protocol = protocol;
        self
    }

    /// Set the endpoint context path
    pub fn context(mut self, context: impl Into<String>) -> Self {
        self.config.context = context.into();
        self
    }

    /// Set the authentication method
    pub fn auth(mut self, auth: WinRmAuth) -> Self {
        self.config.auth = auth;
        self
    }

    /// Set the connection timeout
    pub fn timeout(mut self, timeout: u64) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Set custom CA certificate
    pub fn ca_cert(mut self, path: impl Into<String>) -> Self {
        self.config.ca_cert = Some(path.into());
        self
    }

    /// Set the maximum envelope size
    pub fn max_envelope_size(mut self, size: u32) -> Self {
        self.config.max_envelope_size = size;
        self
    }

    /// Set the per-request operation timeout
    pub fn operation_timeout(mut self, timeout: Duration) -> Self {
        self.config.operation_timeout = envelope::operation_timeout(timeout);
        self
    }

    /// Set the locale
    pub fn locale(mut self, locale: impl Into<String>) -> Self {
        self.config.locale = locale.into();
        self
    }

    /// Set the code page
    pub fn codepage(mut self, codepage: u32) -> Self {
        self.config.codepage = codepage;
        self
    }

    /// Limit how long a command's output is polled
    pub fn receive_deadline(mut self, deadline: Duration) -> Self {
        self.config.receive_deadline = Some(deadline);
        self
    }

    /// Set the output pipe buffer size
    pub fn pipe_capacity(mut self, capacity: usize) -> Self {
        self.config.pipe_capacity = capacity;
        self
    }

    /// Use `provider` for Kerberos authentication
    pub fn gss_provider(mut self, provider: GssProvider) -> Self {
        self.gss = Some(provider);
        self
    }

    /// Build without contacting the host
    pub fn build(self) -> ConnectionResult<WinRmConnection> {
        let conn = WinRmConnection::new(self.config)?;
        Ok(match self.gss {
            Some(provider) => conn.with_gss_provider(provider),
            None => conn,
        })
    }

    /// Build and check the endpoint answers
    pub async fn connect(self) -> ConnectionResult<WinRmConnection> {
        let conn = self.build()?;
        conn.identify().await?;
        Ok(conn)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_winrm_config_endpoint() {
        let config = WinRmConfig::new("winserver.example.com");
        assert_eq!(
            config.endpoint_url(),
            "http://winserver.example.com:5985/wsman"
        );

        let ssl_config = WinRmConfig {
            host: "winserver.example.com".to_string(),
            port: 5986,
            protocol: WinRmProtocol::HttpsLazy,
            context: "custom".to_string(),
            ..Default::default()
        };
        assert_eq!(
            ssl_config.endpoint_url(),
            "https://winserver.example.com:5986/custom"
        );
    }

    #[test]
    fn test_protocol_parse() {
        assert_eq!("HTTPS".parse::<WinRmProtocol>().unwrap(), WinRmProtocol::Https);
        assert_eq!(
            "https-lazy".parse::<WinRmProtocol>().unwrap(),
            WinRmProtocol::HttpsLazy
        );
        assert!("ftp".parse::<WinRmProtocol>().is_err());
        assert_eq!(WinRmProtocol::HttpsLazy.to_string(), "https-lazy");
    }

    #[test]
    fn test_winrm_builder() {
        let builder = WinRmConnectionBuilder::new("test-host")
            .protocol(WinRmProtocol::Https)
            .timeout(120)
            .operation_timeout(Duration::from_secs(20))
            .codepage(437);

        assert_eq!(builder.config.host, "test-host");
        assert_eq!(builder.config.port, 5986);
        assert_eq!(builder.config.timeout, 120);
        assert_eq!(builder.config.operation_timeout, "PT20.000S");
        assert_eq!(builder.config.codepage, 437);

        let custom = WinRmConnectionBuilder::new("test-host")
            .port(8080)
            .protocol(WinRmProtocol::Https);
        assert_eq!(custom.config.port, 8080);
    }

    #[test]
    fn test_build_requires_host() {
        match WinRmConnectionBuilder::new("  ").build() {
            Err(ConnectionError::ConfigurationMissing { key }) => assert_eq!(key, "host"),
            other => panic!("expected ConfigurationMissing, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_build_rejects_unusable_host() {
        assert!(matches!(
            WinRmConnectionBuilder::new("bad host").build(),
            Err(ConnectionError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let conn = WinRmConnectionBuilder::new("win-01")
            .auth(WinRmAuth::basic("admin", "hunter2"))
            .build()
            .unwrap();
        let debug = format!("{:?}", conn);
        assert!(debug.contains("admin"));
        assert!(!debug.contains("hunter2"));
        assert!(!format!("{:?}", WinRmAuth::token("tok-123")).contains("tok-123"));
    }

    #[test]
    fn test_fingerprint_depends_on_credentials() {
        let mut config = WinRmConfig::new("win-01");
        config.auth = WinRmAuth::basic("admin", "one");
        let first = config.fingerprint();
        assert_eq!(first, config.fingerprint());

        config.auth = WinRmAuth::basic("admin", "two");
        assert_ne!(first, config.fingerprint());

        config.auth = WinRmAuth::basic("admin", "one");
        config.port = 5986;
        assert_ne!(first, config.fingerprint());
    }

    #[test]
    fn test_build_command_line() {
        assert_eq!(build_command_line("dir", &ExecuteOptions::new()), "dir");

        let options = ExecuteOptions::new()
            .with_cwd("C:\\Program Files")
            .with_env("B", "2")
            .with_env("A", "1");
        assert_eq!(
            build_command_line("dir", &options),
            "cd /d \"C:\\Program Files\" && set A=1&& set B=2&& dir"
        );
    }

    #[test]
    fn test_powershell_command_encoding() {
        let command = powershell_command("Get-Date");
        let encoded = command.rsplit(' ').next().unwrap();
        let bytes = BASE64_STANDARD.decode(encoded).unwrap();
        let units: Vec<u16> = bytes
            .chunks(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        assert_eq!(String::from_utf16(&units).unwrap(), "Get-Date");
        assert!(command.starts_with("powershell.exe -NoProfile -NonInteractive -EncodedCommand "));
    }

    #[test]
    fn test_kerberos_requires_gss_provider() {
        let dir = tempfile::tempdir().unwrap();
        let krb5 = dir.path().join("krb5.conf");
        let login = dir.path().join("login.conf");
        std::fs::write(&krb5, "").unwrap();
        std::fs::write(&login, "").unwrap();

        let conn = WinRmConnectionBuilder::new("win-01")
            .auth(WinRmAuth::kerberos(
                "svc",
                "secret",
                KerberosConfig {
                    krb5_config: Some(krb5),
                    login_config: Some(login),
                    ..Default::default()
                },
            ))
            .build()
            .unwrap();
        assert!(matches!(
            conn.token_generator(),
            Err(ConnectionError::UnsupportedOperation(_))
        ));
    }

    #[test]
    fn test_kerberos_configuration_checked_before_provider() {
        let conn = WinRmConnectionBuilder::new("win-01")
            .auth(WinRmAuth::kerberos(
                "svc",
                "secret",
                KerberosConfig {
                    krb5_config: Some(PathBuf::from("/nonexistent/krb5.conf")),
                    login_config: Some(PathBuf::from("/nonexistent/login.conf")),
                    ..Default::default()
                },
            ))
            .build()
            .unwrap();
        assert!(matches!(
            conn.token_generator(),
            Err(ConnectionError::InvalidConfigurationPath { .. })
        ));
    }
}
