//! Authorization header generation.
//!
//! A [`TokenGenerator`] produces the value of the `Authorization` header for
//! the next request. Generators are selected once from the configured
//! [`WinRmAuth`](super::WinRmAuth) and then owned by a single connector.
//!
//! - [`BasicTokenGenerator`]: stateless, the same header for every request.
//! - [`KerberosTokenGenerator`]: stateful. The first call logs in and returns a
//!   `Negotiate` token; afterwards it returns `None` because the security
//!   context is already established.
//! - [`StaticTokenGenerator`]: a fixed, pre-issued access token.

use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::connection::{ConnectionError, ConnectionResult};

/// Configuration key naming the Kerberos realm configuration file
pub const KRB5_CONFIG_KEY: &str = "kerberos.krb5_config";

/// Configuration key naming the JAAS-style login configuration file
pub const LOGIN_CONFIG_KEY: &str = "kerberos.login_config";

/// Produces `Authorization` header values.
pub trait TokenGenerator: Send {
    /// Header value for the next request, or `None` to send no header.
    fn generate_token(&mut self) -> ConnectionResult<Option<String>>;
}

/// `Basic base64(username:password)`
#[derive(Clone)]
pub struct BasicTokenGenerator {
    header: String,
}

impl BasicTokenGenerator {
    /// Create a generator for the given credentials
    pub fn new(username: &str, password: &str) -> Self {
        let encoded = BASE64_STANDARD.encode(format!("{}:{}", username, password));
        Self {
            header: format!("Basic {}", encoded),
        }
    }
}

impl TokenGenerator for BasicTokenGenerator {
    fn generate_token(&mut self) -> ConnectionResult<Option<String>> {
        Ok(Some(self.header.clone()))
    }
}

impl fmt::Debug for BasicTokenGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicTokenGenerator")
            .field("header", &"Basic ***")
            .finish()
    }
}

/// Fixed pre-issued access token.
#[derive(Clone)]
pub struct StaticTokenGenerator {
    token: String,
}

impl StaticTokenGenerator {
    /// Use `token` as the complete header value
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }

    /// `Bearer <token>`
    pub fn bearer(token: &str) -> Self {
        Self::new(format!("Bearer {}", token))
    }
}

impl TokenGenerator for StaticTokenGenerator {
    fn generate_token(&mut self) -> ConnectionResult<Option<String>> {
        Ok(Some(self.token.clone()))
    }
}

impl fmt::Debug for StaticTokenGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticTokenGenerator")
            .field("token", &"***")
            .finish()
    }
}

/// Kerberos settings taken from configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KerberosConfig {
    /// Path of the Kerberos realm configuration (krb5.conf)
    pub krb5_config: Option<PathBuf>,
    /// Path of the login module configuration
    pub login_config: Option<PathBuf>,
    /// Use `HTTP/<host>` instead of `WSMAN/<host>` as service principal
    pub use_http_spn: bool,
    /// Append `:<port>` to the service principal
    pub add_port_to_spn: bool,
}

impl KerberosConfig {
    /// Service principal name for a target
    pub fn service_principal(&self, host: &str, port: u16) -> String {
        let service = if self.use_http_spn { "HTTP" } else { "WSMAN" };
        if self.add_port_to_spn {
            format!("{}/{}:{}", service, host, port)
        } else {
            format!("{}/{}", service, host)
        }
    }

    /// Check both configuration files are set and exist.
    ///
    /// Returns the validated `(krb5_config, login_config)` paths.
    pub fn validate(&self) -> ConnectionResult<(&Path, &Path)> {
        let krb5 = required_path(KRB5_CONFIG_KEY, self.krb5_config.as_deref())?;
        let login = required_path(LOGIN_CONFIG_KEY, self.login_config.as_deref())?;
        Ok((krb5, login))
    }
}

fn required_path<'a>(key: &str, path: Option<&'a Path>) -> ConnectionResult<&'a Path> {
    let path = match path {
        Some(path) if !path.as_os_str().is_empty() => path,
        _ => {
            return Err(ConnectionError::ConfigurationMissing {
                key: key.to_string(),
            })
        }
    };

    if !path.exists() {
        return Err(ConnectionError::InvalidConfigurationPath {
            key: key.to_string(),
            path: path.display().to_string(),
        });
    }

    Ok(path)
}

/// GSS-API provider used by the Kerberos generator.
///
/// The crate does not link a Kerberos library itself; callers supply one.
pub trait GssMechanism: Send {
    /// Obtain credentials for `principal`
    fn login(
        &mut self,
        principal: &str,
        password: &str,
        krb5_config: &Path,
        login_config: &Path,
    ) -> ConnectionResult<()>;

    /// Start a security context with `service_principal`, returning the
    /// initial SPNEGO token
    fn init_security_context(&mut self, service_principal: &str) -> ConnectionResult<Vec<u8>>;
}

/// SPNEGO `Negotiate` token generator.
pub struct KerberosTokenGenerator {
    username: String,
    password: String,
    service_principal: String,
    config: KerberosConfig,
    mechanism: Box<dyn GssMechanism>,
    established: bool,
}

impl KerberosTokenGenerator {
    /// Create a generator for one shell session
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
        host: &str,
        port: u16,
        config: KerberosConfig,
        mechanism: Box<dyn GssMechanism>,
    ) -> Self {
        let service_principal = config.service_principal(host, port);
        Self {
            username: username.into(),
            password: password.into(),
            service_principal,
            config,
            mechanism,
            established: false,
        }
    }

    /// Service principal the context is initiated with
    pub fn service_principal(&self) -> &str {
        &self.service_principal
    }
}

impl TokenGenerator for KerberosTokenGenerator {
    fn generate_token(&mut self) -> ConnectionResult<Option<String>> {
        if self.established {
            return Ok(None);
        }

        let (krb5_config, login_config) = self.config.validate()?;

        debug!(
            principal = %self.username,
            spn = %self.service_principal,
            "Initiating Kerberos security context"
        );
        self.mechanism
            .login(&self.username, &self.password, krb5_config, login_config)?;
        let token = self
            .mechanism
            .init_security_context(&self.service_principal)?;

        self.established = true;
        Ok(Some(format!("Negotiate {}", BASE64_STANDARD.encode(token))))
    }
}

impl fmt::Debug for KerberosTokenGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KerberosTokenGenerator")
            .field("username", &self.username)
            .field("password", &"***")
            .field("service_principal", &self.service_principal)
            .field("config", &self.config)
            .field("established", &self.established)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::NamedTempFile;

    struct FakeGss {
        logins: Arc<AtomicUsize>,
    }

    impl GssMechanism for FakeGss {
        fn login(
            &mut self,
            principal: &str,
            _password: &str,
            _krb5_config: &Path,
            _login_config: &Path,
        ) -> ConnectionResult<()> {
            assert_eq!(principal, "svc@EXAMPLE.COM");
            self.logins.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn init_security_context(&mut self, spn: &str) -> ConnectionResult<Vec<u8>> {
            Ok(spn.as_bytes().to_vec())
        }
    }

    fn kerberos(config: KerberosConfig) -> (KerberosTokenGenerator, Arc<AtomicUsize>) {
        let logins = Arc::new(AtomicUsize::new(0));
        let generator = KerberosTokenGenerator::new(
            "svc@EXAMPLE.COM",
            "secret",
            "win-01",
            5985,
            config,
            Box::new(FakeGss {
                logins: logins.clone(),
            }),
        );
        (generator, logins)
    }

    #[test]
    fn test_basic_token_is_stable() {
        let mut generator = BasicTokenGenerator::new("Administrator", "P@ss:word");
        let first = generator.generate_token().unwrap();
        let second = generator.generate_token().unwrap();
        assert_eq!(first, second);
        assert_eq!(
            first.unwrap(),
            format!("Basic {}", BASE64_STANDARD.encode("Administrator:P@ss:word"))
        );
    }

    #[test]
    fn test_basic_debug_hides_credentials() {
        let generator = BasicTokenGenerator::new("admin", "hunter2");
        let debug = format!("{:?}", generator);
        assert!(!debug.contains("hunter2"));
        assert!(!debug.contains(&BASE64_STANDARD.encode("admin:hunter2")));
    }

    #[test]
    fn test_static_token() {
        let mut generator = StaticTokenGenerator::bearer("abc");
        assert_eq!(generator.generate_token().unwrap().as_deref(), Some("Bearer abc"));
        assert_eq!(generator.generate_token().unwrap().as_deref(), Some("Bearer abc"));
    }

    #[test]
    fn test_service_principal() {
        let mut config = KerberosConfig::default();
        assert_eq!(config.service_principal("win-01", 5985), "WSMAN/win-01");
        config.use_http_spn = true;
        assert_eq!(config.service_principal("win-01", 5985), "HTTP/win-01");
        config.add_port_to_spn = true;
        assert_eq!(config.service_principal("win-01", 5986), "HTTP/win-01:5986");
    }

    #[test]
    fn test_kerberos_token_only_once() {
        let krb5 = NamedTempFile::new().unwrap();
        let login = NamedTempFile::new().unwrap();
        let (mut generator, logins) = kerberos(KerberosConfig {
            krb5_config: Some(krb5.path().to_path_buf()),
            login_config: Some(login.path().to_path_buf()),
            ..Default::default()
        });

        let first = generator.generate_token().unwrap().unwrap();
        assert_eq!(
            first,
            format!("Negotiate {}", BASE64_STANDARD.encode("WSMAN/win-01"))
        );
        assert_eq!(generator.generate_token().unwrap(), None);
        assert_eq!(logins.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_kerberos_missing_config() {
        let login = NamedTempFile::new().unwrap();
        let (mut generator, logins) = kerberos(KerberosConfig {
            krb5_config: Some(PathBuf::new()),
            login_config: Some(login.path().to_path_buf()),
            ..Default::default()
        });

        match generator.generate_token() {
            Err(ConnectionError::ConfigurationMissing { key }) => {
                assert_eq!(key, KRB5_CONFIG_KEY)
            }
            other => panic!("expected ConfigurationMissing, got {:?}", other),
        }
        assert_eq!(logins.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_kerberos_nonexistent_config_path() {
        let krb5 = NamedTempFile::new().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("login.conf");
        let (mut generator, _) = kerberos(KerberosConfig {
            krb5_config: Some(krb5.path().to_path_buf()),
            login_config: Some(missing.clone()),
            ..Default::default()
        });

        match generator.generate_token() {
            Err(ConnectionError::InvalidConfigurationPath { key, path }) => {
                assert_eq!(key, LOGIN_CONFIG_KEY);
                assert_eq!(path, missing.display().to_string());
            }
            other => panic!("expected InvalidConfigurationPath, got {:?}", other),
        }
    }
}
