//! Connection layer for remote host communication.
//!
//! This module provides a unified interface for running commands on a remote
//! machine, independent of the transport that carries them. The transport
//! implemented here is WinRM (WS-Management over HTTP/HTTPS).
//!
//! # Overview
//!
//! All connections implement the [`Connection`] trait. A command can either be
//! executed to completion ([`Connection::execute`]), which collects its output
//! into a [`CommandResult`], or started as a [`RemoteProcess`]
//! ([`Connection::start_process`]) whose stdout/stderr can be read while the
//! command is still running.
//!
//! # Connection Management
//!
//! Connections are handed out by the [`ConnectionFactory`], which resolves host
//! names through a [`ConnectionConfig`] and reuses connections through an
//! injectable [`CredentialCache`].
//!
//! # Example
//!
//! ```rust,ignore
//! use hostlink::connection::{Connection, ExecuteOptions};
//! use hostlink::connection::winrm::{WinRmAuth, WinRmConnectionBuilder};
//!
//! let conn = WinRmConnectionBuilder::new("win-01.example.com")
//!     .auth(WinRmAuth::basic("Administrator", "secret"))
//!     .build()?;
//!
//! let result = conn.execute("ipconfig /all", None).await?;
//! println!("Output: {}", result.stdout);
//!
//! let opts = ExecuteOptions::new().with_cwd("C:\\Temp");
//! let result = conn.execute("dir", Some(opts)).await?;
//! ```

/// Injectable credential-keyed cache.
pub mod cache;

/// Connection configuration types.
pub mod config;

/// Process-like handle over a running remote command.
pub mod process;

/// WinRM (WS-Management) transport.
pub mod winrm;

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

pub use cache::{CredentialCache, CredentialFingerprint};
pub use config::{ConnectionConfig, HostConfig};
pub use process::{ProcessOutput, RemoteProcess};

/// Phase of the remote shell lifecycle an error occurred in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellPhase {
    /// Opening the remote shell.
    Open,
    /// Starting the command inside the shell.
    Run,
    /// Polling the command for output.
    Receive,
}

impl fmt::Display for ShellPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ShellPhase::Open => "open",
            ShellPhase::Run => "run",
            ShellPhase::Receive => "receive",
        };
        f.write_str(name)
    }
}

/// Errors that can occur during connection operations.
///
/// Configuration errors (`ConfigurationMissing`, `InvalidConfigurationPath`)
/// are always propagated as-is; no layer wraps them into transport or shell
/// errors. See [`ConnectionError::is_configuration`].
#[derive(Error, Debug)]
pub enum ConnectionError {
    /// A required configuration value is blank or absent.
    #[error("Missing configuration: '{key}' must be set")]
    ConfigurationMissing {
        /// Name of the configuration key
        key: String,
    },

    /// A configuration value names a path that does not exist.
    #[error("Invalid configuration: '{key}' points to '{path}', which does not exist")]
    InvalidConfigurationPath {
        /// Name of the configuration key
        key: String,
        /// The offending path
        path: String,
    },

    /// Sending a request or reading/parsing its response failed.
    #[error("WinRM transport failure: {message}")]
    Transport {
        /// What went wrong
        message: String,
        /// The request document that was being sent
        request: String,
        /// The response body, if one was received
        response: Option<String>,
        /// Underlying cause
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A required element was not present in a response document.
    #[error("Response element '{expression}' not found in document: {document}")]
    MissingResponseElement {
        /// Path expression that was searched for
        expression: &'static str,
        /// The searched document
        document: String,
    },

    /// A response element was present but its content could not be used.
    #[error("Malformed response element '{expression}': {reason}")]
    MalformedResponse {
        /// Path expression of the element
        expression: &'static str,
        /// Why the content was rejected
        reason: String,
    },

    /// The exit code was requested before the command reported completion.
    #[error("Command has not finished; exit code is not available yet")]
    CommandNotFinished,

    /// A shell lifecycle phase failed on the target.
    #[error("Failed to {phase} remote command on '{target}': {source}")]
    ShellFailed {
        /// Lifecycle phase that failed
        phase: ShellPhase,
        /// Endpoint the shell lives on
        target: String,
        /// Underlying error
        #[source]
        source: Box<ConnectionError>,
    },

    /// Authentication was rejected or could not be negotiated.
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Configuration is invalid or incomplete.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Command or operation timed out.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// The remote process was destroyed before it completed.
    #[error("Remote process was destroyed")]
    ProcessDestroyed,

    /// The requested operation is not supported by this transport.
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// I/O error during connection operations.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl ConnectionError {
    /// Whether this error is a configuration error that must reach the caller
    /// unwrapped.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            ConnectionError::ConfigurationMissing { .. }
                | ConnectionError::InvalidConfigurationPath { .. }
        )
    }
}

/// Result type for connection operations.
///
/// A type alias for `Result<T, ConnectionError>`.
pub type ConnectionResult<T> = Result<T, ConnectionError>;

/// The result of executing a command on a connection.
///
/// Contains the exit code, stdout, stderr, and a convenience boolean
/// indicating whether the command succeeded (exit code 0).
///
/// # Example
///
/// ```rust
/// use hostlink::connection::CommandResult;
///
/// let result = CommandResult::success("Hello".into(), String::new());
/// assert!(result.success);
/// assert_eq!(result.exit_code, 0);
///
/// let failed = CommandResult::failure(1, String::new(), "error".into());
/// assert!(!failed.success);
/// ```
#[derive(Debug, Clone)]
pub struct CommandResult {
    /// Exit code of the command (0 typically indicates success).
    pub exit_code: i32,
    /// Content written to standard output.
    pub stdout: String,
    /// Content written to standard error.
    pub stderr: String,
    /// Convenience flag: `true` if `exit_code == 0`.
    pub success: bool,
}

impl CommandResult {
    /// Create a new successful command result
    pub fn success(stdout: String, stderr: String) -> Self {
        Self {
            exit_code: 0,
            stdout,
            stderr,
            success: true,
        }
    }

    /// Create a new failed command result
    pub fn failure(exit_code: i32, stdout: String, stderr: String) -> Self {
        Self {
            exit_code,
            stdout,
            stderr,
            success: false,
        }
    }

    /// Build a result from an exit code, picking success or failure.
    pub fn from_exit_code(exit_code: i32, stdout: String, stderr: String) -> Self {
        if exit_code == 0 {
            Self::success(stdout, stderr)
        } else {
            Self::failure(exit_code, stdout, stderr)
        }
    }

    /// Get the combined output (stdout + stderr)
    pub fn combined_output(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// Options for command execution
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    /// Working directory for the command
    pub cwd: Option<String>,
    /// Environment variables to set
    pub env: HashMap<String, String>,
    /// Overall deadline in seconds (None for no deadline)
    pub timeout: Option<u64>,
}

impl ExecuteOptions {
    /// Create new execute options
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the working directory
    pub fn with_cwd(mut self, cwd: impl Into<String>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Add an environment variable
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Set the timeout
    pub fn with_timeout(mut self, timeout: u64) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// The main connection trait that all transport implementations must implement
#[async_trait]
pub trait Connection: Send + Sync {
    /// Get the connection identifier (hostname)
    fn identifier(&self) -> &str;

    /// Check if the remote endpoint answers
    async fn is_alive(&self) -> bool;

    /// Execute a command on the remote host and collect its output
    async fn execute(
        &self,
        command: &str,
        options: Option<ExecuteOptions>,
    ) -> ConnectionResult<CommandResult>;

    /// Start a command and return a handle to its output streams
    async fn start_process(
        &self,
        command: &str,
        options: Option<ExecuteOptions>,
    ) -> ConnectionResult<RemoteProcess>;

    /// Close the connection
    async fn close(&self) -> ConnectionResult<()>;

    /// Execute multiple commands in batch (default: sequential)
    async fn execute_batch(
        &self,
        commands: &[&str],
        options: Option<ExecuteOptions>,
    ) -> Vec<ConnectionResult<CommandResult>> {
        let mut results = Vec::with_capacity(commands.len());
        for cmd in commands {
            results.push(self.execute(cmd, options.clone()).await);
        }
        results
    }
}

/// Default number of cached connections held by a factory
pub const DEFAULT_CACHE_CAPACITY: usize = 10;

/// Factory for creating connections
pub struct ConnectionFactory {
    /// Global configuration
    config: Arc<ConnectionConfig>,
    /// Connections keyed by credential fingerprint
    cache: CredentialCache<Arc<dyn Connection>>,
}

impl ConnectionFactory {
    /// Create a new connection factory
    pub fn new(config: ConnectionConfig) -> Self {
        Self::with_cache(config, CredentialCache::new(DEFAULT_CACHE_CAPACITY))
    }

    /// Create a factory that uses the given cache
    pub fn with_cache(config: ConnectionConfig, cache: CredentialCache<Arc<dyn Connection>>) -> Self {
        Self {
            config: Arc::new(config),
            cache,
        }
    }

    /// Get a connection for a host
    pub fn get_connection(&self, host: &str) -> ConnectionResult<Arc<dyn Connection>> {
        let winrm_config = self.config.resolve(host)?;
        let key = winrm_config.fingerprint();

        self.cache.get_or_try_insert_with(key.clone(), || -> ConnectionResult<_> {
            debug!(host = %host, key = %key, "Creating connection");
            let conn: Arc<dyn Connection> = Arc::new(winrm::WinRmConnection::new(winrm_config)?);
            Ok(conn)
        })
    }

    /// Drop the cached connection for a host, if any
    pub fn evict(&self, host: &str) -> ConnectionResult<bool> {
        let key = self.config.resolve(host)?.fingerprint();
        Ok(self.cache.evict(&key).is_some())
    }

    /// Close all cached connections
    pub async fn close_all(&self) -> ConnectionResult<()> {
        for conn in self.cache.drain() {
            let _ = conn.close().await;
        }
        Ok(())
    }

    /// Number of cached connections
    pub fn cached_connections(&self) -> usize {
        self.cache.len()
    }
}
