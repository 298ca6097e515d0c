//! # hostlink - WinRM remote command execution
//!
//! hostlink runs commands on remote Windows hosts by speaking WS-Management
//! (SOAP over HTTP/HTTPS) directly. A command runs inside a temporary remote
//! shell; its output is polled in chunks and streamed to the caller while the
//! command is still running.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                 Connection trait / factory                    │
//! │        (WinRmConnection, CredentialCache, ExecuteOptions)     │
//! └──────────────────────────────────────────────────────────────┘
//!                               │ start_process
//!                               ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │              RemoteProcess (tokio task + pipes)               │
//! └──────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │   WinRmShell: Create → Command → Receive* → Signal → Delete   │
//! └──────────────────────────────────────────────────────────────┘
//!          │                    │                     │
//!          ▼                    ▼                     ▼
//! ┌─────────────────┐  ┌──────────────────┐  ┌──────────────────┐
//! │ EnvelopeBuilder │  │ Connector (HTTP) │  │ ResponseDocument │
//! │  (SOAP request) │  │ + TokenGenerator │  │   (extraction)   │
//! └─────────────────┘  └──────────────────┘  └──────────────────┘
//! ```
//!
//! ## Quick Example
//!
//! ```rust,no_run
//! use hostlink::prelude::*;
//!
//! # async fn run() -> ConnectionResult<()> {
//! let connection = WinRmConnectionBuilder::new("win-01.example.com")
//!     .protocol(WinRmProtocol::Https)
//!     .auth(WinRmAuth::basic("Administrator", "secret"))
//!     .build()?;
//!
//! let result = connection.execute("ipconfig /all", None).await?;
//! println!("exit {}: {}", result.exit_code, result.stdout);
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Re-export commonly used items in prelude
pub mod prelude {
    //! Convenient re-exports of commonly used types and traits.

    pub use crate::connection::winrm::auth::{GssMechanism, KerberosConfig, TokenGenerator};
    pub use crate::connection::winrm::transport::Connector;
    pub use crate::connection::winrm::{
        IdentifyResponse, WinRmAuth, WinRmConfig, WinRmConnection, WinRmConnectionBuilder,
        WinRmProtocol,
    };
    pub use crate::connection::{
        CommandResult, Connection, ConnectionConfig, ConnectionError, ConnectionFactory,
        ConnectionResult, CredentialCache, ExecuteOptions, HostConfig, ProcessOutput,
        RemoteProcess,
    };
}

/// Connections to remote hosts.
///
/// Holds the [`Connection`](connection::Connection) trait, the error type
/// shared by every layer, host configuration, the credential cache and the
/// WinRM protocol engine.
pub mod connection;
