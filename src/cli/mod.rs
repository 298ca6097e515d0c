//! CLI module for hostlink
//!
//! This module provides the command-line interface: argument parsing and the
//! `exec` / `identify` subcommands.

pub mod commands;
pub mod output;

use clap::{Args, Parser, Subcommand};
use hostlink::connection::config::AuthMethod;
use hostlink::connection::winrm::WinRmProtocol;
use hostlink::connection::HostConfig;
use std::path::PathBuf;

/// hostlink - run commands on remote Windows hosts over WinRM
#[derive(Parser, Debug, Clone)]
#[command(name = "hostlink")]
#[command(version)]
#[command(about = "Run commands on remote hosts over WinRM", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short = 'v', long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Path to configuration file
    #[arg(short = 'c', long, global = true, env = "HOSTLINK_CONFIG")]
    pub config: Option<PathBuf>,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run a command on a host and stream its output
    Exec(commands::exec::ExecArgs),

    /// Ask a host which WS-Management stack it runs
    Identify(commands::identify::IdentifyArgs),
}

/// Connection settings that override the configuration file
#[derive(Args, Debug, Clone, Default)]
pub struct ConnectionArgs {
    /// Username
    #[arg(short = 'u', long)]
    pub user: Option<String>,

    /// Password
    #[arg(short = 'p', long, env = "HOSTLINK_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Port (default 5985 for http, 5986 for https)
    #[arg(short = 'P', long)]
    pub port: Option<u16>,

    /// Protocol: http, https or https-lazy
    #[arg(long, value_parser = parse_protocol)]
    pub protocol: Option<WinRmProtocol>,

    /// Authentication: basic, kerberos or token
    #[arg(long, value_parser = parse_auth)]
    pub auth: Option<AuthMethod>,

    /// Custom CA certificate (PEM)
    #[arg(long)]
    pub ca_cert: Option<String>,

    /// HTTP connect timeout in seconds
    #[arg(long)]
    pub connect_timeout: Option<u64>,
}

impl ConnectionArgs {
    /// Flag values as a host configuration layer
    pub fn to_host_config(&self) -> HostConfig {
        HostConfig {
            username: self.user.clone(),
            password: self.password.clone(),
            port: self.port,
            protocol: self.protocol,
            auth: self.auth,
            ca_cert: self.ca_cert.clone(),
            timeout: self.connect_timeout,
            ..HostConfig::default()
        }
    }
}

fn parse_protocol(value: &str) -> Result<WinRmProtocol, String> {
    value.parse().map_err(|e: hostlink::connection::ConnectionError| e.to_string())
}

fn parse_auth(value: &str) -> Result<AuthMethod, String> {
    value.parse().map_err(|e: hostlink::connection::ConnectionError| e.to_string())
}

impl Cli {
    /// Parse command-line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }

    /// Get the effective verbosity level (0-3)
    pub fn verbosity(&self) -> u8 {
        self.verbose.min(3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exec_parsing() {
        let cli = Cli::try_parse_from([
            "hostlink", "exec", "win-01", "-u", "admin", "--protocol", "https", "--", "dir", "/b",
        ])
        .unwrap();
        match cli.command {
            Commands::Exec(args) => {
                assert_eq!(args.host, "win-01");
                assert_eq!(args.command, vec!["dir", "/b"]);
                assert_eq!(args.connection.user.as_deref(), Some("admin"));
                assert_eq!(args.connection.protocol, Some(WinRmProtocol::Https));
            }
            other => panic!("expected exec, got {:?}", other),
        }
    }

    #[test]
    fn test_exec_requires_command() {
        assert!(Cli::try_parse_from(["hostlink", "exec", "win-01"]).is_err());
    }

    #[test]
    fn test_invalid_protocol() {
        assert!(Cli::try_parse_from([
            "hostlink", "identify", "win-01", "--protocol", "gopher"
        ])
        .is_err());
    }

    #[test]
    fn test_verbosity() {
        let cli = Cli::try_parse_from(["hostlink", "-vvvv", "identify", "win-01"]).unwrap();
        assert_eq!(cli.verbosity(), 3);
    }

    #[test]
    fn test_env_pairs() {
        let cli = Cli::try_parse_from([
            "hostlink", "exec", "win-01", "-e", "A=1", "-e", "B=x=y", "--", "set",
        ])
        .unwrap();
        let Commands::Exec(args) = cli.command else {
            panic!("expected exec");
        };
        assert_eq!(args.env, vec![
            ("A".to_string(), "1".to_string()),
            ("B".to_string(), "x=y".to_string()),
        ]);
    }
}
