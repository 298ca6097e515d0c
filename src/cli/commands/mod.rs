//! Subcommands module for the hostlink CLI

pub mod exec;
pub mod identify;

use crate::cli::output::OutputFormatter;
use crate::cli::{Cli, ConnectionArgs};
use anyhow::{Context, Result};
use hostlink::connection::winrm::{WinRmConfig, WinRmConnection};
use hostlink::connection::ConnectionConfig;

/// Common context shared between commands
pub struct CommandContext {
    /// Loaded configuration file (with environment overrides applied)
    pub config: ConnectionConfig,
    /// Output formatter
    pub output: OutputFormatter,
}

impl CommandContext {
    /// Create a new command context from CLI arguments
    pub fn new(cli: &Cli, config: ConnectionConfig) -> Self {
        Self {
            config,
            output: OutputFormatter::new(!cli.no_color, cli.verbosity()),
        }
    }

    /// Resolve `host`, letting command-line flags win over the config file
    pub fn resolve(&self, host: &str, flags: &ConnectionArgs) -> Result<WinRmConfig> {
        let layered = flags
            .to_host_config()
            .merged_over(&self.config.get_host_merged(host));

        let mut config = self.config.clone();
        config.add_host(host, layered);
        config
            .resolve(host)
            .with_context(|| format!("Invalid connection settings for '{}'", host))
    }

    /// Build a connection for `host` without contacting it
    pub fn connection(&self, host: &str, flags: &ConnectionArgs) -> Result<WinRmConnection> {
        let config = self.resolve(host, flags)?;
        self.output.info(&format!(
            "Connecting to {} ({} auth)",
            config.endpoint_url(),
            config.auth.scheme()
        ));
        WinRmConnection::new(config).with_context(|| format!("Failed to set up connection to {}", host))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hostlink::connection::winrm::WinRmProtocol;
    use hostlink::connection::HostConfig;

    fn context(config: ConnectionConfig) -> CommandContext {
        CommandContext {
            config,
            output: OutputFormatter::new(false, 0),
        }
    }

    #[test]
    fn test_context_from_cli() {
        use clap::Parser;

        let cli = Cli::try_parse_from([
            "hostlink", "-vv", "--no-color", "identify", "win-01", "-u", "admin", "-p", "secret",
        ])
        .unwrap();
        let crate::cli::Commands::Identify(args) = &cli.command else {
            panic!("expected identify");
        };
        let ctx = CommandContext::new(&cli, ConnectionConfig::default());
        let resolved = ctx.resolve("win-01", &args.connection).unwrap();
        assert_eq!(resolved.host, "win-01");
    }

    #[test]
    fn test_flags_override_config_file() {
        let mut config = ConnectionConfig::default();
        config.add_host(
            "win-*",
            HostConfig::new()
                .credentials("fileuser", "filepass")
                .port(5999),
        );
        let ctx = context(config);

        let flags = ConnectionArgs {
            user: Some("cliuser".to_string()),
            protocol: Some(WinRmProtocol::Https),
            ..ConnectionArgs::default()
        };
        let resolved = ctx.resolve("win-01", &flags).unwrap();

        assert_eq!(resolved.auth.username(), "cliuser");
        assert_eq!(resolved.port, 5999);
        assert_eq!(resolved.protocol, WinRmProtocol::Https);
    }

    #[test]
    fn test_missing_username_is_reported() {
        let ctx = context(ConnectionConfig::default());
        let err = ctx
            .resolve("win-01", &ConnectionArgs::default())
            .unwrap_err();
        assert!(format!("{:#}", err).contains("username"));
    }
}
