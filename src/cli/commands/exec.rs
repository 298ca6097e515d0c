//! Exec command - run one command on a host and stream its output

use super::CommandContext;
use crate::cli::ConnectionArgs;
use anyhow::{Context, Result};
use clap::Parser;
use hostlink::connection::winrm::powershell_command;
use hostlink::connection::{Connection, ExecuteOptions, ProcessOutput};
use tokio::io::AsyncWrite;
use tracing::debug;

/// Exit code reported when the user interrupts a running command
const INTERRUPTED_EXIT_CODE: i32 = 130;

/// Arguments for the exec command
#[derive(Parser, Debug, Clone)]
pub struct ExecArgs {
    /// Host alias or address
    pub host: String,

    /// Command line to run (after `--`)
    #[arg(last = true, required = true)]
    pub command: Vec<String>,

    #[command(flatten)]
    pub connection: ConnectionArgs,

    /// Remote working directory
    #[arg(long)]
    pub cwd: Option<String>,

    /// Environment variables (KEY=VALUE)
    #[arg(short = 'e', long = "env", value_parser = parse_env_pair)]
    pub env: Vec<(String, String)>,

    /// Stop polling for output after this many seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Run the command as a PowerShell script
    #[arg(long)]
    pub powershell: bool,
}

fn parse_env_pair(value: &str) -> Result<(String, String), String> {
    match value.split_once('=') {
        Some((key, val)) if !key.is_empty() => Ok((key.to_string(), val.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{}'", value)),
    }
}

impl ExecArgs {
    /// Command line sent to the remote shell
    fn command_line(&self) -> String {
        let joined = self.command.join(" ");
        if self.powershell {
            powershell_command(&joined)
        } else {
            joined
        }
    }

    fn options(&self) -> ExecuteOptions {
        let mut options = ExecuteOptions::new();
        options.cwd = self.cwd.clone();
        for (key, value) in &self.env {
            options = options.with_env(key.as_str(), value.as_str());
        }
        options.timeout = self.timeout;
        options
    }

    /// Execute the exec command
    pub async fn execute(&self, ctx: &mut CommandContext) -> Result<i32> {
        let connection = ctx.connection(&self.host, &self.connection)?;
        let line = self.command_line();
        debug!(host = %self.host, command = %line, "Starting remote command");

        let mut process = connection
            .start_process(&line, Some(self.options()))
            .await
            .with_context(|| format!("Failed to start command on {}", self.host))?;

        let stdout = process.stdout.take();
        let stderr = process.stderr.take();

        let outcome = {
            let run = async {
                let (out, err, code) = tokio::join!(
                    pump(stdout, tokio::io::stdout()),
                    pump(stderr, tokio::io::stderr()),
                    process.wait()
                );
                (out, err, code)
            };
            tokio::select! {
                result = run => Some(result),
                _ = tokio::signal::ctrl_c() => None,
            }
        };

        let Some((out, err, code)) = outcome else {
            process.destroy();
            ctx.output.warning("Interrupted; remote command abandoned");
            return Ok(INTERRUPTED_EXIT_CODE);
        };

        out.context("Failed to copy remote stdout")?;
        err.context("Failed to copy remote stderr")?;
        ctx.output.flush();

        match code {
            Ok(code) => {
                ctx.output
                    .info(&format!("{} exited with code {}", self.host, code));
                Ok(code)
            }
            Err(e) => {
                ctx.output.error(&format!("{}: {}", self.host, e));
                Ok(1)
            }
        }
    }
}

async fn pump<W>(source: Option<ProcessOutput>, mut sink: W) -> std::io::Result<u64>
where
    W: AsyncWrite + Unpin,
{
    use tokio::io::AsyncWriteExt;

    let Some(mut source) = source else {
        return Ok(0);
    };
    let copied = tokio::io::copy(&mut source, &mut sink).await?;
    sink.flush().await?;
    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(command: &[&str]) -> ExecArgs {
        ExecArgs {
            host: "win-01".to_string(),
            command: command.iter().map(|s| s.to_string()).collect(),
            connection: ConnectionArgs::default(),
            cwd: None,
            env: Vec::new(),
            timeout: None,
            powershell: false,
        }
    }

    #[test]
    fn test_command_line_joins_words() {
        assert_eq!(args(&["dir", "/b", "C:\\"]).command_line(), "dir /b C:\\");
    }

    #[test]
    fn test_powershell_command_line() {
        let mut exec = args(&["Get-Date"]);
        exec.powershell = true;
        assert!(exec
            .command_line()
            .starts_with("powershell.exe -NoProfile -NonInteractive -EncodedCommand "));
    }

    #[test]
    fn test_options() {
        let mut exec = args(&["set"]);
        exec.cwd = Some("C:\\temp".to_string());
        exec.env = vec![("A".to_string(), "1".to_string())];
        exec.timeout = Some(30);

        let options = exec.options();
        assert_eq!(options.cwd.as_deref(), Some("C:\\temp"));
        assert_eq!(options.env.get("A").map(String::as_str), Some("1"));
        assert_eq!(options.timeout, Some(30));
    }

    #[test]
    fn test_parse_env_pair() {
        assert_eq!(
            parse_env_pair("PATH=C:\\bin;D:\\x").unwrap(),
            ("PATH".to_string(), "C:\\bin;D:\\x".to_string())
        );
        assert!(parse_env_pair("novalue").is_err());
        assert!(parse_env_pair("=x").is_err());
    }
}
