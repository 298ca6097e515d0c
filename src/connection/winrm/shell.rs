//! Remote shell session.
//!
//! A [`WinRmShell`] drives one command through the WinRM shell lifecycle:
//!
//! ```text
//! Unopened -> ShellOpen -> CommandRunning -> CommandDone -> Closed
//!        \__________\_______________\______________\-> Failed
//! ```
//!
//! [`WinRmShell::execute`] runs the whole sequence and always attempts to
//! terminate the command and delete the shell once the shell was opened, even
//! when a later step fails. Cleanup failures are logged and never replace the
//! outcome of the command.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

use super::envelope::EnvelopeBuilder;
use super::response::{ResponseDocument, ResponseField};
use super::transport::Connector;
use crate::connection::process::OutputSink;
use crate::connection::{ConnectionError, ConnectionResult, ShellPhase};

/// Lifecycle state of a shell session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellState {
    /// No request sent yet
    Unopened,
    /// Shell created, no command started
    ShellOpen,
    /// Command started and being polled
    CommandRunning,
    /// Command reported Done; the exit code is final
    CommandDone,
    /// Shell deleted
    Closed,
    /// A lifecycle step failed
    Failed,
}

/// One shell running one command on a WinRM endpoint.
pub struct WinRmShell {
    connector: Arc<dyn Connector>,
    builder: EnvelopeBuilder,
    receive_deadline: Option<Duration>,
    state: ShellState,
    shell_id: Option<String>,
    command_id: Option<String>,
    exit_code: Option<i32>,
}

impl WinRmShell {
    /// Create an unopened session
    pub fn new(connector: Arc<dyn Connector>, builder: EnvelopeBuilder) -> Self {
        Self {
            connector,
            builder,
            receive_deadline: None,
            state: ShellState::Unopened,
            shell_id: None,
            command_id: None,
            exit_code: None,
        }
    }

    /// Give up polling after `deadline`; `None` polls until Done
    pub fn with_receive_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.receive_deadline = deadline;
        self
    }

    /// Current lifecycle state
    pub fn state(&self) -> ShellState {
        self.state
    }

    /// Shell ID assigned by the server, once open
    pub fn shell_id(&self) -> Option<&str> {
        self.shell_id.as_deref()
    }

    /// Command ID assigned by the server, once running
    pub fn command_id(&self) -> Option<&str> {
        self.command_id.as_deref()
    }

    /// Exit code of the command.
    ///
    /// Only available after the server reported the command Done.
    pub fn exit_code(&self) -> ConnectionResult<i32> {
        self.exit_code.ok_or(ConnectionError::CommandNotFinished)
    }

    /// Open the shell and return its ID
    pub async fn open(&mut self) -> ConnectionResult<String> {
        self.expect_state(ShellState::Unopened, "open a shell")?;

        let result = async {
            let response = self
                .connector
                .send_message(&self.builder.create_shell())
                .await?;
            response.required(ResponseField::ShellId)
        }
        .await;

        let shell_id = self.phase_result(ShellPhase::Open, result)?;
        debug!(host = %self.builder.endpoint(), shell_id = %shell_id, "Opened remote shell");
        self.shell_id = Some(shell_id.clone());
        self.state = ShellState::ShellOpen;
        Ok(shell_id)
    }

    /// Start `command` in the open shell and return the command ID
    pub async fn run(&mut self, command: &str) -> ConnectionResult<String> {
        self.expect_state(ShellState::ShellOpen, "run a command")?;
        let shell_id = self.require_shell_id()?;

        let result = async {
            let response = self
                .connector
                .send_message(&self.builder.command(&shell_id, command))
                .await?;
            response.required(ResponseField::CommandId)
        }
        .await;

        let command_id = self.phase_result(ShellPhase::Run, result)?;
        debug!(shell_id = %shell_id, command_id = %command_id, "Started remote command");
        self.command_id = Some(command_id.clone());
        self.state = ShellState::CommandRunning;
        Ok(command_id)
    }

    /// Poll output until the command reports Done.
    ///
    /// Stream chunks are decoded and appended to the sinks in the order the
    /// server returns them. Returns the exit code.
    pub async fn receive(
        &mut self,
        stdout: &mut OutputSink,
        stderr: &mut OutputSink,
    ) -> ConnectionResult<i32> {
        self.expect_state(ShellState::CommandRunning, "receive output")?;
        let shell_id = self.require_shell_id()?;
        let command_id = self
            .command_id
            .clone()
            .ok_or_else(|| ConnectionError::UnsupportedOperation("no command is running".into()))?;

        let polling = self.poll_until_done(&shell_id, &command_id, stdout, stderr);
        let result = match self.receive_deadline {
            Some(deadline) => match tokio::time::timeout(deadline, polling).await {
                Ok(result) => result,
                Err(_) => Err(ConnectionError::Timeout(deadline)),
            },
            None => polling.await,
        };

        let code = self.phase_result(ShellPhase::Receive, result)?;
        debug!(command_id = %command_id, exit_code = code, "Remote command finished");
        self.exit_code = Some(code);
        self.state = ShellState::CommandDone;
        Ok(code)
    }

    async fn poll_until_done(
        &self,
        shell_id: &str,
        command_id: &str,
        stdout: &mut OutputSink,
        stderr: &mut OutputSink,
    ) -> ConnectionResult<i32> {
        let mut early_exit_code = None;
        let mut polls: u64 = 0;

        loop {
            let response = self
                .connector
                .send_message(&self.builder.receive(shell_id, command_id))
                .await?;
            polls += 1;

            stdout.append(&response.stream(ResponseField::Stdout)?).await;
            stderr.append(&response.stream(ResponseField::Stderr)?).await;

            // Some servers report the exit code before Done.
            if polls == 1 {
                early_exit_code = response.exit_code().ok().flatten();
            }

            let done = response.contains(ResponseField::CommandDone);
            trace!(command_id = %command_id, polls, done, "Received command output");

            if done {
                return match response.exit_code()? {
                    Some(code) => Ok(code),
                    None => early_exit_code.ok_or_else(|| missing_exit_code(&response)),
                };
            }
        }
    }

    /// Send a terminate signal for the running command.
    ///
    /// Failures are logged and otherwise ignored.
    pub async fn signal_terminate(&mut self) {
        let (Some(shell_id), Some(command_id)) = (&self.shell_id, &self.command_id) else {
            return;
        };

        let envelope = self.builder.signal_terminate(shell_id, command_id);
        if let Err(e) = self.connector.send_message(&envelope).await {
            warn!(
                shell_id = %shell_id,
                command_id = %command_id,
                error = %e,
                "Failed to signal remote command"
            );
        }
    }

    /// Delete the shell.
    ///
    /// Failures are logged and otherwise ignored. The session is `Closed`
    /// afterwards unless it had already failed.
    pub async fn close(&mut self) {
        let Some(shell_id) = self.shell_id.take() else {
            return;
        };

        let envelope = self.builder.delete_shell(&shell_id);
        match self.connector.send_message(&envelope).await {
            Ok(_) => debug!(shell_id = %shell_id, "Closed remote shell"),
            Err(e) => warn!(shell_id = %shell_id, error = %e, "Failed to delete remote shell"),
        }

        if self.state != ShellState::Failed {
            self.state = ShellState::Closed;
        }
    }

    /// Run `command` to completion: open, run, receive, then terminate and
    /// close regardless of how the earlier steps went.
    pub async fn execute(
        &mut self,
        command: &str,
        stdout: &mut OutputSink,
        stderr: &mut OutputSink,
    ) -> ConnectionResult<i32> {
        self.open().await?;

        let result = match self.run(command).await {
            Ok(_) => self.receive(stdout, stderr).await,
            Err(e) => Err(e),
        };

        self.signal_terminate().await;
        self.close().await;
        result
    }

    fn expect_state(&self, expected: ShellState, operation: &str) -> ConnectionResult<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(ConnectionError::UnsupportedOperation(format!(
                "cannot {} while the shell is {:?}",
                operation, self.state
            )))
        }
    }

    fn require_shell_id(&self) -> ConnectionResult<String> {
        self.shell_id
            .clone()
            .ok_or_else(|| ConnectionError::UnsupportedOperation("shell is not open".into()))
    }

    fn phase_result<T>(&mut self, phase: ShellPhase, result: ConnectionResult<T>) -> ConnectionResult<T> {
        result.map_err(|e| {
            self.state = ShellState::Failed;
            if e.is_configuration() {
                e
            } else {
                ConnectionError::ShellFailed {
                    phase,
                    target: self.builder.endpoint().to_string(),
                    source: Box::new(e),
                }
            }
        })
    }
}

impl std::fmt::Debug for WinRmShell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WinRmShell")
            .field("endpoint", &self.builder.endpoint())
            .field("state", &self.state)
            .field("shell_id", &self.shell_id)
            .field("command_id", &self.command_id)
            .field("exit_code", &self.exit_code)
            .finish()
    }
}

fn missing_exit_code(response: &ResponseDocument) -> ConnectionError {
    ConnectionError::MissingResponseElement {
        expression: ResponseField::ExitCode.expression(),
        document: response.as_str().to_string(),
    }
}
