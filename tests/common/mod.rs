//! Common test utilities for hostlink integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use hostlink::connection::winrm::envelope::{Envelope, EnvelopeBuilder, SoapAction};
use hostlink::connection::winrm::response::ResponseDocument;
use hostlink::connection::winrm::shell::WinRmShell;
use hostlink::connection::winrm::transport::Connector;
use hostlink::connection::winrm::WinRmConfig;
use hostlink::connection::{ConnectionError, ConnectionResult, RemoteProcess};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const NAMESPACES: &str = concat!(
    r#"xmlns:s="http://www.w3.org/2003/05/soap-envelope" "#,
    r#"xmlns:w="http://schemas.dmtf.org/wbem/wsman/1/wsman.xsd" "#,
    r#"xmlns:rsp="http://schemas.microsoft.com/wbem/wsman/1/windows/shell""#
);

pub const SHELL_ID: &str = "11111111-2222-3333-4444-555555555555";
pub const COMMAND_ID: &str = "AAAAAAAA-BBBB-CCCC-DDDD-EEEEEEEEEEEE";

/// Create response carrying the shell selector
pub fn create_response() -> String {
    format!(
        r#"<s:Envelope {NAMESPACES}><s:Header/><s:Body><x:ResourceCreated xmlns:x="http://schemas.xmlsoap.org/ws/2004/09/transfer"><w:SelectorSet><w:Selector Name="ShellId">{SHELL_ID}</w:Selector></w:SelectorSet></x:ResourceCreated></s:Body></s:Envelope>"#
    )
}

/// Command response carrying the command ID
pub fn command_response() -> String {
    format!(
        r#"<s:Envelope {NAMESPACES}><s:Header/><s:Body><rsp:CommandResponse><rsp:CommandId>{COMMAND_ID}</rsp:CommandId></rsp:CommandResponse></s:Body></s:Envelope>"#
    )
}

/// Empty-bodied response for Signal and Delete
pub fn empty_response() -> String {
    format!(r#"<s:Envelope {NAMESPACES}><s:Header/><s:Body/></s:Envelope>"#)
}

/// Receive response with the given chunks. `done` adds the Done state.
pub fn receive_response(
    stdout: &[&str],
    stderr: &[&str],
    done: bool,
    exit_code: Option<i32>,
) -> String {
    let mut streams = String::new();
    for chunk in stdout {
        streams.push_str(&format!(
            r#"<rsp:Stream Name="stdout" CommandId="{COMMAND_ID}">{}</rsp:Stream>"#,
            STANDARD.encode(chunk)
        ));
    }
    for chunk in stderr {
        streams.push_str(&format!(
            r#"<rsp:Stream Name="stderr" CommandId="{COMMAND_ID}">{}</rsp:Stream>"#,
            STANDARD.encode(chunk)
        ));
    }

    let state = if done { "Done" } else { "Running" };
    let code = exit_code
        .map(|c| format!("<rsp:ExitCode>{}</rsp:ExitCode>", c))
        .unwrap_or_default();

    format!(
        r#"<s:Envelope {NAMESPACES}><s:Header/><s:Body><rsp:ReceiveResponse>{streams}<rsp:CommandState CommandId="{COMMAND_ID}" State="http://schemas.microsoft.com/wbem/wsman/1/windows/shell/CommandState/{state}">{code}</rsp:CommandState></rsp:ReceiveResponse></s:Body></s:Envelope>"#
    )
}

/// Connector that answers from a script and records every request.
///
/// Receive answers come from a queue; once it is empty every further
/// Receive gets a "still running" response with no output.
pub struct ScriptedConnector {
    receives: Mutex<VecDeque<String>>,
    fail_receive_at: Option<usize>,
    receive_calls: AtomicUsize,
    requests: Mutex<Vec<SoapAction>>,
}

impl ScriptedConnector {
    pub fn new(receives: Vec<String>) -> Arc<Self> {
        Arc::new(Self {
            receives: Mutex::new(receives.into()),
            fail_receive_at: None,
            receive_calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        })
    }

    /// Fail the `n`th Receive request (1-based) with a transport error
    pub fn failing_receive(receives: Vec<String>, n: usize) -> Arc<Self> {
        Arc::new(Self {
            receives: Mutex::new(receives.into()),
            fail_receive_at: Some(n),
            receive_calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<SoapAction> {
        self.requests.lock().clone()
    }

    pub fn receive_calls(&self) -> usize {
        self.receive_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn send_message(&self, request: &Envelope) -> ConnectionResult<ResponseDocument> {
        // Let other tasks run between polls.
        tokio::task::yield_now().await;

        let action = request
            .action()
            .ok_or_else(|| ConnectionError::UnsupportedOperation("identify".into()))?;
        self.requests.lock().push(action);

        let xml = match action {
            SoapAction::Create => create_response(),
            SoapAction::Command => command_response(),
            SoapAction::Signal | SoapAction::Delete => empty_response(),
            SoapAction::Receive => {
                let call = self.receive_calls.fetch_add(1, Ordering::SeqCst) + 1;
                if self.fail_receive_at == Some(call) {
                    return Err(ConnectionError::Transport {
                        message: format!("receive {} refused", call),
                        request: request.as_xml().to_string(),
                        response: None,
                        source: None,
                    });
                }
                self.receives
                    .lock()
                    .pop_front()
                    .unwrap_or_else(|| receive_response(&[], &[], false, None))
            }
        };

        Ok(ResponseDocument::parse(&xml).expect("scripted responses are well-formed"))
    }
}

/// Envelope builder for a test endpoint
pub fn builder() -> EnvelopeBuilder {
    EnvelopeBuilder::new(WinRmConfig::new("win-01").envelope_parameters())
}

/// Shell session on `connector`
pub fn shell(connector: Arc<ScriptedConnector>) -> WinRmShell {
    WinRmShell::new(connector, builder())
}

/// Run `command` on a worker task the way `WinRmConnection` does
pub fn spawn(
    connector: Arc<ScriptedConnector>,
    command: &str,
    deadline: Option<Duration>,
) -> RemoteProcess {
    let mut shell = shell(connector).with_receive_deadline(deadline);
    let command = command.to_string();
    RemoteProcess::spawn(64 * 1024, move |mut stdout, mut stderr| async move {
        let result = shell.execute(&command, &mut stdout, &mut stderr).await;
        (result, stdout, stderr)
    })
}

/// Read a test fixture from `tests/fixtures`
pub fn fixture(name: &str) -> String {
    let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name);
    std::fs::read_to_string(&path)
        .unwrap_or_else(|e| panic!("failed to read fixture {}: {}", path.display(), e))
}
