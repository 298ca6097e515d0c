//! WS-Management SOAP request construction.
//!
//! Every request the shell session sends goes through [`EnvelopeBuilder`]:
//! Create (open shell), Command (run command), Receive (poll output),
//! Signal (terminate command) and Delete (close shell). Construction is pure;
//! nothing here can fail.

use std::borrow::Cow;
use uuid::Uuid;

pub(crate) const SOAP_ENV_NS: &str = "http://www.w3.org/2003/05/soap-envelope";
pub(crate) const WSA_NS: &str = "http://schemas.xmlsoap.org/ws/2004/08/addressing";
pub(crate) const WSMAN_NS: &str = "http://schemas.dmtf.org/wbem/wsman/1/wsman.xsd";
pub(crate) const WSMV_NS: &str = "http://schemas.microsoft.com/wbem/wsman/1/wsman.xsd";
pub(crate) const SHELL_NS: &str = "http://schemas.microsoft.com/wbem/wsman/1/windows/shell";
pub(crate) const WSMID_NS: &str =
    "http://schemas.dmtf.org/wbem/wsman/identity/1/wsmanidentity.xsd";

/// Resource URI of the Windows command shell
pub const SHELL_RESOURCE_URI: &str = "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/cmd";

const ANONYMOUS_ADDRESS: &str = "http://schemas.xmlsoap.org/ws/2004/08/addressing/role/anonymous";
const SIGNAL_TERMINATE: &str =
    "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/signal/terminate";

/// WS-Man operation a request performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SoapAction {
    /// Open a shell
    Create,
    /// Start a command inside a shell
    Command,
    /// Poll command output
    Receive,
    /// Send a signal to a command
    Signal,
    /// Close a shell
    Delete,
}

impl SoapAction {
    /// Action URI used in the `Action` header and the `SOAPAction` HTTP header
    pub fn uri(self) -> &'static str {
        match self {
            SoapAction::Create => "http://schemas.xmlsoap.org/ws/2004/09/transfer/Create",
            SoapAction::Delete => "http://schemas.xmlsoap.org/ws/2004/09/transfer/Delete",
            SoapAction::Command => {
                "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/Command"
            }
            SoapAction::Receive => {
                "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/Receive"
            }
            SoapAction::Signal => "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/Signal",
        }
    }

    /// Short name for logs
    pub fn name(self) -> &'static str {
        match self {
            SoapAction::Create => "Create",
            SoapAction::Command => "Command",
            SoapAction::Receive => "Receive",
            SoapAction::Signal => "Signal",
            SoapAction::Delete => "Delete",
        }
    }
}

/// Ordered `w:OptionSet` entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OptionSet(Vec<(String, String)>);

impl OptionSet {
    /// Empty option set
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an option
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.push((name.into(), value.into()));
        self
    }

    /// Options sent when opening a shell
    pub fn open_shell(codepage: u32) -> Self {
        Self::new()
            .with("WINRS_NOPROFILE", "FALSE")
            .with("WINRS_CODEPAGE", codepage.to_string())
    }

    /// Options sent when starting a command
    pub fn run_command() -> Self {
        Self::new()
            .with("WINRS_CONSOLEMODE_STDIN", "TRUE")
            .with("WINRS_SKIP_CMD_SHELL", "FALSE")
    }

    /// Iterate over `(name, value)` pairs
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }
}

/// Operation-specific body payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    /// `rsp:Shell` with the input and output stream names
    Shell {
        /// Input stream names, space separated
        input_streams: String,
        /// Output stream names, space separated
        output_streams: String,
    },
    /// `rsp:CommandLine` with the (quoted) command text
    CommandLine(String),
    /// `rsp:Receive` for both output streams of a command
    Receive {
        /// Command to receive output for
        command_id: String,
    },
    /// `rsp:Signal` terminate for a command
    Signal {
        /// Command to signal
        command_id: String,
    },
    /// No body content
    Empty,
}

/// Connection-level values written into every request header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvelopeParameters {
    /// Full endpoint URL, used as `a:To`
    pub endpoint: String,
    /// `w:MaxEnvelopeSize` in bytes
    pub max_envelope_size: u32,
    /// BCP-47 locale for `w:Locale` and `p:DataLocale`
    pub locale: String,
    /// ISO-8601 duration for `w:OperationTimeout`
    pub operation_timeout: String,
    /// Console code page requested when opening a shell
    pub codepage: u32,
}

/// A serialized request document.
#[derive(Debug, Clone)]
pub struct Envelope {
    action: Option<SoapAction>,
    message_id: String,
    xml: String,
}

impl Envelope {
    /// Operation performed by this request, `None` for Identify
    pub fn action(&self) -> Option<SoapAction> {
        self.action
    }

    /// Value of the `SOAPAction` HTTP header, if any
    pub fn soap_action(&self) -> Option<&'static str> {
        self.action.map(SoapAction::uri)
    }

    /// `uuid:`-prefixed message ID
    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    /// The XML document text
    pub fn as_xml(&self) -> &str {
        &self.xml
    }
}

/// Builds request envelopes for one endpoint.
#[derive(Debug, Clone)]
pub struct EnvelopeBuilder {
    params: EnvelopeParameters,
}

impl EnvelopeBuilder {
    /// Create a builder for the given endpoint parameters
    pub fn new(params: EnvelopeParameters) -> Self {
        Self { params }
    }

    /// Endpoint the envelopes are addressed to
    pub fn endpoint(&self) -> &str {
        &self.params.endpoint
    }

    /// Build a complete request document.
    ///
    /// The `ShellId` selector is written only when `shell_id` is given, and the
    /// option set only when `options` is given.
    pub fn build(
        &self,
        action: SoapAction,
        shell_id: Option<&str>,
        options: Option<&OptionSet>,
        body: &Body,
    ) -> Envelope {
        let message_id = new_message_id();
        let p = &self.params;

        let mut header = String::new();
        header.push_str(&format!("<a:To>{}</a:To>", xml_escape(&p.endpoint)));
        header.push_str(&format!(
            r#"<a:ReplyTo><a:Address s:mustUnderstand="true">{}</a:Address></a:ReplyTo>"#,
            ANONYMOUS_ADDRESS
        ));
        header.push_str(&format!(
            r#"<w:MaxEnvelopeSize s:mustUnderstand="true">{}</w:MaxEnvelopeSize>"#,
            p.max_envelope_size
        ));
        header.push_str(&format!("<a:MessageID>{}</a:MessageID>", message_id));
        header.push_str(&format!(
            r#"<w:Locale xml:lang="{0}" s:mustUnderstand="false"/><p:DataLocale xml:lang="{0}" s:mustUnderstand="false"/>"#,
            xml_escape(&p.locale)
        ));
        header.push_str(&format!(
            "<w:OperationTimeout>{}</w:OperationTimeout>",
            xml_escape(&p.operation_timeout)
        ));
        header.push_str(&format!(
            r#"<a:Action s:mustUnderstand="true">{}</a:Action>"#,
            action.uri()
        ));
        if let Some(shell_id) = shell_id {
            header.push_str(&format!(
                r#"<w:SelectorSet><w:Selector Name="ShellId">{}</w:Selector></w:SelectorSet>"#,
                xml_escape(shell_id)
            ));
        }
        header.push_str(&format!(
            r#"<w:ResourceURI s:mustUnderstand="true">{}</w:ResourceURI>"#,
            SHELL_RESOURCE_URI
        ));
        if let Some(options) = options {
            header.push_str("<w:OptionSet>");
            for (name, value) in options.iter() {
                header.push_str(&format!(
                    r#"<w:Option Name="{}">{}</w:Option>"#,
                    xml_escape(name),
                    xml_escape(value)
                ));
            }
            header.push_str("</w:OptionSet>");
        }

        let xml = format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<s:Envelope xmlns:s="{SOAP_ENV_NS}" xmlns:a="{WSA_NS}" xmlns:w="{WSMAN_NS}" xmlns:p="{WSMV_NS}" xmlns:rsp="{SHELL_NS}"><s:Header>{header}</s:Header>{body}</s:Envelope>"#,
            header = header,
            body = render_body(body),
        );

        Envelope {
            action: Some(action),
            message_id,
            xml,
        }
    }

    /// Create request opening a `stdin` / `stdout stderr` shell
    pub fn create_shell(&self) -> Envelope {
        self.build(
            SoapAction::Create,
            None,
            Some(&OptionSet::open_shell(self.params.codepage)),
            &Body::Shell {
                input_streams: "stdin".to_string(),
                output_streams: "stdout stderr".to_string(),
            },
        )
    }

    /// Command request for `command_line` (quoted if necessary)
    pub fn command(&self, shell_id: &str, command_line: &str) -> Envelope {
        self.build(
            SoapAction::Command,
            Some(shell_id),
            Some(&OptionSet::run_command()),
            &Body::CommandLine(quote_command(command_line).into_owned()),
        )
    }

    /// Receive request for both output streams of a command
    pub fn receive(&self, shell_id: &str, command_id: &str) -> Envelope {
        self.build(
            SoapAction::Receive,
            Some(shell_id),
            None,
            &Body::Receive {
                command_id: command_id.to_string(),
            },
        )
    }

    /// Signal(terminate) request for a command
    pub fn signal_terminate(&self, shell_id: &str, command_id: &str) -> Envelope {
        self.build(
            SoapAction::Signal,
            Some(shell_id),
            None,
            &Body::Signal {
                command_id: command_id.to_string(),
            },
        )
    }

    /// Delete request closing a shell
    pub fn delete_shell(&self, shell_id: &str) -> Envelope {
        self.build(SoapAction::Delete, Some(shell_id), None, &Body::Empty)
    }

    /// WS-Man Identify request; carries no addressing headers or SOAPAction
    pub fn identify(&self) -> Envelope {
        let xml = format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<s:Envelope xmlns:s="{SOAP_ENV_NS}" xmlns:wsmid="{WSMID_NS}"><s:Header/><s:Body><wsmid:Identify/></s:Body></s:Envelope>"#
        );
        Envelope {
            action: None,
            message_id: new_message_id(),
            xml,
        }
    }
}

/// Wrap a command line in double quotes unless it already is.
///
/// Only the text of `rsp:Command` gets this treatment; it is not a general
/// command-line quoting rule.
pub fn quote_command(command: &str) -> Cow<'_, str> {
    if command.starts_with('"') && command.ends_with('"') {
        Cow::Borrowed(command)
    } else {
        Cow::Owned(format!("\"{}\"", command))
    }
}

/// Format a duration as a WS-Man operation timeout, e.g. `PT60.000S`
pub fn operation_timeout(duration: std::time::Duration) -> String {
    format!("PT{}.{:03}S", duration.as_secs(), duration.subsec_millis())
}

fn new_message_id() -> String {
    format!("uuid:{}", Uuid::new_v4().to_string().to_uppercase())
}

fn render_body(body: &Body) -> String {
    match body {
        Body::Shell {
            input_streams,
            output_streams,
        } => format!(
            "<s:Body><rsp:Shell><rsp:InputStreams>{}</rsp:InputStreams><rsp:OutputStreams>{}</rsp:OutputStreams></rsp:Shell></s:Body>",
            xml_escape(input_streams),
            xml_escape(output_streams)
        ),
        Body::CommandLine(command) => format!(
            "<s:Body><rsp:CommandLine><rsp:Command>{}</rsp:Command></rsp:CommandLine></s:Body>",
            xml_escape(command)
        ),
        Body::Receive { command_id } => format!(
            r#"<s:Body><rsp:Receive><rsp:DesiredStream CommandId="{}">stdout stderr</rsp:DesiredStream></rsp:Receive></s:Body>"#,
            xml_escape(command_id)
        ),
        Body::Signal { command_id } => format!(
            r#"<s:Body><rsp:Signal CommandId="{}"><rsp:Code>{}</rsp:Code></rsp:Signal></s:Body>"#,
            xml_escape(command_id),
            SIGNAL_TERMINATE
        ),
        Body::Empty => "<s:Body/>".to_string(),
    }
}

/// Escape special characters for XML
fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
