//! Property-based tests for request construction using proptest.

use hostlink::connection::winrm::envelope::{quote_command, Envelope, EnvelopeBuilder, SoapAction};
use hostlink::connection::winrm::response::ResponseDocument;
use hostlink::connection::winrm::WinRmConfig;
use proptest::prelude::*;

const WSA_NS: &str = "http://schemas.xmlsoap.org/ws/2004/08/addressing";
const WSMAN_NS: &str = "http://schemas.dmtf.org/wbem/wsman/1/wsman.xsd";
const SHELL_NS: &str = "http://schemas.microsoft.com/wbem/wsman/1/windows/shell";

// ============================================================================
// Strategies for generating test data
// ============================================================================

/// Server-assigned identifiers, usually GUIDs but opaque to us
fn identifier() -> impl Strategy<Value = String> {
    prop_oneof![
        "[0-9A-F]{8}-[0-9A-F]{4}-[0-9A-F]{4}-[0-9A-F]{4}-[0-9A-F]{12}",
        "[a-zA-Z0-9&<>'\"_-]{1,40}",
    ]
}

/// Printable command lines, including XML-special characters
fn command_line() -> impl Strategy<Value = String> {
    prop_oneof![
        "[a-zA-Z0-9 ./\\\\:-]{0,60}",
        "\\PC{0,40}",
        "\"[a-z &<>|]{0,30}\"",
    ]
}

fn builder() -> EnvelopeBuilder {
    EnvelopeBuilder::new(WinRmConfig::new("win-01").envelope_parameters())
}

fn parse(envelope: &Envelope) -> ResponseDocument {
    ResponseDocument::parse(envelope.as_xml()).expect("envelope must be well-formed")
}

fn action_headers(doc: &ResponseDocument) -> Vec<String> {
    doc.find_all(WSA_NS, "Action")
        .map(|e| e.text().to_string())
        .collect()
}

fn shell_selectors(doc: &ResponseDocument) -> Vec<String> {
    doc.find_all(WSMAN_NS, "Selector")
        .filter(|e| e.attribute("Name") == Some("ShellId"))
        .map(|e| e.text().to_string())
        .collect()
}

// ============================================================================
// Command quoting
// ============================================================================

proptest! {
    #[test]
    fn quoting_adds_exactly_one_pair(cmd in "[^\"]{0,40}") {
        let quoted = quote_command(&cmd);
        prop_assert_eq!(quoted.len(), cmd.len() + 2);
        prop_assert!(quoted.starts_with('"'));
        prop_assert!(quoted.ends_with('"'));
        prop_assert_eq!(&quoted[1..quoted.len() - 1], cmd.as_str());
    }

    #[test]
    fn already_quoted_is_unchanged(inner in "\\PC{0,40}") {
        let cmd = format!("\"{}\"", inner);
        let quoted = quote_command(&cmd);
        prop_assert_eq!(quoted.as_ref(), cmd.as_str());
    }

    #[test]
    fn quoting_is_idempotent(cmd in command_line()) {
        let once = quote_command(&cmd).into_owned();
        let twice = quote_command(&once).into_owned();
        prop_assert_eq!(once, twice);
    }
}

// ============================================================================
// Envelope shape
// ============================================================================

proptest! {
    #[test]
    fn one_action_header_per_request(shell_id in identifier(), command_id in identifier()) {
        let b = builder();
        let requests = [
            (SoapAction::Create, b.create_shell()),
            (SoapAction::Command, b.command(&shell_id, "ipconfig")),
            (SoapAction::Receive, b.receive(&shell_id, &command_id)),
            (SoapAction::Signal, b.signal_terminate(&shell_id, &command_id)),
            (SoapAction::Delete, b.delete_shell(&shell_id)),
        ];

        for (action, envelope) in &requests {
            let doc = parse(envelope);
            prop_assert_eq!(action_headers(&doc), vec![action.uri().to_string()]);
            prop_assert_eq!(envelope.soap_action(), Some(action.uri()));
        }
    }

    #[test]
    fn shell_selector_iff_shell_id(shell_id in identifier()) {
        let b = builder();

        prop_assert!(shell_selectors(&parse(&b.create_shell())).is_empty());
        prop_assert_eq!(
            shell_selectors(&parse(&b.delete_shell(&shell_id))),
            vec![shell_id.clone()]
        );
        prop_assert_eq!(
            shell_selectors(&parse(&b.receive(&shell_id, "C1"))),
            vec![shell_id.clone()]
        );
    }

    #[test]
    fn command_text_survives_encoding(cmd in command_line()) {
        let doc = parse(&builder().command("S1", &cmd));
        let text: Vec<String> = doc
            .find_all(SHELL_NS, "Command")
            .map(|e| e.text().to_string())
            .collect();
        prop_assert_eq!(text, vec![quote_command(&cmd).into_owned()]);
    }

    #[test]
    fn message_ids_are_unique(shell_id in identifier()) {
        let b = builder();
        let first = b.receive(&shell_id, "C1");
        let second = b.receive(&shell_id, "C1");
        prop_assert_ne!(first.message_id(), second.message_id());
        prop_assert!(first.message_id().starts_with("uuid:"));
    }
}
