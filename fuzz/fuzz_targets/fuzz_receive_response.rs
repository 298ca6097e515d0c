//! Fuzz target for structured receive responses.
//!
//! Builds well-formed Receive responses from arbitrary chunks, states and exit
//! code text, and checks that stream decoding preserves chunk order.

#![no_main]

use arbitrary::Arbitrary;
use base64::{engine::general_purpose::STANDARD, Engine};
use hostlink::connection::winrm::response::{ResponseDocument, ResponseField};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct FuzzReceive {
    stdout: Vec<Vec<u8>>,
    stderr: Vec<Vec<u8>>,
    done: bool,
    exit_code: Option<String>,
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

fuzz_target!(|input: FuzzReceive| {
    let mut xml = String::from(
        r#"<s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope" xmlns:rsp="http://schemas.microsoft.com/wbem/wsman/1/windows/shell"><s:Body><rsp:ReceiveResponse>"#,
    );
    for chunk in &input.stdout {
        xml.push_str(&format!(
            r#"<rsp:Stream Name="stdout">{}</rsp:Stream>"#,
            STANDARD.encode(chunk)
        ));
    }
    for chunk in &input.stderr {
        xml.push_str(&format!(
            r#"<rsp:Stream Name="stderr">{}</rsp:Stream>"#,
            STANDARD.encode(chunk)
        ));
    }
    let state = if input.done { "Done" } else { "Running" };
    xml.push_str(&format!(
        r#"<rsp:CommandState State="http://schemas.microsoft.com/wbem/wsman/1/windows/shell/CommandState/{}">"#,
        state
    ));
    if let Some(code) = &input.exit_code {
        xml.push_str(&format!("<rsp:ExitCode>{}</rsp:ExitCode>", escape(code)));
    }
    xml.push_str("</rsp:CommandState></rsp:ReceiveResponse></s:Body></s:Envelope>");

    let doc = ResponseDocument::parse(&xml).expect("generated response is well-formed");

    assert_eq!(doc.stream(ResponseField::Stdout).unwrap(), input.stdout.concat());
    assert_eq!(doc.stream(ResponseField::Stderr).unwrap(), input.stderr.concat());
    assert_eq!(doc.contains(ResponseField::CommandDone), input.done);
    let _ = doc.exit_code();
});
