//! Fuzz target for WS-Man response parsing.
//!
//! Arbitrary bytes go through the XML parser and every extractor. Nothing
//! may panic; malformed input must surface as an error value.

#![no_main]

use hostlink::connection::winrm::response::{ResponseDocument, ResponseField};
use libfuzzer_sys::fuzz_target;

const FIELDS: [ResponseField; 6] = [
    ResponseField::ShellId,
    ResponseField::CommandId,
    ResponseField::ExitCode,
    ResponseField::Stdout,
    ResponseField::Stderr,
    ResponseField::CommandDone,
];

fuzz_target!(|data: &[u8]| {
    let Ok(xml) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(doc) = ResponseDocument::parse(xml) else {
        return;
    };

    for field in FIELDS {
        let _ = doc.first(field);
        let _ = doc.required(field);
    }
    let _ = doc.exit_code();
    let _ = doc.stream(ResponseField::Stdout);
    let _ = doc.stream(ResponseField::Stderr);
    let _ = doc.fault_reason();
    let _ = doc.root().descendants().count();
});
