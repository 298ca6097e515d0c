//! WS-Management response parsing and value extraction.
//!
//! Responses are parsed into a small namespace-resolved element tree. The
//! values the shell session needs are located with fixed queries
//! ([`ResponseField`]) that match on namespace URI, local name and attribute
//! values, so the prefixes a particular server chooses do not matter.

use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine};
use quick_xml::events::{BytesStart, Event};
use quick_xml::name::ResolveResult;
use quick_xml::NsReader;
use std::fmt;
use std::str;
use thiserror::Error;

use super::envelope::{SHELL_NS, SOAP_ENV_NS, WSMAN_NS};
use crate::connection::{ConnectionError, ConnectionResult};

/// Deepest element nesting accepted in a response
pub const MAX_DEPTH: usize = 256;

const COMMAND_STATE_DONE: &str =
    "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/CommandState/Done";

/// A response body could not be parsed as XML.
#[derive(Error, Debug)]
#[error("Malformed XML at byte {position}: {message}")]
pub struct XmlParseError {
    /// Byte offset where parsing stopped
    pub position: u64,
    /// Parser message
    pub message: String,
}

/// One element of a parsed document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    namespace: Option<String>,
    name: String,
    attributes: Vec<(String, String)>,
    text: String,
    children: Vec<Element>,
}

impl Element {
    /// Namespace URI, if the element is in a namespace
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// Local name without prefix
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the element has the given namespace URI and local name
    pub fn is(&self, namespace: &str, name: &str) -> bool {
        self.namespace.as_deref() == Some(namespace) && self.name == name
    }

    /// Attribute value by local name
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Text content directly inside this element
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Child elements
    pub fn children(&self) -> &[Element] {
        &self.children
    }

    /// This element and all of its descendants, depth-first in document order
    pub fn descendants(&self) -> Descendants<'_> {
        Descendants { stack: vec![self] }
    }
}

/// Depth-first iterator over an element subtree.
pub struct Descendants<'a> {
    stack: Vec<&'a Element>,
}

impl<'a> Iterator for Descendants<'a> {
    type Item = &'a Element;

    fn next(&mut self) -> Option<Self::Item> {
        let element = self.stack.pop()?;
        self.stack.extend(element.children.iter().rev());
        Some(element)
    }
}

/// Values the shell session reads out of responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseField {
    /// Shell ID assigned by a Create response
    ShellId,
    /// Command ID assigned by a Command response
    CommandId,
    /// Exit code of a finished command
    ExitCode,
    /// Base64 stdout chunks
    Stdout,
    /// Base64 stderr chunks
    Stderr,
    /// Command state element reporting Done
    CommandDone,
}

impl ResponseField {
    /// Path expression describing the query, used in error messages
    pub fn expression(self) -> &'static str {
        match self {
            ResponseField::ShellId => "//w:Selector[@Name='ShellId'] | //rsp:ShellId",
            ResponseField::CommandId => "//rsp:CommandId",
            ResponseField::ExitCode => "//rsp:ExitCode",
            ResponseField::Stdout => "//rsp:Stream[@Name='stdout']",
            ResponseField::Stderr => "//rsp:Stream[@Name='stderr']",
            ResponseField::CommandDone => {
                "//rsp:CommandState[@State='http://schemas.microsoft.com/wbem/wsman/1/windows/shell/CommandState/Done']"
            }
        }
    }

    fn matches(self, element: &Element) -> bool {
        match self {
            ResponseField::ShellId => {
                (element.is(WSMAN_NS, "Selector") && element.attribute("Name") == Some("ShellId"))
                    || element.is(SHELL_NS, "ShellId")
            }
            ResponseField::CommandId => element.is(SHELL_NS, "CommandId"),
            ResponseField::ExitCode => element.is(SHELL_NS, "ExitCode"),
            ResponseField::Stdout => {
                element.is(SHELL_NS, "Stream") && element.attribute("Name") == Some("stdout")
            }
            ResponseField::Stderr => {
                element.is(SHELL_NS, "Stream") && element.attribute("Name") == Some("stderr")
            }
            ResponseField::CommandDone => {
                element.is(SHELL_NS, "CommandState")
                    && element.attribute("State") == Some(COMMAND_STATE_DONE)
            }
        }
    }
}

impl fmt::Display for ResponseField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.expression())
    }
}

/// A parsed WS-Management response.
#[derive(Debug, Clone)]
pub struct ResponseDocument {
    root: Element,
    raw: String,
}

impl ResponseDocument {
    /// Parse a response body
    pub fn parse(xml: &str) -> Result<Self, XmlParseError> {
        let mut reader = NsReader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut stack: Vec<Element> = Vec::new();
        let mut root: Option<Element> = None;

        loop {
            let position = reader.buffer_position() as u64;
            let event = reader.read_resolved_event().map_err(|e| XmlParseError {
                position,
                message: e.to_string(),
            })?;

            match event {
                (ns, Event::Start(start)) => {
                    check_depth(&stack, position)?;
                    let element = new_element(resolve_namespace(ns, position)?, &start, position)?;
                    stack.push(element);
                }
                (ns, Event::Empty(start)) => {
                    check_depth(&stack, position)?;
                    let element = new_element(resolve_namespace(ns, position)?, &start, position)?;
                    attach(&mut stack, &mut root, element, position)?;
                }
                (_, Event::End(_)) => {
                    let element = stack.pop().ok_or_else(|| XmlParseError {
                        position,
                        message: "closing tag without matching opening tag".to_string(),
                    })?;
                    attach(&mut stack, &mut root, element, position)?;
                }
                (_, Event::Text(text)) => {
                    if let Some(current) = stack.last_mut() {
                        let text = text.unescape().map_err(|e| XmlParseError {
                            position,
                            message: e.to_string(),
                        })?;
                        current.text.push_str(&text);
                    }
                }
                (_, Event::CData(data)) => {
                    if let Some(current) = stack.last_mut() {
                        current
                            .text
                            .push_str(&String::from_utf8_lossy(&data.into_inner()));
                    }
                }
                (_, Event::Eof) => break,
                _ => {}
            }
        }

        if !stack.is_empty() {
            return Err(XmlParseError {
                position: xml.len() as u64,
                message: format!("{} unclosed element(s)", stack.len()),
            });
        }

        let root = root.ok_or_else(|| XmlParseError {
            position: 0,
            message: "document has no root element".to_string(),
        })?;

        Ok(Self {
            root,
            raw: xml.to_string(),
        })
    }

    /// Root element
    pub fn root(&self) -> &Element {
        &self.root
    }

    /// Original document text
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// All elements with the given namespace URI and local name
    pub fn find_all<'a>(
        &'a self,
        namespace: &'a str,
        name: &'a str,
    ) -> impl Iterator<Item = &'a Element> + 'a {
        self.root
            .descendants()
            .filter(move |element| element.is(namespace, name))
    }

    /// All elements matching a field query
    pub fn matches(&self, field: ResponseField) -> impl Iterator<Item = &Element> + '_ {
        self.root
            .descendants()
            .filter(move |element| field.matches(element))
    }

    /// Text of the first element matching `field`, if any
    pub fn first(&self, field: ResponseField) -> Option<&str> {
        self.matches(field).next().map(|element| {
            // Selector-style matches carry their value as text; so do the rest.
            element.text().trim()
        })
    }

    /// Whether any element matches `field`
    pub fn contains(&self, field: ResponseField) -> bool {
        self.matches(field).next().is_some()
    }

    /// Text of the first element matching `field`, or a
    /// [`ConnectionError::MissingResponseElement`] naming the query
    pub fn required(&self, field: ResponseField) -> ConnectionResult<String> {
        self.first(field)
            .filter(|text| !text.is_empty())
            .map(str::to_string)
            .ok_or_else(|| ConnectionError::MissingResponseElement {
                expression: field.expression(),
                document: self.raw.clone(),
            })
    }

    /// Exit code from the first matching element, if present
    pub fn exit_code(&self) -> ConnectionResult<Option<i32>> {
        match self.first(ResponseField::ExitCode) {
            None | Some("") => Ok(None),
            Some(text) => text.parse::<i32>().map(Some).map_err(|e| {
                ConnectionError::MalformedResponse {
                    expression: ResponseField::ExitCode.expression(),
                    reason: format!("'{}' is not an exit code: {}", text, e),
                }
            }),
        }
    }

    /// Decode and concatenate every Base64 chunk of a stream field.
    ///
    /// Zero matches is valid and yields no bytes.
    pub fn stream(&self, field: ResponseField) -> ConnectionResult<Vec<u8>> {
        let mut bytes = Vec::new();
        for element in self.matches(field) {
            let chunk = element.text().trim();
            if chunk.is_empty() {
                continue;
            }
            let decoded =
                BASE64_STANDARD
                    .decode(chunk)
                    .map_err(|e| ConnectionError::MalformedResponse {
                        expression: field.expression(),
                        reason: format!("invalid Base64 chunk: {}", e),
                    })?;
            bytes.extend_from_slice(&decoded);
        }
        Ok(bytes)
    }

    /// Reason text of a SOAP fault, if this document is one
    pub fn fault_reason(&self) -> Option<String> {
        let fault = self
            .root
            .descendants()
            .find(|element| element.is(SOAP_ENV_NS, "Fault"))?;
        let reason = fault
            .descendants()
            .filter(|element| element.is(SOAP_ENV_NS, "Text"))
            .map(|element| element.text().trim())
            .find(|text| !text.is_empty())
            .unwrap_or("SOAP fault without reason text");
        Some(reason.to_string())
    }
}

impl fmt::Display for ResponseDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn check_depth(stack: &[Element], position: u64) -> Result<(), XmlParseError> {
    if stack.len() >= MAX_DEPTH {
        return Err(XmlParseError {
            position,
            message: format!("elements nested deeper than {}", MAX_DEPTH),
        });
    }
    Ok(())
}

fn resolve_namespace(ns: ResolveResult<'_>, position: u64) -> Result<Option<String>, XmlParseError> {
    match ns {
        ResolveResult::Bound(namespace) => {
            Ok(Some(String::from_utf8_lossy(namespace.as_ref()).into_owned()))
        }
        ResolveResult::Unbound => Ok(None),
        ResolveResult::Unknown(prefix) => Err(XmlParseError {
            position,
            message: format!(
                "undeclared namespace prefix '{}'",
                String::from_utf8_lossy(&prefix)
            ),
        }),
    }
}

fn new_element(
    namespace: Option<String>,
    start: &BytesStart<'_>,
    position: u64,
) -> Result<Element, XmlParseError> {
    let parse_error = |message: String| XmlParseError { position, message };

    let name = str::from_utf8(start.local_name().as_ref())
        .map_err(|_| parse_error("invalid UTF-8 in tag name".to_string()))?
        .to_string();

    let mut attributes = Vec::new();
    for attr in start.attributes() {
        let attr = attr.map_err(|e| parse_error(e.to_string()))?;
        if attr.key.as_namespace_binding().is_some() {
            continue;
        }
        let key = str::from_utf8(attr.key.local_name().as_ref())
            .map_err(|_| parse_error("invalid UTF-8 in attribute name".to_string()))?
            .to_string();
        let value = attr
            .unescape_value()
            .map_err(|e| parse_error(e.to_string()))?
            .into_owned();
        attributes.push((key, value));
    }

    Ok(Element {
        namespace,
        name,
        attributes,
        text: String::new(),
        children: Vec::new(),
    })
}

fn attach(
    stack: &mut [Element],
    root: &mut Option<Element>,
    element: Element,
    position: u64,
) -> Result<(), XmlParseError> {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(element);
        Ok(())
    } else if root.is_none() {
        *root = Some(element);
        Ok(())
    } else {
        Err(XmlParseError {
            position,
            message: "document has more than one root element".to_string(),
        })
    }
}
