//! SOAP XML parsing utilities.
//!
//! Uses quick-xml which is safe against XXE by default (doesn't expand entities).
//! Element names are matched by local name only; prefixes and namespace
//! declarations vary too much between server versions to be useful.

use crate::error::DfaError;
use crate::fault::FaultPayload;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde_json::{Map, Value};

/// Read access to an XML document by element path.
pub trait XmlDocument {
    /// Text of the first candidate path that exists in the document.
    ///
    /// Each path is a root-anchored list of element local names. Candidates
    /// are tried in order, so callers list the preferred schema first.
    fn value_at(&self, candidate_paths: &[&[&str]]) -> Option<String>;
}

/// A parsed XML element.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XmlNode {
    /// Element local name
    pub name: String,
    /// Concatenated, trimmed text content
    pub text: String,
    /// Child elements in document order
    pub children: Vec<XmlNode>,
}

impl XmlNode {
    fn new(name: String) -> Self {
        Self {
            name,
            ..Default::default()
        }
    }

    /// First child with the given local name.
    pub fn child(&self, name: &str) -> Option<&XmlNode> {
        self.children.iter().find(|c| c.name == name)
    }

    /// Follow a path of local names below this node.
    pub fn descend(&self, path: &[&str]) -> Option<&XmlNode> {
        path.iter().try_fold(self, |node, name| node.child(name))
    }

    /// Convert the subtree into a nested mapping keyed by local name.
    ///
    /// Leaf elements become strings; repeated siblings become arrays.
    pub fn to_value(&self) -> Value {
        if self.children.is_empty() {
            return Value::String(self.text.clone());
        }

        let mut map = Map::new();
        for child in &self.children {
            let value = child.to_value();
            match map.get_mut(&child.name) {
                Some(Value::Array(items)) => items.push(value),
                Some(existing) => {
                    let first = existing.take();
                    *existing = Value::Array(vec![first, value]);
                }
                None => {
                    map.insert(child.name.clone(), value);
                }
            }
        }
        Value::Object(map)
    }
}

/// An in-memory XML tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlTree {
    root: XmlNode,
}

impl XmlTree {
    /// Parse XML text into a tree.
    pub fn parse(xml: &str) -> Result<Self, DfaError> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut stack: Vec<XmlNode> = Vec::new();
        let mut root: Option<XmlNode> = None;
        let mut buf = Vec::new();

        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Start(ref e)) => {
                    stack.push(XmlNode::new(local_name_str(e)));
                }

                Ok(Event::Empty(ref e)) => {
                    let node = XmlNode::new(local_name_str(e));
                    attach(&mut stack, &mut root, node);
                }

                Ok(Event::Text(ref e)) => {
                    let text = e
                        .unescape()
                        .map_err(|err| DfaError::XmlParse(format!("Invalid text: {}", err)))?;
                    if let Some(node) = stack.last_mut() {
                        node.text.push_str(text.trim());
                    }
                }

                Ok(Event::CData(e)) => {
                    if let Some(node) = stack.last_mut() {
                        node.text.push_str(&String::from_utf8_lossy(&e.into_inner()));
                    }
                }

                Ok(Event::End(_)) => {
                    if let Some(node) = stack.pop() {
                        attach(&mut stack, &mut root, node);
                    }
                }

                Ok(Event::Eof) => break,

                Err(e) => {
                    return Err(DfaError::XmlParse(format!(
                        "XML parse error at position {}: {}",
                        reader.buffer_position(),
                        e
                    )));
                }

                _ => {}
            }

            buf.clear();
        }

        if !stack.is_empty() {
            return Err(DfaError::XmlParse("Unexpected end of document".to_string()));
        }

        root.map(|root| Self { root })
            .ok_or_else(|| DfaError::XmlParse("Document has no root element".to_string()))
    }

    /// The document element.
    pub fn root(&self) -> &XmlNode {
        &self.root
    }

    /// Node at a root-anchored path of local names.
    pub fn node_at(&self, path: &[&str]) -> Option<&XmlNode> {
        let (first, rest) = path.split_first()?;
        if *first != self.root.name {
            return None;
        }
        self.root.descend(rest)
    }
}

impl XmlDocument for XmlTree {
    fn value_at(&self, candidate_paths: &[&[&str]]) -> Option<String> {
        candidate_paths
            .iter()
            .find_map(|path| self.node_at(path))
            .map(|node| node.text.clone())
    }
}

fn attach(stack: &mut [XmlNode], root: &mut Option<XmlNode>, node: XmlNode) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(node),
        None => {
            if root.is_none() {
                *root = Some(node);
            }
        }
    }
}

/// Extract local name from element.
fn local_name_str(e: &BytesStart) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).into_owned()
}

/// Parse a SOAP 1.1 or 1.2 fault envelope into a fault payload.
pub fn parse_fault(xml: &str) -> Result<FaultPayload, DfaError> {
    let tree = XmlTree::parse(xml)?;
    let fault = tree
        .node_at(&["Envelope", "Body", "Fault"])
        .ok_or_else(|| DfaError::XmlParse("No SOAP Fault found in envelope".to_string()))?;

    // SOAP 1.1 uses faultcode/faultstring/detail, SOAP 1.2 Code/Reason/Detail.
    let fault_code = fault
        .child("faultcode")
        .or_else(|| fault.descend(&["Code", "Value"]))
        .map(|n| n.text.clone())
        .unwrap_or_default();
    let fault_string = fault
        .child("faultstring")
        .or_else(|| fault.descend(&["Reason", "Text"]))
        .map(|n| n.text.clone())
        .unwrap_or_default();
    let detail = fault
        .child("detail")
        .or_else(|| fault.child("Detail"))
        .filter(|n| !n.children.is_empty())
        .map(XmlNode::to_value);

    Ok(FaultPayload {
        fault_code,
        fault_string,
        detail,
    })
}
