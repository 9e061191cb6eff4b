//! Opportunistic markup decoding for message text fields.
//!
//! Message bodies are usually plain text, but some carry an XML document
//! (system notices, rich-media envelopes). [`decode_markup`] recognises those
//! by prefix and converts them into a JSON tree so handlers never need an XML
//! parser of their own.
//!
//! The result distinguishes three outcomes:
//! - `Ok(None)`: the text does not look like markup. Expected, not an error.
//! - `Ok(Some(tree))`: the text was markup and parsed.
//! - `Err(_)`: the text looked like markup but did not parse.
//!
//! Callers that only care whether a tree is available may treat the first and
//! last cases alike; [`crate::payload::MsgPayload::assemble`] does exactly
//! that and leaves the raw text in place.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde_json::{Map, Value};

/// Prefixes identifying text worth parsing, checked in order.
pub const MARKUP_PREFIXES: [&str; 3] = ["<?xml", "<sysmsg", "<msg"];

/// Key prefix for attributes in a decoded tree.
pub const ATTR_PREFIX: &str = "-";

/// Key for element text when the element also has attributes or children.
pub const TEXT_KEY: &str = "#text";

/// Deepest element nesting accepted, root included.
pub const MAX_DEPTH: usize = 128;

/// Errors from parsing text that matched a markup prefix.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("Malformed markup: {0}")]
    Malformed(String),

    #[error("Element '{0}' is never closed")]
    Unclosed(String),

    #[error("No root element found")]
    NoRoot,

    #[error("Markup nested deeper than {0} elements")]
    TooDeep(usize),
}

/// Check whether text looks like one of the recognised markup formats.
pub fn looks_like_markup(raw: &str) -> bool {
    let trimmed = raw.trim();
    MARKUP_PREFIXES.iter().any(|p| trimmed.starts_with(p))
}

/// Decode text into a tree if it looks like markup.
///
/// The tree has a single key, the root element name. Elements with neither
/// attributes nor children become their text; others become objects with
/// attributes under `-name`, children under their names and text under
/// `#text`. Repeated siblings collapse into arrays. All leaves are strings.
/// Documents nested deeper than [`MAX_DEPTH`] are rejected.
pub fn decode_markup(raw: &str) -> Result<Option<Value>, DecodeError> {
    let trimmed = raw.trim();
    if !looks_like_markup(trimmed) {
        return Ok(None);
    }
    parse_tree(trimmed).map(Some)
}

/// Element under construction.
struct Frame {
    name: String,
    fields: Map<String, Value>,
    text: String,
}

impl Frame {
    fn open(start: &BytesStart<'_>) -> Result<Self, DecodeError> {
        let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
        let mut fields = Map::new();
        for attr in start.attributes() {
            let attr = attr.map_err(|e| DecodeError::Malformed(e.to_string()))?;
            let key = format!(
                "{}{}",
                ATTR_PREFIX,
                String::from_utf8_lossy(attr.key.as_ref())
            );
            let value = attr
                .unescape_value()
                .map_err(|e| DecodeError::Malformed(e.to_string()))?;
            fields.insert(key, Value::String(value.into_owned()));
        }
        Ok(Self {
            name,
            fields,
            text: String::new(),
        })
    }

    fn finish(self) -> (String, Value) {
        if self.fields.is_empty() {
            return (self.name, Value::String(self.text));
        }
        let mut fields = self.fields;
        if !self.text.is_empty() {
            fields.insert(TEXT_KEY.to_string(), Value::String(self.text));
        }
        (self.name, Value::Object(fields))
    }
}

/// Insert a child, turning repeated names into an array.
fn insert_child(fields: &mut Map<String, Value>, name: String, value: Value) {
    match fields.get_mut(&name) {
        Some(Value::Array(items)) => items.push(value),
        Some(existing) => {
            let first = existing.take();
            *existing = Value::Array(vec![first, value]);
        }
        None => {
            fields.insert(name, value);
        }
    }
}

fn root_tree(name: String, value: Value) -> Value {
    let mut root = Map::new();
    root.insert(name, value);
    Value::Object(root)
}

fn parse_tree(text: &str) -> Result<Value, DecodeError> {
    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<Frame> = Vec::new();

    loop {
        let event = reader
            .read_event()
            .map_err(|e| DecodeError::Malformed(e.to_string()))?;

        match event {
            Event::Start(start) => {
                if stack.len() >= MAX_DEPTH {
                    return Err(DecodeError::TooDeep(MAX_DEPTH));
                }
                stack.push(Frame::open(&start)?);
            }
            Event::Empty(start) => {
                let (name, value) = Frame::open(&start)?.finish();
                match stack.last_mut() {
                    Some(parent) => insert_child(&mut parent.fields, name, value),
                    None => return Ok(root_tree(name, value)),
                }
            }
            Event::End(_) => {
                // End names are checked against the open element by the reader.
                let Some(frame) = stack.pop() else {
                    return Err(DecodeError::Malformed("unexpected end tag".to_string()));
                };
                let (name, value) = frame.finish();
                match stack.last_mut() {
                    Some(parent) => insert_child(&mut parent.fields, name, value),
                    None => return Ok(root_tree(name, value)),
                }
            }
            Event::Text(t) => {
                if let Some(frame) = stack.last_mut() {
                    let unescaped = t
                        .unescape()
                        .map_err(|e| DecodeError::Malformed(e.to_string()))?;
                    frame.text.push_str(&unescaped);
                }
            }
            Event::CData(c) => {
                if let Some(frame) = stack.last_mut() {
                    frame.text.push_str(&String::from_utf8_lossy(&c.into_inner()));
                }
            }
            Event::Eof => {
                return Err(match stack.pop() {
                    Some(frame) => DecodeError::Unclosed(frame.name),
                    None => DecodeError::NoRoot,
                });
            }
            // Declarations, comments, processing instructions, doctype.
            _ => {}
        }
    }
}
