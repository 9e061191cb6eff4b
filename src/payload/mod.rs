//! Payloads delivered to message handlers.

use serde::Serialize;
use serde_json::Value;

use crate::decode::decode_markup;
use crate::proto::MsgRecord;

/// A received record plus any markup trees decoded from it.
///
/// A decoded field is never represented twice: when a tree is present the
/// corresponding raw text field is empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MsgPayload {
    /// Raw record, with decoded text fields cleared.
    #[serde(flatten)]
    pub record: MsgRecord,
    /// Tree decoded from `record.content`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_tree: Option<Value>,
    /// Tree decoded from `record.xml`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub envelope_tree: Option<Value>,
}

impl MsgPayload {
    /// Build a payload from a received record.
    ///
    /// `content` and `xml` are decoded independently. Text that is not
    /// markup, or markup that fails to parse, stays in its raw field.
    pub fn assemble(mut record: MsgRecord) -> Self {
        let content_tree = take_decoded(&mut record.content);
        let envelope_tree = take_decoded(&mut record.xml);
        Self {
            record,
            content_tree,
            envelope_tree,
        }
    }
}

fn take_decoded(field: &mut String) -> Option<Value> {
    match decode_markup(field) {
        Ok(Some(tree)) => {
            field.clear();
            Some(tree)
        }
        Ok(None) | Err(_) => None,
    }
}
