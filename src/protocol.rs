//! i3bar protocol types.
//!
//! Output side: the handshake [`Header`] and frames made of block property
//! maps. Input side: [`ClickEvent`], one element of the click array the bar
//! writes to our stdin.
//!
//! ```text
//! {"version":1,"click_events":true}
//! [
//! [{"instance":"clock","full_text":"12:00"}],
//! [{"instance":"clock","full_text":"12:01"}],
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::constants::{FULL_TEXT_KEY, INSTANCE_KEY, KNOWN_PROPERTIES, PROTOCOL_VERSION};

/// Property map of one rendered block.
pub type Props = Map<String, Value>;

/// Handshake object written once before the frame array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Header {
    /// Protocol version, always 1.
    pub version: u32,
    /// Ask the bar to report clicks on stdin.
    pub click_events: bool,
}

impl Default for Header {
    fn default() -> Self {
        Self {
            version: PROTOCOL_VERSION,
            click_events: true,
        }
    }
}

/// Result of transforming command output (or of a click update).
#[derive(Debug, Clone, PartialEq)]
pub enum Rendered {
    /// Replaces `full_text` only.
    Text(String),
    /// Merged key by key into the block's properties.
    Props(Props),
}

impl From<String> for Rendered {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for Rendered {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

/// Returns `true` if `key` is a property the bar understands.
pub fn is_known_property(key: &str) -> bool {
    key == INSTANCE_KEY || key == FULL_TEXT_KEY || KNOWN_PROPERTIES.contains(&key)
}

/// A click reported by the bar.
///
/// Only `instance` is interpreted; `button`, coordinates, modifiers and
/// anything else the bar sends stay in `fields`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClickEvent {
    /// Instance key of the clicked block.
    pub instance: String,
    /// Remaining fields, passed through untouched.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl ClickEvent {
    /// Creates a click for `instance` with no other fields.
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
            fields: Map::new(),
        }
    }

    /// Converts a decoded JSON object into a click.
    ///
    /// Returns `None` when `instance` is missing or not a string.
    pub fn from_value(value: Value) -> Option<Self> {
        serde_json::from_value(value).ok()
    }

    /// Mouse button number, if the bar reported one.
    pub fn button(&self) -> Option<u64> {
        self.fields.get("button").and_then(Value::as_u64)
    }

    /// Click fields as `(KEY, value)` pairs with `prefix` prepended.
    ///
    /// Scalars only; nested values (the `modifiers` list) are rendered as
    /// JSON text.
    pub fn env_pairs(&self, prefix: &str) -> Vec<(String, String)> {
        let mut pairs = vec![(
            format!("{prefix}{}", INSTANCE_KEY.to_uppercase()),
            self.instance.clone(),
        )];
        for (key, value) in &self.fields {
            let rendered = match value {
                Value::String(s) => s.clone(),
                Value::Null => String::new(),
                other => other.to_string(),
            };
            pairs.push((format!("{prefix}{}", key.to_uppercase()), rendered));
        }
        pairs
    }
}

/// Serializes one frame (the visible group's blocks) as a compact JSON array.
pub fn render_frame(blocks: &[Props]) -> serde_json::Result<String> {
    serde_json::to_string(blocks)
}
