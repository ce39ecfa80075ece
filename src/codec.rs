// ABOUTME: Message segment codec between canonical arrays and display text.
// ABOUTME: Inline [seg:...] codes with HTML-entity escaping, both directions.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use confab_core::MessageCodec;

/// One canonical message segment: a typed chunk of message content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl Segment {
    pub fn new(kind: impl Into<String>, data: Map<String, Value>) -> Self {
        Self {
            kind: kind.into(),
            data,
        }
    }

    pub fn text(content: impl Into<String>) -> Self {
        let mut data = Map::new();
        data.insert("text".to_string(), Value::String(content.into()));
        Self {
            kind: "text".to_string(),
            data,
        }
    }

    /// The text content for `text` segments, empty otherwise.
    pub fn text_content(&self) -> &str {
        self.data
            .get("text")
            .and_then(Value::as_str)
            .unwrap_or_default()
    }
}

fn inline_code_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\[seg:([A-Za-z0-9_.-]+)((?:,[A-Za-z0-9_.-]+=[^,\]]*)*)\]")
            .expect("inline code pattern is valid")
    })
}

fn escape_text(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('[', "&#91;")
        .replace(']', "&#93;")
}

fn unescape_text(text: &str) -> String {
    text.replace("&#93;", "]")
        .replace("&#91;", "[")
        .replace("&amp;", "&")
}

fn escape_param(text: &str) -> String {
    escape_text(text).replace(',', "&#44;")
}

fn unescape_param(text: &str) -> String {
    unescape_text(&text.replace("&#44;", ","))
}

fn param_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Codec between the protocol's segment-array message form and display text.
///
/// Display text keeps plain text inline and renders every other segment as a
/// `[seg:type,key=value,...]` code; bracket and ampersand characters in text
/// are entity-escaped so the two forms round-trip.
pub struct SegmentCodec;

impl SegmentCodec {
    pub fn segments_to_display(segments: &[Segment]) -> String {
        let mut out = String::new();
        for segment in segments {
            if segment.kind == "text" {
                out.push_str(&escape_text(segment.text_content()));
            } else {
                out.push_str("[seg:");
                out.push_str(&segment.kind);
                for (key, value) in &segment.data {
                    out.push(',');
                    out.push_str(key);
                    out.push('=');
                    out.push_str(&escape_param(&param_text(value)));
                }
                out.push(']');
            }
        }
        out
    }

    pub fn display_to_segments(text: &str) -> Vec<Segment> {
        let mut segments = Vec::new();
        let mut cursor = 0;
        for found in inline_code_pattern().captures_iter(text) {
            let whole = found.get(0).expect("capture 0 always present");
            if whole.start() > cursor {
                segments.push(Segment::text(unescape_text(&text[cursor..whole.start()])));
            }
            let mut data = Map::new();
            let params = found.get(2).map(|m| m.as_str()).unwrap_or_default();
            for pair in params.split(',').filter(|p| !p.is_empty()) {
                if let Some((key, value)) = pair.split_once('=') {
                    data.insert(key.to_string(), Value::String(unescape_param(value)));
                }
            }
            segments.push(Segment::new(&found[1], data));
            cursor = whole.end();
        }
        if cursor < text.len() {
            segments.push(Segment::text(unescape_text(&text[cursor..])));
        }
        segments
    }
}

impl MessageCodec for SegmentCodec {
    fn to_display(&self, message: &Value) -> String {
        match message {
            Value::String(text) => text.clone(),
            Value::Array(items) => {
                let segments: Vec<Segment> = items
                    .iter()
                    .filter_map(|item| serde_json::from_value(item.clone()).ok())
                    .collect();
                Self::segments_to_display(&segments)
            }
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }

    fn to_canonical(&self, message: &Value) -> Value {
        match message {
            Value::Array(_) => message.clone(),
            Value::String(text) => serde_json::to_value(Self::display_to_segments(text))
                .expect("segments serialize to JSON"),
            other => serde_json::to_value(vec![Segment::text(other.to_string())])
                .expect("segments serialize to JSON"),
        }
    }
}
