//! Starter scripts offered to users writing their own `parse` function.

use crate::error::{AppResult, FramerError};
use std::fmt;
use std::str::FromStr;

/// Script active until the user loads another one.
pub const DEFAULT_SCRIPT: &str = r#"// Splits a frame such as "value1,value2,value3" into one dataset per field.
fn parse(frame) {
    frame.split(",")
}
"#;

const COMMA_SEPARATED: &str = r#"// Splits comma-separated values such as "25.5, 60.2 ,1013"
// and trims whitespace around each field.
fn parse(frame) {
    let fields = frame.split(",");
    fields.map(|field| {
        field.trim();
        field
    })
}
"#;

const JSON: &str = r#"// Decodes a JSON object such as {"temp":25.5,"hum":60.2}
// and returns its values. Frames with their braces stripped are accepted.
fn parse(frame) {
    let text = if frame.starts_with("{") { frame } else { "{" + frame + "}" };
    let values = [];
    try {
        let data = json::decode(text);
        values = if type_of(data) == "map" { data.values() } else { [data] };
    } catch {
        values = [];
    }
    values
}
"#;

const FIXED_WIDTH: &str = r#"// Splits a fixed-width record such as "002500601013" into
// 4-character fields.
fn parse(frame) {
    let fields = [];
    let i = 0;
    while i < frame.len() {
        fields.push(frame.sub_string(i, 4));
        i += 4;
    }
    fields
}
"#;

/// Built-in starter scripts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptTemplate {
    /// Split on commas and trim
    CommaSeparated,
    /// Decode a JSON object and return its values
    Json,
    /// Fixed 4-character fields
    FixedWidth,
}

impl ScriptTemplate {
    /// Every template.
    pub const ALL: [ScriptTemplate; 3] = [
        ScriptTemplate::CommaSeparated,
        ScriptTemplate::Json,
        ScriptTemplate::FixedWidth,
    ];

    /// Short name used on the command line.
    pub fn name(self) -> &'static str {
        match self {
            ScriptTemplate::CommaSeparated => "csv",
            ScriptTemplate::Json => "json",
            ScriptTemplate::FixedWidth => "fixed-width",
        }
    }

    /// Script text.
    pub fn source(self) -> &'static str {
        match self {
            ScriptTemplate::CommaSeparated => COMMA_SEPARATED,
            ScriptTemplate::Json => JSON,
            ScriptTemplate::FixedWidth => FIXED_WIDTH,
        }
    }
}

impl fmt::Display for ScriptTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ScriptTemplate {
    type Err = FramerError;

    fn from_str(s: &str) -> AppResult<Self> {
        match s.to_ascii_lowercase().as_str() {
            "csv" | "comma-separated" => Ok(ScriptTemplate::CommaSeparated),
            "json" => Ok(ScriptTemplate::Json),
            "fixed-width" | "fixed" | "custom" => Ok(ScriptTemplate::FixedWidth),
            _ => Err(FramerError::Configuration(format!(
                "Unknown template '{}'. Must be one of: csv, json, fixed-width",
                s
            ))),
        }
    }
}
