//! PHP Literal Encoding
//!
//! Every token substituted into a remote template is a PHP expression that
//! evaluates back to the original value. Rendering a template is therefore a
//! plain substitution: no token ever needs further escaping once inserted.

use serde_json::{Map, Value};
use std::fmt;

/// A PHP expression that reconstructs a value when embedded in a script.
///
/// Only the constructors on this type can produce a literal, so any string
/// held by a `PhpLiteral` is already escaped for PHP source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhpLiteral(String);

impl PhpLiteral {
    /// `NULL`
    pub fn null() -> Self {
        Self("NULL".to_string())
    }

    /// `true` / `false`
    pub fn bool(value: bool) -> Self {
        Self(if value { "true" } else { "false" }.to_string())
    }

    /// Integer literal
    pub fn int(value: i64) -> Self {
        Self(value.to_string())
    }

    /// Unsigned integer literal (values above `PHP_INT_MAX` become floats in PHP)
    pub fn uint(value: u64) -> Self {
        Self(value.to_string())
    }

    /// Float literal, always carrying a decimal point so PHP keeps the float type
    pub fn float(value: f64) -> Self {
        Self(format_float_literal(value))
    }

    /// Single-quoted string literal
    pub fn string(value: &str) -> Self {
        let mut out = String::with_capacity(value.len() + 2);
        write_string(&mut out, value);
        Self(out)
    }

    /// List of strings as an indexed array, e.g. hook method names
    pub fn list<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut out = String::from("array(");
        for (index, item) in items.into_iter().enumerate() {
            if index > 0 {
                out.push_str(", ");
            }
            out.push_str(&index.to_string());
            out.push_str(" => ");
            write_string(&mut out, item.as_ref());
        }
        out.push(')');
        Self(out)
    }

    /// Associative array keyed by the map's keys, in map order
    pub fn map(values: &Map<String, Value>) -> Self {
        let mut out = String::new();
        write_map(&mut out, values);
        Self(out)
    }

    /// Any JSON value
    pub fn value(value: &Value) -> Self {
        let mut out = String::new();
        write_value(&mut out, value);
        Self(out)
    }

    /// The PHP source text
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume and return the PHP source text
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for PhpLiteral {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn format_float_literal(value: f64) -> String {
    if value.is_nan() {
        return "NAN".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "INF" } else { "-INF" }.to_string();
    }
    let mut repr = value.to_string();
    if !repr.contains(['.', 'e', 'E']) {
        repr.push_str(".0");
    }
    repr
}

/// Single quotes only interpret `\\` and `\'`; NUL bytes are spliced in with
/// a double-quoted `"\0"` so the literal stays printable.
fn write_string(out: &mut String, value: &str) {
    let mut segments = value.split('\0');
    write_single_quoted(out, segments.next().unwrap_or(""));
    for segment in segments {
        out.push_str(" . \"\\0\" . ");
        write_single_quoted(out, segment);
    }
}

fn write_single_quoted(out: &mut String, value: &str) {
    out.push('\'');
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            c => out.push(c),
        }
    }
    out.push('\'');
}

fn write_value(out: &mut String, value: &Value) {
    match value {
        Value::Null => out.push_str("NULL"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                out.push_str(&i.to_string());
            } else if let Some(u) = n.as_u64() {
                out.push_str(&u.to_string());
            } else {
                out.push_str(&format_float_literal(n.as_f64().unwrap_or(f64::NAN)));
            }
        }
        Value::String(s) => write_string(out, s),
        Value::Array(items) => {
            out.push_str("array(");
            for (index, item) in items.iter().enumerate() {
                if index > 0 {
                    out.push_str(", ");
                }
                out.push_str(&index.to_string());
                out.push_str(" => ");
                write_value(out, item);
            }
            out.push(')');
        }
        Value::Object(map) => write_map(out, map),
    }
}

fn write_map(out: &mut String, map: &Map<String, Value>) {
    out.push_str("array(");
    for (index, (key, item)) in map.iter().enumerate() {
        if index > 0 {
            out.push_str(", ");
        }
        write_string(out, key);
        out.push_str(" => ");
        write_value(out, item);
    }
    out.push(')');
}

/// Encode a value in PHP's native `serialize()` format.
///
/// Used for process-safe parameters: the child calls `unserialize()` on each
/// string to get the original value back.
pub fn php_serialize(value: &Value) -> String {
    let mut out = String::new();
    write_serialized(&mut out, value);
    out
}

fn write_serialized(out: &mut String, value: &Value) {
    match value {
        Value::Null => out.push_str("N;"),
        Value::Bool(b) => out.push_str(if *b { "b:1;" } else { "b:0;" }),
        Value::Number(n) => {
            // Integers beyond i64 are floats in PHP, as in the literal encoding.
            match n.as_i64() {
                Some(i) => out.push_str(&format!("i:{};", i)),
                None => out.push_str(&format!(
                    "d:{};",
                    format_serialized_float(n.as_f64().unwrap_or(f64::NAN))
                )),
            }
        }
        Value::String(s) => write_serialized_string(out, s),
        Value::Array(items) => {
            out.push_str(&format!("a:{}:{{", items.len()));
            for (index, item) in items.iter().enumerate() {
                out.push_str(&format!("i:{};", index));
                write_serialized(out, item);
            }
            out.push('}');
        }
        Value::Object(map) => {
            out.push_str(&format!("a:{}:{{", map.len()));
            for (key, item) in map {
                write_serialized_string(out, key);
                write_serialized(out, item);
            }
            out.push('}');
        }
    }
}

fn format_serialized_float(value: f64) -> String {
    if value.is_nan() {
        return "NAN".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "INF" } else { "-INF" }.to_string();
    }
    value.to_string()
}

// Length is in bytes, not characters.
fn write_serialized_string(out: &mut String, value: &str) {
    out.push_str(&format!("s:{}:\"{}\";", value.len(), value));
}
