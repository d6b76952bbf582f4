//! Reply decoding and value encoding for the remote command language.
//!
//! The instrument answers every query with a single line of text. The
//! vocabulary is fixed: a number, the literal `nil`, the literals `true`
//! and `false`, or an arbitrary string (error messages, identifiers).
//! [`Value::decode`] maps a raw reply onto a typed [`Value`]; it never
//! fails, because an unrecognized reply is still a valid `Text` value.
//!
//! The reverse direction, [`Value::encode`], produces the textual form
//! used when assigning to remote properties or passing function arguments.
//! Booleans must be lowered to the lowercase literals the remote
//! interpreter understands; everything else passes through its natural
//! textual representation. Identifiers (buffer names and the like) travel
//! as `Text` and are deliberately not quoted.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A single decoded reply from the instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Any numeric reply.
    Float(f64),
    /// The literals `true` / `false`.
    Bool(bool),
    /// The literal `nil` (no value).
    Nil,
    /// Anything else, unmodified.
    Text(String),
}

impl Value {
    /// Decode one raw reply line.
    ///
    /// Rules, in order: numeric parse, exact `nil`, exact `true`/`false`,
    /// raw text fallback. Matching is case-sensitive on purpose: the
    /// remote vocabulary is fixed and `"True"` is an ordinary string.
    pub fn decode(raw: &str) -> Value {
        if let Ok(f) = raw.parse::<f64>() {
            return Value::Float(f);
        }
        match raw {
            "nil" => Value::Nil,
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => Value::Text(raw.to_string()),
        }
    }

    /// Encode this value into the textual form the remote interpreter
    /// expects on the right-hand side of an assignment or in an argument
    /// list.
    pub fn encode(&self) -> String {
        match self {
            Value::Float(f) => format!("{}", f),
            Value::Bool(b) => if *b { "true" } else { "false" }.to_string(),
            Value::Nil => "nil".to_string(),
            Value::Text(s) => s.clone(),
        }
    }

    /// The numeric content, if this value is a number.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// The boolean content, if this value is a boolean.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// True if the reply was the literal `nil`.
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Float(f64::from(v))
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}
