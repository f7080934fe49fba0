use std::collections::BTreeMap;

/// Value is a dynamically typed document node.
/// A stored document is a Value whose top level is an Object.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Object(Fields),
    Array(Vec<Value>),
}

/// Fields is the concrete representation of an Object's properties.
/// An ordered map makes the binary encoding of a document deterministic.
pub type Fields = BTreeMap<String, Value>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("unexpected end of document text")]
    UnexpectedEnd,
    #[error("unexpected character {1:?} at offset {0}")]
    UnexpectedChar(usize, char),
    #[error("invalid number {0:?}")]
    InvalidNumber(String),
    #[error("document text is not valid UTF-8")]
    InvalidText,
    #[error("corrupt document: unknown type tag {0}")]
    UnknownTag(u8),
    #[error("corrupt document: truncated field")]
    Truncated,
    #[error("corrupt document: string is not valid UTF-8")]
    InvalidString(#[from] std::string::FromUtf8Error),
    #[error("expected a top-level object")]
    ExpectedObject,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Fields> {
        match self {
            Value::Object(fields) => Some(fields),
            _ => None,
        }
    }

    pub fn as_object_mut(&mut self) -> Option<&mut Fields> {
        match self {
            Value::Object(fields) => Some(fields),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Fetch a property of an Object value.
    /// Returns None for non-objects and absent properties alike.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_object().and_then(|fields| fields.get(key))
    }

    /// Parse a Value from document text. See the `text` module
    /// for the dialect this parser accepts.
    pub fn parse(input: &str) -> Result<Value, Error> {
        text::parse(input)
    }

    /// Render this Value as document text.
    pub fn to_json(&self) -> String {
        let mut out = String::new();
        text::emit(self, &mut out);
        out
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Value {
        Value::Bool(b)
    }
}
impl From<i64> for Value {
    fn from(i: i64) -> Value {
        Value::Int(i)
    }
}
impl From<f64> for Value {
    fn from(f: f64) -> Value {
        Value::Float(f)
    }
}
impl From<&str> for Value {
    fn from(s: &str) -> Value {
        Value::String(s.to_string())
    }
}
impl From<String> for Value {
    fn from(s: String) -> Value {
        Value::String(s)
    }
}
impl From<Fields> for Value {
    fn from(fields: Fields) -> Value {
        Value::Object(fields)
    }
}
impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Value {
        Value::Array(items)
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_json())
    }
}

mod text;

mod binary;
pub use binary::{decode_document, encode_document};
