//! Textual form of documents: a JSON dialect with deliberately simple
//! lexing. Strings are the raw bytes between double quotes and backslash
//! escapes are not interpreted, so a string cannot contain a quote.
//! Numbers are integers unless a decimal point appears; exponents are not
//! produced by the emitter. Duplicate object keys parse with last-wins.

use crate::{Error, Fields, Value};

pub fn parse(input: &str) -> Result<Value, Error> {
    let bytes = input.as_bytes();
    let mut offset = 0;

    skip_whitespace(bytes, &mut offset);
    let value = parse_value(bytes, &mut offset)?;
    skip_whitespace(bytes, &mut offset);

    if offset != bytes.len() {
        return Err(unexpected(bytes, offset));
    }
    Ok(value)
}

pub fn emit(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(true) => out.push_str("true"),
        Value::Bool(false) => out.push_str("false"),
        Value::Int(i) => out.push_str(&i.to_string()),
        // Fixed-point rendering. This is lossy for extreme magnitudes,
        // which is why durability uses the binary codec instead.
        Value::Float(f) => out.push_str(&format!("{f:.6}")),
        Value::String(s) => {
            out.push('"');
            out.push_str(s);
            out.push('"');
        }
        Value::Object(fields) => {
            out.push('{');
            let mut sep = "";
            for (key, value) in fields {
                out.push_str(sep);
                out.push('"');
                out.push_str(key);
                out.push_str("\":");
                emit(value, out);
                sep = ",";
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            let mut sep = "";
            for item in items {
                out.push_str(sep);
                emit(item, out);
                sep = ",";
            }
            out.push(']');
        }
    }
}

fn parse_value(bytes: &[u8], offset: &mut usize) -> Result<Value, Error> {
    match bytes.get(*offset) {
        None => Err(Error::UnexpectedEnd),
        Some(b'{') => parse_object(bytes, offset).map(Value::Object),
        Some(b'[') => parse_array(bytes, offset).map(Value::Array),
        Some(b'"') => parse_string(bytes, offset).map(Value::String),
        Some(b'n') => parse_keyword(bytes, offset, "null", Value::Null),
        Some(b't') => parse_keyword(bytes, offset, "true", Value::Bool(true)),
        Some(b'f') => parse_keyword(bytes, offset, "false", Value::Bool(false)),
        Some(b) if is_number_start(*b) => parse_number(bytes, offset),
        Some(_) => Err(unexpected(bytes, *offset)),
    }
}

fn parse_object(bytes: &[u8], offset: &mut usize) -> Result<Fields, Error> {
    *offset += 1; // consume '{'
    skip_whitespace(bytes, offset);

    let mut fields = Fields::new();
    if bytes.get(*offset) == Some(&b'}') {
        *offset += 1;
        return Ok(fields);
    }
    loop {
        if bytes.get(*offset) != Some(&b'"') {
            return Err(unexpected_or_end(bytes, *offset));
        }
        let key = parse_string(bytes, offset)?;

        skip_whitespace(bytes, offset);
        if bytes.get(*offset) != Some(&b':') {
            return Err(unexpected_or_end(bytes, *offset));
        }
        *offset += 1;
        skip_whitespace(bytes, offset);

        let value = parse_value(bytes, offset)?;
        fields.insert(key, value); // duplicate keys: last one wins

        skip_whitespace(bytes, offset);
        match bytes.get(*offset) {
            Some(b',') => {
                *offset += 1;
                skip_whitespace(bytes, offset);
            }
            Some(b'}') => {
                *offset += 1;
                return Ok(fields);
            }
            _ => return Err(unexpected_or_end(bytes, *offset)),
        }
    }
}

fn parse_array(bytes: &[u8], offset: &mut usize) -> Result<Vec<Value>, Error> {
    *offset += 1; // consume '['
    skip_whitespace(bytes, offset);

    let mut items = Vec::new();
    if bytes.get(*offset) == Some(&b']') {
        *offset += 1;
        return Ok(items);
    }
    loop {
        items.push(parse_value(bytes, offset)?);

        skip_whitespace(bytes, offset);
        match bytes.get(*offset) {
            Some(b',') => {
                *offset += 1;
                skip_whitespace(bytes, offset);
            }
            Some(b']') => {
                *offset += 1;
                return Ok(items);
            }
            _ => return Err(unexpected_or_end(bytes, *offset)),
        }
    }
}

fn parse_string(bytes: &[u8], offset: &mut usize) -> Result<String, Error> {
    let start = *offset + 1; // past the opening quote
    let mut end = start;
    while bytes.get(end).map_or(false, |b| *b != b'"') {
        end += 1;
    }
    if end == bytes.len() {
        return Err(Error::UnexpectedEnd);
    }
    *offset = end + 1;
    let segment = std::str::from_utf8(&bytes[start..end]).map_err(|_| Error::InvalidText)?;
    Ok(segment.to_string())
}

fn parse_keyword(
    bytes: &[u8],
    offset: &mut usize,
    keyword: &str,
    value: Value,
) -> Result<Value, Error> {
    if bytes[*offset..].starts_with(keyword.as_bytes()) {
        *offset += keyword.len();
        Ok(value)
    } else {
        Err(unexpected(bytes, *offset))
    }
}

fn parse_number(bytes: &[u8], offset: &mut usize) -> Result<Value, Error> {
    let start = *offset;
    let mut end = start;
    while bytes.get(end).map_or(false, |b| !is_delimiter(*b)) {
        end += 1;
    }
    *offset = end;

    let token = std::str::from_utf8(&bytes[start..end]).map_err(|_| Error::InvalidText)?;
    if token.contains('.') {
        token
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|_| Error::InvalidNumber(token.to_string()))
    } else {
        token
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|_| Error::InvalidNumber(token.to_string()))
    }
}

fn skip_whitespace(bytes: &[u8], offset: &mut usize) {
    while bytes
        .get(*offset)
        .map_or(false, |b| matches!(b, b' ' | b'\t' | b'\n' | b'\r'))
    {
        *offset += 1;
    }
}

fn is_number_start(b: u8) -> bool {
    b.is_ascii_digit() || b == b'-' || b == b'+' || b == b'.'
}

fn is_delimiter(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\n' | b'\r' | b',' | b'}' | b']')
}

fn unexpected(bytes: &[u8], offset: usize) -> Error {
    Error::UnexpectedChar(offset, bytes[offset] as char)
}

fn unexpected_or_end(bytes: &[u8], offset: usize) -> Error {
    match bytes.get(offset) {
        Some(b) => Error::UnexpectedChar(offset, *b as char),
        None => Error::UnexpectedEnd,
    }
}
