//! Canonical binary form of documents, shared by the snapshot and journal
//! files. All integers are little-endian. A document root is encoded as a
//! bare object payload; nested values carry a one-byte type tag.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

use crate::{Error, Fields, Value};

const TAG_NULL: u8 = 0;
const TAG_BOOL: u8 = 1;
const TAG_INT: u8 = 2;
const TAG_FLOAT: u8 = 3;
const TAG_STRING: u8 = 4;
const TAG_OBJECT: u8 = 5;
const TAG_ARRAY: u8 = 6;

/// Encode a top-level document, which must be an Object.
pub fn encode_document<W: Write>(doc: &Value, w: &mut W) -> Result<(), Error> {
    match doc {
        Value::Object(fields) => write_fields(fields, w),
        _ => Err(Error::ExpectedObject),
    }
}

/// Decode a top-level document previously written by `encode_document`.
pub fn decode_document<R: Read>(r: &mut R) -> Result<Value, Error> {
    Ok(Value::Object(read_fields(r)?))
}

fn write_fields<W: Write>(fields: &Fields, w: &mut W) -> Result<(), Error> {
    w.write_u64::<LittleEndian>(fields.len() as u64)?;
    for (key, value) in fields {
        write_bytes(key.as_bytes(), w)?;
        write_value(value, w)?;
    }
    Ok(())
}

fn write_value<W: Write>(value: &Value, w: &mut W) -> Result<(), Error> {
    match value {
        Value::Null => w.write_u8(TAG_NULL)?,
        Value::Bool(b) => {
            w.write_u8(TAG_BOOL)?;
            w.write_u8(*b as u8)?;
        }
        Value::Int(i) => {
            w.write_u8(TAG_INT)?;
            w.write_i64::<LittleEndian>(*i)?;
        }
        Value::Float(f) => {
            w.write_u8(TAG_FLOAT)?;
            w.write_f64::<LittleEndian>(*f)?;
        }
        Value::String(s) => {
            w.write_u8(TAG_STRING)?;
            write_bytes(s.as_bytes(), w)?;
        }
        Value::Object(fields) => {
            w.write_u8(TAG_OBJECT)?;
            write_fields(fields, w)?;
        }
        Value::Array(items) => {
            w.write_u8(TAG_ARRAY)?;
            w.write_u64::<LittleEndian>(items.len() as u64)?;
            for item in items {
                write_value(item, w)?;
            }
        }
    }
    Ok(())
}

fn write_bytes<W: Write>(bytes: &[u8], w: &mut W) -> Result<(), Error> {
    w.write_u64::<LittleEndian>(bytes.len() as u64)?;
    w.write_all(bytes)?;
    Ok(())
}

fn read_fields<R: Read>(r: &mut R) -> Result<Fields, Error> {
    let count = r.read_u64::<LittleEndian>()?;
    let mut fields = Fields::new();
    for _ in 0..count {
        let key = read_string(r)?;
        let value = read_value(r)?;
        fields.insert(key, value);
    }
    Ok(fields)
}

fn read_value<R: Read>(r: &mut R) -> Result<Value, Error> {
    match r.read_u8()? {
        TAG_NULL => Ok(Value::Null),
        TAG_BOOL => Ok(Value::Bool(r.read_u8()? != 0)),
        TAG_INT => Ok(Value::Int(r.read_i64::<LittleEndian>()?)),
        TAG_FLOAT => Ok(Value::Float(r.read_f64::<LittleEndian>()?)),
        TAG_STRING => Ok(Value::String(read_string(r)?)),
        TAG_OBJECT => Ok(Value::Object(read_fields(r)?)),
        TAG_ARRAY => {
            let count = r.read_u64::<LittleEndian>()?;
            let mut items = Vec::new();
            for _ in 0..count {
                items.push(read_value(r)?);
            }
            Ok(Value::Array(items))
        }
        tag => Err(Error::UnknownTag(tag)),
    }
}

fn read_string<R: Read>(r: &mut R) -> Result<String, Error> {
    // Read through `take` rather than pre-allocating the declared length,
    // so a corrupt length cannot trigger an enormous allocation.
    let length = r.read_u64::<LittleEndian>()?;
    let mut buf = Vec::new();
    r.take(length).read_to_end(&mut buf)?;
    if buf.len() as u64 != length {
        return Err(Error::Truncated);
    }
    Ok(String::from_utf8(buf)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck::{Arbitrary, Gen};

    fn doc_of(entries: Vec<(&str, Value)>) -> Value {
        Value::Object(
            entries
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        )
    }

    #[test]
    fn layout_is_stable() {
        let doc = doc_of(vec![("k", Value::Int(1))]);
        let mut buf = Vec::new();
        encode_document(&doc, &mut buf).unwrap();
        assert_eq!(
            buf,
            vec![
                1, 0, 0, 0, 0, 0, 0, 0, // one field
                1, 0, 0, 0, 0, 0, 0, 0, b'k', // key
                TAG_INT, 1, 0, 0, 0, 0, 0, 0, 0, // value
            ]
        );
    }

    #[test]
    fn rejects_unknown_tags_and_truncation() {
        let doc = doc_of(vec![("k", Value::String("abcdef".to_string()))]);
        let mut buf = Vec::new();
        encode_document(&doc, &mut buf).unwrap();

        // Truncating anywhere inside the record fails decoding.
        for cut in 1..buf.len() {
            assert!(decode_document(&mut &buf[..cut]).is_err());
        }

        // An out-of-range tag byte fails decoding.
        let mut bad = buf.clone();
        bad[17] = 9; // the value's tag
        assert!(matches!(
            decode_document(&mut bad.as_slice()),
            Err(Error::UnknownTag(9))
        ));
    }

    #[test]
    fn top_level_must_be_an_object() {
        let mut buf = Vec::new();
        assert!(matches!(
            encode_document(&Value::Int(3), &mut buf),
            Err(Error::ExpectedObject)
        ));
    }

    // A size-bounded random document for round-trip properties.
    #[derive(Debug, Clone)]
    struct ArbitraryDoc(Value);

    fn arbitrary_value(g: &mut Gen, depth: usize) -> Value {
        let variants = if depth == 0 { 5 } else { 7 };
        match u8::arbitrary(g) % variants {
            0 => Value::Null,
            1 => Value::Bool(bool::arbitrary(g)),
            2 => Value::Int(i64::arbitrary(g)),
            3 => {
                let f = f64::arbitrary(g);
                Value::Float(if f.is_finite() { f } else { 0.0 })
            }
            4 => Value::String(String::arbitrary(g)),
            5 => {
                let n = usize::arbitrary(g) % 4;
                Value::Object(
                    (0..n)
                        .map(|_| (String::arbitrary(g), arbitrary_value(g, depth - 1)))
                        .collect(),
                )
            }
            _ => {
                let n = usize::arbitrary(g) % 4;
                Value::Array((0..n).map(|_| arbitrary_value(g, depth - 1)).collect())
            }
        }
    }

    impl Arbitrary for ArbitraryDoc {
        fn arbitrary(g: &mut Gen) -> Self {
            let n = usize::arbitrary(g) % 6;
            ArbitraryDoc(Value::Object(
                (0..n)
                    .map(|_| (String::arbitrary(g), arbitrary_value(g, 3)))
                    .collect(),
            ))
        }
    }

    #[quickcheck_macros::quickcheck]
    fn round_trips_any_document(doc: ArbitraryDoc) -> bool {
        let mut buf = Vec::new();
        encode_document(&doc.0, &mut buf).unwrap();
        let decoded = decode_document(&mut buf.as_slice()).unwrap();

        let mut again = Vec::new();
        encode_document(&decoded, &mut again).unwrap();
        decoded == doc.0 && again == buf
    }
}
