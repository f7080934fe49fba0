//! The append-only journal of storage mutations.
//!
//! Records are `{u8 op, key, u8 present, value?}` laid out back to back
//! with no framing; boundaries are recovered only by running the codec,
//! so a partial trailing write renders the file corrupt from that point.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use doc::Value;
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Insert,
    Erase,
}

impl Op {
    fn from_byte(byte: u8) -> Option<Op> {
        match byte {
            0 => Some(Op::Insert),
            1 => Some(Op::Erase),
            _ => None,
        }
    }

    fn as_byte(self) -> u8 {
        match self {
            Op::Insert => 0,
            Op::Erase => 1,
        }
    }
}

/// Append one record, creating the journal if it does not exist yet.
pub fn append(path: &Path, op: Op, key: &str, value: Option<&Value>) -> Result<(), Error> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let mut w = BufWriter::new(file);

    w.write_u8(op.as_byte())?;
    w.write_u64::<LittleEndian>(key.len() as u64)?;
    w.write_all(key.as_bytes())?;
    match value {
        Some(value) => {
            w.write_u8(1)?;
            doc::encode_document(value, &mut w)?;
        }
        None => w.write_u8(0)?,
    }
    w.flush()?;
    Ok(())
}

/// Replay every record in order. A missing journal is a no-op; end of file
/// in the middle of a record or an unknown op byte is a corruption error.
pub fn replay<F>(path: &Path, mut apply: F) -> Result<(), Error>
where
    F: FnMut(Op, String, Option<Value>) -> Result<(), Error>,
{
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    let mut r = BufReader::new(file);

    loop {
        let mut op_byte = [0u8; 1];
        match r.read(&mut op_byte) {
            Ok(0) => return Ok(()), // clean end of journal
            Ok(_) => (),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
        let op = Op::from_byte(op_byte[0]).ok_or(Error::UnknownOp(op_byte[0]))?;

        let key = read_key(&mut r)?;
        let value = match r.read_u8()? {
            0 => None,
            _ => Some(doc::decode_document(&mut r)?),
        };
        apply(op, key, value)?;
    }
}

fn read_key<R: Read>(r: &mut R) -> Result<String, Error> {
    let length = r.read_u64::<LittleEndian>()?;
    let mut buf = Vec::new();
    r.take(length).read_to_end(&mut buf)?;
    if buf.len() as u64 != length {
        return Err(Error::TruncatedRecord);
    }
    String::from_utf8(buf).map_err(|_| Error::TruncatedRecord)
}
