//! Whole-tree binary serialization.
//!
//! Encoding walks the leaf chain and writes a length prefix followed by
//! every entry in ascending key order. Decoding is a bulk-load path: it
//! streams entries into fresh leaves of roughly three quarters fanout and
//! then builds one parent level at a time, never inserting entry by entry.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use doc::Value;
use std::collections::VecDeque;
use std::io::{self, Read, Write};

use crate::{Inner, Leaf, Node, Tree, FANOUT, NIL};

/// Preferred leaf occupancy when bulk loading.
const LEAF_TARGET: usize = 3 * FANOUT / 4;
/// Preferred child count of bulk-loaded inner nodes.
const INNER_TARGET: usize = 3 * FANOUT / 4 + 1;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("corrupt index: truncated entry")]
    Truncated,
    #[error("corrupt index: key is not valid UTF-8")]
    InvalidKey,
    #[error("corrupt index document")]
    Document(#[from] doc::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Tree {
    /// Write the whole tree: a `u64` entry count, then each (key, document)
    /// pair in ascending key order. An empty tree writes nothing.
    pub fn encode<W: Write>(&self, w: &mut W) -> Result<(), Error> {
        if self.root == NIL {
            return Ok(());
        }
        w.write_u64::<LittleEndian>(self.len as u64)?;

        let mut written = 0;
        let mut cursor = self.first_leaf();
        while let Some(id) = cursor {
            let leaf = self.leaf(id);
            for (key, value) in leaf.keys.iter().zip(&leaf.values) {
                w.write_u64::<LittleEndian>(key.len() as u64)?;
                w.write_all(key.as_bytes())?;
                doc::encode_document(value, w)?;
                written += 1;
            }
            cursor = (leaf.next != NIL).then_some(leaf.next);
        }
        assert_eq!(written, self.len, "leaf chain does not cover the tree");
        Ok(())
    }

    /// Rebuild a tree previously written by `encode`. Empty input decodes
    /// as an empty tree.
    pub fn decode<R: Read>(r: &mut R) -> Result<Tree, Error> {
        let mut tree = Tree::new();

        let mut prefix = [0u8; 8];
        match read_full(r, &mut prefix)? {
            0 => return Ok(tree),
            8 => (),
            _ => return Err(Error::Truncated),
        }
        let size = u64::from_le_bytes(prefix) as usize;
        if size == 0 {
            return Ok(tree);
        }

        // Stream entries into the leaf level, linking siblings as we go.
        // Each node takes a locally chosen fanout so that no trailing node
        // falls under half fill.
        let mut pending: VecDeque<(String, Value)> = VecDeque::new();
        let mut read = 0;
        let mut previous = NIL;
        let mut level: Vec<(u32, String)> = Vec::new();

        while read < size || !pending.is_empty() {
            while read < size && pending.len() < 2 * LEAF_TARGET {
                let key = read_key(r)?;
                let value = doc::decode_document(r)?;
                pending.push_back((key, value));
                read += 1;
            }
            let take = local_fanout(pending.len(), LEAF_TARGET, FANOUT);
            let mut keys = Vec::with_capacity(take);
            let mut values = Vec::with_capacity(take);
            for _ in 0..take {
                let (key, value) = pending.pop_front().unwrap();
                keys.push(key);
                values.push(value);
            }
            let minimum = keys[0].clone();
            let id = tree.alloc(Node::Leaf(Leaf {
                keys,
                values,
                parent: NIL,
                prev: previous,
                next: NIL,
            }));
            if previous != NIL {
                tree.leaf_mut(previous).next = id;
            }
            previous = id;
            level.push((id, minimum));
        }

        // Build parent levels until a single root remains. Each separator
        // is the minimum key of its right-hand subtree.
        while level.len() > 1 {
            let mut parents = Vec::new();
            let mut index = 0;
            let mut remaining = level.len();
            while remaining > 0 {
                let take = local_fanout(remaining, INNER_TARGET, FANOUT + 1);
                remaining -= take;

                let keys: Vec<String> = level[index + 1..index + take]
                    .iter()
                    .map(|(_, minimum)| minimum.clone())
                    .collect();
                let children: Vec<u32> =
                    level[index..index + take].iter().map(|(id, _)| *id).collect();
                let minimum = level[index].1.clone();
                index += take;

                let id = tree.alloc(Node::Inner(Inner {
                    keys,
                    children: children.clone(),
                    parent: NIL,
                }));
                for child in children {
                    tree.set_parent(child, id);
                }
                parents.push((id, minimum));
            }
            level = parents;
        }

        tree.root = level[0].0;
        tree.len = size;
        Ok(tree)
    }
}

// Fanout for the next bulk-loaded node: prefer the target, split an
// over-full remainder in two, and otherwise take everything left.
fn local_fanout(cached: usize, preferred: usize, maximum: usize) -> usize {
    if cached >= 2 * preferred {
        preferred
    } else if cached > maximum {
        cached / 2
    } else {
        cached
    }
}

fn read_key<R: Read>(r: &mut R) -> Result<String, Error> {
    let length = r.read_u64::<LittleEndian>()?;
    let mut buf = Vec::new();
    r.take(length).read_to_end(&mut buf)?;
    if buf.len() as u64 != length {
        return Err(Error::Truncated);
    }
    String::from_utf8(buf).map_err(|_| Error::InvalidKey)
}

// Fill `buf` from the reader, tolerating a clean end of input. Returns the
// number of bytes actually read.
fn read_full<R: Read>(r: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match r.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
