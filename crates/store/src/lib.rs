//! The persistent document store: an in-memory B+-tree made durable by an
//! append-only journal and a periodically compacted snapshot.

use doc::Value;
use rand::distributions::Alphanumeric;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::any::Any;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

pub mod journal;
pub use journal::Op;

mod service;
pub use service::{Service, ServiceMap};

mod users;
pub use users::UserPool;

pub const JOURNAL_SUFFIX: &str = ".journal";
pub const SNAPSHOT_SUFFIX: &str = ".snapshot";

const ID_LENGTH: usize = 16;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("no document with id {0:?}")]
    NotFound(String),
    #[error("a document must be an object at the top level")]
    ExpectedObject,
    #[error("journal holds an insert without a document")]
    MissingValue,
    #[error("journal holds an unknown storage operation {0}")]
    UnknownOp(u8),
    #[error("journal record is truncated")]
    TruncatedRecord,
    #[error("corrupt snapshot")]
    Snapshot(#[from] btree::Error),
    #[error("corrupt document")]
    Document(#[from] doc::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// A document store bound to `<base>`, `<base>.journal` and
/// `<base>.snapshot`. Every mutation appends to the journal before it
/// touches the in-memory index.
pub struct DocumentStore {
    base: PathBuf,
    journal_path: PathBuf,
    snapshot_path: PathBuf,
    index: btree::Tree,
    rng: SmallRng,
}

impl DocumentStore {
    pub fn new(base: impl Into<PathBuf>) -> DocumentStore {
        let base = base.into();
        let mut journal_path = base.as_os_str().to_owned();
        journal_path.push(JOURNAL_SUFFIX);
        let mut snapshot_path = base.as_os_str().to_owned();
        snapshot_path.push(SNAPSHOT_SUFFIX);

        DocumentStore {
            base,
            journal_path: journal_path.into(),
            snapshot_path: snapshot_path.into(),
            index: btree::Tree::new(),
            rng: SmallRng::from_entropy(),
        }
    }

    /// Recover the store: load the snapshot, replay the journal on top of
    /// it, and compact. Corruption of either file is fatal to the store.
    pub fn initialize(&mut self) -> Result<(), Error> {
        if self.base.exists() {
            let mut r = BufReader::new(File::open(&self.base)?);
            self.index = btree::Tree::decode(&mut r)?;
            tracing::info!(
                path = %self.base.display(),
                documents = self.index.len(),
                "loaded snapshot"
            );
        }

        let index = &mut self.index;
        let mut replayed = 0usize;
        journal::replay(&self.journal_path, |op, key, value| {
            match op {
                Op::Insert => index.insert(key, value.ok_or(Error::MissingValue)?),
                Op::Erase => {
                    // The journal may replay against state the snapshot
                    // already includes; a missing key is not an error.
                    index.erase(&key);
                }
            }
            replayed += 1;
            Ok(())
        })?;
        if replayed > 0 {
            tracing::info!(records = replayed, "replayed journal");
        }

        self.rollover()
    }

    /// Store a document under a fresh identifier and return it.
    pub fn insert(&mut self, document: Value) -> Result<String, Error> {
        if document.as_object().is_none() {
            return Err(Error::ExpectedObject);
        }
        let id = loop {
            let id = self.generate_id();
            if !self.index.contains_key(&id) {
                break id;
            }
        };
        journal::append(&self.journal_path, Op::Insert, &id, Some(&document))?;
        self.index.insert(id.clone(), document);
        Ok(id)
    }

    /// Remove the document with the given identifier and return the id.
    pub fn erase(&mut self, id: &str) -> Result<String, Error> {
        if !self.index.contains_key(id) {
            return Err(Error::NotFound(id.to_string()));
        }
        journal::append(&self.journal_path, Op::Erase, id, None)?;
        self.index.erase(id);
        Ok(id.to_string())
    }

    /// Deep copy of the document with the given identifier.
    pub fn find(&self, id: &str) -> Result<Value, Error> {
        self.index
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// All identifiers in ascending order.
    pub fn keys(&self) -> Vec<String> {
        self.index.iter().map(|(key, _)| key.to_string()).collect()
    }

    /// One object holding every document keyed by its identifier.
    pub fn image(&self) -> Value {
        Value::Object(
            self.index
                .iter()
                .map(|(key, value)| (key.to_string(), value.clone()))
                .collect(),
        )
    }

    /// Compact the journal into a fresh snapshot once it has grown to the
    /// size of the base file. A missing base counts as size zero, so any
    /// journal triggers the first compaction. Crash consistency hangs on
    /// the atomicity of the final rename: before it, the old snapshot and
    /// full journal remain valid; after it, replaying the obsolete journal
    /// is harmless because inserts are last-write-wins and erases tolerate
    /// absent keys.
    pub fn rollover(&mut self) -> Result<(), Error> {
        if self.index.is_empty() {
            return Ok(());
        }
        let journal_size = match fs::metadata(&self.journal_path) {
            Ok(meta) => meta.len(),
            Err(_) => return Ok(()),
        };
        let base_size = fs::metadata(&self.base).map(|meta| meta.len()).unwrap_or(0);
        if journal_size < base_size {
            return Ok(());
        }

        tracing::info!(
            documents = self.index.len(),
            journal_bytes = journal_size,
            "rolling journal over into a snapshot"
        );
        let mut w = BufWriter::new(File::create(&self.snapshot_path)?);
        self.index.encode(&mut w)?;
        w.flush()?;
        drop(w);

        fs::rename(&self.snapshot_path, &self.base)?;
        fs::remove_file(&self.journal_path)?;
        Ok(())
    }

    pub fn base_path(&self) -> &Path {
        &self.base
    }

    pub fn journal_path(&self) -> &Path {
        &self.journal_path
    }

    fn generate_id(&mut self) -> String {
        (&mut self.rng)
            .sample_iter(Alphanumeric)
            .take(ID_LENGTH)
            .map(char::from)
            .collect()
    }
}

impl Service for DocumentStore {
    fn initialize(&mut self) -> anyhow::Result<()> {
        DocumentStore::initialize(self)?;
        Ok(())
    }

    fn tick(&mut self) {
        if let Err(error) = self.rollover() {
            tracing::error!(%error, "journal rollover failed");
        }
    }

    fn shutdown(&mut self) {
        tracing::info!(documents = self.index.len(), "document store shut down");
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
