use std::fs::File;
use std::io::{self, BufReader, Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A re-openable stream of delimited login events.
///
/// The fit/transform design reads the source twice, so a source must be able to
/// hand out a fresh reader positioned at the first byte on every call.
pub trait RecordSource: Send + Sync {
    /// Open a new reader at the start of the source.
    fn open(&self) -> io::Result<Box<dyn Read + Send>>;

    /// Stable description used in logs and checkpoint fingerprints.
    fn describe(&self) -> String;

    /// Total size in bytes, when known. Used for progress only.
    fn len_hint(&self) -> Option<u64> {
        None
    }
}

/// A CSV file on disk.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RecordSource for FileSource {
    fn open(&self) -> io::Result<Box<dyn Read + Send>> {
        let file = File::open(&self.path)?;
        Ok(Box::new(BufReader::with_capacity(1 << 16, file)))
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    fn len_hint(&self) -> Option<u64> {
        std::fs::metadata(&self.path).ok().map(|m| m.len())
    }
}

/// An in-memory source, mostly for tests and embedding.
#[derive(Debug, Clone)]
pub struct MemorySource {
    name: String,
    bytes: Arc<[u8]>,
}

impl MemorySource {
    pub fn new(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            bytes: Arc::from(bytes.into()),
        }
    }
}

impl RecordSource for MemorySource {
    fn open(&self) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(Cursor::new(Arc::clone(&self.bytes))))
    }

    fn describe(&self) -> String {
        format!("memory:{}", self.name)
    }

    fn len_hint(&self) -> Option<u64> {
        Some(self.bytes.len() as u64)
    }
}
