//! Chunked ingestion of delimited login-event sources.

mod reader;
mod source;

pub use reader::ChunkReader;
pub use source::{FileSource, MemorySource, RecordSource};
