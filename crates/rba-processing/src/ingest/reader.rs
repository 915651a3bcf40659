use super::source::RecordSource;
use crate::error::{PipelineError, Result};
use crate::retry::RetryPolicy;
use crate::types::{RawChunk, RawRecord};
use csv::StringRecord;
use std::io::Read;
use tracing::debug;

/// Upper bound of the records preallocated for one chunk.
const PREALLOC_LIMIT: usize = 8_192;

/// Reads a delimited source in bounded chunks.
///
/// Rows with the wrong number of fields are returned as-is and dropped later by
/// the validator. Undecodable bytes abort the read with
/// [`PipelineError::Ingestion`].
pub struct ChunkReader {
    reader: csv::Reader<Box<dyn Read + Send>>,
    header: Vec<String>,
    chunk_size: usize,
    rows_read: u64,
    chunks_read: u64,
    finished: bool,
}

impl ChunkReader {
    /// Open `source` and read its header row.
    pub fn open(
        source: &dyn RecordSource,
        delimiter: u8,
        chunk_size: usize,
        retry: &RetryPolicy,
    ) -> Result<Self> {
        let description = source.describe();
        let input = retry
            .run(&format!("Opening '{}'", description), || source.open())
            .map_err(|e| PipelineError::Ingestion {
                chunk: 0,
                byte_offset: 0,
                reason: format!("cannot open '{}': {}", description, e),
            })?;

        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .flexible(true)
            .has_headers(true)
            .from_reader(input);

        let header: Vec<String> = reader
            .headers()
            .map_err(|e| ingestion_error(0, 0, &e))?
            .iter()
            .map(str::to_string)
            .collect();

        debug!(
            "Opened '{}' with {} header columns",
            description,
            header.len()
        );

        Ok(Self {
            reader,
            header,
            chunk_size: chunk_size.max(1),
            rows_read: 0,
            chunks_read: 0,
            finished: false,
        })
    }

    /// Raw header fields as read.
    pub fn header(&self) -> &[String] {
        &self.header
    }

    /// Data rows handed out so far, skipped rows included.
    pub fn rows_read(&self) -> u64 {
        self.rows_read
    }

    /// Bytes consumed so far, header included.
    pub fn bytes_read(&self) -> u64 {
        self.reader.position().byte()
    }

    /// Skip rows already committed by an earlier run.
    ///
    /// `chunks` is the number of chunks those rows formed, so chunk indices keep
    /// counting from where the earlier run stopped.
    pub fn skip(&mut self, rows: u64, chunks: u64) -> Result<()> {
        let mut record = StringRecord::new();
        while self.rows_read < rows {
            let offset = self.bytes_read();
            match self.reader.read_record(&mut record) {
                Ok(true) => self.rows_read += 1,
                Ok(false) => {
                    return Err(PipelineError::Checkpoint(format!(
                        "source ended after {} rows, checkpoint expects {}",
                        self.rows_read, rows
                    )));
                }
                Err(e) => return Err(ingestion_error(self.chunks_read, offset, &e)),
            }
        }
        self.chunks_read = chunks;
        Ok(())
    }

    /// Read the next chunk. `None` once the source is exhausted.
    pub fn next_chunk(&mut self) -> Result<Option<RawChunk>> {
        if self.finished {
            return Ok(None);
        }

        let index = self.chunks_read;
        let byte_offset = self.bytes_read();
        let mut records = Vec::with_capacity(self.chunk_size.min(PREALLOC_LIMIT));

        while records.len() < self.chunk_size {
            let offset = self.bytes_read();
            let mut fields = StringRecord::new();
            match self.reader.read_record(&mut fields) {
                Ok(true) => {
                    records.push(RawRecord {
                        row: self.rows_read,
                        byte_offset: offset,
                        fields,
                    });
                    self.rows_read += 1;
                }
                Ok(false) => {
                    self.finished = true;
                    break;
                }
                Err(e) => return Err(ingestion_error(index, offset, &e)),
            }
        }

        if records.is_empty() {
            return Ok(None);
        }

        self.chunks_read += 1;
        Ok(Some(RawChunk {
            index,
            byte_offset,
            end_offset: self.bytes_read(),
            records,
        }))
    }
}

fn ingestion_error(chunk: u64, fallback_offset: u64, error: &csv::Error) -> PipelineError {
    let byte_offset = error
        .position()
        .map(|p| p.byte())
        .unwrap_or(fallback_offset);
    PipelineError::Ingestion {
        chunk,
        byte_offset,
        reason: error.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::MemorySource;

    const CSV: &str = "\
Login Timestamp,User ID,Country
2020-02-03 12:43:30.772,1,US
2020-02-03 12:43:55.873,2,US
2020-02-03 12:43:56.180,3,FR
2020-02-03 12:43:59.396,4,US
2020-02-03 12:44:00.000,5,JP
";

    fn open(bytes: &[u8], chunk_size: usize) -> Result<ChunkReader> {
        let source = MemorySource::new("test", bytes.to_vec());
        ChunkReader::open(&source, b',', chunk_size, &RetryPolicy::none())
    }

    fn drain(reader: &mut ChunkReader) -> Vec<RawChunk> {
        let mut chunks = Vec::new();
        while let Some(chunk) = reader.next_chunk().unwrap() {
            chunks.push(chunk);
        }
        chunks
    }

    #[test]
    fn test_reads_header() {
        let reader = open(CSV.as_bytes(), 10).unwrap();
        assert_eq!(reader.header(), &["Login Timestamp", "User ID", "Country"]);
    }

    #[test]
    fn test_chunk_boundaries() {
        let mut reader = open(CSV.as_bytes(), 2).unwrap();
        let chunks = drain(&mut reader);

        let sizes: Vec<usize> = chunks.iter().map(|c| c.len()).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
        assert_eq!(chunks[2].index, 2);
        assert_eq!(chunks[2].records[0].row, 4);
        assert_eq!(chunks[1].byte_offset, chunks[0].end_offset);
        assert_eq!(reader.rows_read(), 5);
    }

    #[test]
    fn test_exact_multiple_has_no_empty_chunk() {
        let mut reader = open(CSV.as_bytes(), 5).unwrap();
        assert_eq!(drain(&mut reader).len(), 1);
        assert!(reader.next_chunk().unwrap().is_none());
    }

    #[test]
    fn test_short_rows_are_passed_through() {
        let csv = "a,b,c\n1,2,3\n4,5\n6,7,8,9\n";
        let mut reader = open(csv.as_bytes(), 10).unwrap();
        let chunk = reader.next_chunk().unwrap().unwrap();
        let lens: Vec<usize> = chunk.records.iter().map(|r| r.fields.len()).collect();
        assert_eq!(lens, vec![3, 2, 4]);
    }

    #[test]
    fn test_invalid_utf8_is_ingestion_error() {
        let mut bytes = b"a,b\n1,2\n3,".to_vec();
        bytes.extend_from_slice(&[0xff, 0xfe]);
        bytes.extend_from_slice(b"\n5,6\n");

        let mut reader = open(&bytes, 1).unwrap();
        assert!(reader.next_chunk().unwrap().is_some());
        match reader.next_chunk() {
            Err(PipelineError::Ingestion {
                chunk, byte_offset, ..
            }) => {
                assert_eq!(chunk, 1);
                assert!(byte_offset >= 8);
            }
            other => panic!("Expected ingestion error, got {:?}", other.map(|c| c.map(|c| c.len()))),
        }
    }

    #[test]
    fn test_skip_resumes_chunk_numbering() {
        let mut reader = open(CSV.as_bytes(), 2).unwrap();
        reader.skip(2, 1).unwrap();
        let chunk = reader.next_chunk().unwrap().unwrap();
        assert_eq!(chunk.index, 1);
        assert_eq!(chunk.records[0].row, 2);
        assert_eq!(&chunk.records[0].fields[2], "FR");
    }

    #[test]
    fn test_skip_past_end_fails() {
        let mut reader = open(CSV.as_bytes(), 2).unwrap();
        assert!(matches!(
            reader.skip(10, 5),
            Err(PipelineError::Checkpoint(_))
        ));
    }

    #[test]
    fn test_empty_source_has_empty_header() {
        let reader = open(b"", 2).unwrap();
        assert!(reader.header().is_empty());
    }
}
