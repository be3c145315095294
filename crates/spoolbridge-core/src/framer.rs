//! Length-delimited record framing for batch files.
//!
//! A batch file is a plain concatenation of frames:
//!
//! ```text
//! len: leb128 (unsigned varint)
//! payload: len bytes
//! ```
//!
//! This is the layout protobuf uses for "delimited" messages, so a worker
//! can parse batch files with its own protobuf runtime. End of file on a
//! frame boundary is the normal end of a batch; end of file anywhere else is
//! a truncated frame.

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::error::{FramingError, Result};

/// Largest payload accepted in a single record (256 MiB).
pub const MAX_RECORD_LEN: u64 = 256 * 1024 * 1024;

/// Upper bound on the up-front allocation for a payload; larger payloads grow
/// as bytes actually arrive so a corrupt prefix cannot force a huge buffer.
const INITIAL_PAYLOAD_CAPACITY: u64 = 64 * 1024;

/// Opaque binary record exchanged with the worker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Record(Vec<u8>);

impl Record {
    #[must_use]
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self(payload.into())
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for Record {
    fn from(payload: Vec<u8>) -> Self {
        Self(payload)
    }
}

impl From<&[u8]> for Record {
    fn from(payload: &[u8]) -> Self {
        Self(payload.to_vec())
    }
}

impl AsRef<[u8]> for Record {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Append one frame to `writer`, returning the number of bytes written.
pub fn write_record<W: Write>(writer: &mut W, record: &Record) -> Result<usize> {
    let len = record.len() as u64;
    if len > MAX_RECORD_LEN {
        return Err(FramingError::RecordTooLarge {
            len,
            max: MAX_RECORD_LEN,
        }
        .into());
    }
    let prefix = leb128::write::unsigned(writer, len)?;
    writer.write_all(record.as_bytes())?;
    Ok(prefix + record.len())
}

/// Decode the next frame, or `None` at a clean end of batch.
pub fn read_record<R: BufRead>(reader: &mut R) -> Result<Option<Record>> {
    if reader.fill_buf()?.is_empty() {
        return Ok(None);
    }

    let len = match leb128::read::unsigned(reader) {
        Ok(len) => len,
        Err(leb128::read::Error::IoError(err)) if err.kind() == io::ErrorKind::UnexpectedEof => {
            return Err(FramingError::TruncatedLength.into());
        }
        Err(leb128::read::Error::IoError(err)) => return Err(err.into()),
        Err(leb128::read::Error::Overflow) => return Err(FramingError::LengthOverflow.into()),
    };
    if len > MAX_RECORD_LEN {
        return Err(FramingError::RecordTooLarge {
            len,
            max: MAX_RECORD_LEN,
        }
        .into());
    }

    let mut payload = Vec::with_capacity(len.min(INITIAL_PAYLOAD_CAPACITY) as usize);
    let available = reader.take(len).read_to_end(&mut payload)? as u64;
    if available < len {
        return Err(FramingError::TruncatedRecord {
            declared: len,
            available,
        }
        .into());
    }
    Ok(Some(Record(payload)))
}

/// Buffered writer for one batch file.
#[derive(Debug)]
pub struct BatchWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    records: usize,
    bytes: u64,
}

impl BatchWriter {
    /// Create (or truncate) the batch file at `path`.
    pub fn create(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let file = File::create(&path)?;
        Ok(Self {
            path,
            writer: BufWriter::new(file),
            records: 0,
            bytes: 0,
        })
    }

    pub fn write(&mut self, record: &Record) -> Result<()> {
        let written = write_record(&mut self.writer, record)?;
        self.records += 1;
        self.bytes += written as u64;
        Ok(())
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn records(&self) -> usize {
        self.records
    }

    #[must_use]
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Flush, sync and close the file. Only a finished file may be announced.
    pub fn finish(mut self) -> Result<PathBuf> {
        self.writer.flush()?;
        self.writer.get_ref().sync_data()?;
        Ok(self.path)
    }
}

/// Buffered reader over one batch file.
#[derive(Debug)]
pub struct BatchReader {
    path: PathBuf,
    reader: BufReader<File>,
    records_read: usize,
}

impl BatchReader {
    pub fn open(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let file = File::open(&path)?;
        Ok(Self {
            path,
            reader: BufReader::new(file),
            records_read: 0,
        })
    }

    pub fn next_record(&mut self) -> Result<Option<Record>> {
        let record = read_record(&mut self.reader)?;
        if record.is_some() {
            self.records_read += 1;
        }
        Ok(record)
    }

    /// Whether every record has been read.
    pub fn at_end(&mut self) -> io::Result<bool> {
        Ok(self.reader.fill_buf()?.is_empty())
    }

    /// Decode every remaining record.
    pub fn read_all(mut self) -> Result<Vec<Record>> {
        let mut records = Vec::new();
        while let Some(record) = self.next_record()? {
            records.push(record);
        }
        Ok(records)
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn records_read(&self) -> usize {
        self.records_read
    }
}

/// Write `records` as a complete batch file, returning how many were written.
pub fn write_batch_file<I>(path: &Path, records: I) -> Result<usize>
where
    I: IntoIterator<Item = Record>,
{
    let mut writer = BatchWriter::create(path)?;
    for record in records {
        writer.write(&record)?;
    }
    let count = writer.records();
    writer.finish()?;
    Ok(count)
}

/// Read every record of a batch file.
pub fn read_batch_file(path: &Path) -> Result<Vec<Record>> {
    BatchReader::open(path)?.read_all()
}
