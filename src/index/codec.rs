//! streaming codec for archive indexes
//!
//! an index is a sequence of self-delimiting CBOR items:
//!
//! ```text
//! {"Header": {"magic": "tarvault-index", "version": 1, "compression": "gzip"}}
//! {"Entry": {"entry": {...}, "content": "<sha256 hex>" | null}}   (0..n times)
//! {"End": {"records": n}}
//! ```
//!
//! both directions hold one record in memory at a time.

use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::{Compression, IndexRecord};

pub const INDEX_MAGIC: &str = "tarvault-index";
pub const INDEX_VERSION: u32 = 1;

/// first frame of every index
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexHeader {
    pub magic: String,
    pub version: u32,
    pub compression: Compression,
}

impl IndexHeader {
    pub fn new(compression: Compression) -> Self {
        Self {
            magic: INDEX_MAGIC.to_string(),
            version: INDEX_VERSION,
            compression,
        }
    }
}

#[derive(Deserialize)]
enum Frame {
    Header(IndexHeader),
    Entry(IndexRecord),
    End { records: u64 },
}

// borrowed mirror of Frame for encoding without cloning records
#[derive(Serialize)]
enum FrameRef<'a> {
    Header(&'a IndexHeader),
    Entry(&'a IndexRecord),
    End { records: u64 },
}

/// incremental index encoder
pub struct IndexWriter<W: Write> {
    writer: W,
    records: u64,
}

impl<W: Write> IndexWriter<W> {
    /// start an index, writing the header frame
    pub fn new(mut writer: W, compression: Compression) -> Result<Self> {
        ciborium::into_writer(&FrameRef::Header(&IndexHeader::new(compression)), &mut writer)?;
        Ok(Self { writer, records: 0 })
    }

    /// append one record
    pub fn push(&mut self, record: &IndexRecord) -> Result<()> {
        ciborium::into_writer(&FrameRef::Entry(record), &mut self.writer)?;
        self.records += 1;
        Ok(())
    }

    /// number of records written so far
    pub fn records(&self) -> u64 {
        self.records
    }

    /// write the end marker, flush, and hand back the writer
    pub fn finish(mut self) -> Result<W> {
        ciborium::into_writer(
            &FrameRef::End {
                records: self.records,
            },
            &mut self.writer,
        )?;
        self.writer
            .flush()
            .map_err(|e| Error::CborEncode(ciborium::ser::Error::Io(e)))?;
        Ok(self.writer)
    }
}

/// lazy, forward-only index decoder
///
/// yields records until the end marker. after the first error the iterator is
/// fused and yields nothing more.
pub struct IndexReader<R: Read> {
    reader: R,
    origin: PathBuf,
    header: IndexHeader,
    records: u64,
    done: bool,
}

impl<R: Read> IndexReader<R> {
    /// read and validate the header frame
    pub fn new(reader: R) -> Result<Self> {
        Self::with_origin(reader, "<index>")
    }

    /// like `new`, naming the source in io errors
    pub fn with_origin(mut reader: R, origin: impl Into<PathBuf>) -> Result<Self> {
        let origin = origin.into();

        let header = match read_frame(&mut reader, &origin, 0) {
            Ok(Frame::Header(header)) => header,
            Ok(_) => return Err(decode_error(0, "index header: missing header frame")),
            Err(Error::Decode { message, .. }) => {
                return Err(decode_error(0, format!("index header: {}", message)))
            }
            Err(e) => return Err(e),
        };

        if header.magic != INDEX_MAGIC {
            return Err(decode_error(
                0,
                format!("index header: bad magic {:?}", header.magic),
            ));
        }
        if header.version != INDEX_VERSION {
            return Err(decode_error(
                0,
                format!("index header: unsupported format version {}", header.version),
            ));
        }

        Ok(Self {
            reader,
            origin,
            header,
            records: 0,
            done: false,
        })
    }

    pub fn header(&self) -> &IndexHeader {
        &self.header
    }

    /// compression recorded at ingestion time
    pub fn compression(&self) -> Compression {
        self.header.compression
    }

    /// records decoded so far
    pub fn records(&self) -> u64 {
        self.records
    }

    /// produce the next record, `None` at the end marker
    pub fn next_record(&mut self) -> Result<Option<IndexRecord>> {
        if self.done {
            return Ok(None);
        }

        let result = self.decode_next();
        if !matches!(result, Ok(Some(_))) {
            self.done = true;
        }
        result
    }

    fn decode_next(&mut self) -> Result<Option<IndexRecord>> {
        match read_frame(&mut self.reader, &self.origin, self.records)? {
            Frame::Entry(record) => {
                if record.content.is_some() != record.entry.has_content() {
                    return Err(decode_error(
                        self.records,
                        format!(
                            "content reference does not match entry type of {}",
                            record.entry.display_path()
                        ),
                    ));
                }
                self.records += 1;
                Ok(Some(record))
            }
            Frame::End { records } if records == self.records => Ok(None),
            Frame::End { records } => Err(decode_error(
                self.records,
                format!(
                    "end marker counts {} records, decoded {}",
                    records, self.records
                ),
            )),
            Frame::Header(_) => Err(decode_error(self.records, "unexpected header frame")),
        }
    }
}

impl<R: Read> Iterator for IndexReader<R> {
    type Item = Result<IndexRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}

fn read_frame<R: Read>(reader: &mut R, origin: &Path, record: u64) -> Result<Frame> {
    ciborium::from_reader(reader).map_err(|e| match e {
        ciborium::de::Error::Io(source) if source.kind() == io::ErrorKind::UnexpectedEof => {
            decode_error(record, "truncated record")
        }
        ciborium::de::Error::Io(source) => Error::Io {
            path: origin.to_path_buf(),
            source,
        },
        ciborium::de::Error::Syntax(offset) => {
            decode_error(record, format!("malformed cbor at offset {}", offset))
        }
        ciborium::de::Error::Semantic(_, message) => decode_error(record, message),
        ciborium::de::Error::RecursionLimitExceeded => {
            decode_error(record, "record nesting too deep")
        }
    })
}

fn decode_error(record: u64, message: impl Into<String>) -> Error {
    Error::Decode {
        record,
        message: message.into(),
    }
}
