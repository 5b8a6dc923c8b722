use std::fmt;
use std::io::{self, Cursor, Read};

use crate::error::{Error, Result};
use crate::types::Compression;

/// layer of the incoming stream an io error came from
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Stage {
    Source,
    Decompress,
}

#[derive(Debug)]
struct StageError {
    stage: Stage,
    source: io::Error,
}

impl fmt::Display for StageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source)
    }
}

impl std::error::Error for StageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

/// tags every error passing through with the stage it first surfaced in
struct StageReader<R> {
    inner: R,
    stage: Stage,
}

impl<R: Read> Read for StageReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf).map_err(|e| tag(self.stage, e))
    }
}

fn tag(stage: Stage, err: io::Error) -> io::Error {
    if stage_of(&err).is_some() {
        return err;
    }
    io::Error::new(err.kind(), StageError { stage, source: err })
}

fn stage_of(err: &io::Error) -> Option<Stage> {
    err.get_ref()
        .and_then(|inner| inner.downcast_ref::<StageError>())
        .map(|e| e.stage)
}

/// map an io error raised while reading an incoming archive to the error
/// taxonomy: transport failures, compressed framing, or tar framing
pub fn classify_read_error(err: io::Error) -> Error {
    match stage_of(&err) {
        Some(Stage::Source) => Error::Source(err),
        Some(Stage::Decompress) => Error::Decompression(err),
        None => Error::Parse(err),
    }
}

/// a decompressed tar stream ready for entry iteration
pub struct ArchiveStream<'a> {
    pub compression: Compression,
    pub archive: tar::Archive<Box<dyn Read + 'a>>,
}

/// sniff the compression of `input` and wrap it in the matching decoder
pub fn open_archive_stream<'a, R: Read + 'a>(input: R) -> Result<ArchiveStream<'a>> {
    let mut source = StageReader {
        inner: input,
        stage: Stage::Source,
    };

    let mut magic = [0u8; 4];
    let mut filled = 0;
    while filled < magic.len() {
        match source.read(&mut magic[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(classify_read_error(e)),
        }
    }

    let compression = Compression::sniff(&magic[..filled]).ok_or_else(|| {
        Error::Decompression(io::Error::new(
            io::ErrorKind::InvalidData,
            "unrecognized compression format (expected gzip or zstd)",
        ))
    })?;

    // put the sniffed bytes back in front of the stream
    let replay = Cursor::new(magic).take(filled as u64).chain(source);

    let decoder: Box<dyn Read + 'a> = match compression {
        Compression::Gzip => Box::new(flate2::read::MultiGzDecoder::new(replay)),
        Compression::Zstd => Box::new(
            zstd::stream::read::Decoder::new(replay).map_err(Error::Decompression)?,
        ),
    };

    let staged: Box<dyn Read + 'a> = Box::new(StageReader {
        inner: decoder,
        stage: Stage::Decompress,
    });

    Ok(ArchiveStream {
        compression,
        archive: tar::Archive::new(staged),
    })
}
