use std::io::{self, Read, Write};

use crate::config::OutputConfig;
use crate::types::{Compression, EntryMeta, PaxRecord};

const GNU_LONG_LINK_NAME: &[u8] = b"././@LongLink";
const PAX_HEADER_NAME: &[u8] = b"././@PaxHeader";
const NAME_FIELD_LEN: usize = 100;

/// output sink that refuses all writes once aborted
///
/// tar and gzip both write trailers when dropped; after an abort those writes
/// fail so an interrupted stream never ends like a complete one.
struct GuardedSink<W> {
    inner: W,
    aborted: bool,
}

impl<W: Write> Write for GuardedSink<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.aborted {
            return Err(aborted());
        }
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.aborted {
            return Err(aborted());
        }
        self.inner.flush()
    }
}

fn aborted() -> io::Error {
    io::Error::other("archive output aborted")
}

enum Encoder<W: Write> {
    Gzip(flate2::write::GzEncoder<GuardedSink<W>>),
    Zstd(zstd::stream::write::Encoder<'static, GuardedSink<W>>),
}

impl<W: Write> Encoder<W> {
    fn new(writer: W, compression: Compression, output: &OutputConfig) -> io::Result<Self> {
        let sink = GuardedSink {
            inner: writer,
            aborted: false,
        };
        Ok(match compression {
            Compression::Gzip => Encoder::Gzip(flate2::write::GzEncoder::new(
                sink,
                flate2::Compression::new(output.gzip_level),
            )),
            Compression::Zstd => {
                Encoder::Zstd(zstd::stream::write::Encoder::new(sink, output.zstd_level)?)
            }
        })
    }

    fn sink_mut(&mut self) -> &mut GuardedSink<W> {
        match self {
            Encoder::Gzip(enc) => enc.get_mut(),
            Encoder::Zstd(enc) => enc.get_mut(),
        }
    }

    fn finish(self) -> io::Result<W> {
        let mut sink = match self {
            Encoder::Gzip(enc) => enc.finish()?,
            Encoder::Zstd(enc) => enc.finish()?,
        };
        sink.flush()?;
        Ok(sink.inner)
    }
}

impl<W: Write> Write for Encoder<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Encoder::Gzip(enc) => enc.write(buf),
            Encoder::Zstd(enc) => enc.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Encoder::Gzip(enc) => enc.flush(),
            Encoder::Zstd(enc) => enc.flush(),
        }
    }
}

/// streaming tar writer that replays stored entry metadata byte for byte
pub struct ArchiveWriter<W: Write> {
    builder: tar::Builder<Encoder<W>>,
}

impl<W: Write> ArchiveWriter<W> {
    pub fn new(writer: W, compression: Compression, output: &OutputConfig) -> io::Result<Self> {
        let encoder = Encoder::new(writer, compression, output)?;
        Ok(Self {
            builder: tar::Builder::new(encoder),
        })
    }

    /// append one member
    ///
    /// `body` is read up to the recorded size for members with content and
    /// ignored otherwise. a body that ends early fails with `UnexpectedEof`
    /// after part of the member has been written.
    pub fn append<R: Read>(&mut self, meta: &EntryMeta, body: R) -> io::Result<()> {
        let global = meta.is_pax_global();
        if !global && !meta.pax.is_empty() {
            let data = encode_pax(&meta.pax);
            let header = special_header(tar::EntryType::XHeader, PAX_HEADER_NAME, data.len());
            self.builder.append(&header, &data[..])?;
        }

        let mut header = meta.to_header()?;

        if let Some(link) = &meta.link_name {
            if link.len() > NAME_FIELD_LEN {
                self.append_long_name(tar::EntryType::GNULongLink, link)?;
            }
            set_field(&mut header_gnu(&mut header)?.linkname, link);
        }

        if meta.path.len() > NAME_FIELD_LEN {
            self.append_long_name(tar::EntryType::GNULongName, &meta.path)?;
        }
        set_field(&mut header_gnu(&mut header)?.name, &meta.path);

        if global {
            let data = encode_pax(&meta.pax);
            header.set_size(data.len() as u64);
            header.set_cksum();
            return self.builder.append(&header, &data[..]);
        }

        header.set_cksum();

        if meta.has_content() {
            let body = SizedBody {
                inner: body.take(meta.size),
                remaining: meta.size,
            };
            self.builder.append(&header, body)
        } else {
            self.builder.append(&header, io::empty())
        }
    }

    fn append_long_name(&mut self, kind: tar::EntryType, name: &[u8]) -> io::Result<()> {
        let mut data = Vec::with_capacity(name.len() + 1);
        data.extend_from_slice(name);
        data.push(0);

        let header = special_header(kind, GNU_LONG_LINK_NAME, data.len());
        self.builder.append(&header, &data[..])
    }

    /// write the tar trailer and compression footer, returning the sink
    pub fn finish(self) -> io::Result<W> {
        self.builder.into_inner()?.finish()
    }

    /// stop without writing any trailer
    pub fn abort(mut self) {
        self.builder.get_mut().sink_mut().aborted = true;
    }
}

/// member body that must deliver exactly the recorded size
///
/// `tar::Builder` pads whatever it copied, so a short body would otherwise
/// replay as NUL-filled content.
struct SizedBody<R> {
    inner: io::Take<R>,
    remaining: u64,
}

impl<R: Read> Read for SizedBody<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n == 0 && self.remaining > 0 && !buf.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("member body ended {} bytes short", self.remaining),
            ));
        }
        self.remaining -= n as u64;
        Ok(n)
    }
}

fn header_gnu(header: &mut tar::Header) -> io::Result<&mut tar::GnuHeader> {
    header
        .as_gnu_mut()
        .ok_or_else(|| io::Error::other("expected a gnu header"))
}

// copy as much of `value` as fits, zero-filling the rest
fn set_field(field: &mut [u8], value: &[u8]) {
    let len = value.len().min(field.len());
    field[..len].copy_from_slice(&value[..len]);
    for byte in &mut field[len..] {
        *byte = 0;
    }
}

fn special_header(kind: tar::EntryType, name: &[u8], size: usize) -> tar::Header {
    let mut header = tar::Header::new_gnu();
    header.set_entry_type(kind);
    header.set_size(size as u64);
    header.set_mode(0o644);
    header.set_uid(0);
    header.set_gid(0);
    header.set_mtime(0);
    if let Some(gnu) = header.as_gnu_mut() {
        set_field(&mut gnu.name, name);
    }
    header.set_cksum();
    header
}

fn encode_pax(records: &[PaxRecord]) -> Vec<u8> {
    let mut out = Vec::new();
    for record in records {
        out.extend_from_slice(&pax_record(&record.key, &record.value));
    }
    out
}

/// one `"<len> key=value\n"` record, where len counts the whole line
fn pax_record(key: &str, value: &[u8]) -> Vec<u8> {
    let rest = key.len() + value.len() + 3;
    let mut len = rest + 1;
    while rest + len.to_string().len() != len {
        len = rest + len.to_string().len();
    }

    let mut out = Vec::with_capacity(len);
    out.extend_from_slice(len.to_string().as_bytes());
    out.push(b' ');
    out.extend_from_slice(key.as_bytes());
    out.push(b'=');
    out.extend_from_slice(value);
    out.push(b'\n');
    out
}
