use std::borrow::Cow;
use std::io::{self, Read};

use serde::{Deserialize, Serialize};

use crate::types::raw_bytes::{byte_string, opt_byte_string};

/// metadata of one archive member, as read from the source stream
///
/// paths and link targets are kept as raw bytes so they replay exactly,
/// including leading `./` and trailing `/` that path normalization would drop.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryMeta {
    #[serde(with = "byte_string")]
    pub path: Vec<u8>,
    /// raw tar type flag byte
    pub type_flag: u8,
    pub size: u64,
    pub mode: u32,
    pub uid: u64,
    pub gid: u64,
    #[serde(with = "opt_byte_string")]
    pub uname: Option<Vec<u8>>,
    #[serde(with = "opt_byte_string")]
    pub gname: Option<Vec<u8>>,
    pub mtime: u64,
    #[serde(with = "opt_byte_string")]
    pub link_name: Option<Vec<u8>>,
    pub device: Option<DeviceNumbers>,
    /// extended header records; for a global header (`g`) these are the
    /// member's own body, otherwise the `x` header that precedes it
    pub pax: Vec<PaxRecord>,
}

/// major/minor numbers of a device node
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceNumbers {
    pub major: u32,
    pub minor: u32,
}

/// a PAX extended header record carried through verbatim
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaxRecord {
    pub key: String,
    #[serde(with = "byte_string")]
    pub value: Vec<u8>,
}

impl PaxRecord {
    pub fn new(key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// PAX keys that are re-derived from the dedicated fields on replay
const DERIVED_PAX_KEYS: &[&str] = &["path", "linkpath", "size"];

/// coarse classification of an archive member
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryKind {
    Regular,
    Directory,
    Symlink,
    Hardlink,
    CharDevice,
    BlockDevice,
    Fifo,
    Other(u8),
}

impl EntryKind {
    pub fn from_type_flag(flag: u8) -> Self {
        match flag {
            // GNU sparse files are read back expanded and replay as plain files
            b'0' | b'\0' | b'7' | b'S' => EntryKind::Regular,
            b'5' => EntryKind::Directory,
            b'2' => EntryKind::Symlink,
            b'1' => EntryKind::Hardlink,
            b'3' => EntryKind::CharDevice,
            b'4' => EntryKind::BlockDevice,
            b'6' => EntryKind::Fifo,
            other => EntryKind::Other(other),
        }
    }

    /// type name for listings and error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            EntryKind::Regular => "file",
            EntryKind::Directory => "dir",
            EntryKind::Symlink => "symlink",
            EntryKind::Hardlink => "hardlink",
            EntryKind::CharDevice => "chardev",
            EntryKind::BlockDevice => "blockdev",
            EntryKind::Fifo => "fifo",
            EntryKind::Other(_) => "other",
        }
    }
}

impl EntryMeta {
    /// capture metadata of a parsed tar entry
    ///
    /// must run before the entry body is read. the body of a global PAX header
    /// is consumed here and kept as its records.
    pub fn from_entry<R: Read>(entry: &mut tar::Entry<'_, R>) -> io::Result<Self> {
        let global = entry.header().entry_type().is_pax_global_extensions();
        let mut pax = Vec::new();
        if let Some(extensions) = entry.pax_extensions()? {
            for ext in extensions {
                let ext = ext?;
                let key = ext
                    .key()
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
                if !global && DERIVED_PAX_KEYS.contains(&key) {
                    continue;
                }
                pax.push(PaxRecord::new(key, ext.value_bytes()));
            }
        }

        let path = entry.path_bytes().into_owned();
        let link_name = entry.link_name_bytes().map(Cow::into_owned);
        let size = entry.size();

        let header = entry.header();
        let type_flag = header.entry_type().as_byte();
        let device = match EntryKind::from_type_flag(type_flag) {
            EntryKind::CharDevice | EntryKind::BlockDevice => device_numbers(header)?,
            _ => None,
        };

        let old = header.as_old();
        let mode = numeric_field(&old.mode, "mode")?;
        Ok(Self {
            path,
            type_flag,
            size,
            mode: u32::try_from(mode).map_err(|_| invalid_number("mode", &old.mode))?,
            uid: numeric_field(&old.uid, "uid")?,
            gid: numeric_field(&old.gid, "gid")?,
            uname: header.username_bytes().map(<[u8]>::to_vec),
            gname: header.groupname_bytes().map(<[u8]>::to_vec),
            mtime: numeric_field(&old.mtime, "mtime")?,
            link_name,
            device,
            pax,
        })
    }

    pub fn kind(&self) -> EntryKind {
        EntryKind::from_type_flag(self.type_flag)
    }

    /// whether the member carries a body stored in the content store
    pub fn has_content(&self) -> bool {
        self.kind() == EntryKind::Regular
    }

    pub fn is_pax_global(&self) -> bool {
        self.type_flag == b'g'
    }

    /// path for display
    pub fn display_path(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.path)
    }

    /// build a GNU header carrying every field except the name fields
    ///
    /// members without stored content replay with size 0, sparse files as
    /// regular files of their expanded size.
    pub fn to_header(&self) -> io::Result<tar::Header> {
        let type_flag = match self.type_flag {
            b'S' => b'0',
            other => other,
        };
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::new(type_flag));
        header.set_size(if self.has_content() { self.size } else { 0 });
        header.set_mode(self.mode);
        header.set_uid(self.uid);
        header.set_gid(self.gid);
        header.set_mtime(self.mtime);
        if let Some(gnu) = header.as_gnu_mut() {
            if let Some(uname) = &self.uname {
                owner_field(&mut gnu.uname, uname, "user name")?;
            }
            if let Some(gname) = &self.gname {
                owner_field(&mut gnu.gname, gname, "group name")?;
            }
        }
        if let Some(dev) = self.device {
            header.set_device_major(dev.major)?;
            header.set_device_minor(dev.minor)?;
        }
        Ok(header)
    }
}

fn device_numbers(header: &tar::Header) -> io::Result<Option<DeviceNumbers>> {
    let (major, minor) = if let Some(ustar) = header.as_ustar() {
        (&ustar.dev_major, &ustar.dev_minor)
    } else if let Some(gnu) = header.as_gnu() {
        (&gnu.dev_major, &gnu.dev_minor)
    } else {
        return Ok(None);
    };
    let number = |field: &[u8; 8], name: &str| {
        let value = numeric_field(field, name)?;
        u32::try_from(value).map_err(|_| invalid_number(name, field))
    };
    Ok(Some(DeviceNumbers {
        major: number(major, "devmajor")?,
        minor: number(minor, "devminor")?,
    }))
}

/// read a numeric header field the way GNU tar does
///
/// base-256 when the high bit of the first byte is set, otherwise octal padded
/// with NULs or spaces on either side. a blank field reads as 0.
fn numeric_field(field: &[u8], name: &str) -> io::Result<u64> {
    if let Some(&first) = field.first() {
        if first & 0x80 != 0 {
            if first & 0x40 != 0 {
                return Err(invalid_number(name, field));
            }
            let mut value: u64 = 0;
            for (i, &byte) in field.iter().enumerate() {
                let byte = if i == 0 { byte & 0x7f } else { byte };
                if value >> 56 != 0 {
                    return Err(invalid_number(name, field));
                }
                value = (value << 8) | u64::from(byte);
            }
            return Ok(value);
        }
    }

    let padding = |b: &u8| *b == b' ' || *b == 0;
    let start = field.iter().position(|b| !padding(b));
    let end = field.iter().rposition(|b| !padding(b));
    let digits = match (start, end) {
        (Some(start), Some(end)) => &field[start..=end],
        _ => return Ok(0),
    };

    std::str::from_utf8(digits)
        .ok()
        .filter(|s| s.bytes().all(|b| (b'0'..=b'7').contains(&b)))
        .and_then(|s| u64::from_str_radix(s, 8).ok())
        .ok_or_else(|| invalid_number(name, field))
}

fn invalid_number(name: &str, field: &[u8]) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!(
            "{} field is not a number: {:?}",
            name,
            String::from_utf8_lossy(field)
        ),
    )
}

fn owner_field(field: &mut [u8], value: &[u8], name: &str) -> io::Result<()> {
    if value.len() > field.len() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} longer than {} bytes", name, field.len()),
        ));
    }
    field[..value.len()].copy_from_slice(value);
    field[value.len()..].fill(0);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(path: &str, type_flag: u8) -> EntryMeta {
        EntryMeta {
            path: path.as_bytes().to_vec(),
            type_flag,
            size: 0,
            mode: 0o644,
            uid: 1000,
            gid: 1000,
            uname: Some("builder".into()),
            gname: None,
            mtime: 1_700_000_000,
            link_name: None,
            device: None,
            pax: vec![],
        }
    }

    #[test]
    fn test_kind_classification() {
        assert_eq!(EntryKind::from_type_flag(b'0'), EntryKind::Regular);
        assert_eq!(EntryKind::from_type_flag(b'\0'), EntryKind::Regular);
        assert_eq!(EntryKind::from_type_flag(b'7'), EntryKind::Regular);
        assert_eq!(EntryKind::from_type_flag(b'S'), EntryKind::Regular);
        assert_eq!(EntryKind::from_type_flag(b'5'), EntryKind::Directory);
        assert_eq!(EntryKind::from_type_flag(b'2'), EntryKind::Symlink);
        assert_eq!(EntryKind::from_type_flag(b'1'), EntryKind::Hardlink);
        assert_eq!(EntryKind::from_type_flag(b'g'), EntryKind::Other(b'g'));
        assert_eq!(EntryKind::Other(b'g').type_name(), "other");
    }

    #[test]
    fn test_only_regular_files_have_content() {
        assert!(sample("a.txt", b'0').has_content());
        assert!(!sample("dir/", b'5').has_content());
        assert!(!sample("link", b'2').has_content());
    }

    #[test]
    fn test_to_header() {
        let mut meta = sample("dev/null", b'3');
        meta.device = Some(DeviceNumbers { major: 1, minor: 3 });
        meta.size = 99;

        let header = meta.to_header().unwrap();
        assert_eq!(header.entry_type(), tar::EntryType::Char);
        // no stored body for device nodes
        assert_eq!(header.size().unwrap(), 0);
        assert_eq!(header.mode().unwrap(), 0o644);
        assert_eq!(header.uid().unwrap(), 1000);
        assert_eq!(header.mtime().unwrap(), 1_700_000_000);
        assert_eq!(header.username().unwrap(), Some("builder"));
        assert_eq!(header.device_major().unwrap(), Some(1));
        assert_eq!(header.device_minor().unwrap(), Some(3));
    }

    #[test]
    fn test_sparse_replays_as_regular_file() {
        let mut meta = sample("holes.img", b'S');
        meta.size = 4096;

        let header = meta.to_header().unwrap();
        assert_eq!(header.entry_type(), tar::EntryType::Regular);
        assert_eq!(header.size().unwrap(), 4096);
    }

    fn first_entry_meta(header: &tar::Header) -> EntryMeta {
        let mut builder = tar::Builder::new(Vec::new());
        builder.append(header, &b"data"[..]).unwrap();
        let bytes = builder.into_inner().unwrap();

        let mut archive = tar::Archive::new(&bytes[..]);
        let mut entries = archive.entries().unwrap();
        let mut entry = entries.next().unwrap().unwrap();
        EntryMeta::from_entry(&mut entry).unwrap()
    }

    #[test]
    fn test_blank_numeric_fields_read_as_zero() {
        let mut header = tar::Header::new_gnu();
        header.set_path("blank.txt").unwrap();
        header.set_size(4);
        header.as_old_mut().mode = [0; 8];
        header.set_cksum();

        let meta = first_entry_meta(&header);
        assert_eq!(meta.mode, 0);
        assert_eq!(meta.uid, 0);
        assert_eq!(meta.gid, 0);
        assert_eq!(meta.mtime, 0);
        assert_eq!(meta.uname, Some(vec![]));
    }

    #[test]
    fn test_padded_and_base256_numeric_fields() {
        let mut header = tar::Header::new_gnu();
        header.set_path("owned.txt").unwrap();
        header.set_size(4);
        header.set_mode(0o640);
        header.as_old_mut().uid = *b"  1750 \0";
        // too large for octal, so the crate writes base-256
        header.set_gid(5_000_000);
        header.set_mtime(1_700_000_000);
        header.set_cksum();

        let meta = first_entry_meta(&header);
        assert_eq!(meta.mode, 0o640);
        assert_eq!(meta.uid, 0o1750);
        assert_eq!(meta.gid, 5_000_000);
        assert_eq!(meta.mtime, 1_700_000_000);
    }

    #[test]
    fn test_garbage_numeric_field_is_rejected() {
        assert!(numeric_field(b"12x4\0\0\0\0", "uid").is_err());
        assert!(numeric_field(b"0001 234", "uid").is_err());
        assert_eq!(numeric_field(b"\0\0\0\0\0\0\0\0", "uid").unwrap(), 0);
        assert_eq!(numeric_field(b"       \0", "uid").unwrap(), 0);
    }

    #[test]
    fn test_non_utf8_owner_names_replay_verbatim() {
        let mut meta = sample("a", b'0');
        meta.uname = Some(vec![0xe9, b'v', b'e']);
        meta.gname = Some(b"staff".to_vec());

        let header = meta.to_header().unwrap();
        assert_eq!(header.username_bytes(), Some(&[0xe9, b'v', b'e'][..]));
        assert_eq!(header.groupname_bytes(), Some(&b"staff"[..]));

        meta.uname = Some(vec![b'u'; 40]);
        assert!(meta.to_header().is_err());
    }

    #[test]
    fn test_cbor_roundtrip_keeps_raw_bytes() {
        let mut meta = sample("./odd\u{7f}name/", b'5');
        meta.link_name = Some(vec![0xff, 0xfe, b'x']);
        meta.pax = vec![PaxRecord::new("SCHILY.xattr.user.k", vec![0, 1, 2])];

        let mut buf = Vec::new();
        ciborium::into_writer(&meta, &mut buf).unwrap();
        let parsed: EntryMeta = ciborium::from_reader(&buf[..]).unwrap();

        assert_eq!(parsed, meta);
    }
}
