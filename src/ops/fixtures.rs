//! archive builders shared by the operation tests

use std::io::Write;

use tempfile::TempDir;

use crate::store::Store;

pub fn test_store() -> (TempDir, Store) {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::init(&dir.path().join("store")).unwrap();
    (dir, store)
}

pub fn tar_with(build: impl FnOnce(&mut tar::Builder<Vec<u8>>)) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    build(&mut builder);
    builder.into_inner().unwrap()
}

pub fn add_file(builder: &mut tar::Builder<Vec<u8>>, path: &str, content: &[u8]) {
    let mut header = tar::Header::new_gnu();
    header.set_entry_type(tar::EntryType::Regular);
    header.set_size(content.len() as u64);
    header.set_mode(0o644);
    header.set_mtime(1_700_000_000);
    header.set_cksum();
    builder.append_data(&mut header, path, content).unwrap();
}

pub fn add_dir(builder: &mut tar::Builder<Vec<u8>>, path: &str) {
    let mut header = tar::Header::new_gnu();
    header.set_entry_type(tar::EntryType::Directory);
    header.set_size(0);
    header.set_mode(0o755);
    header.set_mtime(1_700_000_000);
    header.set_cksum();
    builder.append_data(&mut header, path, &b""[..]).unwrap();
}

pub fn add_symlink(builder: &mut tar::Builder<Vec<u8>>, path: &str, target: &str) {
    let mut header = tar::Header::new_gnu();
    header.set_entry_type(tar::EntryType::Symlink);
    header.set_size(0);
    header.set_mode(0o777);
    header.set_mtime(1_700_000_000);
    builder.append_link(&mut header, path, target).unwrap();
}

/// a `pax_global_header` member as `git archive` writes it
pub fn add_pax_global(builder: &mut tar::Builder<Vec<u8>>, records: &str) {
    let mut header = tar::Header::new_ustar();
    header.set_entry_type(tar::EntryType::XGlobalHeader);
    header.set_path("pax_global_header").unwrap();
    header.set_size(records.len() as u64);
    header.set_mode(0o666);
    header.set_mtime(1_700_000_000);
    header.set_cksum();
    builder.append(&header, records.as_bytes()).unwrap();
}

/// an old GNU sparse member holding `chunks` at their offsets
pub fn add_sparse(
    builder: &mut tar::Builder<Vec<u8>>,
    path: &str,
    chunks: &[(u64, &[u8])],
    real_size: u64,
) {
    fn octal(field: &mut [u8], value: u64) {
        let digits = format!("{:0width$o}", value, width = field.len() - 1);
        field[..digits.len()].copy_from_slice(digits.as_bytes());
        field[digits.len()] = 0;
    }

    let data: Vec<u8> = chunks.iter().flat_map(|(_, c)| c.iter().copied()).collect();

    let mut header = tar::Header::new_gnu();
    header.set_entry_type(tar::EntryType::GNUSparse);
    header.set_path(path).unwrap();
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_mtime(1_700_000_000);
    let gnu = header.as_gnu_mut().unwrap();
    for (slot, (offset, chunk)) in gnu.sparse.iter_mut().zip(chunks) {
        octal(&mut slot.offset, *offset);
        octal(&mut slot.numbytes, chunk.len() as u64);
    }
    octal(&mut gnu.realsize, real_size);
    header.set_cksum();
    builder.append(&header, &data[..]).unwrap();
}

pub fn gzip(data: &[u8]) -> Vec<u8> {
    let mut enc = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    enc.write_all(data).unwrap();
    enc.finish().unwrap()
}

pub fn zstd_encode(data: &[u8]) -> Vec<u8> {
    zstd::encode_all(data, 3).unwrap()
}

/// the two-file archive: `a.txt` and `b.txt`, both "hello"
pub fn pair_tar_gz() -> Vec<u8> {
    gzip(&tar_with(|b| {
        add_file(b, "a.txt", b"hello");
        add_file(b, "b.txt", b"hello");
    }))
}

/// (path, body) of every member, decoded from a gzip or zstd stream
pub fn members(bytes: &[u8]) -> Vec<(String, Vec<u8>)> {
    use std::io::Read;

    let decoder: Box<dyn Read + '_> = if bytes.starts_with(&[0x1f, 0x8b]) {
        Box::new(flate2::read::MultiGzDecoder::new(bytes))
    } else {
        Box::new(zstd::stream::read::Decoder::new(bytes).unwrap())
    };
    let mut archive = tar::Archive::new(decoder);
    let mut out = Vec::new();
    for entry in archive.entries().unwrap() {
        let mut entry = entry.unwrap();
        let path = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
        let mut body = Vec::new();
        entry.read_to_end(&mut body).unwrap();
        out.push((path, body));
    }
    out
}
