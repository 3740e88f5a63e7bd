//! Streaming tar.gz extraction
//!
//! Header tarballs and prebuilt binaries are gzip-compressed tar archives.
//! The extractor walks the 512-byte block structure itself so that every
//! entry name can be vetted before anything touches the filesystem:
//! - empty names are rejected
//! - absolute names are rejected (including drive letters on Windows)
//! - any `..` segment is rejected
//!
//! A rejected entry aborts the whole extraction. Entries written before it
//! stay on disk.
//!
//! GNU long names (`L`) and PAX extended headers (`x`, keys `path` and
//! `size`) override the fields of the entry that immediately follows them.

use flate2::read::GzDecoder;
use std::fmt;
use std::fs::{self, DirBuilder, File};
use std::io::{self, BufReader, Read, Write};
use std::path::Path;
use thiserror::Error;

/// Size of a tar block
pub const BLOCK_SIZE: usize = 512;

// Largest read issued for entry data; must stay a multiple of BLOCK_SIZE
const CHUNK_SIZE: usize = 128 * BLOCK_SIZE;

// Long-name and PAX payloads are buffered whole, so cap them
const MAX_METADATA_SIZE: u64 = 1024 * 1024;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("Insecure archive entry '{name}': {reason}")]
    InsecureArchiveEntry {
        name: String,
        reason: InsecureReason,
    },

    #[error("Malformed PAX extended header: {0}")]
    MalformedExtendedHeader(String),

    #[error("{context}: {source}")]
    ExtractionIo {
        context: String,
        #[source]
        source: io::Error,
    },
}

impl ArchiveError {
    /// Wrap an IO error with context for use in `map_err`
    pub fn wrap_io(context: impl Into<String>) -> impl FnOnce(io::Error) -> Self {
        let context = context.into();
        move |source| Self::ExtractionIo { context, source }
    }
}

/// Why an entry name was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsecureReason {
    EmptyName,
    AbsolutePath,
    ParentTraversal,
}

impl fmt::Display for InsecureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::EmptyName => "empty filename",
            Self::AbsolutePath => "filename is an absolute path",
            Self::ParentTraversal => "filename contains a '..' component",
        })
    }
}

/// Kind of a tar entry, from the typeflag byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryType {
    File,
    Directory,
    /// GNU `L`: payload is the next entry's name
    LongName,
    /// PAX `x`: payload holds records for the next entry
    Pax,
    Other(u8),
}

impl EntryType {
    #[must_use]
    pub const fn from_typeflag(flag: u8) -> Self {
        match flag {
            b'0' | 0 | b'7' => Self::File,
            b'5' => Self::Directory,
            b'L' => Self::LongName,
            b'x' => Self::Pax,
            other => Self::Other(other),
        }
    }
}

/// One decoded header block, after any pending override was applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveHeader {
    pub filename: String,
    pub mode: u32,
    pub size: u64,
    pub entry_type: EntryType,
}

/// Fields carried from a long-name/PAX entry to the next header
#[derive(Debug, Default)]
struct PendingOverride {
    filename: Option<String>,
    size: Option<u64>,
}

impl PendingOverride {
    fn apply(self, header: &mut ArchiveHeader) {
        if let Some(filename) = self.filename {
            header.filename = filename;
        }
        if let Some(size) = self.size {
            header.size = size;
        }
    }
}

/// Extract a tar.gz file on the blocking pool.
pub async fn extract_targz(archive: &Path, dest: &Path, strip: usize) -> Result<(), ArchiveError> {
    let archive = archive.to_path_buf();
    let dest = dest.to_path_buf();

    tokio::task::spawn_blocking(move || {
        let file = File::open(&archive).map_err(ArchiveError::wrap_io(format!(
            "Failed to open archive {}",
            archive.display()
        )))?;
        extract(BufReader::new(file), &dest, strip)
    })
    .await
    .map_err(|e| ArchiveError::ExtractionIo {
        context: "Extraction task failed".to_string(),
        source: io::Error::other(e),
    })?
}

/// Decompress a gzip stream and extract the tar archive inside it.
pub fn extract<R: Read>(reader: R, dest: &Path, strip: usize) -> Result<(), ArchiveError> {
    extract_tar(GzDecoder::new(reader), dest, strip)
}

/// Extract an uncompressed tar stream into `dest`.
///
/// `strip` leading path segments are removed from every entry name; entries
/// with nothing left after stripping are skipped.
pub fn extract_tar<R: Read>(mut reader: R, dest: &Path, strip: usize) -> Result<(), ArchiveError> {
    let mut block = [0u8; BLOCK_SIZE];
    let mut pending = PendingOverride::default();
    let mut zero_blocks = 0;

    loop {
        if !read_block(&mut reader, &mut block)? {
            return Ok(());
        }

        if block.iter().all(|&b| b == 0) {
            zero_blocks += 1;
            if zero_blocks >= 2 {
                return Ok(());
            }
            continue;
        }
        zero_blocks = 0;

        let mut header = parse_header(&block)?;
        std::mem::take(&mut pending).apply(&mut header);
        aligned(header.size)?;

        header.filename = header.filename.replace('\\', "/");

        match header.entry_type {
            EntryType::LongName => {
                let data = read_metadata(&mut reader, header.size)?;
                pending.filename = Some(parse_long_name(&data));
            }
            EntryType::Pax => {
                let data = read_metadata(&mut reader, header.size)?;
                parse_pax_records(&data, &mut pending)?;
            }
            EntryType::File | EntryType::Directory => {
                validate_entry_name(&header.filename)?;
                let relative = match strip_components(&header.filename, strip) {
                    Some(relative) if !relative.is_empty() => relative,
                    _ => {
                        crate::debug!("Skipping stripped entry {}", header.filename);
                        skip_data(&mut reader, header.size)?;
                        continue;
                    }
                };
                validate_entry_name(relative)?;

                let target = dest.join(relative);
                if header.entry_type == EntryType::File {
                    write_file(&mut reader, &target, header.size, header.mode)?;
                } else {
                    skip_data(&mut reader, header.size)?;
                    create_directory(&target, header.mode)?;
                }
            }
            EntryType::Other(flag) => {
                crate::debug!(
                    "Skipping {} (unsupported entry type {:?})",
                    header.filename,
                    char::from(flag)
                );
                skip_data(&mut reader, header.size)?;
            }
        }
    }
}

/// Check whether a name starts at the filesystem root.
///
/// Drive-letter prefixes only count on Windows, where they can escape the
/// destination; elsewhere `C:` is an ordinary file name.
#[must_use]
pub fn path_is_absolute(name: &str) -> bool {
    name_is_absolute(name, cfg!(windows))
}

/// Check whether a name has a `..` segment bounded by separators or string ends.
#[must_use]
pub fn path_has_dotdot(name: &str) -> bool {
    name.split(is_path_separator).any(|segment| segment == "..")
}

/// Path separators accepted on this host
#[must_use]
pub fn is_path_separator(c: char) -> bool {
    c == '/' || (cfg!(windows) && c == '\\')
}

fn name_is_absolute(name: &str, windows: bool) -> bool {
    let mut chars = name.chars();
    match (chars.next(), chars.next()) {
        (Some(drive), Some(':')) if windows && drive.is_ascii_alphabetic() => true,
        (Some(first), _) => first == '/' || (windows && first == '\\'),
        (None, _) => false,
    }
}

fn validate_entry_name(name: &str) -> Result<(), ArchiveError> {
    let reason = if name.is_empty() {
        InsecureReason::EmptyName
    } else if path_is_absolute(name) {
        InsecureReason::AbsolutePath
    } else if path_has_dotdot(name) {
        InsecureReason::ParentTraversal
    } else {
        return Ok(());
    };

    Err(ArchiveError::InsecureArchiveEntry {
        name: name.to_string(),
        reason,
    })
}

fn strip_components(name: &str, strip: usize) -> Option<&str> {
    let mut rest = name;
    for _ in 0..strip {
        let slash = rest.find('/')?;
        rest = rest.get(slash + 1..)?;
    }
    Some(rest)
}

fn parse_header(block: &[u8; BLOCK_SIZE]) -> Result<ArchiveHeader, ArchiveError> {
    let name = field(block, 0, 100);
    let name_end = name.iter().position(|&b| b == 0).unwrap_or(name.len());
    let filename = String::from_utf8_lossy(name.get(..name_end).unwrap_or_default()).into_owned();

    let mode = parse_octal(field(block, 100, 108)).ok_or_else(|| invalid_header("mode"))?;
    let size = parse_size(field(block, 124, 136)).ok_or_else(|| invalid_header("size"))?;
    let typeflag = block.get(156).copied().unwrap_or(0);

    Ok(ArchiveHeader {
        filename,
        mode: u32::try_from(mode).map_err(|_| invalid_header("mode"))?,
        size,
        entry_type: EntryType::from_typeflag(typeflag),
    })
}

fn invalid_header(field: &str) -> ArchiveError {
    ArchiveError::ExtractionIo {
        context: "Corrupt tar header".to_string(),
        source: io::Error::new(io::ErrorKind::InvalidData, format!("invalid {field} field")),
    }
}

fn field(block: &[u8; BLOCK_SIZE], start: usize, end: usize) -> &[u8] {
    block.get(start..end).unwrap_or_default()
}

/// Parse an octal numeric field, tolerating leading spaces and NUL/space terminators
fn parse_octal(bytes: &[u8]) -> Option<u64> {
    let mut value: u64 = 0;

    for &b in bytes.iter().skip_while(|&&b| b == b' ') {
        match b {
            b'0'..=b'7' => {
                value = value.checked_mul(8)?.checked_add(u64::from(b - b'0'))?;
            }
            0 | b' ' => break,
            _ => return None,
        }
    }

    Some(value)
}

/// Parse a size field, accepting GNU base-256 for sizes beyond 8 GiB
fn parse_size(bytes: &[u8]) -> Option<u64> {
    match bytes.first() {
        Some(&first) if first & 0x80 != 0 => {
            let mut value = u64::from(first & 0x7F);
            for &b in bytes.get(1..)? {
                value = value.checked_mul(256)?.checked_add(u64::from(b))?;
            }
            Some(value)
        }
        _ => parse_octal(bytes),
    }
}

fn parse_long_name(data: &[u8]) -> String {
    let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
    String::from_utf8_lossy(data.get(..end).unwrap_or_default()).into_owned()
}

/// Parse `"<len> <key>=<value>\n"` records into the pending override
fn parse_pax_records(data: &[u8], pending: &mut PendingOverride) -> Result<(), ArchiveError> {
    let malformed = |what: &str| ArchiveError::MalformedExtendedHeader(what.to_string());
    let mut rest = data;

    loop {
        let Some(start) = rest
            .iter()
            .position(|&b| b != 0 && !b.is_ascii_whitespace())
        else {
            return Ok(());
        };
        rest = rest.get(start..).unwrap_or_default();

        let space = rest
            .iter()
            .position(|&b| b == b' ')
            .ok_or_else(|| malformed("missing record length"))?;
        let len: usize = std::str::from_utf8(rest.get(..space).unwrap_or_default())
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| malformed("invalid record length"))?;

        let record = rest
            .get(..len)
            .ok_or_else(|| malformed("record length overruns header"))?;
        let body = record
            .get(space + 1..)
            .and_then(|body| body.strip_suffix(b"\n"))
            .ok_or_else(|| malformed("record is not newline terminated"))?;
        let body = std::str::from_utf8(body).map_err(|_| malformed("record is not UTF-8"))?;

        let (key, value) = body
            .split_once('=')
            .ok_or_else(|| malformed("record has no '='"))?;
        if key.is_empty()
            || !key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_')
        {
            return Err(malformed("invalid record key"));
        }

        match key {
            "path" => pending.filename = Some(value.to_string()),
            "size" => {
                let size = value
                    .parse()
                    .map_err(|_| malformed("invalid size value"))?;
                pending.size = Some(size);
            }
            _ => {}
        }

        rest = rest.get(len..).unwrap_or_default();
    }
}

/// Read one block; `Ok(false)` on a clean end of stream
fn read_block<R: Read>(reader: &mut R, block: &mut [u8; BLOCK_SIZE]) -> Result<bool, ArchiveError> {
    let mut filled = 0;

    while filled < BLOCK_SIZE {
        let buf = block.get_mut(filled..).unwrap_or_default();
        match reader.read(buf) {
            Ok(0) if filled == 0 => return Ok(false),
            Ok(0) => {
                return Err(ArchiveError::ExtractionIo {
                    context: "Truncated tar header".to_string(),
                    source: io::ErrorKind::UnexpectedEof.into(),
                });
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(ArchiveError::wrap_io("Failed to read archive")(e)),
        }
    }

    Ok(true)
}

/// Entry size rounded up to whole blocks, or an error for sizes no archive can hold
fn aligned(size: u64) -> Result<u64, ArchiveError> {
    size.checked_next_multiple_of(BLOCK_SIZE as u64)
        .ok_or_else(|| ArchiveError::ExtractionIo {
            context: format!("Entry size {size} is out of range"),
            source: io::ErrorKind::InvalidData.into(),
        })
}

/// Stream an entry's padded data, handing the unpadded part to `sink` chunk by chunk
fn stream_data<R: Read>(
    reader: &mut R,
    size: u64,
    mut sink: impl FnMut(&[u8]) -> io::Result<()>,
) -> Result<(), ArchiveError> {
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut remaining = aligned(size)?;
    let mut wanted = size;

    while remaining > 0 {
        let n = usize::try_from(remaining.min(CHUNK_SIZE as u64)).unwrap_or(CHUNK_SIZE);
        let chunk = buf.get_mut(..n).unwrap_or_default();
        reader
            .read_exact(chunk)
            .map_err(ArchiveError::wrap_io("Truncated tar entry"))?;

        let keep = usize::try_from(wanted.min(n as u64)).unwrap_or(n);
        if keep > 0 {
            sink(chunk.get(..keep).unwrap_or_default())
                .map_err(ArchiveError::wrap_io("Failed to write entry"))?;
        }

        remaining -= n as u64;
        wanted -= keep as u64;
    }

    Ok(())
}

fn skip_data<R: Read>(reader: &mut R, size: u64) -> Result<(), ArchiveError> {
    stream_data(reader, size, |_| Ok(()))
}

fn read_metadata<R: Read>(reader: &mut R, size: u64) -> Result<Vec<u8>, ArchiveError> {
    if size > MAX_METADATA_SIZE {
        return Err(ArchiveError::MalformedExtendedHeader(format!(
            "extended header of {size} bytes is too large"
        )));
    }

    let mut data = Vec::with_capacity(usize::try_from(size).unwrap_or(0));
    stream_data(reader, size, |chunk| {
        data.extend_from_slice(chunk);
        Ok(())
    })?;

    Ok(data)
}

fn write_file<R: Read>(reader: &mut R, target: &Path, size: u64, mode: u32) -> Result<(), ArchiveError> {
    if let Some(parent) = target.parent() {
        create_parents(parent)?;
    }

    // Never write through a link left behind in the destination
    if fs::symlink_metadata(target).is_ok_and(|meta| meta.file_type().is_symlink()) {
        fs::remove_file(target).map_err(ArchiveError::wrap_io(format!(
            "Failed to replace {}",
            target.display()
        )))?;
    }

    let mut file = File::create(target).map_err(ArchiveError::wrap_io(format!(
        "Failed to create {}",
        target.display()
    )))?;
    stream_data(reader, size, |chunk| file.write_all(chunk))?;
    file.flush()
        .map_err(ArchiveError::wrap_io(format!("Failed to write {}", target.display())))?;
    drop(file);

    set_mode(target, mode)
}

fn create_parents(dir: &Path) -> Result<(), ArchiveError> {
    let mut builder = DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o755);
    }

    builder.create(dir).map_err(ArchiveError::wrap_io(format!(
        "Failed to create directory {}",
        dir.display()
    )))
}

fn create_directory(dir: &Path, mode: u32) -> Result<(), ArchiveError> {
    create_parents(dir)?;
    set_mode(dir, mode)
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<(), ArchiveError> {
    use std::os::unix::fs::PermissionsExt;

    fs::set_permissions(path, fs::Permissions::from_mode(mode & 0o7777)).map_err(
        ArchiveError::wrap_io(format!("Failed to set permissions on {}", path.display())),
    )
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> Result<(), ArchiveError> {
    Ok(())
}
