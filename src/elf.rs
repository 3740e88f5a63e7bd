//! ELF header decoding
//!
//! Reads just enough of an executable's ELF header to learn its machine type,
//! word size and processor flags. Only little-endian files are understood;
//! big-endian headers are rejected rather than misread.

use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use thiserror::Error;

/// Never read more than this many bytes from an executable
pub const HEADER_READ_LIMIT: usize = 512;

const ELF_MAGIC: [u8; 4] = [0x7F, b'E', b'L', b'F'];
const IDENT_LEN: usize = 16;
const ELF32_HEADER_LEN: usize = 68;
const ELF64_HEADER_LEN: usize = 120;
const ELF32_FLAGS_OFFSET: usize = 36;
const ELF64_FLAGS_OFFSET: usize = 48;
const MACHINE_OFFSET: usize = 18;

#[derive(Debug, Error)]
pub enum HeaderError {
    #[error("Malformed executable header: {0}")]
    MalformedHeader(&'static str),

    #[error("Unsupported ELF machine type {0}")]
    UnsupportedMachine(u16),

    #[error("Invalid ELF class {0}")]
    InvalidWordSize(u8),

    #[error("Unknown ARM floating-point ABI (flags {0:#x})")]
    UnknownFloatAbi(u32),

    #[error("Failed to read executable header from {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Word size recorded in `EI_CLASS`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WordSize {
    Bits32,
    Bits64,
}

impl WordSize {
    #[must_use]
    pub const fn bits(self) -> u32 {
        match self {
            Self::Bits32 => 32,
            Self::Bits64 => 64,
        }
    }
}

/// Machine architectures we can classify
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Machine {
    Ia32,
    Arm,
    Arm64,
    Amd64,
    Riscv32,
    Riscv64,
}

impl Machine {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ia32 => "ia32",
            Self::Arm => "arm",
            Self::Arm64 => "arm64",
            Self::Amd64 => "amd64",
            Self::Riscv32 => "riscv32",
            Self::Riscv64 => "riscv64",
        }
    }
}

impl fmt::Display for Machine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The parts of an ELF header used to classify a host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutableHeader {
    pub word_size: WordSize,
    pub machine: Machine,
    /// Raw `e_flags`
    pub flags: u32,
}

/// Read up to `limit` leading bytes of a file.
///
/// Short files are fine; the decoder reports truncation itself.
pub fn read_file_header(path: &Path, limit: usize) -> Result<Vec<u8>, HeaderError> {
    let wrap = |source| HeaderError::Io {
        path: path.display().to_string(),
        source,
    };

    let file = File::open(path).map_err(wrap)?;
    let mut buf = Vec::with_capacity(limit);
    file.take(limit as u64).read_to_end(&mut buf).map_err(wrap)?;

    Ok(buf)
}

/// Decode the leading bytes of an ELF executable.
///
/// # Examples
///
/// ```
/// use addonkit::elf::{Machine, WordSize, decode_header};
///
/// let mut buf = vec![0u8; 120];
/// buf[..4].copy_from_slice(b"\x7fELF");
/// buf[4] = 2; // 64-bit
/// buf[5] = 1; // little-endian
/// buf[6] = 1; // version
/// buf[18..20].copy_from_slice(&62u16.to_le_bytes());
///
/// let header = decode_header(&buf).unwrap();
/// assert_eq!(header.machine, Machine::Amd64);
/// assert_eq!(header.word_size, WordSize::Bits64);
/// ```
pub fn decode_header(buf: &[u8]) -> Result<ExecutableHeader, HeaderError> {
    let ident = buf
        .get(..IDENT_LEN)
        .ok_or(HeaderError::MalformedHeader("truncated header"))?;

    if ident.get(..4) != Some(&ELF_MAGIC[..]) {
        return Err(HeaderError::MalformedHeader("invalid magic number"));
    }
    if ident.get(6) != Some(&1) {
        return Err(HeaderError::MalformedHeader("invalid ELF version"));
    }
    if ident.get(5) != Some(&1) {
        return Err(HeaderError::MalformedHeader(
            "big-endian architectures are not supported",
        ));
    }

    let class = ident.get(4).copied().unwrap_or(0);

    let machine_raw = read_u16_le(buf, MACHINE_OFFSET)
        .ok_or(HeaderError::MalformedHeader("truncated header"))?;
    let machine = match machine_raw {
        3 => Machine::Ia32,
        40 => Machine::Arm,
        62 => Machine::Amd64,
        183 => Machine::Arm64,
        243 => match class {
            1 => Machine::Riscv32,
            2 => Machine::Riscv64,
            other => return Err(HeaderError::InvalidWordSize(other)),
        },
        other => return Err(HeaderError::UnsupportedMachine(other)),
    };

    let (word_size, len, flags_offset) = match class {
        1 => (WordSize::Bits32, ELF32_HEADER_LEN, ELF32_FLAGS_OFFSET),
        2 => (WordSize::Bits64, ELF64_HEADER_LEN, ELF64_FLAGS_OFFSET),
        other => return Err(HeaderError::InvalidWordSize(other)),
    };

    let header = buf
        .get(..len)
        .ok_or(HeaderError::MalformedHeader("truncated ELF header"))?;
    let flags = read_u32_le(header, flags_offset)
        .ok_or(HeaderError::MalformedHeader("truncated ELF header"))?;

    Ok(ExecutableHeader {
        word_size,
        machine,
        flags,
    })
}

fn read_u16_le(buf: &[u8], offset: usize) -> Option<u16> {
    let bytes = buf.get(offset..offset + 2)?;
    Some(u16::from_le_bytes(bytes.try_into().ok()?))
}

fn read_u32_le(buf: &[u8], offset: usize) -> Option<u32> {
    let bytes = buf.get(offset..offset + 4)?;
    Some(u32::from_le_bytes(bytes.try_into().ok()?))
}
