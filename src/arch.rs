//! Platform and architecture detection
//!
//! Produces the `<platform>_<arch>` triplet used to pick headers, cache
//! entries and output directories. Names follow Node's `process.platform` and
//! `process.arch`, with the floating-point ABI appended for ARM and RISC-V
//! (e.g. "linux_armhf", "linux_riscv64d").

use crate::elf::{self, HeaderError};
use std::env;
use std::fmt;
use std::path::Path;

const RISCV_FLOAT_ABI_MASK: u32 = 0x6;
const ARM_ABI_FLOAT_HARD: u32 = 0x400;
const ARM_ABI_FLOAT_SOFT: u32 = 0x200;

/// Target identity for one build
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Triplet {
    pub platform: String,
    pub arch: String,
}

impl Triplet {
    #[must_use]
    pub fn new(platform: impl Into<String>, arch: impl Into<String>) -> Self {
        Self {
            platform: platform.into(),
            arch: arch.into(),
        }
    }

    #[must_use]
    pub fn is_windows(&self) -> bool {
        self.platform == "win32"
    }

    #[must_use]
    pub fn is_macos(&self) -> bool {
        self.platform == "darwin"
    }
}

impl fmt::Display for Triplet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.platform, self.arch)
    }
}

/// Host platform in Node naming ("linux", "darwin", "win32", ...)
#[must_use]
pub fn host_platform() -> &'static str {
    match env::consts::OS {
        "macos" => "darwin",
        "windows" => "win32",
        other => other,
    }
}

/// Host base architecture in Node naming, before any ABI refinement
#[must_use]
pub fn host_base_arch() -> &'static str {
    match env::consts::ARCH {
        "x86_64" => "x64",
        "x86" => "ia32",
        "aarch64" => "arm64",
        "powerpc64" => "ppc64",
        other => other,
    }
}

/// Append the floating-point ABI suffix encoded in `e_flags`.
///
/// Architectures without ABI variants are returned unchanged.
pub fn refine_arch(base: &str, flags: u32) -> Result<String, HeaderError> {
    match base {
        "riscv32" | "riscv64" => {
            let suffix = match flags & RISCV_FLOAT_ABI_MASK {
                0x2 => "f",
                0x4 => "d",
                0x6 => "q",
                _ => "",
            };
            Ok(format!("{base}{suffix}"))
        }
        "arm" => {
            if flags & ARM_ABI_FLOAT_HARD != 0 {
                Ok(format!("{base}hf"))
            } else if flags & ARM_ABI_FLOAT_SOFT != 0 {
                Ok(format!("{base}sf"))
            } else {
                Err(HeaderError::UnknownFloatAbi(flags))
            }
        }
        other => Ok(other.to_string()),
    }
}

/// Determine the effective architecture of the host runtime.
///
/// `executable` is only read when the base architecture has ABI variants.
pub fn determine_arch(executable: &Path) -> Result<String, HeaderError> {
    let base = host_base_arch();

    if !needs_refinement(base) {
        return Ok(base.to_string());
    }

    let buf = elf::read_file_header(executable, elf::HEADER_READ_LIMIT)?;
    let header = elf::decode_header(&buf)?;
    crate::debug!(
        "{} header: {}-bit {}, flags {:#x}",
        executable.display(),
        header.word_size.bits(),
        header.machine,
        header.flags
    );

    refine_arch(base, header.flags)
}

fn needs_refinement(base: &str) -> bool {
    matches!(base, "arm" | "riscv32" | "riscv64")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn riscv_float_abi_suffixes() {
        assert_eq!(refine_arch("riscv64", 0x0).unwrap(), "riscv64");
        assert_eq!(refine_arch("riscv64", 0x2).unwrap(), "riscv64f");
        assert_eq!(refine_arch("riscv64", 0x4).unwrap(), "riscv64d");
        assert_eq!(refine_arch("riscv32", 0x6).unwrap(), "riscv32q");
        // RVC bit does not affect the float ABI
        assert_eq!(refine_arch("riscv64", 0x5).unwrap(), "riscv64d");
    }

    #[test]
    fn arm_float_abi() {
        assert_eq!(refine_arch("arm", 0x0500_0400).unwrap(), "armhf");
        assert_eq!(refine_arch("arm", 0x0500_0200).unwrap(), "armsf");
        // Hard-float wins when both bits are set
        assert_eq!(refine_arch("arm", 0x600).unwrap(), "armhf");
        assert!(matches!(
            refine_arch("arm", 0x0500_0000),
            Err(HeaderError::UnknownFloatAbi(0x0500_0000))
        ));
    }

    #[test]
    fn refinement_is_deterministic() {
        for flags in [0, 0x2, 0x4, 0x6, 0x200, 0x400] {
            assert_eq!(
                refine_arch("riscv64", flags).ok(),
                refine_arch("riscv64", flags).ok()
            );
        }
    }

    #[test]
    fn other_arches_pass_through() {
        assert_eq!(refine_arch("x64", 0xFFFF).unwrap(), "x64");
        assert_eq!(refine_arch("arm64", 0).unwrap(), "arm64");
    }

    #[test]
    fn triplet_display() {
        let triplet = Triplet::new("linux", "armhf");
        assert_eq!(triplet.to_string(), "linux_armhf");
        assert!(!triplet.is_windows());
        assert!(Triplet::new("win32", "x64").is_windows());
        assert!(Triplet::new("darwin", "arm64").is_macos());
    }

    #[test]
    fn host_names_are_node_style() {
        assert!(!host_platform().is_empty());
        assert_ne!(host_platform(), "macos");
        assert_ne!(host_base_arch(), "x86_64");
        assert_ne!(host_base_arch(), "aarch64");
    }
}
