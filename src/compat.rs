//! Runtime compatibility checks
//!
//! A project can ask for a minimum Node version, a minimum Node-API level, or
//! both. Node-API levels were backported to older release lines at different
//! patch versions, so the minimum acceptable version depends on the major
//! line being built against.

use std::cmp::Ordering;
use thiserror::Error;

/// Highest Node-API level present in the version matrix
pub const MAX_NAPI_VERSION: u32 = 8;

/// First release of each major line providing Node-API level N (index N - 1)
///
/// Source: <https://nodejs.org/api/n-api.html#node-api-version-matrix>
const NAPI_SUPPORT: &[(u32, &[&str])] = &[
    (6, &["6.14.2", "6.14.2", "6.14.2"]),
    (8, &["8.6.0", "8.10.0", "8.11.2"]),
    (9, &["9.0.0", "9.3.0", "9.11.0"]),
    (
        10,
        &[
            "10.0.0", "10.0.0", "10.0.0", "10.16.0", "10.17.0", "10.20.0", "10.23.0",
        ],
    ),
    (11, &["11.0.0", "11.0.0", "11.0.0", "11.8.0"]),
    (
        12,
        &[
            "12.0.0", "12.0.0", "12.0.0", "12.0.0", "12.11.0", "12.17.0", "12.19.0", "12.22.0",
        ],
    ),
    (13, &["13.0.0", "13.0.0", "13.0.0", "13.0.0", "13.0.0"]),
    (
        14,
        &[
            "14.0.0", "14.0.0", "14.0.0", "14.0.0", "14.0.0", "14.0.0", "14.12.0", "14.17.0",
        ],
    ),
    (
        15,
        &[
            "15.0.0", "15.0.0", "15.0.0", "15.0.0", "15.0.0", "15.0.0", "15.0.0", "15.12.0",
        ],
    ),
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CompatError {
    #[error("Project {project} requires Node.js >= {required}")]
    RuntimeTooOld { project: String, required: String },

    #[error("Project {project} does not support the Node {major}.x branch (old or missing N-API)")]
    UnsupportedBranch { project: String, major: u32 },

    #[error(
        "Project {project} requires Node >= {required} in the Node {major}.x branch (with N-API >= {napi})"
    )]
    NapiTooOld {
        project: String,
        required: String,
        major: u32,
        napi: u32,
    },
}

/// Version constraints declared by a project
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompatibilityRequirement {
    pub min_runtime: Option<String>,
    pub min_napi: Option<u32>,
}

/// Minimum runtime version on `major` that provides Node-API level `napi`.
///
/// Returns `None` when the level is unknown or the release line never got it.
/// Release lines newer than the matrix are assumed to support every known
/// level from their first release.
///
/// # Examples
///
/// ```
/// use addonkit::compat::required_version;
///
/// assert_eq!(required_version(8, 12).as_deref(), Some("12.22.0"));
/// assert_eq!(required_version(8, 20).as_deref(), Some("20.0.0"));
/// assert_eq!(required_version(9, 20), None);
/// ```
#[must_use]
pub fn required_version(napi: u32, major: u32) -> Option<String> {
    if napi > MAX_NAPI_VERSION {
        return None;
    }

    let newest = NAPI_SUPPORT.iter().map(|(line, _)| *line).max().unwrap_or(0);
    if major > newest {
        return Some(format!("{major}.0.0"));
    }

    let (_, versions) = NAPI_SUPPORT.iter().find(|(line, _)| *line == major)?;
    let index = usize::try_from(napi).ok()?.checked_sub(1)?;
    versions.get(index).map(|v| (*v).to_string())
}

/// Compare two dotted versions numerically, ignoring prerelease suffixes.
///
/// Missing trailing components count as zero, so "16" equals "16.0.0".
///
/// # Examples
///
/// ```
/// use addonkit::compat::compare_versions;
/// use std::cmp::Ordering;
///
/// assert_eq!(compare_versions("10.16.0", "10.15.9"), Ordering::Greater);
/// assert_eq!(compare_versions("9.1.0-rc1", "9.1.0"), Ordering::Equal);
/// ```
#[must_use]
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let left = version_components(a);
    let right = version_components(b);
    let len = left.len().max(right.len());

    (0..len)
        .map(|i| {
            let l = left.get(i).copied().unwrap_or(0);
            let r = right.get(i).copied().unwrap_or(0);
            l.cmp(&r)
        })
        .find(|ord| ord.is_ne())
        .unwrap_or(Ordering::Equal)
}

fn version_components(version: &str) -> Vec<u64> {
    let version = version.trim();
    let version = version.strip_prefix('v').unwrap_or(version);
    let release = version.split('-').next().unwrap_or_default();

    release
        .split('.')
        .map(|component| {
            let digits: String = component.chars().take_while(char::is_ascii_digit).collect();
            digits.parse().unwrap_or(0)
        })
        .collect()
}

/// Major release line of a version string ("18.19.0" -> 18)
#[must_use]
pub fn major_version(version: &str) -> u32 {
    version_components(version)
        .first()
        .and_then(|major| u32::try_from(*major).ok())
        .unwrap_or(0)
}

/// Check a runtime version against a project's requirements.
pub fn check_compatibility(
    requirement: &CompatibilityRequirement,
    runtime_version: &str,
    project: &str,
) -> Result<(), CompatError> {
    if let Some(min) = &requirement.min_runtime
        && compare_versions(runtime_version, min).is_lt()
    {
        return Err(CompatError::RuntimeTooOld {
            project: project.to_string(),
            required: min.clone(),
        });
    }

    if let Some(napi) = requirement.min_napi {
        let major = major_version(runtime_version);
        let Some(required) = required_version(napi, major) else {
            return Err(CompatError::UnsupportedBranch {
                project: project.to_string(),
                major,
            });
        };

        if compare_versions(runtime_version, &required).is_lt() {
            return Err(CompatError::NapiTooOld {
                project: project.to_string(),
                required,
                major,
                napi,
            });
        }
    }

    Ok(())
}
