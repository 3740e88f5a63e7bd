//! Common test utilities and helpers
//!
//! This module provides shared functionality used across integration tests:
//! - Binary path resolution (via `get_addonkit_binary`)
//! - Project, archive and fake `CMake` fixtures (via `helpers`)

pub(crate) mod helpers;

// Re-export get_addonkit_binary for convenient access
#[allow(unused_imports)]
pub(crate) use helpers::get_addonkit_binary;
