//! External tool detection

use std::io;
use std::process::Stdio;
use tokio::process::Command;

/// Outcome of running a tool to see whether it is usable
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Probe {
    /// Ran and exited successfully
    Present,
    /// Not installed
    Absent,
    /// Installed but broken, or could not be started
    Failed(String),
}

impl Probe {
    #[must_use]
    pub const fn is_present(&self) -> bool {
        matches!(self, Self::Present)
    }
}

/// Run `program args...` with all output discarded.
pub async fn probe_tool(program: &str, args: &[&str]) -> Probe {
    let status = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;

    let probe = match status {
        Ok(status) if status.success() => Probe::Present,
        Ok(status) => Probe::Failed(format!("{program} exited with {status}")),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Probe::Absent,
        Err(e) => Probe::Failed(format!("{program}: {e}")),
    };

    crate::debug!("Probe {program}: {probe:?}");
    probe
}
