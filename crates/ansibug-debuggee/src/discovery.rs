//! Discovery files let a client find a playbook that is listening for a
//! debugger, without being told the port out of band.

use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub const DISCOVERY_FILE_PREFIX: &str = "ANSIBUG-";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaybookProcessInfo {
    pub pid: u32,
    pub host: String,
    pub port: u16,
    pub is_ipv6: bool,
    pub use_tls: bool,
    pub playbook_file: Option<String>,
}

impl PlaybookProcessInfo {
    pub fn write(&self, path: &Path) -> io::Result<()> {
        let payload = serde_json::to_vec(self)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
        std::fs::write(path, payload)
    }

    pub fn read(path: &Path) -> io::Result<Self> {
        let payload = std::fs::read(path)?;
        serde_json::from_slice(&payload)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))
    }
}

/// `configured`, else `$TMPDIR`, else `/tmp`.
pub fn discovery_dir(configured: Option<&Path>) -> PathBuf {
    if let Some(dir) = configured {
        return dir.to_path_buf();
    }
    std::env::var_os("TMPDIR")
        .filter(|dir| !dir.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/tmp"))
}

pub fn discovery_path(dir: &Path, pid: u32) -> PathBuf {
    dir.join(format!("{DISCOVERY_FILE_PREFIX}{pid}"))
}

/// Every readable discovery file in `dir`. Unreadable entries are skipped.
pub fn list_processes(dir: &Path) -> io::Result<Vec<PlaybookProcessInfo>> {
    let mut processes = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let is_discovery_file = entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.starts_with(DISCOVERY_FILE_PREFIX));
        if !is_discovery_file {
            continue;
        }
        match PlaybookProcessInfo::read(&entry.path()) {
            Ok(info) => processes.push(info),
            Err(err) => tracing::debug!(
                target: "ansibug.debuggee",
                path = %entry.path().display(),
                error = %err,
                "skipping unreadable discovery file"
            ),
        }
    }
    processes.sort_by_key(|info| info.pid);
    Ok(processes)
}

/// Remove a discovery file, treating "already gone" as success.
pub fn remove(path: &Path) -> io::Result<()> {
    match std::fs::remove_file(path) {
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}
