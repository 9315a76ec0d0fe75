// ─────────────────────────────────────────────────────────────────────────────
//  fbuild :: archiver  —  bundle objects into a static archive
// ─────────────────────────────────────────────────────────────────────────────

use std::path::{Path, PathBuf};
use std::process::Command;
use std::thread;
use std::time::Duration;

use crate::error::{FbuildError, Result};

const EXISTENCE_POLL_ATTEMPTS: u32 = 5;
const EXISTENCE_POLL_DELAY: Duration = Duration::from_millis(40);

/// Run `archiver` with insert/replace + create-if-absent + symbol-index
/// semantics (`rcs`) over `objects`, producing `archive_path`.
pub fn create(archiver: &Path, archive_path: &Path, objects: &[PathBuf]) -> Result<()> {
    if objects.is_empty() {
        return Err(FbuildError::Archive {
            reason: "no object files given".to_string(),
            stdout: String::new(),
            stderr: String::new(),
        });
    }

    if let Some(parent) = archive_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let output = Command::new(archiver)
        .arg("rcs")
        .arg(archive_path)
        .args(objects)
        .output()
        .map_err(|e| FbuildError::Archive {
            reason: format!("failed to invoke archiver: {e}"),
            stdout: String::new(),
            stderr: String::new(),
        })?;

    if !output.status.success() {
        return Err(FbuildError::Archive {
            reason: format!("archiver exited with status {}", output.status),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }

    for attempt in 0..EXISTENCE_POLL_ATTEMPTS {
        if archive_path.exists() {
            return Ok(());
        }
        if attempt + 1 < EXISTENCE_POLL_ATTEMPTS {
            thread::sleep(EXISTENCE_POLL_DELAY);
        }
    }

    Err(FbuildError::ArchiveNotCreated(archive_path.to_path_buf()))
}
