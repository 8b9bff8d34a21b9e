use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::Result;
use portdeck_domain::{EngineError, InstallStatus};

use crate::callback::Callback;
use crate::registry::InstallRegistry;

/// Outcome of an uninstall, for presentation layers.
#[derive(Clone, Debug)]
pub struct UninstallReport {
    pub name: String,
    pub removed: usize,
    pub missing: usize,
}

/// Removes exactly the files recorded at install time, then unregisters the
/// port. Broken ports are handled best-effort: files already gone are
/// logged, never an error. Shared runtime blobs are never touched; another
/// installed port might still need them.
pub(crate) fn uninstall_port(
    ports_dir: &Path,
    registry: &mut InstallRegistry,
    name: &str,
    callback: &dyn Callback,
) -> Result<UninstallReport> {
    let Some(record) = registry.record(name).cloned() else {
        return Err(EngineError::PortNotFound(name.to_string()).into());
    };
    let status = registry.classify(name, ports_dir);
    callback.message(&format!("Uninstalling {name}"));

    let mut removed = 0_usize;
    let mut missing = 0_usize;
    for file in &record.files {
        let path = ports_dir.join(file);
        match fs::remove_file(&path) {
            Ok(()) => removed += 1,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                missing += 1;
                if status == InstallStatus::Broken {
                    tracing::warn!(port = name, file, "recorded file already missing");
                } else {
                    tracing::warn!(port = name, file, "file vanished since last classification");
                }
            }
            Err(err) => {
                return Err(EngineError::Filesystem(format!(
                    "unable to remove {}: {err}",
                    path.display()
                ))
                .into());
            }
        }
    }

    prune_empty_dirs(ports_dir, &record.files, &record.dirs);
    registry.remove(name)?;
    tracing::info!(port = name, removed, missing, "uninstall complete");
    callback.message(&format!("Uninstalled {name}"));

    Ok(UninstallReport {
        name: name.to_string(),
        removed,
        missing,
    })
}

/// Removes the directories the recorded files lived in plus the directories
/// the archive declared outright, deepest first, stopping at any directory
/// that still has contents (unknown files survive).
fn prune_empty_dirs(ports_dir: &Path, files: &[String], recorded_dirs: &[String]) {
    let mut dirs: BTreeSet<PathBuf> = BTreeSet::new();
    for file in files {
        collect_ancestors(&mut dirs, Path::new(file).parent());
    }
    for dir in recorded_dirs {
        collect_ancestors(&mut dirs, Some(Path::new(dir)));
    }
    for dir in dirs.iter().rev() {
        // remove_dir refuses non-empty directories, which is the point.
        let _ = fs::remove_dir(ports_dir.join(dir));
    }
}

fn collect_ancestors(dirs: &mut BTreeSet<PathBuf>, start: Option<&Path>) {
    let mut current = start;
    while let Some(dir) = current {
        if !dir.as_os_str().is_empty() {
            dirs.insert(dir.to_path_buf());
        }
        current = dir.parent();
    }
}
