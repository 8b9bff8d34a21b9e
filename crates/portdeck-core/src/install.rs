use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use portdeck_domain::{EngineError, InstalledPortRecord, PortRecord, PORT_ARCHIVE_SUFFIX};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use zip::ZipArchive;

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

use crate::callback::Callback;
use crate::catalog;
use crate::config::EngineConfig;
use crate::fetch;
use crate::registry::InstallRegistry;
use crate::runtime::RuntimeResolver;
use crate::source::Source;

/// Outcome of a successful install, for presentation layers.
#[derive(Clone, Debug)]
pub struct InstallReport {
    pub name: String,
    pub source: Option<String>,
    pub files: usize,
    pub bytes_fetched: u64,
    pub runtimes: Vec<String>,
}

/// How the install argument was interpreted.
enum InstallTarget {
    /// `name`, `source/name`, or `*/name`.
    Named { source: Option<String>, name: String },
    /// A direct, sourceless URL.
    Url(String),
    /// A local archive; fetch and checksum verification are skipped.
    LocalArchive(PathBuf),
}

fn parse_target(raw: &str) -> InstallTarget {
    if raw.starts_with("http://") || raw.starts_with("https://") {
        return InstallTarget::Url(raw.to_string());
    }
    let as_path = Path::new(raw);
    if as_path.is_file() {
        return InstallTarget::LocalArchive(as_path.to_path_buf());
    }
    if let Some((prefix, name)) = raw.split_once('/') {
        let source = if prefix == "*" {
            None
        } else {
            Some(prefix.to_string())
        };
        return InstallTarget::Named {
            source,
            name: name.to_string(),
        };
    }
    InstallTarget::Named {
        source: None,
        name: raw.to_string(),
    }
}

/// Installs one port: resolve, satisfy runtimes, fetch, verify, extract,
/// register. Atomic at the granularity of this port; a failure at any step
/// leaves other ports and the catalog untouched.
pub(crate) fn install_port(
    config: &EngineConfig,
    sources: &[Source],
    registry: &mut InstallRegistry,
    runtimes: &RuntimeResolver,
    target: &str,
    callback: &dyn Callback,
) -> Result<InstallReport> {
    let (record, source, local) = resolve_target(sources, target)?;
    callback.message(&format!("Installing {}", record.name));

    // Prerequisites first: a missing runtime aborts before any port bytes
    // are committed.
    for runtime in &record.runtimes {
        runtimes
            .check_runtime(sources, runtime, callback)
            .map_err(|err| {
                tracing::warn!(port = %record.name, runtime, "aborting install, runtime unavailable");
                err
            })?;
    }

    let (archive, bytes_fetched, downloaded) = match &local {
        Some(path) => (path.clone(), 0, false),
        None => {
            let dest = config.temp_dir.join(&record.name);
            let size_hint = (record.size > 0).then_some(record.size);
            let fetched =
                fetch::download_file(&record.url, &dest, &record.name, size_hint, callback)?;
            if let Some(expected) = record.sha256.as_deref() {
                if fetched.sha256 != expected {
                    let _ = fs::remove_file(&dest);
                    return Err(EngineError::ChecksumMismatch {
                        name: record.name.clone(),
                        expected: expected.to_string(),
                        actual: fetched.sha256,
                    }
                    .into());
                }
            }
            (dest, fetched.size, true)
        }
    };

    callback.progress(None, 0, None, crate::callback::ProgressHint::None);
    callback.message(&format!("Extracting {}", record.name));
    let (files, dirs) = extract_archive(&archive, &config.ports_dir, record.install_dir())?;

    let now = now_stamp()?;
    let installed_at = registry
        .record(&record.name)
        .map_or_else(|| now.clone(), |prior| prior.installed_at.clone());
    let checksum = if downloaded {
        record.sha256.clone()
    } else {
        Some(fetch::compute_sha256(&archive)?)
    };
    registry.upsert(InstalledPortRecord {
        name: record.name.clone(),
        files: files.clone(),
        dirs,
        sha256: checksum,
        runtimes: record.runtimes.clone(),
        installed_at,
        updated_at: now,
    })?;

    if downloaded {
        let _ = fs::remove_file(&archive);
    }
    tracing::info!(port = %record.name, files = files.len(), "install complete");
    callback.message(&format!("Installed {}", record.name));

    Ok(InstallReport {
        name: record.name,
        source,
        files: files.len(),
        bytes_fetched,
        runtimes: record.runtimes,
    })
}

fn resolve_target(
    sources: &[Source],
    target: &str,
) -> Result<(PortRecord, Option<String>, Option<PathBuf>)> {
    match parse_target(target) {
        InstallTarget::Named { source, name } => {
            let (prefix, _, record) = catalog::select_port(sources, &name, source.as_deref())
                .ok_or_else(|| EngineError::PortNotFound(name.clone()))?;
            Ok((record, Some(prefix), None))
        }
        InstallTarget::Url(url) => {
            let name = url
                .rsplit('/')
                .next()
                .filter(|segment| !segment.is_empty())
                .unwrap_or("download.zip")
                .to_string();
            Ok((synthetic_record(&name, &url), None, None))
        }
        InstallTarget::LocalArchive(path) => {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .ok_or_else(|| EngineError::PortNotFound(target.to_string()))?;
            Ok((synthetic_record(&name, ""), None, Some(path)))
        }
    }
}

/// Record for a sourceless install (direct URL or local archive): no
/// declared runtimes, no advertised checksum.
fn synthetic_record(name: &str, url: &str) -> PortRecord {
    PortRecord {
        name: name.to_string(),
        title: name.trim_end_matches(PORT_ARCHIVE_SUFFIX).to_string(),
        description: String::new(),
        tags: Vec::new(),
        runtimes: Vec::new(),
        url: url.to_string(),
        size: 0,
        sha256: None,
        date_added: None,
        date_updated: None,
    }
}

/// Unpacks `archive` into `ports_dir/<install_dir>`, removing any previous
/// directory of that name first so re-installs never merge stale files.
/// Returns the produced file and directory paths relative to the ports
/// directory.
fn extract_archive(
    archive: &Path,
    ports_dir: &Path,
    install_dir: &str,
) -> Result<(Vec<String>, Vec<String>)> {
    let target_root = ports_dir.join(install_dir);
    if target_root.exists() {
        fs::remove_dir_all(&target_root)
            .map_err(|err| EngineError::Filesystem(err.to_string()))?;
    }

    match unpack(archive, install_dir, &target_root) {
        Ok(produced) => Ok(produced),
        Err(err) => {
            let _ = fs::remove_dir_all(&target_root);
            Err(EngineError::ExtractFailed {
                name: install_dir.to_string(),
                reason: format!("{err:#}"),
            }
            .into())
        }
    }
}

fn unpack(
    archive: &Path,
    install_dir: &str,
    target_root: &Path,
) -> Result<(Vec<String>, Vec<String>)> {
    let file = File::open(archive).with_context(|| format!("unable to open {}", archive.display()))?;
    let mut zip = ZipArchive::new(file)?;

    // Archives that already wrap their payload in `<install_dir>/` are
    // unwrapped so the payload never nests twice.
    let wrapper = format!("{install_dir}/");
    let strip_wrapper = zip.len() > 0 && zip.file_names().all(|name| name.starts_with(&wrapper));

    fs::create_dir_all(target_root)?;
    let mut files = Vec::new();
    let mut dirs = Vec::new();
    for i in 0..zip.len() {
        let mut entry = zip.by_index(i)?;
        let Some(enclosed) = entry.enclosed_name().map(Path::to_path_buf) else {
            continue;
        };
        let relative = if strip_wrapper {
            match enclosed.strip_prefix(install_dir) {
                Ok(stripped) if stripped.as_os_str().is_empty() => continue,
                Ok(stripped) => stripped.to_path_buf(),
                Err(_) => enclosed,
            }
        } else {
            enclosed
        };
        let dest = target_root.join(&relative);
        if entry.is_dir() {
            fs::create_dir_all(&dest)?;
            dirs.push(
                Path::new(install_dir)
                    .join(&relative)
                    .to_string_lossy()
                    .to_string(),
            );
            continue;
        }
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&dest)?;
        io::copy(&mut entry, &mut out)?;
        #[cfg(unix)]
        {
            if let Some(mode) = entry.unix_mode() {
                fs::set_permissions(&dest, fs::Permissions::from_mode(mode))?;
            }
        }
        files.push(
            Path::new(install_dir)
                .join(&relative)
                .to_string_lossy()
                .to_string(),
        );
    }
    files.sort();
    dirs.sort();
    Ok((files, dirs))
}

fn now_stamp() -> Result<String> {
    Ok(OffsetDateTime::now_utc().format(&Rfc3339)?)
}
