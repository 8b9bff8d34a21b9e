use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use indexmap::IndexMap;
use portdeck_domain::{InstallStatus, InstalledPortRecord, RegistryDocument, PORT_ARCHIVE_SUFFIX};
use tempfile::NamedTempFile;

/// Persisted mapping of installed port name to the files it owns, plus the
/// classification logic that combines it with a scan of the ports
/// directory. The single source of truth for installed/broken/unknown.
pub struct InstallRegistry {
    path: PathBuf,
    doc: RegistryDocument,
}

impl InstallRegistry {
    /// Loads the registry, starting empty when the file does not exist yet.
    ///
    /// # Errors
    /// Returns an error when an existing registry file cannot be read or
    /// parsed; a corrupt registry is surfaced rather than silently dropped.
    pub fn load(path: &Path) -> Result<Self> {
        let doc = if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("unable to read {}", path.display()))?;
            RegistryDocument::parse(&contents)
                .with_context(|| format!("malformed install registry at {}", path.display()))?
        } else {
            RegistryDocument::default()
        };
        Ok(Self {
            path: path.to_path_buf(),
            doc,
        })
    }

    #[must_use]
    pub fn record(&self, name: &str) -> Option<&InstalledPortRecord> {
        self.doc.ports.get(name)
    }

    #[must_use]
    pub fn records(&self) -> impl Iterator<Item = &InstalledPortRecord> {
        self.doc.ports.values()
    }

    /// Inserts or replaces a record and persists the registry atomically.
    ///
    /// # Errors
    /// Returns an error if the registry file cannot be written.
    pub fn upsert(&mut self, record: InstalledPortRecord) -> Result<()> {
        self.doc.ports.insert(record.name.clone(), record);
        self.persist()
    }

    /// Removes a record and persists, returning the removed entry.
    ///
    /// # Errors
    /// Returns an error if the registry file cannot be written.
    pub fn remove(&mut self, name: &str) -> Result<Option<InstalledPortRecord>> {
        let removed = self.doc.ports.shift_remove(name);
        if removed.is_some() {
            self.persist()?;
        }
        Ok(removed)
    }

    /// Classifies one port against the registry and the on-disk state.
    #[must_use]
    pub fn classify(&self, name: &str, ports_dir: &Path) -> InstallStatus {
        if let Some(record) = self.doc.ports.get(name) {
            let complete = record
                .files
                .iter()
                .all(|file| ports_dir.join(file).exists());
            if complete {
                InstallStatus::Installed
            } else {
                InstallStatus::Broken
            }
        } else if ports_dir.join(install_dir_of(name)).exists() {
            InstallStatus::Unknown
        } else {
            InstallStatus::NotInstalled
        }
    }

    /// Status of every registered port plus every unrecognized directory
    /// found in the ports directory (keyed by its derived archive name).
    #[must_use]
    pub fn status_map(&self, ports_dir: &Path) -> IndexMap<String, InstallStatus> {
        let mut statuses: IndexMap<String, InstallStatus> = self
            .doc
            .ports
            .keys()
            .map(|name| (name.clone(), self.classify(name, ports_dir)))
            .collect();

        let registered_dirs: Vec<String> = self
            .doc
            .ports
            .keys()
            .map(|name| install_dir_of(name).to_string())
            .collect();
        if let Ok(entries) = fs::read_dir(ports_dir) {
            for entry in entries.flatten() {
                let Ok(file_type) = entry.file_type() else {
                    continue;
                };
                if !file_type.is_dir() {
                    continue;
                }
                let dir_name = entry.file_name().to_string_lossy().to_string();
                if registered_dirs.iter().any(|dir| *dir == dir_name) {
                    continue;
                }
                statuses.insert(
                    format!("{dir_name}{PORT_ARCHIVE_SUFFIX}"),
                    InstallStatus::Unknown,
                );
            }
        }
        statuses
    }

    fn persist(&self) -> Result<()> {
        let parent = self.path.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent)?;
        let mut tmp = NamedTempFile::new_in(parent)?;
        tmp.write_all(self.doc.to_string_pretty()?.as_bytes())?;
        tmp.persist(&self.path)
            .with_context(|| format!("unable to persist {}", self.path.display()))?;
        Ok(())
    }
}

fn install_dir_of(name: &str) -> &str {
    name.strip_suffix(PORT_ARCHIVE_SUFFIX).unwrap_or(name)
}
