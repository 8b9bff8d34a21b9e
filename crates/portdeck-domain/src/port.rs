use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Suffix a port archive carries in every source catalog.
pub const PORT_ARCHIVE_SUFFIX: &str = ".zip";

/// Local installation state of a port as classified against the install
/// registry and the on-disk ports directory.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InstallStatus {
    NotInstalled,
    Installed,
    Broken,
    Unknown,
}

impl InstallStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            InstallStatus::NotInstalled => "not-installed",
            InstallStatus::Installed => "installed",
            InstallStatus::Broken => "broken",
            InstallStatus::Unknown => "unknown",
        }
    }

    /// Ports in these states own an install-registry entry.
    #[must_use]
    pub fn is_registered(self) -> bool {
        matches!(self, InstallStatus::Installed | InstallStatus::Broken)
    }
}

/// One catalog entry as published by a source index.
///
/// `name` is the archive file name and is unique within a single source;
/// duplicates across sources are resolved by source priority.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PortRecord {
    pub name: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub runtimes: Vec<String>,
    pub url: String,
    /// Download size in bytes; zero means the source did not advertise one.
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub sha256: Option<String>,
    #[serde(default)]
    pub date_added: Option<String>,
    #[serde(default)]
    pub date_updated: Option<String>,
}

impl PortRecord {
    /// Directory name the archive unpacks into under the ports directory.
    #[must_use]
    pub fn install_dir(&self) -> &str {
        self.name
            .strip_suffix(PORT_ARCHIVE_SUFFIX)
            .unwrap_or(&self.name)
    }
}

/// A shared runtime blob offered by a source. Stored as-is in the runtime
/// store; the file name embeds name, version, and architecture.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RuntimeEntry {
    pub url: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub sha256: Option<String>,
}

/// Wire format of a remote source index, and of the per-source on-disk
/// catalog cache (the two are deliberately identical).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceIndex {
    #[serde(default)]
    pub ports: IndexMap<String, PortRecord>,
    #[serde(default)]
    pub runtimes: IndexMap<String, RuntimeEntry>,
}

/// Filterable tokens for one port: status, tags, and required runtime names,
/// all lowercased. Used both to match filter arguments and to advertise the
/// available filters to presentation layers.
#[must_use]
pub fn info_attrs(record: &PortRecord, status: InstallStatus) -> Vec<String> {
    let mut attrs = Vec::with_capacity(record.tags.len() + record.runtimes.len() + 1);
    attrs.push(status.as_str().to_string());
    for tag in &record.tags {
        attrs.push(tag.to_lowercase());
    }
    for runtime in &record.runtimes {
        attrs.push(runtime.to_lowercase());
    }
    attrs
}
