use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

pub const REGISTRY_VERSION: u32 = 1;

/// Persisted record of one installed port: exactly which files it owns,
/// which runtimes it needs, and when it was placed on the device.
///
/// The uninstaller removes only the files listed here, never a directory
/// wholesale, so unrelated files sharing the ports directory survive.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InstalledPortRecord {
    pub name: String,
    /// Paths relative to the ports directory.
    pub files: Vec<String>,
    /// Directories the archive declared explicitly, relative to the ports
    /// directory; pruned at uninstall even when no recorded file lived in
    /// them.
    #[serde(default)]
    pub dirs: Vec<String>,
    #[serde(default)]
    pub sha256: Option<String>,
    #[serde(default)]
    pub runtimes: Vec<String>,
    pub installed_at: String,
    pub updated_at: String,
}

/// On-disk shape of the install registry (`installed.json`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RegistryDocument {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub ports: IndexMap<String, InstalledPortRecord>,
}

impl Default for RegistryDocument {
    fn default() -> Self {
        Self {
            version: REGISTRY_VERSION,
            ports: IndexMap::new(),
        }
    }
}

fn default_version() -> u32 {
    REGISTRY_VERSION
}

impl RegistryDocument {
    /// Parses a registry document, rejecting versions newer than this build
    /// understands.
    ///
    /// # Errors
    /// Returns an error on malformed JSON or an unsupported version field.
    pub fn parse(contents: &str) -> serde_json::Result<Self> {
        let doc: Self = serde_json::from_str(contents)?;
        if doc.version > REGISTRY_VERSION {
            return Err(serde::de::Error::custom(format!(
                "unsupported registry version {}",
                doc.version
            )));
        }
        Ok(doc)
    }

    /// Serializes the document for persistence.
    ///
    /// # Errors
    /// Returns an error if serialization fails.
    pub fn to_string_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_json() {
        let mut doc = RegistryDocument::default();
        doc.ports.insert(
            "demo.zip".into(),
            InstalledPortRecord {
                name: "demo.zip".into(),
                files: vec!["demo/run.sh".into()],
                dirs: vec!["demo/saves".into()],
                sha256: Some("cafebabe".into()),
                runtimes: vec!["godot_3.4.4".into()],
                installed_at: "2026-01-01T00:00:00Z".into(),
                updated_at: "2026-01-01T00:00:00Z".into(),
            },
        );
        let text = doc.to_string_pretty().unwrap();
        let parsed = RegistryDocument::parse(&text).unwrap();
        assert_eq!(parsed.ports, doc.ports);
    }

    #[test]
    fn rejects_future_versions() {
        let err = RegistryDocument::parse(r#"{"version": 99, "ports": {}}"#).unwrap_err();
        assert!(err.to_string().contains("unsupported registry version"));
    }

    #[test]
    fn empty_document_defaults() {
        let doc = RegistryDocument::parse("{}").unwrap();
        assert_eq!(doc.version, REGISTRY_VERSION);
        assert!(doc.ports.is_empty());
    }
}
