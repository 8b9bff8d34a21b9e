use std::collections::HashMap;
use std::env;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use dirs_next::home_dir;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

/// Default `auto_update` staleness threshold. Overridable through
/// `PORTDECK_STALE_SECS` or by mutating [`EngineConfig::staleness`].
pub const DEFAULT_STALENESS: Duration = Duration::from_secs(6 * 60 * 60);

#[derive(Debug, Clone)]
pub(crate) struct EnvSnapshot {
    vars: HashMap<String, String>,
}

impl EnvSnapshot {
    pub(crate) fn capture() -> Self {
        Self {
            vars: env::vars().collect(),
        }
    }

    pub(crate) fn flag_is_enabled(&self, key: &str) -> bool {
        matches!(self.vars.get(key).map(String::as_str), Some("1"))
    }

    pub(crate) fn var(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    #[cfg(test)]
    pub(crate) fn testing(pairs: &[(&str, &str)]) -> Self {
        let vars = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Self { vars }
    }
}

/// Declaration of one remote repository in `sources.json`.
///
/// Lower `priority` wins when two sources publish the same port name.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SourceSpec {
    pub prefix: String,
    pub priority: i64,
    pub index_url: String,
}

/// Path layout and policy for one engine instance. Every component receives
/// this explicitly; there is no process-global state.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub root: PathBuf,
    pub ports_dir: PathBuf,
    pub runtimes_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub temp_dir: PathBuf,
    pub registry_path: PathBuf,
    pub sources_path: PathBuf,
    pub offline: bool,
    pub staleness: Duration,
}

impl EngineConfig {
    /// Builds a configuration from the current process environment.
    ///
    /// # Errors
    /// Returns an error if no usable root directory can be determined.
    pub fn from_env() -> Result<Self> {
        Self::from_snapshot(&EnvSnapshot::capture())
    }

    pub(crate) fn from_snapshot(snapshot: &EnvSnapshot) -> Result<Self> {
        let root = match snapshot.var("PORTDECK_HOME") {
            Some(value) if !value.is_empty() => absolutize(PathBuf::from(value))?,
            _ => default_root(snapshot)?,
        };
        let staleness = snapshot
            .var("PORTDECK_STALE_SECS")
            .and_then(|value| value.parse::<u64>().ok())
            .map_or(DEFAULT_STALENESS, Duration::from_secs);

        let mut config = Self::at_root(root);
        config.offline = snapshot.flag_is_enabled("PORTDECK_OFFLINE");
        config.staleness = staleness;
        Ok(config)
    }

    /// Derives the standard layout beneath `root`.
    #[must_use]
    pub fn at_root(root: PathBuf) -> Self {
        Self {
            ports_dir: root.join("ports"),
            runtimes_dir: root.join("runtimes"),
            cache_dir: root.join("cache"),
            temp_dir: root.join("tmp"),
            registry_path: root.join("installed.json"),
            sources_path: root.join("sources.json"),
            root,
            offline: false,
            staleness: DEFAULT_STALENESS,
        }
    }

    /// Creates every directory the engine writes under.
    ///
    /// # Errors
    /// Returns an error if a directory cannot be created.
    pub fn ensure_layout(&self) -> Result<()> {
        for dir in [
            &self.root,
            &self.ports_dir,
            &self.runtimes_dir,
            &self.cache_dir,
            &self.temp_dir,
        ] {
            fs::create_dir_all(dir)
                .with_context(|| format!("unable to create {}", dir.display()))?;
        }
        Ok(())
    }
}

fn default_root(snapshot: &EnvSnapshot) -> Result<PathBuf> {
    if let Some(xdg) = snapshot.var("XDG_DATA_HOME") {
        if !xdg.is_empty() {
            return Ok(PathBuf::from(xdg).join("portdeck"));
        }
    }
    let home = home_dir().ok_or_else(|| anyhow!("unable to determine home directory"))?;
    Ok(home.join(".local").join("share").join("portdeck"))
}

fn absolutize(path: PathBuf) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path)
    } else {
        Ok(env::current_dir()?.join(path))
    }
}

/// Built-in repositories written out on first run when no `sources.json`
/// exists yet.
#[must_use]
pub fn default_source_specs() -> Vec<SourceSpec> {
    vec![
        SourceSpec {
            prefix: "pm".into(),
            priority: 0,
            index_url: "https://ports.portdeck.example/main/index.json".into(),
        },
        SourceSpec {
            prefix: "klops".into(),
            priority: 10,
            index_url: "https://ports.portdeck.example/community/index.json".into(),
        },
    ]
}

/// Loads the source declarations, seeding the defaults when the file is
/// absent.
///
/// # Errors
/// Returns an error on unreadable or malformed JSON, or when the seed file
/// cannot be written.
pub fn load_source_specs(path: &Path) -> Result<Vec<SourceSpec>> {
    if !path.exists() {
        let specs = default_source_specs();
        write_source_specs(path, &specs)?;
        return Ok(specs);
    }
    let contents = fs::read_to_string(path)
        .with_context(|| format!("unable to read {}", path.display()))?;
    let specs: Vec<SourceSpec> = serde_json::from_str(&contents)
        .with_context(|| format!("malformed source list at {}", path.display()))?;
    Ok(specs)
}

fn write_source_specs(path: &Path, specs: &[SourceSpec]) -> Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)?;
    let mut tmp = NamedTempFile::new_in(parent)?;
    tmp.write_all(serde_json::to_string_pretty(specs)?.as_bytes())?;
    tmp.persist(path)
        .with_context(|| format!("unable to persist {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_overrides_root_offline_and_staleness() -> Result<()> {
        let snapshot = EnvSnapshot::testing(&[
            ("PORTDECK_HOME", "/tmp/deck-root"),
            ("PORTDECK_OFFLINE", "1"),
            ("PORTDECK_STALE_SECS", "120"),
        ]);
        let config = EngineConfig::from_snapshot(&snapshot)?;
        assert_eq!(config.root, PathBuf::from("/tmp/deck-root"));
        assert_eq!(config.ports_dir, PathBuf::from("/tmp/deck-root/ports"));
        assert!(config.offline);
        assert_eq!(config.staleness, Duration::from_secs(120));
        Ok(())
    }

    #[test]
    fn xdg_data_home_is_honored() -> Result<()> {
        let snapshot = EnvSnapshot::testing(&[("XDG_DATA_HOME", "/tmp/xdg")]);
        let config = EngineConfig::from_snapshot(&snapshot)?;
        assert_eq!(config.root, PathBuf::from("/tmp/xdg/portdeck"));
        assert!(!config.offline);
        assert_eq!(config.staleness, DEFAULT_STALENESS);
        Ok(())
    }

    #[test]
    fn load_source_specs_seeds_defaults() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("sources.json");
        let specs = load_source_specs(&path)?;
        assert_eq!(specs, default_source_specs());
        assert!(path.exists(), "seed file should be written");

        let reloaded = load_source_specs(&path)?;
        assert_eq!(reloaded, specs);
        Ok(())
    }

    #[test]
    fn load_source_specs_rejects_malformed_json() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("sources.json");
        fs::write(&path, "not json")?;
        assert!(load_source_specs(&path).is_err());
        Ok(())
    }
}
