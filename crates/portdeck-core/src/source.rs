use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use portdeck_domain::{EngineError, PortRecord, RuntimeEntry, SourceIndex};
use tempfile::NamedTempFile;

use crate::callback::Callback;
use crate::config::SourceSpec;
use crate::fetch;

/// One remote repository with a locally cached catalog.
///
/// The cache file is the sole persistent state; a failed refresh never
/// touches it, so offline listing keeps working from the last good copy.
pub struct Source {
    spec: SourceSpec,
    cache_path: PathBuf,
    index: SourceIndex,
    /// True when an on-disk cache existed but could not be parsed; the
    /// file's mtime then says nothing about having a usable catalog.
    cache_discarded: bool,
}

impl Source {
    /// Constructs the source from its cached catalog file, starting empty
    /// when the cache is absent or unreadable.
    pub fn load(spec: SourceSpec, cache_dir: &Path) -> Self {
        let cache_path = cache_dir.join(format!("{}.json", spec.prefix));
        let mut cache_discarded = false;
        let index = match fs::read_to_string(&cache_path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(index) => index,
                Err(err) => {
                    tracing::warn!(source = %spec.prefix, %err, "discarding malformed catalog cache");
                    cache_discarded = true;
                    SourceIndex::default()
                }
            },
            Err(_) => SourceIndex::default(),
        };
        Self {
            spec,
            cache_path,
            index,
            cache_discarded,
        }
    }

    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.spec.prefix
    }

    #[must_use]
    pub fn priority(&self) -> i64 {
        self.spec.priority
    }

    /// When the cache file was last replaced, if ever.
    #[must_use]
    pub fn last_refresh(&self) -> Option<SystemTime> {
        fs::metadata(&self.cache_path)
            .and_then(|meta| meta.modified())
            .ok()
    }

    /// Defensive copy of one port record.
    #[must_use]
    pub fn port(&self, name: &str) -> Option<PortRecord> {
        self.index.ports.get(name).cloned()
    }

    /// Defensive copies of every port record, in catalog order.
    #[must_use]
    pub fn ports(&self) -> Vec<PortRecord> {
        self.index.ports.values().cloned().collect()
    }

    /// Defensive copy of one runtime offer.
    #[must_use]
    pub fn runtime(&self, name: &str) -> Option<RuntimeEntry> {
        self.index.runtimes.get(name).cloned()
    }

    /// Names of every runtime this source offers.
    #[must_use]
    pub fn runtime_names(&self) -> Vec<String> {
        self.index.runtimes.keys().cloned().collect()
    }

    /// Fetches the remote index and atomically replaces the in-memory and
    /// on-disk cache. On any failure the previous cache stays intact.
    ///
    /// # Errors
    /// [`EngineError::SourceUnreachable`] on network failure,
    /// [`EngineError::CatalogMalformed`] on an unparsable index.
    pub fn update(&mut self, callback: &dyn Callback) -> Result<()> {
        callback.message(&format!("Updating source {}", self.spec.prefix));
        let body = fetch::fetch_text(&self.spec.index_url).map_err(|err| {
            EngineError::SourceUnreachable {
                prefix: self.spec.prefix.clone(),
                reason: format!("{err:#}"),
            }
        })?;
        let index: SourceIndex =
            serde_json::from_str(&body).map_err(|err| EngineError::CatalogMalformed {
                prefix: self.spec.prefix.clone(),
                reason: err.to_string(),
            })?;

        self.persist(&body)?;
        tracing::info!(
            source = %self.spec.prefix,
            ports = index.ports.len(),
            runtimes = index.runtimes.len(),
            "catalog refreshed"
        );
        self.index = index;
        self.cache_discarded = false;
        Ok(())
    }

    /// Refreshes only when the cache is stale and the engine is online.
    /// A failed refresh degrades to the stale cache: it is reported through
    /// the callback and the log, never returned as an error.
    pub fn auto_update(&mut self, offline: bool, staleness: Duration, callback: &dyn Callback) {
        if offline || self.is_fresh(staleness) {
            return;
        }
        if let Err(err) = self.update(callback) {
            tracing::warn!(source = %self.spec.prefix, err = %format!("{err:#}"), "auto-update failed, keeping cached catalog");
            callback.message(&format!(
                "Source {} unavailable, using cached catalog",
                self.spec.prefix
            ));
        }
    }

    fn is_fresh(&self, staleness: Duration) -> bool {
        if self.cache_discarded {
            return false;
        }
        self.last_refresh()
            .and_then(|stamp| stamp.elapsed().ok())
            .is_some_and(|age| age < staleness)
    }

    fn persist(&self, body: &str) -> Result<()> {
        let parent = self
            .cache_path
            .parent()
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent)?;
        let mut tmp = NamedTempFile::new_in(parent)?;
        tmp.write_all(body.as_bytes())?;
        tmp.persist(&self.cache_path)
            .with_context(|| format!("unable to persist {}", self.cache_path.display()))?;
        Ok(())
    }
}
