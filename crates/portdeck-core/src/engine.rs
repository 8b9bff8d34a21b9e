use anyhow::Result;
use portdeck_domain::EngineError;

use crate::callback::Callback;
use crate::catalog::{self, PortView};
use crate::config::{self, EngineConfig};
use crate::install::{self, InstallReport};
use crate::registry::InstallRegistry;
use crate::runtime::{RuntimeResolver, RuntimeView};
use crate::source::Source;
use crate::uninstall::{self, UninstallReport};

/// Engine context: the source registry, install registry, and runtime
/// resolver behind every operation. Passed explicitly; no process-global
/// state.
pub struct Engine {
    config: EngineConfig,
    sources: Vec<Source>,
    registry: InstallRegistry,
    runtimes: RuntimeResolver,
}

impl Engine {
    /// Builds the engine from its configuration: creates the directory
    /// layout, loads source declarations and each source's cached catalog,
    /// and reads the install registry.
    ///
    /// # Errors
    /// Returns an error when the layout cannot be created or persistent
    /// state is unreadable.
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.ensure_layout()?;
        let specs = config::load_source_specs(&config.sources_path)?;
        let mut sources: Vec<Source> = specs
            .into_iter()
            .map(|spec| Source::load(spec, &config.cache_dir))
            .collect();
        sources.sort_by_key(Source::priority);
        let registry = InstallRegistry::load(&config.registry_path)?;
        let runtimes = RuntimeResolver::new(config.runtimes_dir.clone(), config.temp_dir.clone());
        Ok(Self {
            config,
            sources,
            registry,
            runtimes,
        })
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub fn sources(&self) -> &[Source] {
        &self.sources
    }

    /// Refreshes every source, or just the one named by `only`. Per-source
    /// failures are reported through the callback and the log; the refresh
    /// continues with the remaining sources. Returns how many succeeded.
    ///
    /// # Errors
    /// Returns [`EngineError::PortNotFound`]-style errors only for an
    /// unknown `only` prefix; network failures are never fatal here.
    pub fn update_sources(&mut self, only: Option<&str>, callback: &dyn Callback) -> Result<usize> {
        if self.config.offline {
            callback.message("Offline mode: skipping source refresh");
            return Ok(0);
        }
        if let Some(prefix) = only {
            if !self
                .sources
                .iter()
                .any(|source| source.prefix().eq_ignore_ascii_case(prefix))
            {
                return Err(EngineError::SourceUnreachable {
                    prefix: prefix.to_string(),
                    reason: "no such source is configured".into(),
                }
                .into());
            }
        }

        let mut updated = 0;
        for source in &mut self.sources {
            if let Some(prefix) = only {
                if !source.prefix().eq_ignore_ascii_case(prefix) {
                    continue;
                }
            }
            match source.update(callback) {
                Ok(()) => updated += 1,
                Err(err) => {
                    tracing::warn!(source = source.prefix(), err = %format!("{err:#}"), "source refresh failed");
                    callback.message(&format!("{err:#}"));
                }
            }
        }
        Ok(updated)
    }

    /// Cheap freshness pass over every source; stale ones refresh, failures
    /// degrade to the cached catalog.
    pub fn auto_update_sources(&mut self, callback: &dyn Callback) {
        let offline = self.config.offline;
        let staleness = self.config.staleness;
        for source in &mut self.sources {
            source.auto_update(offline, staleness, callback);
        }
    }

    /// Aggregated listing with live install status; see
    /// [`catalog::list_ports`] for filter semantics.
    #[must_use]
    pub fn list_ports(&self, filters: &[String]) -> Vec<PortView> {
        catalog::list_ports(
            &self.sources,
            &self.registry,
            &self.config.ports_dir,
            filters,
        )
    }

    /// Resolves one port to its winning source record plus live status.
    ///
    /// # Errors
    /// [`EngineError::PortNotFound`] when no source offers the name.
    pub fn port_info(&self, name: &str) -> Result<PortView> {
        let (source, priority, record) = catalog::select_port(&self.sources, name, None)
            .ok_or_else(|| EngineError::PortNotFound(name.to_string()))?;
        Ok(PortView {
            status: self.registry.classify(name, &self.config.ports_dir),
            record,
            source,
            priority,
        })
    }

    /// Concrete download URL for the winning record of `name`.
    ///
    /// # Errors
    /// [`EngineError::PortNotFound`] when no source offers the name.
    pub fn port_download_url(&self, name: &str) -> Result<String> {
        Ok(self.port_info(name)?.record.url)
    }

    /// Advertised download size; with `check_runtime` the total also counts
    /// every required runtime not yet in the local store, so callers can
    /// present a true cost before committing.
    ///
    /// # Errors
    /// [`EngineError::PortNotFound`] when no source offers the name.
    pub fn port_download_size(&self, name: &str, check_runtime: bool) -> Result<u64> {
        let view = self.port_info(name)?;
        let mut total = view.record.size;
        if check_runtime {
            for runtime in &view.record.runtimes {
                total += self.runtimes.pending_size(&self.sources, runtime);
            }
        }
        Ok(total)
    }

    /// Installs one port (name, `source/name`, URL, or local archive path).
    ///
    /// # Errors
    /// See the [`EngineError`] taxonomy; failures never affect other
    /// installed ports.
    pub fn install_port(&mut self, target: &str, callback: &dyn Callback) -> Result<InstallReport> {
        install::install_port(
            &self.config,
            &self.sources,
            &mut self.registry,
            &self.runtimes,
            target,
            callback,
        )
    }

    /// Uninstalls a registered (installed or broken) port.
    ///
    /// # Errors
    /// [`EngineError::PortNotFound`] for unregistered ports, filesystem
    /// errors when recorded files cannot be removed.
    pub fn uninstall_port(
        &mut self,
        name: &str,
        callback: &dyn Callback,
    ) -> Result<UninstallReport> {
        uninstall::uninstall_port(&self.config.ports_dir, &mut self.registry, name, callback)
    }

    /// Ensures a runtime blob is present in the local store.
    ///
    /// # Errors
    /// [`EngineError::RuntimeUnavailable`] when it cannot be satisfied.
    pub fn check_runtime(&self, name: &str, callback: &dyn Callback) -> Result<()> {
        self.runtimes.check_runtime(&self.sources, name, callback)
    }

    /// Administration listing of every known runtime blob.
    #[must_use]
    pub fn runtime_list(&self) -> Vec<RuntimeView> {
        self.runtimes.runtime_list(&self.sources)
    }

    /// Re-reads cached catalogs and the install registry from disk,
    /// dropping any in-memory state.
    ///
    /// # Errors
    /// Returns an error when persistent state became unreadable.
    pub fn reload(&mut self) -> Result<()> {
        let specs = config::load_source_specs(&self.config.sources_path)?;
        let mut sources: Vec<Source> = specs
            .into_iter()
            .map(|spec| Source::load(spec, &self.config.cache_dir))
            .collect();
        sources.sort_by_key(Source::priority);
        self.sources = sources;
        self.registry = InstallRegistry::load(&self.config.registry_path)?;
        tracing::debug!("engine state reloaded from disk");
        Ok(())
    }
}
