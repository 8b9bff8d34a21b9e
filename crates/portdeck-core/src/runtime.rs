use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Condvar, Mutex};

use anyhow::Result;
use portdeck_domain::EngineError;

use crate::callback::Callback;
use crate::catalog;
use crate::fetch;
use crate::source::Source;

/// Resolves shared runtime blobs: answers from the local runtime store when
/// possible, otherwise fetches from the best-priority source offering the
/// runtime. Concurrent requests for the same name coalesce into a single
/// download; waiters observe the first caller's outcome.
///
/// Downloads land in the staging directory and move into the store only
/// after checksum verification, so `is_present` never answers true for an
/// unverified blob.
pub struct RuntimeResolver {
    store_dir: PathBuf,
    staging_dir: PathBuf,
    inflight: Mutex<HashMap<String, Arc<Flight>>>,
}

/// Shared completion slot for one in-flight runtime fetch. The result is a
/// plain string error so every waiter can clone it.
struct Flight {
    outcome: Mutex<Option<Result<(), String>>>,
    done: Condvar,
}

/// One row of the runtime administration listing.
#[derive(Clone, Debug)]
pub struct RuntimeView {
    pub name: String,
    pub present: bool,
    pub size: u64,
    pub source: String,
}

impl RuntimeResolver {
    #[must_use]
    pub fn new(store_dir: PathBuf, staging_dir: PathBuf) -> Self {
        Self {
            store_dir,
            staging_dir,
            inflight: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn is_present(&self, name: &str) -> bool {
        self.store_dir.join(name).exists()
    }

    /// Size a port install would additionally download for `name`, zero when
    /// the runtime is already in the store.
    #[must_use]
    pub fn pending_size(&self, sources: &[Source], name: &str) -> u64 {
        if self.is_present(name) {
            return 0;
        }
        catalog::best_runtime_offer(sources, name).map_or(0, |(_, entry)| entry.size)
    }

    /// Ensures `name` exists in the runtime store, fetching and verifying it
    /// when missing. Idempotent and cheap for present runtimes.
    ///
    /// # Errors
    /// [`EngineError::RuntimeUnavailable`] when no source offers the runtime
    /// or the fetch fails; the store is left without a partial blob.
    pub fn check_runtime(
        &self,
        sources: &[Source],
        name: &str,
        callback: &dyn Callback,
    ) -> Result<()> {
        if self.is_present(name) {
            return Ok(());
        }

        let (flight, leader) = self.join_flight(name);
        if !leader {
            return wait_for(&flight, name);
        }

        let outcome = self
            .fetch_runtime(sources, name, callback)
            .map_err(|err| format!("{err:#}"));
        {
            let mut slot = flight.outcome.lock().expect("flight lock poisoned");
            *slot = Some(outcome.clone());
        }
        flight.done.notify_all();
        self.inflight
            .lock()
            .expect("inflight lock poisoned")
            .remove(name);

        outcome.map_err(|reason| {
            tracing::warn!(runtime = name, %reason, "runtime fetch failed");
            EngineError::RuntimeUnavailable(name.to_string()).into()
        })
    }

    /// Registers interest in `name`; the boolean is true for the caller that
    /// must perform the fetch.
    fn join_flight(&self, name: &str) -> (Arc<Flight>, bool) {
        let mut inflight = self.inflight.lock().expect("inflight lock poisoned");
        if let Some(flight) = inflight.get(name) {
            return (Arc::clone(flight), false);
        }
        let flight = Arc::new(Flight {
            outcome: Mutex::new(None),
            done: Condvar::new(),
        });
        inflight.insert(name.to_string(), Arc::clone(&flight));
        (flight, true)
    }

    fn fetch_runtime(
        &self,
        sources: &[Source],
        name: &str,
        callback: &dyn Callback,
    ) -> Result<()> {
        let Some((prefix, entry)) = catalog::best_runtime_offer(sources, name) else {
            return Err(EngineError::RuntimeUnavailable(name.to_string()).into());
        };
        callback.message(&format!("Fetching runtime {name} from {prefix}"));

        let staged = self.staging_dir.join(name);
        let size_hint = (entry.size > 0).then_some(entry.size);
        let fetched = fetch::download_file(&entry.url, &staged, name, size_hint, callback)?;

        if let Some(expected) = entry.sha256.as_deref() {
            if fetched.sha256 != expected {
                let _ = fs::remove_file(&staged);
                return Err(EngineError::ChecksumMismatch {
                    name: name.to_string(),
                    expected: expected.to_string(),
                    actual: fetched.sha256,
                }
                .into());
            }
        }
        fs::rename(&staged, self.store_dir.join(name))
            .map_err(|err| EngineError::Filesystem(err.to_string()))?;
        tracing::info!(runtime = name, bytes = fetched.size, "runtime placed in store");
        Ok(())
    }

    /// Lists every runtime known to any source, plus blobs already in the
    /// store that no source currently offers.
    #[must_use]
    pub fn runtime_list(&self, sources: &[Source]) -> Vec<RuntimeView> {
        let mut views: Vec<RuntimeView> = Vec::new();
        for source in sources {
            for name in source.runtime_names() {
                if views.iter().any(|view| view.name == name) {
                    continue;
                }
                let Some((prefix, entry)) = catalog::best_runtime_offer(sources, &name) else {
                    continue;
                };
                views.push(RuntimeView {
                    present: self.is_present(&name),
                    size: entry.size,
                    source: prefix,
                    name,
                });
            }
        }

        if let Ok(entries) = fs::read_dir(&self.store_dir) {
            for entry in entries.flatten() {
                let name = entry.file_name().to_string_lossy().to_string();
                if views.iter().any(|view| view.name == name) {
                    continue;
                }
                let size = entry.metadata().map(|meta| meta.len()).unwrap_or(0);
                views.push(RuntimeView {
                    name,
                    present: true,
                    size,
                    source: "local".into(),
                });
            }
        }
        views
    }
}

fn wait_for(flight: &Arc<Flight>, name: &str) -> Result<()> {
    let mut slot = flight.outcome.lock().expect("flight lock poisoned");
    while slot.is_none() {
        slot = flight.done.wait(slot).expect("flight lock poisoned");
    }
    match slot.as_ref().expect("outcome present") {
        Ok(()) => Ok(()),
        Err(reason) => {
            tracing::debug!(runtime = name, %reason, "waited on failed runtime fetch");
            Err(EngineError::RuntimeUnavailable(name.to_string()).into())
        }
    }
}
