use indexmap::IndexMap;
use portdeck_domain::{info_attrs, InstallStatus, PortRecord, RuntimeEntry};

use crate::registry::InstallRegistry;
use crate::source::Source;
use std::path::Path;

/// Aggregated, read-only view of one port as exposed to presentation
/// layers: the winning source's record annotated with live install status.
#[derive(Clone, Debug)]
pub struct PortView {
    pub record: PortRecord,
    pub source: String,
    pub priority: i64,
    pub status: InstallStatus,
}

impl PortView {
    /// Filterable tokens for this port (status, tags, runtime names).
    #[must_use]
    pub fn attrs(&self) -> Vec<String> {
        info_attrs(&self.record, self.status)
    }
}

/// Decides whether candidate `a` beats `b` for the same port name: lower
/// priority number wins, ties fall to the most recently updated record.
fn beats(a: (i64, Option<&str>), b: (i64, Option<&str>)) -> bool {
    if a.0 != b.0 {
        return a.0 < b.0;
    }
    a.1 > b.1
}

/// Merges every source's catalog into one namespace, resolving name
/// collisions by source priority.
pub(crate) fn aggregate(sources: &[Source]) -> IndexMap<String, (String, i64, PortRecord)> {
    let mut merged: IndexMap<String, (String, i64, PortRecord)> = IndexMap::new();
    for source in sources {
        for record in source.ports() {
            let candidate = (source.prefix().to_string(), source.priority(), record);
            match merged.get(&candidate.2.name) {
                Some(existing)
                    if !beats(
                        (candidate.1, candidate.2.date_updated.as_deref()),
                        (existing.1, existing.2.date_updated.as_deref()),
                    ) => {}
                _ => {
                    merged.insert(candidate.2.name.clone(), candidate);
                }
            }
        }
    }
    merged
}

/// Resolves one port name to its winning record, optionally pinned to a
/// single source prefix (`*` and `None` both mean "any source").
pub(crate) fn select_port(
    sources: &[Source],
    name: &str,
    prefix: Option<&str>,
) -> Option<(String, i64, PortRecord)> {
    let mut best: Option<(String, i64, PortRecord)> = None;
    for source in sources {
        if let Some(wanted) = prefix {
            if wanted != "*" && !source.prefix().eq_ignore_ascii_case(wanted) {
                continue;
            }
        }
        let Some(record) = source.port(name) else {
            continue;
        };
        let replace = match &best {
            Some(existing) => beats(
                (source.priority(), record.date_updated.as_deref()),
                (existing.1, existing.2.date_updated.as_deref()),
            ),
            None => true,
        };
        if replace {
            best = Some((source.prefix().to_string(), source.priority(), record));
        }
    }
    best
}

/// Best-priority runtime offer across every source's runtime catalog.
pub(crate) fn best_runtime_offer(sources: &[Source], name: &str) -> Option<(String, RuntimeEntry)> {
    let mut best: Option<(String, i64, RuntimeEntry)> = None;
    for source in sources {
        let Some(entry) = source.runtime(name) else {
            continue;
        };
        let replace = best
            .as_ref()
            .is_none_or(|existing| source.priority() < existing.1);
        if replace {
            best = Some((source.prefix().to_string(), source.priority(), entry));
        }
    }
    best.map(|(prefix, _, entry)| (prefix, entry))
}

/// Union of all sources' ports plus unrecognized on-disk directories, each
/// annotated with live install status and filtered with AND semantics over
/// [`PortView::attrs`] (case-insensitive). Empty `filters` returns all.
#[must_use]
pub fn list_ports(
    sources: &[Source],
    registry: &InstallRegistry,
    ports_dir: &Path,
    filters: &[String],
) -> Vec<PortView> {
    let mut views: Vec<PortView> = aggregate(sources)
        .into_iter()
        .map(|(name, (source, priority, record))| PortView {
            status: registry.classify(&name, ports_dir),
            record,
            source,
            priority,
        })
        .collect();

    let known: Vec<String> = views.iter().map(|view| view.record.name.clone()).collect();
    for (name, status) in registry.status_map(ports_dir) {
        if known.iter().any(|existing| *existing == name) {
            continue;
        }
        views.push(PortView {
            record: placeholder_record(&name),
            source: "local".into(),
            priority: i64::MAX,
            status,
        });
    }

    if filters.is_empty() {
        return views;
    }
    let wanted: Vec<String> = filters.iter().map(|f| f.to_lowercase()).collect();
    views.retain(|view| {
        let attrs = view.attrs();
        wanted.iter().all(|token| attrs.contains(token))
    });
    views
}

/// Synthetic record for a port present on disk but absent from every
/// catalog and from the install registry.
fn placeholder_record(name: &str) -> PortRecord {
    PortRecord {
        name: name.to_string(),
        title: String::new(),
        description: String::new(),
        tags: Vec::new(),
        runtimes: Vec::new(),
        url: String::new(),
        size: 0,
        sha256: None,
        date_added: None,
        date_updated: None,
    }
}
