// Intended public API surface for `portdeck-core`.
//
// This module exists to keep the crate root small and make it explicit
// which types/functions are part of the stable interface used by the CLI
// and other drivers.

pub use crate::bus::CommandBus;
pub use crate::callback::{Callback, MessageDedup, NullCallback, ProgressHint};
pub use crate::catalog::PortView;
pub use crate::config::{
    default_source_specs, load_source_specs, EngineConfig, SourceSpec, DEFAULT_STALENESS,
};
pub use crate::engine::Engine;
pub use crate::install::InstallReport;
pub use crate::outcome::{outcome_from_error, CommandStatus, ErrorKind, ExecutionOutcome};
pub use crate::registry::InstallRegistry;
pub use crate::runtime::{RuntimeResolver, RuntimeView};
pub use crate::source::Source;
pub use crate::uninstall::UninstallReport;

pub use portdeck_domain::{
    info_attrs, EngineError, InstallStatus, InstalledPortRecord, PortRecord, RegistryDocument,
    RuntimeEntry, SourceIndex,
};
