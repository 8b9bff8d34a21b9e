#![deny(clippy::all, warnings)]

mod error;
mod port;
mod registry;

pub use crate::error::EngineError;
pub use crate::port::{
    info_attrs, InstallStatus, PortRecord, RuntimeEntry, SourceIndex, PORT_ARCHIVE_SUFFIX,
};
pub use crate::registry::{InstalledPortRecord, RegistryDocument, REGISTRY_VERSION};
