//! prefixforge — provisions Proton compatibility prefixes for Windows
//! workloads by driving Steam's own configuration stores.
//!
//! The crate is consumed as a library by separate GUI/CLI front ends;
//! there is no binary target and no network surface. A front end
//! builds a [`config::ProvisionConfig`], scans runtimes with
//! [`catalog::RuntimeCatalog`], and drives a
//! [`session::ProvisioningSession`] through placeholder creation,
//! client restart, runtime initialization, verification, and
//! finalization.

pub mod appid;
pub mod catalog;
pub mod config;
pub mod conflict;
pub mod error;
pub mod session;
pub mod store;

pub use appid::{AppId, AppIdStrategy};
pub use catalog::{RuntimeCatalog, RuntimeDescriptor, RuntimeFamily};
pub use config::{CatalogConfig, ProvisionConfig, SessionTuning, SteamPaths};
pub use conflict::{ConflictResolution, ShortcutConflict};
pub use error::{ProvisionError, Result};
pub use session::{
    ClientControl, PlaceholderOutcome, PrefixDirectory, ProvisioningSession, SessionFailure,
    SessionReport, SessionState, SteamProcessControl, WorkloadProfile, WorkloadRequest,
};
pub use store::{ShortcutRecord, ShortcutStore};
