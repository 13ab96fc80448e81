//! # ModKit - Runtime Module Registry
//!
//! Feature modules of the vulnerability dashboard plug in at runtime:
//!
//! - **Contract**: a module implements [`Module`] and returns a
//!   [`ModuleDefinition`] (routes, middleware, hooks, exports, config)
//! - **Registry**: [`ModuleRegistry`] validates, conflict-checks and stores
//!   entries, runs lifecycle hooks and emits [`RegistryEvent`]s
//! - **Loader**: [`ModuleLoader`] discovers manifests, instantiates modules
//!   through a [`ModuleCatalog`], caches them and reloads on change
//! - **Router integration**: [`RouterIntegration`] mounts each registered
//!   module's routes on an [`HttpSurface`] and injects [`ModuleContext`]
//!
//! ## Example
//!
//! ```rust,ignore
//! let registry = Arc::new(ModuleRegistry::default());
//! let routes = RouterIntegration::attach(&registry, surface, RouterConfig::default());
//!
//! let hello = ModuleDefinition::new("A", "Hello")
//!     .with_route(RouteSpec::get("/hello", handler(|req| async move {
//!         Ok(format!("hi from {}", req.context.module_id))
//!     })));
//! registry.register(hello, RegisterOptions::default()).await?;
//! // GET /modules/A/hello
//! ```

pub use anyhow::Result;
pub use async_trait::async_trait;

pub mod contracts;
pub use contracts::*;

pub mod context;
pub use context::{ConfigProvider, DbHandle, ModuleCtx, ModuleCtxBuilder};

pub mod client_hub;
pub use client_hub::{ClientHub, ClientHubError};

pub mod entry;
pub use entry::{ErrorRecord, ModuleEntry, ModuleRecord, ModuleState, ModuleStatistics};

pub mod error;
pub use error::{
    ConflictKind, HookKind, LoaderError, ModuleConflict, MountError, MountFailure, RegistryError,
    ValidationReport,
};

pub mod events;
pub use events::{ClearFailure, ClearReport, RegistryEvent, RegistryEventKind, RegistryObserver};

pub mod graph;
mod guard;

pub mod problem;
pub use problem::{Problem, ProblemResponse};

pub mod validation;

pub mod registry;
pub use registry::{
    ModuleFilter, ModuleRegistry, RegisterOptions, RegistryConfig, RegistryMetadata,
    RegistryState, RegistryStats, SortKey, SortOrder, UnregisterOptions,
};

pub mod router;
pub use router::{
    HttpSurface, MountRecord, MountedRoute, RouteDocumentation, RouterConfig, RouterIntegration,
};

pub mod loader;
pub use loader::{
    DefinitionSource, DirectorySource, InMemorySettingsStore, InstallReport, LayeredSource,
    LoadFailure, LoadReport, LoadedModule, LoaderConfig, ModuleCatalog, ModuleDescriptor, ModuleFactory,
    ModuleLoader, ModuleManifest, ModuleSettings, ModuleSettingsStore, StaticSource, WatchStatus,
};
