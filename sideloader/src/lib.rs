//! # sideloader - Patch Module Discovery and Assembly Patching
//!
//! Finds MonoMod-style patch modules in a mods directory and feeds them to a
//! patch engine that rewrites the game's assemblies before they load.
//!
//! ## Mods directory layout
//!
//! ```text
//! BepInEx/Mods/
//! ├── SomeMod/                 folder, scanned recursively
//! │   └── patches/Fix.mm.dll
//! └── OtherMod.h3mod           package (ZIP), read entry by entry
//! ```
//!
//! Folders are read before packages. A folder or package that cannot be
//! read is logged and skipped; the rest still load.
//!
//! ## Patching
//!
//! The IL rewriting itself is done by an external engine implementing
//! [`PatchEngine`]. The [`Patcher`] builds a context for the target, wires
//! the resolve directories into it, applies every module in order and always
//! releases the package handles and buffers discovery opened. References
//! the engine cannot resolve are looked up by the [`DependencyResolver`].
//!
//! ## Examples
//!
//! ```no_run
//! use sideloader::{HostLayout, Sideloader, TargetAssembly, DEFAULT_MODS_FOLDER};
//! # use sideloader::{AssemblyResolver, EngineError, PatchContext, PatchEngine, PatchModule};
//! # use std::path::Path;
//! # struct MonoMod;
//! # struct Ctx;
//! # impl PatchEngine for MonoMod {
//! #     type Context = Ctx;
//! #     fn create_context(&mut self, _: &TargetAssembly) -> Result<Ctx, EngineError> { Ok(Ctx) }
//! # }
//! # impl PatchContext for Ctx {
//! #     fn add_search_directory(&mut self, _: &Path) {}
//! #     fn apply(&mut self, _: &mut TargetAssembly, _: &PatchModule, _: &dyn AssemblyResolver)
//! #         -> Result<(), EngineError> { Ok(()) }
//! # }
//!
//! # fn main() -> Result<(), sideloader::Error> {
//! let layout = HostLayout::new("H3VR/BepInEx", "H3VR/h3vr_Data/Managed");
//! let mut sideloader = Sideloader::initialize(layout.config(DEFAULT_MODS_FOLDER));
//!
//! let mut target = TargetAssembly::load("H3VR/h3vr_Data/Managed/Assembly-CSharp.dll")?;
//! let report = sideloader.patch(&mut MonoMod, &mut target)?;
//! println!("applied {} modules", report.modules_applied);
//! # Ok(())
//! # }
//! ```

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub mod archive;
pub mod config;
pub mod engine;
pub mod enumerator;
pub mod error;
pub mod module;
pub mod patcher;
pub mod registry;
pub mod resolver;
pub mod scanner;
pub mod target;

pub use config::{
    DEFAULT_MODS_FOLDER, DEFAULT_PACKAGE_EXTENSIONS, DEFAULT_PATCH_SUFFIX, DEFAULT_RESOLVE_DEPTH,
    DEFAULT_TARGET_ASSEMBLIES, HostLayout, SideloaderConfig,
};
pub use engine::{PatchContext, PatchEngine};
pub use enumerator::{EnumerationStats, ModSource, ModSources, PatchModules};
pub use error::{EngineError, Error, Result};
pub use module::{ModuleOrigin, PatchModule, SourceKind};
pub use patcher::{PatchPhase, PatchReport, Patcher};
pub use registry::{CleanupReport, HandleId, ResourceRegistry};
pub use resolver::{AssemblyResolver, DependencyResolver, ResolvedAssembly, SearchRoots};
pub use scanner::scan_patch_files;
pub use target::TargetAssembly;

pub use clr_image::{AssemblyIdentity, AssemblyReference, Version};

/// Entry point used by the host
///
/// Initialization never fails outright. If the configuration is invalid or
/// the mods directory cannot be prepared, the error is logged once and kept
/// in [`Sideloader::setup_error`]; the sideloader then offers no modules and
/// [`Sideloader::patch`] leaves targets untouched.
#[derive(Debug)]
pub struct Sideloader {
    config: SideloaderConfig,
    sources: ModSources,
    registry: ResourceRegistry,
    patcher: Patcher,
    setup_error: Option<Error>,
}

impl Sideloader {
    /// Prepare the mods directory and list its sources
    pub fn initialize(config: SideloaderConfig) -> Self {
        let discovered = config
            .validate()
            .and_then(|()| ModSources::discover(&config));

        let (sources, setup_error) = match discovered {
            Ok(sources) => {
                log::info!(
                    "Found {} mod sources in {}",
                    sources.len(),
                    sources.mods_dir().display()
                );
                (sources, None)
            }
            Err(err) => {
                log::error!("Failed to set up sideloader: {err}");
                (ModSources::empty(&config), Some(err))
            }
        };

        Self {
            patcher: Patcher::from_config(&config),
            config,
            sources,
            registry: ResourceRegistry::new(),
            setup_error,
        }
    }

    /// Configuration in use
    pub fn config(&self) -> &SideloaderConfig {
        &self.config
    }

    /// Error that prevented setup, if any
    pub fn setup_error(&self) -> Option<&Error> {
        self.setup_error.as_ref()
    }

    /// Sources found at initialization
    pub fn sources(&self) -> &ModSources {
        &self.sources
    }

    /// Lazy sequence of every patch module
    ///
    /// Resources opened while it is pulled stay registered until the next
    /// [`Sideloader::patch`] or [`Sideloader::release`].
    pub fn modules(&mut self) -> PatchModules<'_> {
        self.sources.modules(&mut self.registry)
    }

    /// Release everything opened through [`Sideloader::modules`]
    pub fn release(&mut self) -> CleanupReport {
        self.registry.release_all()
    }

    /// File names of the assemblies the host should hand over
    pub fn target_assemblies(&self) -> &[String] {
        &self.config.target_assemblies
    }

    /// Whether `file_name` is a target assembly (ASCII case-insensitive)
    pub fn is_target(&self, file_name: &str) -> bool {
        self.config.is_target(file_name)
    }

    /// Orchestrator state of the last patch run
    pub fn patcher(&self) -> &Patcher {
        &self.patcher
    }

    /// Apply every discovered patch module to `target`
    pub fn patch<E: PatchEngine>(
        &mut self,
        engine: &mut E,
        target: &mut TargetAssembly,
    ) -> Result<PatchReport> {
        if self.setup_error.is_some() {
            log::debug!("Skipping {}, sideloader setup failed", target.file_name());
            return Ok(PatchReport::skipped(target.file_name()));
        }

        self.patcher
            .run(engine, target, &self.sources, &mut self.registry)
    }
}
