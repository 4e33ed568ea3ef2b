//! Patch orchestration
//!
//! A run walks through a fixed sequence of phases:
//!
//! ```text
//! Idle -> ContextBuilt -> ResolversWired -> Applying -> Cleanup -> Done
//!                                              |           ^
//!                                              +-> Failed -+
//! ```
//!
//! Cleanup releases every package handle and module buffer registered
//! during discovery, whether the run succeeded or not.

use crate::config::{DEFAULT_RESOLVE_DEPTH, SideloaderConfig};
use crate::engine::{PatchContext, PatchEngine};
use crate::enumerator::{EnumerationStats, ModSources};
use crate::registry::{CleanupReport, ResourceRegistry};
use crate::resolver::{DependencyResolver, SearchRoots};
use crate::target::TargetAssembly;
use crate::{Error, Result};
use std::fmt;

/// Phase of a patch run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PatchPhase {
    /// No run started
    #[default]
    Idle,
    /// The engine built a context for the target
    ContextBuilt,
    /// Search roots registered with the context and the target
    ResolversWired,
    /// Modules are being applied
    Applying,
    /// Discovery resources are being released
    Cleanup,
    /// The run completed
    Done,
    /// The run stopped on an error
    Failed,
}

impl fmt::Display for PatchPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PatchPhase::Idle => "idle",
            PatchPhase::ContextBuilt => "context built",
            PatchPhase::ResolversWired => "resolvers wired",
            PatchPhase::Applying => "applying",
            PatchPhase::Cleanup => "cleanup",
            PatchPhase::Done => "done",
            PatchPhase::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Outcome of a successful patch run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatchReport {
    /// File name of the patched assembly
    pub target: String,
    /// Modules applied, in order
    pub modules_applied: usize,
    /// Discovery counters
    pub sources: EnumerationStats,
    /// What cleanup released
    pub cleanup: CleanupReport,
    /// The run was skipped because setup had failed
    pub skipped: bool,
}

impl PatchReport {
    /// Report for a run that never started
    pub fn skipped<S: Into<String>>(target: S) -> Self {
        Self {
            target: target.into(),
            skipped: true,
            ..Default::default()
        }
    }
}

/// Drives a patch engine over the discovered modules
#[derive(Debug, Clone)]
pub struct Patcher {
    roots: SearchRoots,
    max_depth: usize,
    phase: PatchPhase,
    last_cleanup: Option<CleanupReport>,
}

impl Patcher {
    /// Create a patcher resolving dependencies from `roots`
    pub fn new(roots: SearchRoots) -> Self {
        Self {
            roots,
            max_depth: DEFAULT_RESOLVE_DEPTH,
            phase: PatchPhase::Idle,
            last_cleanup: None,
        }
    }

    /// Create a patcher from the resolve settings of `config`
    pub fn from_config(config: &SideloaderConfig) -> Self {
        Self::new(config.resolve_directories.iter().cloned().collect())
            .with_max_depth(config.max_resolve_depth)
    }

    /// Set the depth bound of the dependency resolver
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Search roots in priority order
    pub fn roots(&self) -> &SearchRoots {
        &self.roots
    }

    /// Phase reached by the last run
    pub fn phase(&self) -> PatchPhase {
        self.phase
    }

    /// What the last run's cleanup released
    pub fn last_cleanup(&self) -> Option<CleanupReport> {
        self.last_cleanup
    }

    /// Apply every module of `sources` to `target`
    ///
    /// A context failure aborts before any source is opened. An application
    /// failure stops the run. In both cases the registry is drained before
    /// the error is returned.
    pub fn run<E: PatchEngine>(
        &mut self,
        engine: &mut E,
        target: &mut TargetAssembly,
        sources: &ModSources,
        registry: &mut ResourceRegistry,
    ) -> Result<PatchReport> {
        self.phase = PatchPhase::Idle;
        self.last_cleanup = None;
        log::info!("Patching {}", target.file_name());

        let outcome = self.apply_all(engine, target, sources, registry);
        if outcome.is_err() {
            self.transition(PatchPhase::Failed);
        }

        self.transition(PatchPhase::Cleanup);
        let cleanup = registry.release_all();
        self.last_cleanup = Some(cleanup);

        match outcome {
            Ok((modules_applied, stats)) => {
                self.transition(PatchPhase::Done);
                log::info!(
                    "Applied {} patch modules to {} ({} sources loaded, {} failed)",
                    modules_applied,
                    target.file_name(),
                    stats.sources_loaded,
                    stats.sources_failed
                );
                Ok(PatchReport {
                    target: target.file_name().to_string(),
                    modules_applied,
                    sources: stats,
                    cleanup,
                    skipped: false,
                })
            }
            Err(err) => {
                self.transition(PatchPhase::Failed);
                Err(err)
            }
        }
    }

    fn apply_all<E: PatchEngine>(
        &mut self,
        engine: &mut E,
        target: &mut TargetAssembly,
        sources: &ModSources,
        registry: &mut ResourceRegistry,
    ) -> Result<(usize, EnumerationStats)> {
        let mut context = engine
            .create_context(target)
            .map_err(|source| Error::Context {
                target: target.file_name().to_string(),
                source,
            })?;
        self.transition(PatchPhase::ContextBuilt);

        for root in &self.roots {
            context.add_search_directory(root);
            target.add_search_directory(root);
        }
        self.transition(PatchPhase::ResolversWired);

        let resolver = DependencyResolver::new(self.roots.clone()).with_max_depth(self.max_depth);
        self.transition(PatchPhase::Applying);

        let mut modules = sources.modules(registry);
        let mut applied = 0;
        for module in modules.by_ref() {
            context
                .apply(target, &module, &resolver)
                .map_err(|source| Error::Patch {
                    module: module.origin().to_string(),
                    source,
                })?;
            log::debug!("Applied {}", module.origin());
            applied += 1;
        }

        Ok((applied, modules.stats()))
    }

    fn transition(&mut self, phase: PatchPhase) {
        log::debug!("Patch phase {} -> {}", self.phase, phase);
        self.phase = phase;
    }
}
