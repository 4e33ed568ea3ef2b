//! Interface to the external patch engine
//!
//! The sideloader does not rewrite IL itself. A [`PatchEngine`] builds a
//! [`PatchContext`] for the target assembly, and the context applies patch
//! modules to it one at a time. References the context cannot resolve are
//! looked up through the resolver passed to each [`PatchContext::apply`]
//! call, which is only valid for the duration of that call.

use crate::error::EngineError;
use crate::module::PatchModule;
use crate::resolver::AssemblyResolver;
use crate::target::TargetAssembly;
use std::path::Path;

/// Factory for patch application contexts
pub trait PatchEngine {
    /// Context type produced by this engine
    type Context: PatchContext;

    /// Build a context scoped to `target`
    fn create_context(&mut self, target: &TargetAssembly) -> Result<Self::Context, EngineError>;
}

/// A patch application session for one target assembly
pub trait PatchContext {
    /// Add a directory to the context's own dependency search path
    fn add_search_directory(&mut self, dir: &Path);

    /// Apply `module` to `target`, falling back to `resolver` for
    /// references the context cannot resolve
    fn apply(
        &mut self,
        target: &mut TargetAssembly,
        module: &PatchModule,
        resolver: &dyn AssemblyResolver,
    ) -> Result<(), EngineError>;
}
