//! Common test utilities and fixtures

#![allow(dead_code)]

use clr_image::{AssemblyImage, AssemblyReference, ImageBuilder};
use sideloader::{
    AssemblyResolver, EngineError, PatchContext, PatchEngine, PatchModule, TargetAssembly,
};
use log::{Level, LevelFilter, Log, Metadata, Record};
use std::cell::RefCell;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::{Mutex, Once};
use std::thread::{self, ThreadId};
use tempfile::TempDir;
use zip::write::SimpleFileOptions;

static CAPTURED: Mutex<Vec<CapturedRecord>> = Mutex::new(Vec::new());

struct CapturedRecord {
    thread: ThreadId,
    level: Level,
    message: String,
}

/// Forwards to `env_logger` and keeps every record for later inspection
struct CapturingLogger {
    inner: env_logger::Logger,
}

impl Log for CapturingLogger {
    fn enabled(&self, _metadata: &Metadata<'_>) -> bool {
        true
    }

    fn log(&self, record: &Record<'_>) {
        if let Ok(mut captured) = CAPTURED.lock() {
            captured.push(CapturedRecord {
                thread: thread::current().id(),
                level: record.level(),
                message: record.args().to_string(),
            });
        }
        self.inner.log(record);
    }

    fn flush(&self) {
        self.inner.flush();
    }
}

/// Initialize test logging once
///
/// Records are also captured; see [`captured_logs`].
pub fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let inner = env_logger::Builder::from_default_env().is_test(true).build();
        let logger = Box::leak(Box::new(CapturingLogger { inner }));
        if log::set_logger(logger).is_ok() {
            log::set_max_level(LevelFilter::Trace);
        }
    });
}

/// Messages logged at `level` by the current test's thread
pub fn captured_logs(level: Level) -> Vec<String> {
    let current = thread::current().id();
    CAPTURED
        .lock()
        .expect("Log capture poisoned")
        .iter()
        .filter(|record| record.thread == current && record.level == level)
        .map(|record| record.message.clone())
        .collect()
}

/// Create a temporary directory for tests
pub fn temp_dir() -> TempDir {
    tempfile::tempdir().expect("Failed to create temp dir")
}

/// Write a file, creating parent directories
pub fn write_file(path: &Path, content: &[u8]) -> PathBuf {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("Failed to create parent dir");
    }
    fs::write(path, content).expect("Failed to write test file");
    path.to_path_buf()
}

/// Write a ZIP package; names ending in `/` become directory entries
pub fn write_package(path: &Path, entries: &[(&str, &[u8])]) -> PathBuf {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("Failed to create parent dir");
    }
    let file = File::create(path).expect("Failed to create package");
    let mut writer = zip::ZipWriter::new(file);
    for (name, data) in entries {
        if name.ends_with('/') {
            writer
                .add_directory(*name, SimpleFileOptions::default())
                .expect("Failed to add directory");
        } else {
            writer
                .start_file(*name, SimpleFileOptions::default())
                .expect("Failed to start entry");
            writer.write_all(data).expect("Failed to write entry");
        }
    }
    writer.finish().expect("Failed to finish package");
    path.to_path_buf()
}

/// Write a managed image declaring `declared` at `path`
pub fn write_assembly(path: &Path, declared: &str) -> PathBuf {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("Failed to create parent dir");
    }
    ImageBuilder::new(declared)
        .write_to(path)
        .expect("Failed to write assembly");
    path.to_path_buf()
}

/// Build a patch module image that references `dependencies`
pub fn patch_module_image(name: &str, dependencies: &[&str]) -> Vec<u8> {
    dependencies
        .iter()
        .fold(ImageBuilder::new(name), |builder, dep| {
            builder.reference(AssemblyReference::new(*dep))
        })
        .build()
        .expect("Failed to build module image")
}

/// In-memory `Assembly-CSharp.dll`
pub fn target_assembly() -> TargetAssembly {
    let data = ImageBuilder::new("Assembly-CSharp")
        .build()
        .expect("Failed to build target");
    TargetAssembly::from_bytes("Assembly-CSharp.dll", data).expect("Failed to load target")
}

/// What the fake engine observed for one applied module
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Applied {
    /// Module file name
    pub module: String,
    /// Each reference with the path it resolved to
    pub resolved: Vec<(String, Option<PathBuf>)>,
}

/// Everything the fake engine observed during a run
#[derive(Debug, Default)]
pub struct EngineLog {
    /// Search directories registered with contexts
    pub search_directories: Vec<PathBuf>,
    /// Modules applied so far
    pub applied: Vec<Applied>,
    /// Contexts created
    pub contexts: usize,
}

/// Patch engine that reads each module's references and resolves them
/// through the fallback resolver
#[derive(Debug, Default)]
pub struct FakeEngine {
    /// Fail context creation
    pub fail_context: bool,
    /// Fail when applying a module with this file name
    pub fail_on: Option<String>,
    /// Shared observation log
    pub log: Rc<RefCell<EngineLog>>,
}

impl FakeEngine {
    /// Engine failing on the module named `file_name`
    pub fn failing_on(file_name: &str) -> Self {
        Self {
            fail_on: Some(file_name.to_string()),
            ..Default::default()
        }
    }

    /// File names of the applied modules, in order
    pub fn applied_names(&self) -> Vec<String> {
        self.log
            .borrow()
            .applied
            .iter()
            .map(|applied| applied.module.clone())
            .collect()
    }
}

/// Context handed out by [`FakeEngine`]
#[derive(Debug)]
pub struct FakeContext {
    fail_on: Option<String>,
    log: Rc<RefCell<EngineLog>>,
}

impl PatchEngine for FakeEngine {
    type Context = FakeContext;

    fn create_context(&mut self, _target: &TargetAssembly) -> Result<FakeContext, EngineError> {
        if self.fail_context {
            return Err("target assembly is locked".into());
        }
        self.log.borrow_mut().contexts += 1;
        Ok(FakeContext {
            fail_on: self.fail_on.clone(),
            log: Rc::clone(&self.log),
        })
    }
}

impl PatchContext for FakeContext {
    fn add_search_directory(&mut self, dir: &Path) {
        self.log
            .borrow_mut()
            .search_directories
            .push(dir.to_path_buf());
    }

    fn apply(
        &mut self,
        _target: &mut TargetAssembly,
        module: &PatchModule,
        resolver: &dyn AssemblyResolver,
    ) -> Result<(), EngineError> {
        let name = module.origin().file_name().to_string();
        if self.fail_on.as_deref() == Some(name.as_str()) {
            return Err(format!("cannot apply {name}").into());
        }

        let mut resolved = Vec::new();
        if let Ok(mut image) = AssemblyImage::from_bytes(module.data().as_ref()) {
            for reference in image.references()? {
                let path = resolver.resolve(&reference).map(|found| found.path);
                resolved.push((reference.name, path));
            }
        }

        self.log.borrow_mut().applied.push(Applied {
            module: name,
            resolved,
        });
        Ok(())
    }
}
