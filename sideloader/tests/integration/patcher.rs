//! Orchestration with a fake patch engine

use crate::common::*;
use pretty_assertions::assert_eq;
use sideloader::{
    Error, ModSources, PatchPhase, Patcher, ResourceRegistry, SearchRoots, SideloaderConfig,
};
use std::path::PathBuf;

fn mods_with_package(dir: &std::path::Path) -> ModSources {
    let mods = dir.join("Mods");
    write_file(
        &mods.join("ModA/First.mm.dll"),
        &patch_module_image("First.mm", &["Dep"]),
    );
    write_package(
        &mods.join("pack.h3mod"),
        &[("Second.mm.dll", &patch_module_image("Second.mm", &[]))],
    );
    ModSources::discover(&SideloaderConfig::new().mods_dir(&mods)).unwrap()
}

#[test]
fn test_run_applies_in_order_and_releases() {
    init_logging();
    let dir = temp_dir();
    let sources = mods_with_package(dir.path());
    let shared = dir.path().join("shared");
    write_assembly(&shared.join("lib/Dep.dll"), "Dep");

    let mut engine = FakeEngine::default();
    let mut target = target_assembly();
    let mut registry = ResourceRegistry::new();
    let mut patcher = Patcher::new([shared.clone()].into_iter().collect());

    let report = patcher
        .run(&mut engine, &mut target, &sources, &mut registry)
        .unwrap();

    assert_eq!(engine.applied_names(), vec!["First.mm.dll", "Second.mm.dll"]);
    assert_eq!(
        engine.log.borrow().applied[0].resolved,
        vec![("Dep".to_string(), Some(shared.join("lib/Dep.dll")))]
    );
    assert_eq!(engine.log.borrow().search_directories, vec![shared.clone()]);
    assert_eq!(target.search_directories(), &[shared]);

    assert_eq!(report.modules_applied, 2);
    assert_eq!(report.sources.sources_loaded, 2);
    assert_eq!(report.cleanup.archives_closed, 1);
    assert_eq!(report.cleanup.buffers_released, 2);
    assert_eq!(patcher.phase(), PatchPhase::Done);
    assert_eq!(registry.open_archives(), 0);
    assert_eq!(registry.tracked_buffers(), 0);
}

#[test]
fn test_failed_application_releases_handles() {
    let dir = temp_dir();
    let mods = dir.path().join("Mods");
    write_package(
        &mods.join("a.h3mod"),
        &[("Bad.mm.dll", b"bad"), ("Never.mm.dll", b"never")],
    );
    let sources = ModSources::discover(&SideloaderConfig::new().mods_dir(&mods)).unwrap();

    let mut engine = FakeEngine::failing_on("Bad.mm.dll");
    let mut target = target_assembly();
    let mut registry = ResourceRegistry::new();
    let mut patcher = Patcher::new(SearchRoots::new());

    let err = patcher
        .run(&mut engine, &mut target, &sources, &mut registry)
        .unwrap_err();

    match &err {
        Error::Patch { module, .. } => assert!(module.ends_with("a.h3mod!Bad.mm.dll")),
        other => panic!("unexpected error: {other}"),
    }
    assert!(engine.applied_names().is_empty());
    assert_eq!(patcher.phase(), PatchPhase::Failed);

    let cleanup = patcher.last_cleanup().unwrap();
    assert_eq!(cleanup.archives_closed, 1);
    assert_eq!(registry.registered_archives(), 1);
    assert_eq!(registry.open_archives(), 0);
}

#[test]
fn test_context_failure_opens_nothing() {
    let dir = temp_dir();
    let sources = mods_with_package(dir.path());

    let mut engine = FakeEngine {
        fail_context: true,
        ..Default::default()
    };
    let mut target = target_assembly();
    let mut registry = ResourceRegistry::new();
    let mut patcher = Patcher::new([PathBuf::from("/shared")].into_iter().collect());

    let err = patcher
        .run(&mut engine, &mut target, &sources, &mut registry)
        .unwrap_err();

    assert!(matches!(err, Error::Context { ref target, .. } if target == "Assembly-CSharp.dll"));
    assert_eq!(registry.registered_archives(), 0);
    assert_eq!(engine.log.borrow().contexts, 0);
    assert!(target.search_directories().is_empty());
    assert_eq!(patcher.phase(), PatchPhase::Failed);
}

#[test]
fn test_patcher_is_reusable() {
    let dir = temp_dir();
    let sources = mods_with_package(dir.path());
    let mut registry = ResourceRegistry::new();
    let mut patcher = Patcher::new(SearchRoots::new());

    for _ in 0..2 {
        let mut engine = FakeEngine::default();
        let mut target = target_assembly();
        let report = patcher
            .run(&mut engine, &mut target, &sources, &mut registry)
            .unwrap();
        assert_eq!(report.modules_applied, 2);
        assert_eq!(report.cleanup.archives_closed, 1);
    }
    assert_eq!(registry.registered_archives(), 2);
}
