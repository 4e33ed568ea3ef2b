//! A host laid out like an H3VR install with BepInEx

use crate::common::*;
use log::Level;
use pretty_assertions::assert_eq;
use sideloader::{
    DEFAULT_MODS_FOLDER, HostLayout, PatchPhase, Sideloader, SideloaderConfig, SourceKind,
};
use std::path::PathBuf;

struct Game {
    _dir: tempfile::TempDir,
    layout: HostLayout,
}

impl Game {
    fn new() -> Self {
        let dir = temp_dir();
        let layout = HostLayout::new(
            dir.path().join("BepInEx"),
            dir.path().join("h3vr_Data/Managed"),
        );
        Self { _dir: dir, layout }
    }

    fn mods(&self) -> PathBuf {
        self.layout.loader_root.join(DEFAULT_MODS_FOLDER)
    }

    fn sideloader(&self) -> Sideloader {
        Sideloader::initialize(self.layout.config(DEFAULT_MODS_FOLDER))
    }
}

fn module_names(sideloader: &mut Sideloader) -> Vec<String> {
    sideloader
        .modules()
        .map(|m| m.origin().file_name().to_string())
        .collect()
}

#[test]
fn test_loose_module_in_mod_folder() {
    init_logging();
    let game = Game::new();
    write_file(&game.mods().join("ModA/patches/Fix.mm.dll"), b"fix");
    write_file(&game.mods().join("ModA/readme.txt"), b"read me");

    let mut sideloader = game.sideloader();
    let modules: Vec<_> = sideloader.modules().collect();

    assert_eq!(modules.len(), 1);
    assert_eq!(modules[0].kind(), SourceKind::LooseFile);
    assert_eq!(
        modules[0].origin().container(),
        game.mods().join("ModA/patches/Fix.mm.dll")
    );
    assert_eq!(modules[0].data().as_ref(), b"fix");
    assert_eq!(sideloader.release().buffers_released, 1);
}

#[test]
fn test_packaged_module() {
    let game = Game::new();
    write_package(
        &game.mods().join("pack.h3mod"),
        &[
            ("Foo.mm.dll", b"foo"),
            ("Foo.mm.dll.meta", b"meta"),
            ("notes/readme.txt", b"notes"),
        ],
    );

    let mut sideloader = game.sideloader();
    assert_eq!(module_names(&mut sideloader), vec!["Foo.mm.dll"]);
    assert_eq!(sideloader.release().archives_closed, 1);
}

#[test]
fn test_dependency_from_lower_priority_root() {
    let game = Game::new();
    let config = game
        .layout
        .config(DEFAULT_MODS_FOLDER)
        .resolve_directories([game.layout.core_dir(), game.layout.plugins_dir()]);
    write_assembly(&game.layout.core_dir().join("Unrelated.dll"), "Unrelated");
    write_assembly(&game.layout.plugins_dir().join("lib/Dep.dll"), "Dep");
    write_file(
        &game.mods().join("ModA/Uses.mm.dll"),
        &patch_module_image("Uses.mm", &["Dep", "Missing"]),
    );

    let mut sideloader = Sideloader::initialize(config);
    let mut engine = FakeEngine::default();
    let mut target = target_assembly();
    sideloader.patch(&mut engine, &mut target).unwrap();

    let log = engine.log.borrow();
    assert_eq!(
        log.applied[0].resolved,
        vec![
            (
                "Dep".to_string(),
                Some(game.layout.plugins_dir().join("lib/Dep.dll"))
            ),
            ("Missing".to_string(), None),
        ]
    );
    assert_eq!(
        log.search_directories,
        vec![game.layout.core_dir(), game.layout.plugins_dir()]
    );
}

#[test]
fn test_corrupt_package_does_not_block_others() {
    init_logging();
    let game = Game::new();
    write_file(&game.mods().join("broken.h3mod"), b"PK but not really");
    write_package(&game.mods().join("good.h3mod"), &[("Good.mm.dll", b"good")]);

    let mut sideloader = game.sideloader();
    assert_eq!(sideloader.sources().len(), 2);

    let mut engine = FakeEngine::default();
    let mut target = target_assembly();
    let report = sideloader.patch(&mut engine, &mut target).unwrap();

    assert_eq!(engine.applied_names(), vec!["Good.mm.dll"]);
    assert_eq!(report.sources.sources_failed, 1);
    assert_eq!(report.sources.sources_loaded, 1);
    assert_eq!(report.cleanup.archives_closed, 1);
    assert_eq!(sideloader.patcher().phase(), PatchPhase::Done);

    let warnings = captured_logs(Level::Warn);
    assert_eq!(warnings.len(), 1, "{warnings:?}");
    assert!(warnings[0].contains("PackageOpenError"), "{}", warnings[0]);
    assert_eq!(warnings[0].matches("broken.h3mod").count(), 1, "{}", warnings[0]);
    assert!(!warnings[0].contains("good.h3mod"));
}

#[test]
fn test_full_run_with_default_layout() {
    let game = Game::new();
    write_assembly(
        &game.layout.managed_dir.join("UnityEngine.dll"),
        "UnityEngine",
    );
    write_file(
        &game.mods().join("ModA/A.mm.dll"),
        &patch_module_image("A.mm", &["UnityEngine"]),
    );
    write_package(
        &game.mods().join("b.h3mod"),
        &[("B.mm.dll", &patch_module_image("B.mm", &[]))],
    );

    let mut sideloader = game.sideloader();
    assert!(sideloader.setup_error().is_none());
    assert!(game.mods().is_dir());

    let target_path = game.layout.managed_dir.join("Assembly-CSharp.dll");
    write_assembly(&target_path, "Assembly-CSharp");
    let mut target = sideloader::TargetAssembly::load(&target_path).unwrap();
    assert!(sideloader.is_target(target.file_name()));

    let mut engine = FakeEngine::default();
    let report = sideloader.patch(&mut engine, &mut target).unwrap();

    assert_eq!(report.modules_applied, 2);
    assert_eq!(engine.applied_names(), vec!["A.mm.dll", "B.mm.dll"]);
    assert_eq!(
        engine.log.borrow().applied[0].resolved,
        vec![(
            "UnityEngine".to_string(),
            Some(game.layout.managed_dir.join("UnityEngine.dll"))
        )]
    );
    assert_eq!(target.search_directories()[0], game.layout.managed_dir);
    assert_eq!(target.search_directories().len(), 4);
}

#[test]
fn test_mods_root_that_cannot_be_created() {
    let dir = temp_dir();
    let blocker = write_file(&dir.path().join("Mods"), b"file in the way");

    let mut sideloader = Sideloader::initialize(SideloaderConfig::new().mods_dir(&blocker));
    assert!(sideloader.setup_error().is_some());
    assert!(module_names(&mut sideloader).is_empty());

    let mut engine = FakeEngine::default();
    let mut target = target_assembly();
    let report = sideloader.patch(&mut engine, &mut target).unwrap();

    assert!(report.skipped);
    assert_eq!(engine.log.borrow().contexts, 0);
}
