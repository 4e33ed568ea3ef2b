//! Dependency resolution over ordered search roots

use crate::common::*;
use clr_image::{AssemblyReference, ImageBuilder, ImageKind, Version};
use pretty_assertions::assert_eq;
use sideloader::{AssemblyResolver, DependencyResolver, SearchRoots};

fn resolver(roots: &[&std::path::Path]) -> DependencyResolver {
    DependencyResolver::new(roots.iter().copied().collect())
}

#[test]
fn test_first_root_wins() {
    init_logging();
    let dir = temp_dir();
    let a = dir.path().join("A");
    let b = dir.path().join("B");
    write_assembly(&b.join("Dep.dll"), "Dep");
    write_assembly(&a.join("deep/er/Dep.dll"), "Dep");

    let found = resolver(&[&a, &b])
        .resolve(&AssemblyReference::new("Dep"))
        .unwrap();
    assert_eq!(found.path, a.join("deep/er/Dep.dll"));

    let found = resolver(&[&b, &a])
        .resolve(&AssemblyReference::new("Dep"))
        .unwrap();
    assert_eq!(found.path, b.join("Dep.dll"));
}

#[test]
fn test_declared_identity_decides_not_file_name() {
    let dir = temp_dir();
    let priv_root = dir.path().join("priv");
    let shared = dir.path().join("shared");
    write_assembly(&priv_root.join("Dep.dll"), "SomethingElse");
    write_file(&priv_root.join("bin/Dep.dll"), b"MZ but nothing else");
    write_assembly(&shared.join("lib/Dep.dll"), "Dep");

    let mut found = resolver(&[&priv_root, &shared])
        .resolve(&AssemblyReference::new("Dep"))
        .unwrap();
    assert_eq!(found.path, shared.join("lib/Dep.dll"));
    assert_eq!(found.image.identity().unwrap().name, "Dep");
}

#[test]
fn test_executables_are_candidates() {
    let dir = temp_dir();
    let path = dir.path().join("tools/Tool.exe");
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    ImageBuilder::new("Tool")
        .kind(ImageKind::Executable)
        .version(Version::new(3, 0, 0, 0))
        .write_to(&path)
        .unwrap();

    let reference = AssemblyReference::new("Tool").with_version(Version::new(1, 0, 0, 0));
    let mut found = resolver(&[dir.path()]).resolve(&reference).unwrap();
    assert_eq!(found.path, path);
    // only the name is compared
    assert_eq!(
        found.image.identity().unwrap().version,
        Version::new(3, 0, 0, 0)
    );
}

#[test]
fn test_nothing_found() {
    let dir = temp_dir();
    write_assembly(&dir.path().join("Other.dll"), "Other");

    let empty = DependencyResolver::new(SearchRoots::new());
    assert!(empty.resolve(&AssemblyReference::new("Dep")).is_none());
    assert!(
        resolver(&[dir.path()])
            .resolve(&AssemblyReference::new("Dep"))
            .is_none()
    );
}

#[test]
fn test_fresh_expansion_per_request() {
    let dir = temp_dir();
    let resolver = resolver(&[dir.path()]);
    let reference = AssemblyReference::new("Late");
    assert!(resolver.resolve(&reference).is_none());

    write_assembly(&dir.path().join("added/later/Late.dll"), "Late");
    assert!(resolver.resolve(&reference).is_some());
}
