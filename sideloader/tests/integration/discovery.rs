//! Discovery over mod folders and mod packages

use crate::common::*;
use log::Level;
use pretty_assertions::assert_eq;
use sideloader::{EnumerationStats, ModSources, ResourceRegistry, SideloaderConfig, SourceKind};
use std::fs::{self, File};
use std::io::Write;
use zip::CompressionMethod;
use zip::write::SimpleFileOptions;

fn names(modules: &[sideloader::PatchModule]) -> Vec<String> {
    modules
        .iter()
        .map(|m| m.origin().file_name().to_string())
        .collect()
}

#[test]
fn test_directories_before_packages_with_a_failing_source() {
    init_logging();
    let dir = temp_dir();
    let mods = dir.path().join("Mods");

    write_package(&mods.join("a.h3mod"), &[("PackA.mm.dll", b"pa")]);
    write_file(&mods.join("broken.h3mod"), b"not a zip at all");
    write_file(&mods.join("ModOne/One.mm.dll"), b"one");
    write_package(&mods.join("b.H3MOD"), &[("PackB.mm.dll", b"pb")]);
    write_file(&mods.join("ModTwo/sub/Two.mm.dll"), b"two");

    let config = SideloaderConfig::new().mods_dir(&mods);
    let sources = ModSources::discover(&config).unwrap();
    assert_eq!(sources.len(), 5);

    let mut registry = ResourceRegistry::new();
    let mut iter = sources.modules(&mut registry);
    let modules: Vec<_> = iter.by_ref().collect();
    let stats = iter.stats();

    assert_eq!(modules.len(), 4);
    assert!(modules[..2].iter().all(|m| m.kind() == SourceKind::LooseFile));
    assert!(modules[2..].iter().all(|m| m.kind() == SourceKind::ArchiveEntry));

    let mut loose = names(&modules[..2]);
    loose.sort();
    assert_eq!(loose, vec!["One.mm.dll", "Two.mm.dll"]);
    let mut packed = names(&modules[2..]);
    packed.sort();
    assert_eq!(packed, vec!["PackA.mm.dll", "PackB.mm.dll"]);

    assert_eq!(stats.sources_loaded, 4);
    assert_eq!(stats.sources_failed, 1);
    assert_eq!(stats.modules, 4);

    assert_eq!(registry.open_archives(), 2);
    assert_eq!(registry.tracked_buffers(), 4);
    let cleanup = registry.release_all();
    assert_eq!(cleanup.archives_closed, 2);
    assert_eq!(cleanup.buffers_released, 4);
}

#[test]
fn test_packages_are_opened_only_when_reached() {
    let dir = temp_dir();
    let mods = dir.path().join("Mods");
    write_file(&mods.join("ModA/A.mm.dll"), b"a");
    write_package(&mods.join("pack.h3mod"), &[("P.mm.dll", b"p")]);

    let sources = ModSources::discover(&SideloaderConfig::new().mods_dir(&mods)).unwrap();
    let mut registry = ResourceRegistry::new();
    {
        let mut iter = sources.modules(&mut registry);
        let first = iter.next().unwrap();
        assert_eq!(first.origin().file_name(), "A.mm.dll");
        assert_eq!(iter.stats().sources_loaded, 1);
    }
    assert_eq!(registry.registered_archives(), 0);
    assert_eq!(registry.tracked_buffers(), 1);
}

#[test]
fn test_package_entry_filtering() {
    let dir = temp_dir();
    let mods = dir.path().join("Mods");
    write_package(
        &mods.join("pack.h3mod"),
        &[
            ("patches/", b""),
            ("patches/Fix.mm.dll", b"fix"),
            ("patches/Fix.mm.dll.meta", b"meta"),
            ("Fix.dll", b"plain"),
            ("notes/readme.txt", b"text"),
        ],
    );

    let sources = ModSources::discover(&SideloaderConfig::new().mods_dir(&mods)).unwrap();
    let mut registry = ResourceRegistry::new();
    let modules: Vec<_> = sources.modules(&mut registry).collect();

    assert_eq!(names(&modules), vec!["Fix.mm.dll"]);
    assert_eq!(modules[0].data().as_ref(), b"fix");
}

#[test]
fn test_entry_names_are_utf8() {
    let dir = temp_dir();
    let mods = dir.path().join("Mods");
    write_package(&mods.join("pack.h3mod"), &[("Ünïcødé.mm.dll", b"u")]);

    let sources = ModSources::discover(&SideloaderConfig::new().mods_dir(&mods)).unwrap();
    let mut registry = ResourceRegistry::new();
    let modules: Vec<_> = sources.modules(&mut registry).collect();

    assert_eq!(names(&modules), vec!["Ünïcødé.mm.dll"]);
}

#[test]
fn test_custom_suffix_and_extension() {
    let dir = temp_dir();
    let mods = dir.path().join("Mods");
    write_file(&mods.join("ModA/A.patch.dll"), b"a");
    write_file(&mods.join("ModA/B.mm.dll"), b"b");
    write_package(&mods.join("pack.hotmod"), &[("C.PATCH.DLL", b"c")]);
    write_package(&mods.join("pack.h3mod"), &[("D.patch.dll", b"d")]);

    let config = SideloaderConfig::new()
        .mods_dir(&mods)
        .patch_suffix(".patch.dll")
        .package_extensions(["hotmod"]);
    let sources = ModSources::discover(&config).unwrap();
    let mut registry = ResourceRegistry::new();
    let modules: Vec<_> = sources.modules(&mut registry).collect();

    assert_eq!(names(&modules), vec!["A.patch.dll", "C.PATCH.DLL"]);
}

#[test]
fn test_package_failing_mid_extraction_contributes_nothing() {
    init_logging();
    let dir = temp_dir();
    let mods = dir.path().join("Mods");
    write_file(&mods.join("ModA/A.mm.dll"), b"a");

    let package = mods.join("torn.h3mod");
    let stored = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
    let mut writer = zip::ZipWriter::new(File::create(&package).unwrap());
    writer.start_file("First.mm.dll", stored).unwrap();
    writer.write_all(b"first module").unwrap();
    writer.start_file("Second.mm.dll", stored).unwrap();
    writer.write_all(b"second module payload").unwrap();
    writer.finish().unwrap();

    // Damage the second entry's data so its checksum no longer matches
    let mut bytes = fs::read(&package).unwrap();
    let at = bytes.windows(7).position(|w| w == b"payload").unwrap();
    bytes[at..at + 7].copy_from_slice(b"PAYLOAD");
    fs::write(&package, bytes).unwrap();

    let sources = ModSources::discover(&SideloaderConfig::new().mods_dir(&mods)).unwrap();
    let mut registry = ResourceRegistry::new();
    let mut iter = sources.modules(&mut registry);
    let modules: Vec<_> = iter.by_ref().collect();
    let stats = iter.stats();

    assert_eq!(names(&modules), vec!["A.mm.dll"]);
    assert_eq!(
        stats,
        EnumerationStats {
            sources_loaded: 1,
            sources_failed: 1,
            files_skipped: 0,
            modules: 1,
        }
    );
    assert_eq!(registry.registered_archives(), 1);
    assert_eq!(registry.tracked_buffers(), 1);

    let warnings = captured_logs(Level::Warn);
    assert_eq!(warnings.len(), 1, "{warnings:?}");
    assert!(warnings[0].contains("torn.h3mod"), "{}", warnings[0]);
    assert!(warnings[0].contains("PackageEntryError"), "{}", warnings[0]);

    assert_eq!(registry.release_all().archives_closed, 1);
}

#[cfg(unix)]
#[test]
fn test_unreadable_loose_file_is_skipped() {
    use std::os::unix::fs::PermissionsExt;

    init_logging();
    let dir = temp_dir();
    let mods = dir.path().join("Mods");
    write_file(&mods.join("ModA/Open.mm.dll"), b"open");
    let locked = write_file(&mods.join("ModA/Locked.mm.dll"), b"locked");
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();
    if fs::read(&locked).is_ok() {
        // Permissions are not enforced for this user
        return;
    }

    let sources = ModSources::discover(&SideloaderConfig::new().mods_dir(&mods)).unwrap();
    let mut registry = ResourceRegistry::new();
    let mut iter = sources.modules(&mut registry);
    let modules: Vec<_> = iter.by_ref().collect();
    let stats = iter.stats();

    assert_eq!(names(&modules), vec!["Open.mm.dll"]);
    assert_eq!(
        stats,
        EnumerationStats {
            sources_loaded: 1,
            sources_failed: 0,
            files_skipped: 1,
            modules: 1,
        }
    );
    assert!(captured_logs(Level::Warn).is_empty());
    assert!(
        captured_logs(Level::Info)
            .iter()
            .any(|message| message.contains("Locked.mm.dll"))
    );
}

#[cfg(unix)]
#[test]
fn test_traversal_error_fails_whole_mod_folder() {
    use std::os::unix::fs::PermissionsExt;

    init_logging();
    let dir = temp_dir();
    let mods = dir.path().join("Mods");
    write_file(&mods.join("ModA/A.mm.dll"), b"a");
    write_file(&mods.join("ModA/sealed/Inner.mm.dll"), b"inner");
    write_file(&mods.join("ModB/B.mm.dll"), b"b");
    let sealed = mods.join("ModA/sealed");
    fs::set_permissions(&sealed, fs::Permissions::from_mode(0o000)).unwrap();
    if fs::read_dir(&sealed).is_ok() {
        // Permissions are not enforced for this user
        fs::set_permissions(&sealed, fs::Permissions::from_mode(0o755)).unwrap();
        return;
    }

    let sources = ModSources::discover(&SideloaderConfig::new().mods_dir(&mods)).unwrap();
    let mut registry = ResourceRegistry::new();
    let mut iter = sources.modules(&mut registry);
    let modules: Vec<_> = iter.by_ref().collect();
    let stats = iter.stats();

    assert_eq!(names(&modules), vec!["B.mm.dll"]);
    assert_eq!(stats.sources_loaded, 1);
    assert_eq!(stats.sources_failed, 1);
    assert_eq!(registry.tracked_buffers(), 1);

    let warnings = captured_logs(Level::Warn);
    assert_eq!(warnings.len(), 1, "{warnings:?}");
    assert!(warnings[0].contains("ScanError"), "{}", warnings[0]);
    assert!(warnings[0].contains("ModA"), "{}", warnings[0]);

    fs::set_permissions(&sealed, fs::Permissions::from_mode(0o755)).unwrap();
}
