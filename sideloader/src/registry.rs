//! Run-scoped tracking of open packages and module buffers
//!
//! Everything discovery opens or materializes is registered here and
//! released exactly once, by [`ResourceRegistry::release_all`] on the normal
//! and failure paths or by `Drop` when a run unwinds.

use bytes::Bytes;
use std::fs::File;
use std::path::{Path, PathBuf};
use zip::ZipArchive;

/// Identifier of a registered package handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(usize);

impl HandleId {
    /// Position of the handle in registration order
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug)]
struct ArchiveSlot {
    path: PathBuf,
    archive: Option<ZipArchive<File>>,
}

/// Counts of what a cleanup released
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Package handles closed
    pub archives_closed: usize,
    /// Module buffers released
    pub buffers_released: usize,
    /// Total size of the released buffers
    pub bytes_released: usize,
}

impl CleanupReport {
    /// Whether nothing was released
    pub fn is_empty(&self) -> bool {
        self.archives_closed == 0 && self.buffers_released == 0
    }
}

/// Open package handles and module buffers of one run
#[derive(Debug, Default)]
pub struct ResourceRegistry {
    archives: Vec<ArchiveSlot>,
    buffers: Vec<Bytes>,
}

impl ResourceRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Take ownership of an opened package
    pub fn register_archive(&mut self, path: &Path, archive: ZipArchive<File>) -> HandleId {
        let id = HandleId(self.archives.len());
        log::debug!("Registered package handle {} for {}", id.0, path.display());
        self.archives.push(ArchiveSlot {
            path: path.to_path_buf(),
            archive: Some(archive),
        });
        id
    }

    /// Borrow a registered package that has not been released yet
    pub fn archive_mut(&mut self, id: HandleId) -> Option<&mut ZipArchive<File>> {
        self.archives
            .get_mut(id.0)
            .and_then(|slot| slot.archive.as_mut())
    }

    /// Path of a registered package
    pub fn archive_path(&self, id: HandleId) -> Option<&Path> {
        self.archives.get(id.0).map(|slot| slot.path.as_path())
    }

    /// Keep a module buffer alive until cleanup
    pub fn track_buffer(&mut self, buffer: Bytes) {
        self.buffers.push(buffer);
    }

    /// Number of package handles still open
    pub fn open_archives(&self) -> usize {
        self.archives
            .iter()
            .filter(|slot| slot.archive.is_some())
            .count()
    }

    /// Number of package handles ever registered
    pub fn registered_archives(&self) -> usize {
        self.archives.len()
    }

    /// Number of buffers still tracked
    pub fn tracked_buffers(&self) -> usize {
        self.buffers.len()
    }

    /// Close every open handle and drop every tracked buffer
    ///
    /// Calling this again releases only what was registered since the last
    /// call.
    pub fn release_all(&mut self) -> CleanupReport {
        let mut report = CleanupReport::default();

        for slot in &mut self.archives {
            if slot.archive.take().is_some() {
                log::debug!("Closed package {}", slot.path.display());
                report.archives_closed += 1;
            }
        }

        report.buffers_released = self.buffers.len();
        report.bytes_released = self.buffers.iter().map(Bytes::len).sum();
        self.buffers.clear();

        if !report.is_empty() {
            log::debug!(
                "Released {} package handles and {} buffers ({} bytes)",
                report.archives_closed,
                report.buffers_released,
                report.bytes_released
            );
        }
        report
    }
}

impl Drop for ResourceRegistry {
    fn drop(&mut self) {
        let report = self.release_all();
        if !report.is_empty() {
            log::debug!("Registry dropped with resources still held");
        }
    }
}
