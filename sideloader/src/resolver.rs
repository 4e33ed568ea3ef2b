//! Fallback resolution of assembly references
//!
//! Patch engines resolve most references themselves. Whatever they cannot
//! find is handed to an [`AssemblyResolver`]; the [`DependencyResolver`]
//! searches an ordered list of directories and their subdirectories for a
//! file whose declared assembly name matches the request.

use clr_image::{AssemblyImage, AssemblyReference};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::DEFAULT_RESOLVE_DEPTH;

/// Ordered directories searched for dependencies; earlier roots win
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchRoots {
    roots: Vec<PathBuf>,
}

impl SearchRoots {
    /// Create an empty list
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a root with the lowest priority so far
    pub fn push<P: Into<PathBuf>>(&mut self, root: P) {
        self.roots.push(root.into());
    }

    /// Roots in priority order
    pub fn iter(&self) -> std::slice::Iter<'_, PathBuf> {
        self.roots.iter()
    }

    /// Number of roots
    pub fn len(&self) -> usize {
        self.roots.len()
    }

    /// Whether the list is empty
    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }
}

impl<P: Into<PathBuf>> FromIterator<P> for SearchRoots {
    fn from_iter<I: IntoIterator<Item = P>>(iter: I) -> Self {
        Self {
            roots: iter.into_iter().map(Into::into).collect(),
        }
    }
}

impl<'a> IntoIterator for &'a SearchRoots {
    type Item = &'a PathBuf;
    type IntoIter = std::slice::Iter<'a, PathBuf>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// An assembly located on disk
#[derive(Debug)]
pub struct ResolvedAssembly {
    /// File the assembly was found in
    pub path: PathBuf,
    /// Image opened with only its headers read
    pub image: AssemblyImage<BufReader<File>>,
}

/// Fallback lookup for references a patch engine cannot resolve itself
pub trait AssemblyResolver {
    /// Locate `reference`, or return `None` when it is unknown
    fn resolve(&self, reference: &AssemblyReference) -> Option<ResolvedAssembly>;
}

impl<F> AssemblyResolver for F
where
    F: Fn(&AssemblyReference) -> Option<ResolvedAssembly>,
{
    fn resolve(&self, reference: &AssemblyReference) -> Option<ResolvedAssembly> {
        self(reference)
    }
}

/// Resolver searching [`SearchRoots`] recursively
///
/// Each root is expanded to itself and every directory below it, up to
/// `max_depth` levels, without following symlinks. Within a root every
/// `<Name>.dll` candidate is probed before any `<Name>.exe`. A candidate
/// matches when the name declared in its manifest equals the requested name
/// exactly. The expansion is recomputed for each request.
#[derive(Debug, Clone)]
pub struct DependencyResolver {
    roots: SearchRoots,
    max_depth: usize,
}

impl DependencyResolver {
    /// Create a resolver over `roots` with the default depth bound
    pub fn new(roots: SearchRoots) -> Self {
        Self {
            roots,
            max_depth: DEFAULT_RESOLVE_DEPTH,
        }
    }

    /// Set the depth bound below each root
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Search roots in priority order
    pub fn roots(&self) -> &SearchRoots {
        &self.roots
    }

    /// Depth bound below each root
    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    fn expand(&self, root: &Path) -> Vec<PathBuf> {
        WalkDir::new(root)
            .follow_links(false)
            .max_depth(self.max_depth)
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) if entry.file_type().is_dir() => Some(entry.into_path()),
                Ok(_) => None,
                Err(err) => {
                    log::debug!("Skipping unreadable directory under {}: {err}", root.display());
                    None
                }
            })
            .collect()
    }

    fn probe(&self, candidate: &Path, name: &str) -> Option<ResolvedAssembly> {
        let mut image = match AssemblyImage::open(candidate) {
            Ok(image) => image,
            Err(err) => {
                log::debug!("Ignoring {}: {err}", candidate.display());
                return None;
            }
        };

        match image.name() {
            Ok(declared) if declared == name => Some(ResolvedAssembly {
                path: candidate.to_path_buf(),
                image,
            }),
            Ok(declared) => {
                log::debug!(
                    "{} declares {declared}, not {name}",
                    candidate.display()
                );
                None
            }
            Err(err) => {
                log::debug!("Ignoring {}: {err}", candidate.display());
                None
            }
        }
    }
}

impl AssemblyResolver for DependencyResolver {
    fn resolve(&self, reference: &AssemblyReference) -> Option<ResolvedAssembly> {
        // Anything that is not a bare name would escape the search roots
        let name = &reference.name;
        if name.contains(['/', '\\', ':']) || Path::new(name).is_absolute() {
            log::debug!("Not probing for {name}: not a plain assembly name");
            return None;
        }

        let candidates = reference.candidate_file_names();

        for root in &self.roots {
            if !root.is_dir() {
                continue;
            }

            let directories = self.expand(root);
            for file_name in &candidates {
                for dir in &directories {
                    let candidate = dir.join(file_name);
                    if !candidate.is_file() {
                        continue;
                    }
                    if let Some(resolved) = self.probe(&candidate, &reference.name) {
                        log::debug!(
                            "Resolved {} to {}",
                            reference.name,
                            resolved.path.display()
                        );
                        return Some(resolved);
                    }
                }
            }
        }

        log::debug!("Could not resolve {}", reference.name);
        None
    }
}
