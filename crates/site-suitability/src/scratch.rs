//! Per-run arena for intermediate datasets.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::Local;
use tracing::{debug, info, warn};

use crate::config::ScratchConfig;

static RUN_SEQUENCE: AtomicU64 = AtomicU64::new(1);

const SHAPEFILE_SIDECARS: [&str; 6] = ["shx", "dbf", "prj", "cpg", "sbn", "sbx"];

#[derive(Debug, thiserror::Error)]
#[error("could not prepare scratch directory {}: {source}", .path.display())]
pub struct ScratchError {
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

#[derive(Debug, Default)]
struct Registry {
    reserved: HashSet<PathBuf>,
    tracked: Vec<PathBuf>,
}

/// Mints unique scratch paths and remembers which ones to delete.
///
/// Stages running concurrently share one arena; the registry is the only
/// mutable state and sits behind a mutex that is never held across an
/// await point.
#[derive(Debug)]
pub struct ScratchSpace {
    directory: PathBuf,
    registry: Mutex<Registry>,
}

impl ScratchSpace {
    pub fn new(directory: impl Into<PathBuf>) -> Result<Self, ScratchError> {
        let directory = directory.into();
        fs::create_dir_all(&directory).map_err(|source| ScratchError {
            path: directory.clone(),
            source,
        })?;
        Ok(Self {
            directory,
            registry: Mutex::new(Registry::default()),
        })
    }

    /// Creates a fresh sub-directory of the configured scratch root so that
    /// concurrent runs never see each other's files.
    pub fn for_run(config: &ScratchConfig) -> Result<Self, ScratchError> {
        let sequence = RUN_SEQUENCE.fetch_add(1, Ordering::Relaxed);
        let name = format!(
            "run_{}_{}_{sequence}",
            Local::now().format("%Y%m%d%H%M%S"),
            std::process::id()
        );
        Self::new(config.directory.join(name))
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Returns an unused path for `file_name`. A name already on disk or
    /// already handed out gets a `_yyyyMMddHHmmss` suffix, then a counter.
    pub fn create_path(&self, file_name: &str) -> PathBuf {
        let mut registry = self.lock();
        let candidate = self.directory.join(file_name);

        let path = if Self::is_taken(&registry, &candidate) {
            let (stem, extension) = split_name(file_name);
            let stamp = Local::now().format("%Y%m%d%H%M%S").to_string();
            let mut path = self.directory.join(format!("{stem}_{stamp}{extension}"));
            let mut counter = 1;
            while Self::is_taken(&registry, &path) {
                path = self
                    .directory
                    .join(format!("{stem}_{stamp}_{counter}{extension}"));
                counter += 1;
            }
            path
        } else {
            candidate
        };

        registry.reserved.insert(path.clone());
        path
    }

    /// Mints a path and tracks it for cleanup in one step.
    pub fn create_tracked_path(&self, file_name: &str) -> PathBuf {
        let path = self.create_path(file_name);
        self.register_for_cleanup(&path);
        path
    }

    pub fn register_for_cleanup(&self, path: &Path) {
        if path.as_os_str().is_empty() {
            return;
        }
        let mut registry = self.lock();
        if !registry.tracked.iter().any(|tracked| tracked == path) {
            registry.tracked.push(path.to_path_buf());
        }
    }

    pub fn tracked(&self) -> Vec<PathBuf> {
        self.lock().tracked.clone()
    }

    /// Deletes every tracked artifact. Failures are logged and the path stays
    /// tracked; the number of removed artifacts is returned.
    pub fn cleanup_all(&self) -> usize {
        let removed = self.cleanup_matching(|_| true);
        self.remove_directory_if_empty();
        removed
    }

    /// Deletes tracked artifacts whose file name contains `pattern`.
    pub fn cleanup_by_pattern(&self, pattern: &str) -> usize {
        self.cleanup_matching(|path| {
            path.file_name()
                .map(|name| name.to_string_lossy().contains(pattern))
                .unwrap_or(false)
        })
    }

    fn cleanup_matching(&self, matches: impl Fn(&Path) -> bool) -> usize {
        let selected: Vec<PathBuf> = {
            let registry = self.lock();
            registry
                .tracked
                .iter()
                .filter(|path| matches(path))
                .cloned()
                .collect()
        };

        let mut removed = Vec::new();
        for path in selected {
            match remove_artifact(&path) {
                Ok(()) => {
                    debug!(path = %path.display(), "removed scratch artifact");
                    removed.push(path);
                }
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "failed to remove scratch artifact");
                }
            }
        }

        let mut registry = self.lock();
        registry.tracked.retain(|path| !removed.contains(path));
        if !removed.is_empty() {
            info!(count = removed.len(), "released scratch artifacts");
        }
        removed.len()
    }

    fn remove_directory_if_empty(&self) {
        let empty = fs::read_dir(&self.directory)
            .map(|mut entries| entries.next().is_none())
            .unwrap_or(false);
        if empty {
            if let Err(err) = fs::remove_dir(&self.directory) {
                debug!(path = %self.directory.display(), error = %err, "scratch directory kept");
            }
        }
    }

    fn is_taken(registry: &Registry, path: &Path) -> bool {
        registry.reserved.contains(path) || path.exists()
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn split_name(file_name: &str) -> (&str, &str) {
    match file_name.rfind('.') {
        Some(index) if index > 0 => file_name.split_at(index),
        _ => (file_name, ""),
    }
}

/// Removes a dataset, including shapefile sidecars and directory-based
/// stores. An artifact that never materialized counts as removed.
fn remove_artifact(path: &Path) -> io::Result<()> {
    if path.is_dir() {
        return fs::remove_dir_all(path);
    }

    ignore_missing(fs::remove_file(path))?;

    let is_shapefile = path
        .extension()
        .map(|extension| extension.eq_ignore_ascii_case("shp"))
        .unwrap_or(false);
    if is_shapefile {
        for sidecar in SHAPEFILE_SIDECARS {
            ignore_missing(fs::remove_file(path.with_extension(sidecar)))?;
        }
    }

    let mut aux = path.as_os_str().to_os_string();
    aux.push(".aux.xml");
    ignore_missing(fs::remove_file(PathBuf::from(aux)))
}

fn ignore_missing(result: io::Result<()>) -> io::Result<()> {
    match result {
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}
