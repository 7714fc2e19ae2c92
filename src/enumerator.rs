//! Deterministic file enumeration over one or more roots
//!
//! Roots are walked in the order given; entries inside a root come out in
//! depth-first order sorted by file name, so two runs over the same tree
//! produce the same sequence. Paths reachable from several roots are only
//! yielded once. A directory below a root that cannot be read is reported
//! instead of being silently dropped, so callers can tell "unreadable" from
//! "gone".

use crate::error::RootError;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Files found across all roots, plus the roots that could not be walked.
#[derive(Debug, Default, Clone)]
pub struct Discovery {
    pub files: Vec<PathBuf>,
    pub root_errors: Vec<RootError>,
    /// Directories or entries below a root that could not be read
    pub walk_errors: Vec<RootError>,
}

impl Discovery {
    /// The walk error covering `path`, if `path` lies at or under an
    /// entry that could not be read.
    pub fn unreadable_parent(&self, path: &Path) -> Option<&RootError> {
        self.walk_errors.iter().find(|e| path.starts_with(&e.root))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalkError {
    /// The root itself could not be walked
    Root(RootError),
    /// A directory or entry below a root could not be read
    Entry(RootError),
}

/// Lazily enumerate regular files below `roots`.
///
/// A root that is missing or not a directory shows up as a single
/// `WalkError::Root`; the remaining roots are still walked.
pub fn enumerate(roots: &[PathBuf], recursive: bool) -> FileWalk {
    FileWalk {
        roots: roots.to_vec().into_iter(),
        recursive,
        current: None,
        current_root: PathBuf::new(),
        seen: HashSet::new(),
    }
}

/// Drain [`enumerate`] into a [`Discovery`].
pub fn discover(roots: &[PathBuf], recursive: bool) -> Discovery {
    let mut discovery = Discovery::default();
    for item in enumerate(roots, recursive) {
        match item {
            Ok(path) => discovery.files.push(path),
            Err(WalkError::Root(err)) => {
                warn!("{}", err);
                discovery.root_errors.push(err);
            }
            Err(WalkError::Entry(err)) => {
                warn!("Skipping unreadable entry: {}", err);
                discovery.walk_errors.push(err);
            }
        }
    }
    discovery
}

/// Iterator returned by [`enumerate`]
pub struct FileWalk {
    roots: std::vec::IntoIter<PathBuf>,
    recursive: bool,
    current: Option<walkdir::IntoIter>,
    current_root: PathBuf,
    seen: HashSet<PathBuf>,
}

impl FileWalk {
    fn open_root(&mut self, root: &Path) -> Result<walkdir::IntoIter, RootError> {
        let metadata = fs::metadata(root).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                RootError::new(root, "directory does not exist")
            } else {
                RootError::new(root, e.to_string())
            }
        })?;
        if !metadata.is_dir() {
            return Err(RootError::new(root, "not a directory"));
        }

        let canonical = root
            .canonicalize()
            .map_err(|e| RootError::new(root, e.to_string()))?;
        debug!("Enumerating {}", canonical.display());

        let max_depth = if self.recursive { usize::MAX } else { 1 };
        self.current_root = canonical.clone();
        Ok(WalkDir::new(canonical)
            .min_depth(1)
            .max_depth(max_depth)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter())
    }

    /// Decide whether a walk entry is a file to report.
    fn accept(&mut self, entry: walkdir::DirEntry) -> Option<PathBuf> {
        let file_type = entry.file_type();
        let is_file = if file_type.is_file() {
            true
        } else if file_type.is_symlink() {
            // Links to regular files count; links to directories are never followed
            fs::metadata(entry.path()).map(|m| m.is_file()).unwrap_or(false)
        } else {
            false
        };

        if !is_file {
            return None;
        }

        let path = entry.into_path();
        if self.seen.insert(path.clone()) {
            Some(path)
        } else {
            debug!("Skipping {} (already reached through another root)", path.display());
            None
        }
    }
}

impl Iterator for FileWalk {
    type Item = Result<PathBuf, WalkError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(walk) = self.current.as_mut() {
                match walk.next() {
                    Some(Ok(entry)) => {
                        if let Some(path) = self.accept(entry) {
                            return Some(Ok(path));
                        }
                        continue;
                    }
                    Some(Err(e)) => {
                        // Unreadable subdirectories are skipped, not fatal for the root
                        let path = e.path().unwrap_or(&self.current_root).to_path_buf();
                        let reason = match e.io_error() {
                            Some(io) => io.to_string(),
                            None => e.to_string(),
                        };
                        return Some(Err(WalkError::Entry(RootError::new(path, reason))));
                    }
                    None => self.current = None,
                }
            }

            let root = self.roots.next()?;
            match self.open_root(&root) {
                Ok(walk) => self.current = Some(walk),
                Err(e) => return Some(Err(WalkError::Root(e))),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn make_tree() -> TempDir {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::write(root.join("b.txt"), "b").unwrap();
        fs::write(root.join("a.txt"), "a").unwrap();
        fs::create_dir_all(root.join("sub/deeper")).unwrap();
        fs::write(root.join("sub/c.txt"), "c").unwrap();
        fs::write(root.join("sub/deeper/d.txt"), "d").unwrap();
        fs::write(root.join("z.txt"), "z").unwrap();
        temp_dir
    }

    fn names(files: &[PathBuf], base: &Path) -> Vec<String> {
        let base = base.canonicalize().unwrap();
        files
            .iter()
            .map(|p| p.strip_prefix(&base).unwrap().to_string_lossy().replace('\\', "/"))
            .collect()
    }

    #[test]
    fn test_non_recursive_skips_subdirectories() {
        let temp_dir = make_tree();
        let found = discover(&[temp_dir.path().to_path_buf()], false);
        assert!(found.root_errors.is_empty());
        assert_eq!(names(&found.files, temp_dir.path()), vec!["a.txt", "b.txt", "z.txt"]);
    }

    #[test]
    fn test_recursive_order_is_deterministic() {
        let temp_dir = make_tree();
        let found = discover(&[temp_dir.path().to_path_buf()], true);
        assert_eq!(
            names(&found.files, temp_dir.path()),
            vec!["a.txt", "b.txt", "sub/c.txt", "sub/deeper/d.txt", "z.txt"]
        );

        let again = discover(&[temp_dir.path().to_path_buf()], true);
        assert_eq!(found.files, again.files);
    }

    #[test]
    fn test_paths_are_absolute() {
        let temp_dir = make_tree();
        let found = discover(&[temp_dir.path().to_path_buf()], false);
        assert!(found.files.iter().all(|p| p.is_absolute()));
    }

    #[test]
    fn test_overlapping_roots_are_deduplicated() {
        let temp_dir = make_tree();
        let roots = vec![
            temp_dir.path().join("sub"),
            temp_dir.path().to_path_buf(),
            temp_dir.path().join("sub"),
        ];
        let found = discover(&roots, true);
        assert_eq!(
            names(&found.files, temp_dir.path()),
            vec!["sub/c.txt", "sub/deeper/d.txt", "a.txt", "b.txt", "z.txt"]
        );
    }

    #[test]
    fn test_missing_root_does_not_stop_others() {
        let temp_dir = make_tree();
        let missing = temp_dir.path().join("nope");
        let roots = vec![missing.clone(), temp_dir.path().to_path_buf()];

        let items: Vec<_> = enumerate(&roots, false).collect();
        assert_eq!(items.len(), 4);
        match &items[0] {
            Err(WalkError::Root(err)) => assert_eq!(err.root, missing),
            other => panic!("unexpected item: {:?}", other),
        }
        assert!(items[1..].iter().all(|i| i.is_ok()));
    }

    #[test]
    fn test_file_root_is_rejected() {
        let temp_dir = make_tree();
        let file_root = temp_dir.path().join("a.txt");
        let found = discover(&[file_root.clone()], false);
        assert!(found.files.is_empty());
        assert_eq!(found.root_errors, vec![RootError::new(file_root, "not a directory")]);
    }

    #[test]
    fn test_enumeration_is_restartable() {
        let temp_dir = make_tree();
        let roots = vec![temp_dir.path().to_path_buf()];
        let first: Vec<_> = enumerate(&roots, true).filter_map(|r| r.ok()).collect();
        let second: Vec<_> = enumerate(&roots, true).filter_map(|r| r.ok()).collect();
        assert_eq!(first, second);
        assert_eq!(first.len(), 5);
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_subdirectory_is_reported() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = make_tree();
        let sub = temp_dir.path().join("sub");
        fs::set_permissions(&sub, fs::Permissions::from_mode(0o000)).unwrap();
        if fs::read_dir(&sub).is_ok() {
            // Running as root, permissions are not enforced
            fs::set_permissions(&sub, fs::Permissions::from_mode(0o755)).unwrap();
            return;
        }

        let found = discover(&[temp_dir.path().to_path_buf()], true);
        fs::set_permissions(&sub, fs::Permissions::from_mode(0o755)).unwrap();

        assert!(found.root_errors.is_empty());
        assert_eq!(names(&found.files, temp_dir.path()), vec!["a.txt", "b.txt", "z.txt"]);
        assert_eq!(found.walk_errors.len(), 1);
        let canonical_sub = sub.canonicalize().unwrap();
        assert_eq!(found.walk_errors[0].root, canonical_sub);
        assert!(found.unreadable_parent(&canonical_sub.join("c.txt")).is_some());
        assert!(found.unreadable_parent(&temp_dir.path().canonicalize().unwrap().join("a.txt")).is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinks() {
        use std::os::unix::fs::symlink;

        let temp_dir = make_tree();
        let root = temp_dir.path();
        symlink(root.join("a.txt"), root.join("link_to_file")).unwrap();
        symlink(root.join("sub"), root.join("link_to_dir")).unwrap();
        // A cycle that must not be followed
        symlink(root, root.join("sub/loop")).unwrap();

        let found = discover(&[root.to_path_buf()], true);
        assert_eq!(
            names(&found.files, root),
            vec!["a.txt", "b.txt", "link_to_file", "sub/c.txt", "sub/deeper/d.txt", "z.txt"]
        );
    }
}
