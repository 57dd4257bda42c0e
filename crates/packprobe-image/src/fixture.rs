//! Fixture resolution.
//!
//! A fixture is a named source tree under the fixture root. Every case
//! builds from its own temporary copy so parallel cases never share
//! mutable state; the copy is deleted when its handle is dropped.

use std::path::{Component, Path, PathBuf};

use packprobe_common::error::{PackprobeError, Result};
use tempfile::TempDir;
use walkdir::WalkDir;

/// Resolves named fixtures under a root directory.
#[derive(Debug, Clone)]
pub struct FixtureResolver {
    root: PathBuf,
}

impl FixtureResolver {
    /// Creates a resolver for fixtures stored under `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the fixture root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Copies the named fixture into a fresh temporary directory.
    ///
    /// `name` may contain nested components (`ca_cert_apps/pip`) but must
    /// stay inside the fixture root.
    ///
    /// # Errors
    ///
    /// Returns `FixtureNotFound` if the fixture directory does not exist,
    /// `Config` if the name escapes the root, or `Io` if the copy fails.
    pub fn resolve(&self, name: &str) -> Result<FixtureDir> {
        let relative = Path::new(name);
        if name.is_empty()
            || relative
                .components()
                .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(PackprobeError::Config {
                message: format!("fixture name must be a relative path inside the root: {name:?}"),
            });
        }

        let source = self.root.join(relative);
        if !source.is_dir() {
            return Err(PackprobeError::FixtureNotFound {
                name: name.to_string(),
                root: self.root.clone(),
            });
        }

        let dir = tempfile::Builder::new()
            .prefix("packprobe-fixture-")
            .tempdir()
            .map_err(|e| PackprobeError::Io {
                path: std::env::temp_dir(),
                source: e,
            })?;
        copy_tree(&source, dir.path())?;
        tracing::info!(
            fixture = name,
            path = %dir.path().display(),
            "fixture copied"
        );

        Ok(FixtureDir {
            name: name.to_string(),
            dir,
        })
    }
}

/// A writable copy of a fixture, removed from disk on drop.
#[derive(Debug)]
pub struct FixtureDir {
    name: String,
    dir: TempDir,
}

impl FixtureDir {
    /// Returns the fixture name this copy was made from.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the root of the copied tree.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Joins a relative path onto the copied tree.
    #[must_use]
    pub fn join(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.dir.path().join(relative)
    }

    /// Removes the copy now, reporting any failure.
    ///
    /// Dropping the handle also removes it but discards errors.
    ///
    /// # Errors
    ///
    /// Returns `Teardown` if the directory cannot be removed.
    pub fn close(self) -> Result<()> {
        let path = self.dir.path().to_path_buf();
        self.dir.close().map_err(|e| PackprobeError::Teardown {
            resource: format!("fixture directory {}", path.display()),
            message: e.to_string(),
        })
    }
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> PackprobeError {
    let path = path.to_path_buf();
    move |source| PackprobeError::Io { path, source }
}

/// Copies the contents of `from` into the existing directory `to`.
///
/// Symbolic links are recreated as links, never followed, so a link cycle
/// inside a fixture copies as a single entry.
fn copy_tree(from: &Path, to: &Path) -> Result<()> {
    for entry in WalkDir::new(from).min_depth(1).follow_links(false) {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(from).to_path_buf();
            PackprobeError::Io {
                path,
                source: e.into(),
            }
        })?;
        let src = entry.path();
        let relative = src
            .strip_prefix(from)
            .map_err(|e| io_err(src)(std::io::Error::other(e)))?;
        let dst = to.join(relative);

        let file_type = entry.file_type();
        if file_type.is_dir() {
            std::fs::create_dir(&dst).map_err(io_err(&dst))?;
        } else if file_type.is_symlink() {
            copy_link(src, &dst)?;
        } else {
            let _bytes = std::fs::copy(src, &dst).map_err(io_err(src))?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn copy_link(src: &Path, dst: &Path) -> Result<()> {
    let target = std::fs::read_link(src).map_err(io_err(src))?;
    std::os::unix::fs::symlink(&target, dst).map_err(io_err(dst))
}

#[cfg(not(unix))]
#[allow(clippy::unnecessary_wraps)]
fn copy_link(src: &Path, _dst: &Path) -> Result<()> {
    tracing::warn!(path = %src.display(), "skipping symbolic link in fixture");
    Ok(())
}
