// crates/host/src/coder/workspace.rs

//! The guest workspace the coder edits, held under an advisory lock for one run.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Component, Path, PathBuf};
use std::process::Command;

use anyhow::{bail, Context, Result};
use tempfile::NamedTempFile;

use toolsmith_core::route_source::RouteEdit;

pub const ROUTES_CRATE: &str = "crates/routes";
pub const ROUTES_FILE: &str = "crates/routes/src/routes.rs";
pub const IMPORTS_FILE: &str = "crates/routes/src/imports.rs";
pub const LOCK_FILE: &str = ".toolsmith.lock";

/// Exclusive handle on the route sources. Dropping it releases the lock.
#[derive(Debug)]
pub struct ExtensionWorkspace {
    root: PathBuf,
    lock: PathBuf,
}

impl ExtensionWorkspace {
    /// Take the lock. Fails fast if another run holds it.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if !root.join(ROUTES_FILE).is_file() {
            bail!(
                "{} does not contain {ROUTES_FILE}",
                root.display()
            );
        }

        let lock = root.join(LOCK_FILE);
        match OpenOptions::new().write(true).create_new(true).open(&lock) {
            Ok(mut file) => {
                writeln!(file, "{}", std::process::id())
                    .with_context(|| format!("failed to write {}", lock.display()))?;
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                let holder = fs::read_to_string(&lock).unwrap_or_default();
                bail!(
                    "another coder run holds {} (pid {}); remove it if that run is gone",
                    lock.display(),
                    holder.trim()
                );
            }
            Err(e) => {
                return Err(e).with_context(|| format!("failed to create {}", lock.display()))
            }
        }

        Ok(Self { root, lock })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Snapshot both route files verbatim.
    pub fn load(&self) -> Result<RouteEdit> {
        Ok(RouteEdit {
            routes: self.read(ROUTES_FILE)?,
            imports: self.read(IMPORTS_FILE)?,
        })
    }

    /// Replace both files whole. Both are staged before either is replaced, and the
    /// imports are put back if the routes cannot be.
    pub fn write(&self, edit: &RouteEdit) -> Result<()> {
        let previous_imports = self.read(IMPORTS_FILE)?;
        let imports = self.stage(IMPORTS_FILE, &edit.imports)?;
        let routes = self.stage(ROUTES_FILE, &edit.routes)?;

        let imports_path = self.root.join(IMPORTS_FILE);
        imports
            .persist(&imports_path)
            .with_context(|| format!("failed to replace {}", imports_path.display()))?;

        let routes_path = self.root.join(ROUTES_FILE);
        if let Err(e) = routes.persist(&routes_path) {
            if let Err(restore) = fs::write(&imports_path, previous_imports) {
                tracing::warn!("failed to restore {}: {restore}", imports_path.display());
            }
            return Err(e.error)
                .with_context(|| format!("failed to replace {}", routes_path.display()));
        }
        Ok(())
    }

    /// Write `content` to a temporary file next to `rel`.
    fn stage(&self, rel: &str, content: &str) -> Result<NamedTempFile> {
        let path = self.root.join(rel);
        let dir = path.parent().unwrap_or(&self.root);
        let mut file = NamedTempFile::new_in(dir)
            .with_context(|| format!("failed to stage {}", path.display()))?;
        file.write_all(content.as_bytes())
            .and_then(|()| file.flush())
            .with_context(|| format!("failed to stage {}", path.display()))?;
        Ok(file)
    }

    fn read(&self, rel: &str) -> Result<String> {
        let path = self.root.join(rel);
        fs::read_to_string(&path).with_context(|| format!("failed to read {}", path.display()))
    }

    /// Read a file of the routes crate for the model. Only `src/` and `Cargo.toml` are
    /// visible.
    pub fn read_scoped(&self, requested: &str) -> Result<String, String> {
        let rel = normalize(requested)?;
        let src = Path::new(ROUTES_CRATE).join("src");
        let manifest = Path::new(ROUTES_CRATE).join("Cargo.toml");
        if !(rel.starts_with(&src) || rel == manifest) {
            return Err(format!(
                "Read access denied for '{requested}'. Allowed: {}/ and {}",
                src.display(),
                manifest.display()
            ));
        }
        fs::read_to_string(self.root.join(&rel)).map_err(|e| format!("{requested}: {e}"))
    }
}

impl Drop for ExtensionWorkspace {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.lock) {
            tracing::warn!("failed to release {}: {e}", self.lock.display());
        }
    }
}

/// Workspace-relative path. Accepts paths relative to the routes crate (`src/routes.rs`)
/// and refuses anything climbing out.
fn normalize(requested: &str) -> Result<PathBuf, String> {
    let path = Path::new(requested.trim());
    if path.is_absolute() || path.components().any(|c| c == Component::ParentDir) {
        return Err(format!("'{requested}' must be relative to the extensions workspace"));
    }
    if path.starts_with("src") || path == Path::new("Cargo.toml") {
        return Ok(Path::new(ROUTES_CRATE).join(path));
    }
    Ok(path.to_path_buf())
}

#[derive(Debug, Clone, PartialEq)]
pub struct BuildOutput {
    pub success: bool,
    pub log: String,
}

/// Compiles the route sources into the module the service loads.
pub trait ExtensionBuilder {
    fn build(&self, root: &Path) -> Result<BuildOutput>;
}

pub struct CargoWasmBuilder;

impl ExtensionBuilder for CargoWasmBuilder {
    fn build(&self, root: &Path) -> Result<BuildOutput> {
        let output = Command::new("cargo")
            .args(["build", "--release", "--target", "wasm32-wasip1", "-p", "routes"])
            .current_dir(root)
            .output()
            .context("failed to run cargo")?;

        Ok(BuildOutput {
            success: output.status.success(),
            log: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
