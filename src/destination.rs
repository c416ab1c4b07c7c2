//! Destination file trees the materializer writes into

use anyhow::{Context, Result};
use std::fs;
use std::path::{Component, Path, PathBuf};

/// A writable directory of a destination tree.
///
/// Only create-or-open and create-or-overwrite are offered; nothing is ever
/// deleted through this interface.
pub trait Destination: Send + Sync + Sized + 'static {
    /// Open the child directory `name`, creating it if absent
    fn open_dir(&self, name: &str) -> Result<Self>;

    /// Write `content` to the file `name`, creating or overwriting it
    fn write_file(&self, name: &str, content: &[u8]) -> Result<()>;
}

/// Destination backed by a local directory
#[derive(Debug, Clone)]
pub struct FsDestination {
    path: PathBuf,
}

impl FsDestination {
    /// Use `path` as destination root, creating it if necessary
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        fs::create_dir_all(&path)
            .with_context(|| format!("Failed to create destination {:?}", path))?;
        Ok(FsDestination { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of the direct child `name`; anything else is refused
    fn child(&self, name: &str) -> Result<PathBuf> {
        let mut components = Path::new(name).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) if !name.contains('\0') => Ok(self.path.join(name)),
            _ => anyhow::bail!("Refusing entry {:?}: not a direct child of {:?}", name, self.path),
        }
    }
}

impl Destination for FsDestination {
    fn open_dir(&self, name: &str) -> Result<Self> {
        let path = self.child(name)?;
        match fs::create_dir(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists && path.is_dir() => {}
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to create directory {:?}", path))
            }
        }
        Ok(FsDestination { path })
    }

    fn write_file(&self, name: &str, content: &[u8]) -> Result<()> {
        let path = self.child(name)?;
        fs::write(&path, content).with_context(|| format!("Failed to write {:?}", path))
    }
}
