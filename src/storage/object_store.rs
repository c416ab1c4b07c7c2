use anyhow::{Context, Result};
use git2::{ErrorCode, ObjectType, Repository};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use super::traits::{BlobSource, MutableState};
use super::{ContentId, MirrorState};
use crate::error::Error;

/// Local object store for one remote, kept as a bare repository under
/// `<store_dir>/<sha256(url)>`
#[derive(Debug, Clone)]
pub struct ObjectStore {
    url: String,
    path: PathBuf,
}

impl ObjectStore {
    /// Create a handle for the store of `url`. Nothing is touched on disk.
    pub fn new<P: AsRef<Path>>(store_dir: P, url: &str) -> Self {
        ObjectStore {
            url: url.to_string(),
            path: store_dir.as_ref().join(Self::store_key(url)),
        }
    }

    /// Directory name for a repository identity
    pub fn store_key(url: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(url.trim_end_matches('/').as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get the path to the state file
    fn state_path(&self) -> PathBuf {
        self.path.join("git-mirror-state.yaml")
    }

    pub fn exists(&self) -> bool {
        self.path.join("HEAD").exists()
    }

    /// Open the store, or Ok(None) if it was never created
    pub fn open(&self) -> Result<Option<Repository>> {
        if !self.exists() {
            return Ok(None);
        }
        let repo = Repository::open_bare(&self.path)
            .map_err(Error::from)
            .with_context(|| format!("Failed to open object store {:?}", self.path))?;
        Ok(Some(repo))
    }

    /// Open the store, creating an empty one on first use
    pub fn open_or_init(&self) -> Result<Repository> {
        if let Some(repo) = self.open()? {
            return Ok(repo);
        }
        fs::create_dir_all(&self.path)
            .map_err(Error::from)
            .with_context(|| format!("Failed to create store directory {:?}", self.path))?;
        let repo = Repository::init_bare(&self.path)
            .map_err(Error::from)
            .with_context(|| format!("Failed to initialize object store {:?}", self.path))?;
        tracing::debug!("Initialized object store for {} at {:?}", self.url, self.path);
        Ok(repo)
    }

    /// Delete the store and everything in it.
    /// Deleting a store that does not exist succeeds.
    pub fn delete(&self) -> Result<()> {
        match fs::remove_dir_all(&self.path) {
            Ok(()) => {
                tracing::info!("Deleted object store for {}", self.url);
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::StoreDeletion(format!("{:?}: {}", self.path, e)).into()),
        }
    }

    /// Open a reader that can be shared by concurrent blob reads
    pub fn reader(&self) -> Result<StoreReader> {
        let repo = self
            .open()?
            .ok_or_else(|| Error::ReadUnavailable(format!("no store at {:?}", self.path)))?;
        Ok(StoreReader::new(repo))
    }
}

impl MutableState for ObjectStore {
    fn read_state(&self) -> Result<MirrorState> {
        let state_path = self.state_path();
        if state_path.exists() {
            let content = fs::read_to_string(&state_path)
                .map_err(Error::from)
                .with_context(|| format!("Failed to read state file {:?}", state_path))?;
            Ok(serde_yaml::from_str(&content)
                .map_err(Error::from)
                .with_context(|| format!("Failed to parse state file {:?}", state_path))?)
        } else {
            Ok(MirrorState::default())
        }
    }

    fn write_state(&self, state: &MirrorState) -> Result<()> {
        let state_path = self.state_path();
        let temp_path = self.path.join(".git-mirror-state.yaml.tmp");

        // 1. Write to temp file
        let yaml = serde_yaml::to_string(state)
            .map_err(Error::from)
            .context("Failed to serialize state")?;
        fs::write(&temp_path, yaml)
            .map_err(Error::from)
            .with_context(|| format!("Failed to write state file {:?}", temp_path))?;

        // 2. Atomic rename (atomic on POSIX systems)
        fs::rename(&temp_path, &state_path)
            .map_err(Error::from)
            .with_context(|| format!("Failed to replace state file {:?}", state_path))?;

        Ok(())
    }
}

/// Blob reader over an opened store
pub struct StoreReader {
    repo: Mutex<Repository>,
}

impl StoreReader {
    pub fn new(repo: Repository) -> Self {
        StoreReader {
            repo: Mutex::new(repo),
        }
    }
}

impl BlobSource for StoreReader {
    fn read_blob(&self, id: &ContentId) -> Result<Option<Vec<u8>>> {
        let repo = self.repo.lock().unwrap_or_else(PoisonError::into_inner);
        let object = match repo.find_object(id.oid(), Some(ObjectType::Blob)) {
            Ok(object) => object,
            Err(e) if e.code() == ErrorCode::NotFound => return Ok(None),
            Err(e) => {
                return Err(Error::from(e)).with_context(|| format!("Failed to read blob {}", id))
            }
        };
        Ok(object.as_blob().map(|blob| blob.content().to_vec()))
    }
}
