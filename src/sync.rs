//! Remote synchronization: clone-or-pull into the local object store
//!
//! The store starts empty. The first `synchronize` performs a shallow,
//! single-branch clone of the remote's default branch; later calls fetch the
//! same branch again and move the local branch to the fetched tip. The
//! mirror is read-only, so the local branch is simply replaced and never
//! merged.

mod history;
mod remote;

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result};
use git2::{Direction, FetchOptions, Progress as TransferStats, Remote, RemoteCallbacks, Repository};

pub use history::{read_head_checkpoint, read_history, CommitRecord};
pub use remote::RemoteSpec;

use crate::error::Error;
use crate::progress::{HistorySink, Progress, ProgressSink};
use crate::storage::{ContentId, ObjectStore};

const REMOTE_NAME: &str = "origin";

/// Which fetch `synchronize` ran
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    Clone,
    Pull,
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncMode::Clone => write!(f, "clone"),
            SyncMode::Pull => write!(f, "pull"),
        }
    }
}

/// Lifecycle of one mirrored repository
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepoState {
    Uninitialized,
    Cloning,
    Ready,
    Pulling,
    Cleared,
}

/// Counters reported by the transport while objects arrive
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferCounts {
    pub received_objects: usize,
    pub total_objects: usize,
    pub indexed_deltas: usize,
    pub total_deltas: usize,
    pub received_bytes: usize,
}

impl TransferCounts {
    fn from_stats(stats: &TransferStats<'_>) -> Self {
        TransferCounts {
            received_objects: stats.received_objects(),
            total_objects: stats.total_objects(),
            indexed_deltas: stats.indexed_deltas(),
            total_deltas: stats.total_deltas(),
            received_bytes: stats.received_bytes(),
        }
    }

    /// Progress event for the current transfer phase
    pub fn to_progress(&self) -> Progress {
        if self.total_objects == 0 {
            return Progress::new(
                0.0,
                format!("Receiving objects ({} bytes)", self.received_bytes),
            );
        }
        if self.received_objects >= self.total_objects && self.total_deltas > 0 {
            return Progress::counted(
                self.indexed_deltas,
                self.total_deltas,
                format!("Resolving deltas ({}/{})", self.indexed_deltas, self.total_deltas),
            );
        }
        Progress::counted(
            self.received_objects,
            self.total_objects,
            format!("Receiving objects ({}/{})", self.received_objects, self.total_objects),
        )
    }
}

/// Depth as the transport takes it
fn fetch_depth(depth: u32) -> Result<i32> {
    i32::try_from(depth)
        .map_err(|_| Error::Config(format!("clone depth {} is too large", depth)).into())
}

/// Drives clone and pull for one remote and reports history changes.
///
/// Calls to `synchronize` must be serialized by the caller.
pub struct RemoteSync {
    store: ObjectStore,
    remote: RemoteSpec,
    state: Mutex<RepoState>,
    progress: Arc<dyn ProgressSink>,
    history: Arc<dyn HistorySink>,
}

impl RemoteSync {
    pub fn new(
        store: ObjectStore,
        remote: RemoteSpec,
        progress: Arc<dyn ProgressSink>,
        history: Arc<dyn HistorySink>,
    ) -> Self {
        let sync = RemoteSync {
            store,
            remote,
            state: Mutex::new(RepoState::Uninitialized),
            progress,
            history,
        };
        if sync.head_checkpoint().is_some() {
            sync.set_state(RepoState::Ready);
        }
        sync
    }

    pub fn store(&self) -> &ObjectStore {
        &self.store
    }

    pub fn remote(&self) -> &RemoteSpec {
        &self.remote
    }

    pub fn state(&self) -> RepoState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: RepoState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// Clone when the store has no checkpoint yet, pull otherwise
    pub fn synchronize(&self) -> Result<SyncMode> {
        let mode = if self.head_checkpoint().is_some() {
            SyncMode::Pull
        } else {
            SyncMode::Clone
        };

        tracing::info!("git {} {}", mode, self.remote.url());
        let (running, failed) = match mode {
            SyncMode::Clone => (RepoState::Cloning, RepoState::Uninitialized),
            SyncMode::Pull => (RepoState::Pulling, RepoState::Ready),
        };
        self.set_state(running);

        let result = match mode {
            SyncMode::Clone => self.clone_remote(),
            SyncMode::Pull => self.pull_remote(),
        };
        if let Err(e) = result {
            self.set_state(failed);
            return Err(e);
        }

        self.set_state(RepoState::Ready);
        self.emit_history();
        Ok(mode)
    }

    /// Delete the object store; false if it could not be removed
    pub fn clear(&self) -> bool {
        match self.store.delete() {
            Ok(()) => {
                self.set_state(RepoState::Cleared);
                self.history.on_history(&[]);
                true
            }
            Err(e) => {
                tracing::warn!("Failed to clear store for {}: {:#}", self.remote.url(), e);
                false
            }
        }
    }

    /// Root tree id of the current head commit, if there is one
    pub fn head_checkpoint(&self) -> Option<ContentId> {
        let repo = match self.store.open() {
            Ok(Some(repo)) => repo,
            Ok(None) => return None,
            Err(e) => {
                tracing::debug!("No checkpoint, store unreadable: {:#}", e);
                return None;
            }
        };
        history::read_head_checkpoint(&repo).ok()
    }

    /// Commit history of the mirrored branch, newest first
    pub fn history(&self) -> Vec<CommitRecord> {
        match self.store.open() {
            Ok(Some(repo)) => history::read_history(&repo).unwrap_or_else(|e| {
                tracing::debug!("History unavailable: {:#}", e);
                Vec::new()
            }),
            Ok(None) => Vec::new(),
            Err(e) => {
                tracing::debug!("History unavailable: {:#}", e);
                Vec::new()
            }
        }
    }

    /// Push the current history to the history sink
    pub fn emit_history(&self) {
        self.history.on_history(&self.history());
    }

    fn clone_remote(&self) -> Result<()> {
        let repo = self.store.open_or_init()?;
        let branch = self.default_branch(&repo)?;
        self.fetch_branch(&repo, &branch)
    }

    fn pull_remote(&self) -> Result<()> {
        let repo = self
            .store
            .open()?
            .ok_or_else(|| Error::ReadUnavailable("object store disappeared".to_string()))?;
        let head = repo.find_reference("HEAD").map_err(Error::from)?;
        let branch = head
            .symbolic_target()
            .context("HEAD of the object store is not a branch")?
            .to_string();
        self.fetch_branch(&repo, &branch)
    }

    /// The remote's `origin` entry, pointed at the current fetch URL
    fn origin<'r>(&self, repo: &'r Repository) -> Result<Remote<'r>> {
        let url = self.remote.fetch_url();
        let remote = match repo.find_remote(REMOTE_NAME) {
            Ok(remote) if remote.url() == Some(url.as_str()) => remote,
            Ok(_) => {
                repo.remote_set_url(REMOTE_NAME, &url).map_err(Error::from)?;
                repo.find_remote(REMOTE_NAME).map_err(Error::from)?
            }
            Err(_) => repo.remote(REMOTE_NAME, &url).map_err(Error::from)?,
        };
        Ok(remote)
    }

    fn default_branch(&self, repo: &Repository) -> Result<String> {
        let mut remote = self.origin(repo)?;
        remote
            .connect(Direction::Fetch)
            .map_err(|e| Error::Network(e.to_string()))
            .with_context(|| format!("Failed to connect to {}", self.remote.url()))?;
        let branch = remote
            .default_branch()
            .map_err(|e| Error::Network(format!("remote has no default branch: {}", e)))?;
        let branch = branch
            .as_str()
            .context("Remote default branch is not valid UTF-8")?
            .to_string();
        // Best effort; the fetch opens its own connection.
        let _ = remote.disconnect();
        Ok(branch)
    }

    /// Fetch `branch` (a full `refs/heads/...` name) and move the local
    /// branch and HEAD to its tip
    fn fetch_branch(&self, repo: &Repository, branch: &str) -> Result<()> {
        let short = branch.strip_prefix("refs/heads/").unwrap_or(branch);
        let tracking = format!("refs/remotes/{}/{}", REMOTE_NAME, short);
        let refspec = format!("+{}:{}", branch, tracking);

        let sink = Arc::clone(&self.progress);
        let mut callbacks = RemoteCallbacks::new();
        callbacks.transfer_progress(move |stats| {
            sink.on_progress(TransferCounts::from_stats(&stats).to_progress());
            true
        });

        let mut fetch_options = FetchOptions::new();
        fetch_options.remote_callbacks(callbacks);
        if let Some(depth) = self.remote.shallow_depth() {
            fetch_options.depth(fetch_depth(depth)?);
        }

        let mut remote = self.origin(repo)?;
        remote
            .fetch(&[refspec.as_str()], Some(&mut fetch_options), None)
            .map_err(|e| Error::Network(e.to_string()))
            .with_context(|| format!("Failed to fetch {} from {}", branch, self.remote.url()))?;

        let tip = repo
            .refname_to_id(&tracking)
            .map_err(Error::from)
            .with_context(|| format!("Fetch did not update {}", tracking))?;
        repo.reference(branch, tip, true, "git-mirror: fetch")
            .map_err(Error::from)?;
        repo.set_head(branch).map_err(Error::from)?;

        tracing::info!("{} is now at {}", branch, tip);
        Ok(())
    }
}
