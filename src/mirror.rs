//! Repository handle tying the three phases together
//!
//! A [`Mirror`] owns the object store of one remote URL. Network and disk
//! work runs on tokio's blocking pool; callers await the results and observe
//! progress through the sinks registered at [`Mirror::open`].

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::config::MirrorConfig;
use crate::destination::{Destination, FsDestination};
use crate::error::Error;
use crate::materialize::{MaterializeReport, Materializer};
use crate::progress::{HistorySink, Progress, ProgressSink};
use crate::storage::{ContentId, MutableState, ObjectStore, StoreReader};
use crate::sync::{self, CommitRecord, RemoteSpec, RemoteSync, RepoState, SyncMode};
use crate::walk::{self, WalkResult};

/// What `Mirror::update` did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateOutcome {
    pub mode: SyncMode,
    /// Whether only changes since the recorded checkpoint were written
    pub incremental: bool,
    pub report: MaterializeReport,
    /// Checkpoint now recorded for the destination
    pub checkpoint: Option<ContentId>,
}

pub struct Mirror {
    sync: Arc<RemoteSync>,
    progress: Arc<dyn ProgressSink>,
    /// Why the configured relay cannot be used; only fetches fail on it
    relay_error: Option<String>,
}

impl Mirror {
    /// Open the handle for `url`. The current history is pushed to
    /// `history` right away.
    ///
    /// A misconfigured relay does not prevent opening: local operations keep
    /// working and `synchronize` reports the problem as a network error.
    pub fn open(
        config: &MirrorConfig,
        url: &str,
        progress: Arc<dyn ProgressSink>,
        history: Arc<dyn HistorySink>,
    ) -> Result<Self> {
        let (cors_proxy, relay_error) = match config.resolve_cors_proxy() {
            Ok(cors_proxy) => (cors_proxy, None),
            Err(e) => {
                tracing::warn!("Relay unusable, fetches will fail: {:#}", e);
                (None, Some(format!("{:#}", e)))
            }
        };
        let remote = RemoteSpec::new(url)
            .with_cors_proxy(cors_proxy)
            .with_depth(config.depth);
        let store = ObjectStore::new(&config.store_dir, url);
        let sync = RemoteSync::new(store, remote, Arc::clone(&progress), history);
        sync.emit_history();
        Ok(Mirror {
            sync: Arc::new(sync),
            progress,
            relay_error,
        })
    }

    pub fn url(&self) -> &str {
        self.sync.remote().url()
    }

    pub fn state(&self) -> RepoState {
        self.sync.state()
    }

    pub fn store(&self) -> &ObjectStore {
        self.sync.store()
    }

    pub fn head_checkpoint(&self) -> Option<ContentId> {
        self.sync.head_checkpoint()
    }

    pub fn history(&self) -> Vec<CommitRecord> {
        self.sync.history()
    }

    /// Clone or pull. Must not run concurrently with itself on one handle.
    pub async fn synchronize(&self) -> Result<SyncMode> {
        if let Some(problem) = &self.relay_error {
            return Err(Error::Network(problem.clone()).into());
        }
        let sync = Arc::clone(&self.sync);
        tokio::task::spawn_blocking(move || sync.synchronize()).await?
    }

    /// Delete the local store
    pub async fn clear(&self) -> bool {
        let sync = Arc::clone(&self.sync);
        match tokio::task::spawn_blocking(move || sync.clear()).await {
            Ok(cleared) => cleared,
            Err(e) => {
                tracing::error!("Clear task failed: {}", e);
                false
            }
        }
    }

    /// Write every file of the current snapshot into `dest`
    pub async fn copy_full<D: Destination>(&self, dest: D) -> Result<MaterializeReport> {
        self.copy(dest, None).await
    }

    /// Write the files that changed since checkpoint `since` into `dest`
    pub async fn copy_incremental<D: Destination>(
        &self,
        dest: D,
        since: ContentId,
    ) -> Result<MaterializeReport> {
        self.copy(dest, Some(since)).await
    }

    async fn copy<D: Destination>(
        &self,
        dest: D,
        since: Option<ContentId>,
    ) -> Result<MaterializeReport> {
        self.progress
            .on_progress(Progress::new(0.0, "Processing files"));

        let store = self.sync.store().clone();
        let (walk, reader) = tokio::task::spawn_blocking(move || -> Result<(WalkResult, StoreReader)> {
            let repo = store
                .open()?
                .ok_or_else(|| Error::ReadUnavailable("nothing has been fetched yet".to_string()))?;
            let head = sync::read_head_checkpoint(&repo)?;
            let walk = match since {
                None => walk::walk_full(&repo, head)?,
                Some(baseline) => walk::walk_incremental(&repo, head, baseline)?,
            };
            Ok((walk, StoreReader::new(repo)))
        })
        .await??;

        tracing::info!("{} file(s) to write", walk.total);
        let materializer = Materializer::new(Arc::new(reader), Arc::clone(&self.progress));
        Ok(materializer.materialize(dest, walk).await)
    }

    /// Synchronize, then bring the directory `dest` up to date.
    ///
    /// The first update of a directory writes everything; later ones write
    /// only what changed since the checkpoint recorded for it. A checkpoint is
    /// recorded only when every targeted file was written, so skipped files
    /// are retried next time.
    pub async fn update(&self, dest: &Path) -> Result<UpdateOutcome> {
        let mode = self.synchronize().await?;

        let destination = FsDestination::create(dest)?;
        let key = destination
            .path()
            .canonicalize()
            .with_context(|| format!("Failed to resolve destination {:?}", dest))?
            .to_string_lossy()
            .into_owned();
        let recorded = self.store().read_state()?.checkpoint_for(&key);

        let (incremental, report) = match recorded {
            Some(since) => match self.copy_incremental(destination.clone(), since).await {
                Ok(report) => (true, report),
                Err(e) if matches!(e.downcast_ref::<Error>(), Some(Error::UnknownCheckpoint(_))) => {
                    tracing::warn!("Recorded checkpoint {} is gone, copying everything", since);
                    (false, self.copy_full(destination).await?)
                }
                Err(e) => return Err(e),
            },
            None => (false, self.copy_full(destination).await?),
        };

        let head = self.head_checkpoint();
        let checkpoint = match head {
            Some(head) if report.is_complete() => {
                self.store().update_state(|state| {
                    state.record(key.clone(), head);
                    Ok(())
                })?;
                Some(head)
            }
            _ => {
                if report.skipped > 0 {
                    tracing::warn!("{} file(s) skipped, keeping previous checkpoint", report.skipped);
                }
                recorded
            }
        };

        Ok(UpdateOutcome {
            mode,
            incremental,
            report,
            checkpoint,
        })
    }
}
