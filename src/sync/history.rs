use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use git2::{Repository, Sort};
use serde::Serialize;

use crate::error::Error;
use crate::storage::ContentId;

/// One commit of the mirrored branch
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitRecord {
    pub message: String,
    /// Root tree id, the checkpoint a destination is materialized from
    pub tree_id: ContentId,
    pub commit_id: ContentId,
    pub time: DateTime<Utc>,
}

/// Root tree of the commit HEAD points at
pub fn read_head_checkpoint(repo: &Repository) -> Result<ContentId> {
    let commit = repo
        .head()
        .and_then(|head| head.peel_to_commit())
        .map_err(|e| Error::ReadUnavailable(e.to_string()))?;
    Ok(commit.tree_id().into())
}

/// All commits reachable from HEAD, newest first
pub fn read_history(repo: &Repository) -> Result<Vec<CommitRecord>> {
    let mut revwalk = repo.revwalk().map_err(Error::from)?;
    revwalk
        .set_sorting(Sort::TOPOLOGICAL | Sort::TIME)
        .map_err(Error::from)?;
    revwalk
        .push_head()
        .map_err(|e| Error::ReadUnavailable(e.to_string()))?;

    let mut commits = Vec::new();
    for oid in revwalk {
        let oid = oid.map_err(Error::from).context("Failed to walk history")?;
        let commit = repo
            .find_commit(oid)
            .map_err(Error::from)
            .with_context(|| format!("Failed to read commit {}", oid))?;
        commits.push(CommitRecord {
            message: String::from_utf8_lossy(commit.message_bytes()).into_owned(),
            tree_id: commit.tree_id().into(),
            commit_id: oid.into(),
            time: DateTime::from_timestamp(commit.time().seconds(), 0).unwrap_or_default(),
        });
    }
    Ok(commits)
}
